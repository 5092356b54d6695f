//! Repository for the `tracking_events` table.

use sqlx::PgPool;
use trackpulse_core::types::DbId;

use crate::models::TrackingEvent;

/// Column list for `tracking_events` queries.
const COLUMNS: &str = "\
    id, tracking_id, status, status_raw, event_time, \
    location, message, payload, created_at";

/// Default page size when the caller passes an out-of-range limit.
const DEFAULT_LIMIT: i64 = 100;

/// Largest accepted page size.
const MAX_LIMIT: i64 = 500;

/// Provides read access to tracking event history.
pub struct TrackingEventRepo;

impl TrackingEventRepo {
    /// List events for one tracking, newest `event_time` first.
    ///
    /// Limits outside `1..=500` fall back to the default of 100; negative
    /// offsets become 0.
    pub async fn list(
        pool: &PgPool,
        tracking_id: DbId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<TrackingEvent>, sqlx::Error> {
        let limit = if limit <= 0 || limit > MAX_LIMIT {
            DEFAULT_LIMIT
        } else {
            limit
        };
        let offset = offset.max(0);

        let query = format!(
            "SELECT {COLUMNS} FROM tracking_events \
             WHERE tracking_id = $1 \
             ORDER BY event_time DESC \
             LIMIT $2 OFFSET $3"
        );
        sqlx::query_as::<_, TrackingEvent>(&query)
            .bind(tracking_id)
            .bind(limit)
            .bind(offset)
            .fetch_all(pool)
            .await
    }
}
