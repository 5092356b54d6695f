//! Tracking entity models and DTOs.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use trackpulse_core::types::{DbId, Timestamp};

/// A row from the `trackings` table.
///
/// `status` holds one of the normalized values from
/// [`TrackingStatus`](trackpulse_core::TrackingStatus); `status_raw` is the
/// verbatim carrier string it was derived from.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Tracking {
    pub id: DbId,
    pub carrier_code: String,
    pub track_number: String,
    pub status: String,
    pub status_raw: String,
    pub status_at: Option<Timestamp>,
    pub last_checked_at: Option<Timestamp>,
    /// Scheduling cursor: the row is due once `next_check_at <= now`.
    pub next_check_at: Timestamp,
    pub check_fail_count: i32,
    pub last_error: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// A row from the `tracking_events` table.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct TrackingEvent {
    pub id: DbId,
    pub tracking_id: DbId,
    pub status: String,
    pub status_raw: String,
    /// Carrier-authored event time.
    pub event_time: Timestamp,
    pub location: String,
    pub message: String,
    pub payload: Option<serde_json::Value>,
    pub created_at: Timestamp,
}

/// Input for registering a tracking.
#[derive(Debug, Clone, Deserialize)]
pub struct TrackingCreateInput {
    pub carrier_code: String,
    pub track_number: String,
}

/// An event carried inside a [`TrackingUpdate`], not yet persisted.
#[derive(Debug, Clone)]
pub struct NewTrackingEvent {
    pub status: String,
    pub status_raw: String,
    pub event_time: Timestamp,
    pub location: Option<String>,
    pub message: Option<String>,
    pub payload: Option<serde_json::Value>,
}

/// The state change applied to one tracking by the update applier.
///
/// Exactly one of `error` or the status fields is meaningful; see
/// [`TrackingRepo::apply_update`](crate::repositories::TrackingRepo::apply_update).
#[derive(Debug, Clone)]
pub struct TrackingUpdate {
    pub tracking_id: DbId,
    pub checked_at: Timestamp,
    pub status: String,
    pub status_raw: String,
    pub status_at: Option<Timestamp>,
    pub next_check_at: Timestamp,
    pub events: Vec<NewTrackingEvent>,
    pub error: Option<String>,
}
