//! Repository for the `trackings` table.
//!
//! Holds the two operations the whole system hinges on: the atomic
//! batch claim used by the poll scheduler ([`TrackingRepo::claim_due`])
//! and the idempotent state write used by the update applier
//! ([`TrackingRepo::apply_update`]).

use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use sqlx::PgPool;
use trackpulse_core::types::{DbId, Timestamp};
use trackpulse_core::TrackingStatus;

use crate::models::{Tracking, TrackingCreateInput, TrackingUpdate};

/// Column list for `trackings` queries.
const COLUMNS: &str = "\
    id, carrier_code, track_number, status, status_raw, \
    status_at, last_checked_at, next_check_at, \
    check_fail_count, last_error, created_at, updated_at";

/// Status assigned to freshly registered trackings.
const INITIAL_STATUS_RAW: &str = "UNKNOWN";

/// Provides persistence operations for trackings.
pub struct TrackingRepo;

impl TrackingRepo {
    /// Upsert a batch of trackings on the `(carrier_code, track_number)`
    /// natural key.
    ///
    /// Absent rows are inserted with `status = UNKNOWN` and
    /// `next_check_at = now` so the scheduler picks them up on its next
    /// tick. Existing rows are left untouched. Returns the rows in the
    /// order of the resolved ids after upsert.
    pub async fn create_or_get(
        pool: &PgPool,
        items: &[TrackingCreateInput],
    ) -> Result<Vec<Tracking>, sqlx::Error> {
        let now = Utc::now();

        let mut tx = pool.begin().await?;
        let mut ids: Vec<DbId> = Vec::with_capacity(items.len());
        for item in items {
            let (id,): (DbId,) = sqlx::query_as(
                "INSERT INTO trackings \
                     (carrier_code, track_number, status, status_raw, next_check_at, \
                      created_at, updated_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $6) \
                 ON CONFLICT (carrier_code, track_number) \
                 DO UPDATE SET updated_at = trackings.updated_at \
                 RETURNING id",
            )
            .bind(&item.carrier_code)
            .bind(&item.track_number)
            .bind(TrackingStatus::Unknown.as_str())
            .bind(INITIAL_STATUS_RAW)
            .bind(now)
            .bind(now)
            .fetch_one(&mut *tx)
            .await?;
            ids.push(id);
        }
        tx.commit().await?;

        let rows = Self::get_by_ids(pool, &ids).await?;

        // Re-order to match the upserted ids (ANY($1) gives no order).
        let mut by_id: HashMap<DbId, Tracking> =
            rows.into_iter().map(|t| (t.id, t)).collect();
        Ok(ids.iter().filter_map(|id| by_id.remove(id)).collect())
    }

    /// Fetch the subset of existing rows for `ids`, order unspecified.
    pub async fn get_by_ids(pool: &PgPool, ids: &[DbId]) -> Result<Vec<Tracking>, sqlx::Error> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let query = format!("SELECT {COLUMNS} FROM trackings WHERE id = ANY($1)");
        sqlx::query_as::<_, Tracking>(&query)
            .bind(ids)
            .fetch_all(pool)
            .await
    }

    /// Make a tracking due immediately (`next_check_at := now()`), so the
    /// next scheduler tick claims it.
    pub async fn refresh(pool: &PgPool, tracking_id: DbId) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE trackings SET next_check_at = NOW(), updated_at = NOW() WHERE id = $1",
        )
        .bind(tracking_id)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Atomically claim up to `limit` due trackings and lease them.
    ///
    /// Selects rows with `next_check_at <= now` that are not DELIVERED,
    /// oldest cursor first, and advances `next_check_at` to `now + lease`
    /// in the same statement. `FOR UPDATE SKIP LOCKED` makes concurrent
    /// claimers partition the due set instead of double-dispatching.
    ///
    /// There is no explicit release: a crashed worker's lease simply
    /// expires when wall-clock reaches the advanced cursor.
    pub async fn claim_due(
        pool: &PgPool,
        now: Timestamp,
        limit: i64,
        lease: Duration,
    ) -> Result<Vec<Tracking>, sqlx::Error> {
        let lease_until = now + chrono::Duration::seconds(lease.as_secs() as i64);

        let query = format!(
            "WITH due AS ( \
                 SELECT id FROM trackings \
                 WHERE next_check_at <= $1 AND status <> $2 \
                 ORDER BY next_check_at ASC \
                 LIMIT $3 \
                 FOR UPDATE SKIP LOCKED \
             ) \
             UPDATE trackings t \
             SET next_check_at = $4, updated_at = NOW() \
             FROM due \
             WHERE t.id = due.id \
             RETURNING {columns}",
            columns = qualified_columns("t"),
        );
        sqlx::query_as::<_, Tracking>(&query)
            .bind(now)
            .bind(TrackingStatus::Delivered.as_str())
            .bind(limit)
            .bind(lease_until)
            .fetch_all(pool)
            .await
    }

    /// Apply one `TrackingUpdated` record in a single transaction.
    ///
    /// Error branch: bump `check_fail_count`, record `last_error`, move the
    /// cursor; status fields and events stay untouched. Success branch:
    /// overwrite status fields, reset the fail state, insert events with
    /// duplicate-key conflicts silently ignored (the dedup index makes
    /// replays a no-op).
    pub async fn apply_update(pool: &PgPool, upd: &TrackingUpdate) -> Result<(), sqlx::Error> {
        let mut tx = pool.begin().await?;

        match upd.error.as_deref() {
            Some(error) if !error.is_empty() => {
                sqlx::query(
                    "UPDATE trackings \
                     SET last_checked_at = $2, \
                         check_fail_count = check_fail_count + 1, \
                         last_error = $3, \
                         next_check_at = $4, \
                         updated_at = NOW() \
                     WHERE id = $1",
                )
                .bind(upd.tracking_id)
                .bind(upd.checked_at)
                .bind(error)
                .bind(upd.next_check_at)
                .execute(&mut *tx)
                .await?;
            }
            _ => {
                sqlx::query(
                    "UPDATE trackings \
                     SET status = $3, \
                         status_raw = $4, \
                         status_at = $5, \
                         last_checked_at = $2, \
                         check_fail_count = 0, \
                         last_error = NULL, \
                         next_check_at = $6, \
                         updated_at = NOW() \
                     WHERE id = $1",
                )
                .bind(upd.tracking_id)
                .bind(upd.checked_at)
                .bind(&upd.status)
                .bind(&upd.status_raw)
                .bind(upd.status_at)
                .bind(upd.next_check_at)
                .execute(&mut *tx)
                .await?;

                for event in &upd.events {
                    sqlx::query(
                        "INSERT INTO tracking_events \
                             (tracking_id, status, status_raw, event_time, location, \
                              message, payload, created_at) \
                         VALUES ($1, $2, $3, $4, $5, $6, $7, NOW()) \
                         ON CONFLICT (tracking_id, status_raw, event_time, location, message) \
                         DO NOTHING",
                    )
                    .bind(upd.tracking_id)
                    .bind(&event.status)
                    .bind(&event.status_raw)
                    .bind(event.event_time)
                    .bind(event.location.as_deref().unwrap_or_default())
                    .bind(event.message.as_deref().unwrap_or_default())
                    .bind(&event.payload)
                    .execute(&mut *tx)
                    .await?;
                }
            }
        }

        tx.commit().await
    }
}

/// The [`COLUMNS`] list with every column prefixed by a table alias, for
/// queries where `trackings` is joined against a CTE.
fn qualified_columns(alias: &str) -> String {
    COLUMNS
        .split(", ")
        .map(|c| format!("{alias}.{}", c.trim()))
        .collect::<Vec<_>>()
        .join(", ")
}
