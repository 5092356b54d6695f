//! Idempotent schema bootstrap.
//!
//! The store owns its schema: every statement here is safe to re-run, so
//! any instance (api or worker) can bootstrap on startup without
//! coordination.

use sqlx::PgPool;

/// DDL executed on startup, in order.
const STATEMENTS: &[&str] = &[
    r#"
CREATE TABLE IF NOT EXISTS trackings (
    id BIGSERIAL PRIMARY KEY,
    carrier_code TEXT NOT NULL,
    track_number TEXT NOT NULL,
    status TEXT NOT NULL,
    status_raw TEXT NOT NULL,
    status_at TIMESTAMPTZ NULL,
    last_checked_at TIMESTAMPTZ NULL,
    next_check_at TIMESTAMPTZ NOT NULL,
    check_fail_count INT NOT NULL DEFAULT 0,
    last_error TEXT NULL,
    created_at TIMESTAMPTZ NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL,
    CONSTRAINT uq_trackings_carrier_track UNIQUE (carrier_code, track_number)
)
"#,
    "CREATE INDEX IF NOT EXISTS idx_trackings_next_check_at ON trackings(next_check_at)",
    r#"
CREATE TABLE IF NOT EXISTS tracking_events (
    id BIGSERIAL PRIMARY KEY,
    tracking_id BIGINT NOT NULL REFERENCES trackings(id) ON DELETE CASCADE,
    status TEXT NOT NULL,
    status_raw TEXT NOT NULL,
    event_time TIMESTAMPTZ NOT NULL,
    location TEXT NOT NULL DEFAULT '',
    message TEXT NOT NULL DEFAULT '',
    payload JSONB NULL,
    created_at TIMESTAMPTZ NOT NULL
)
"#,
    "CREATE INDEX IF NOT EXISTS idx_tracking_events_tracking_id_event_time \
     ON tracking_events(tracking_id, event_time DESC)",
    // Enforce de-duplication of events for a tracking.
    "CREATE UNIQUE INDEX IF NOT EXISTS uq_tracking_events_dedup \
     ON tracking_events(tracking_id, status_raw, event_time, location, message)",
];

/// Create the trackings/tracking_events tables and their indexes.
pub async fn bootstrap_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
    for statement in STATEMENTS {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}
