use chrono::{DateTime, Utc};

/// Database row identifier (Postgres BIGSERIAL).
pub type DbId = i64;

/// Timestamp type used across the platform (UTC, TIMESTAMPTZ in Postgres).
pub type Timestamp = DateTime<Utc>;
