//! Idempotent bootstrap for the stream table.

use sqlx::PgPool;

const STATEMENTS: &[&str] = &[
    r#"
CREATE TABLE IF NOT EXISTS bus_messages (
    id BIGSERIAL PRIMARY KEY,
    topic TEXT NOT NULL,
    partition_no SMALLINT NOT NULL,
    partition_key TEXT NOT NULL,
    payload BYTEA NOT NULL,
    published_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    consumed_at TIMESTAMPTZ NULL
)
"#,
    // Partial index keeps the pending-fetch cheap no matter how much
    // consumed history is retained.
    "CREATE INDEX IF NOT EXISTS idx_bus_messages_pending \
     ON bus_messages(topic, partition_no, id) WHERE consumed_at IS NULL",
];

/// Create the `bus_messages` table and its pending index.
pub async fn bootstrap_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
    for statement in STATEMENTS {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}
