//! Postgres storage layer for trackpulse.
//!
//! Provides the connection pool, the idempotent schema bootstrap, row
//! models, and zero-sized repositories with async methods taking `&PgPool`.

pub mod models;
pub mod repositories;
mod schema;

use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

pub use schema::bootstrap_schema;

/// Convenience alias so downstream crates do not import sqlx directly
/// just for the pool type.
pub type DbPool = PgPool;

/// Maximum number of connections in the pool.
const MAX_CONNECTIONS: u32 = 10;

/// Delay between connection attempts in [`connect_with_retry`].
const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Create a connection pool against the given database URL.
pub async fn create_pool(database_url: &str) -> Result<DbPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(MAX_CONNECTIONS)
        .connect(database_url)
        .await
}

/// Create a connection pool, retrying for up to `wait` while the database
/// comes up. Containerized deployments routinely start the application
/// before Postgres is ready to accept connections.
pub async fn connect_with_retry(database_url: &str, wait: Duration) -> Result<DbPool, sqlx::Error> {
    let deadline = tokio::time::Instant::now() + wait;
    loop {
        match create_pool(database_url).await {
            Ok(pool) => return Ok(pool),
            Err(e) if tokio::time::Instant::now() < deadline => {
                tracing::warn!(error = %e, "Database not ready, retrying");
                tokio::time::sleep(RETRY_DELAY).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Verify the database is reachable.
pub async fn health_check(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}
