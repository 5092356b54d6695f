//! Shared sliding-window counter for admission control.

use std::time::Duration;

use redis::aio::ConnectionManager;

use crate::CacheError;

/// Counts calls per key across every process sharing the Redis instance.
#[derive(Clone)]
pub struct RateLimiter {
    conn: ConnectionManager,
}

impl RateLimiter {
    /// Connect to Redis at `url`.
    pub async fn connect(url: &str) -> Result<Self, CacheError> {
        let client = redis::Client::open(url)?;
        let conn = client.get_connection_manager().await?;
        Ok(Self { conn })
    }

    /// Increment the counter at `key` and reset its expiry to `window`.
    ///
    /// Returns `(allowed, current_count)` where `allowed` holds iff the
    /// post-increment count is within `limit`. The counter is bumped even
    /// on denial; this is a soft limit and the caller decides how to pace.
    pub async fn allow(
        &self,
        key: &str,
        limit: i64,
        window: Duration,
    ) -> Result<(bool, i64), CacheError> {
        let mut conn = self.conn.clone();
        let (count,): (i64,) = redis::pipe()
            .atomic()
            .incr(key, 1i64)
            .expire(key, window.as_secs() as i64)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok((count <= limit, count))
    }
}
