//! Raw byte cache with per-key TTL.

use std::time::Duration;

use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use crate::CacheError;

/// A thin get/set byte cache over Redis.
///
/// Connections are multiplexed through a [`ConnectionManager`], which
/// reconnects transparently, so the handle is cheap to clone and share.
#[derive(Clone)]
pub struct BytesCache {
    conn: ConnectionManager,
}

impl BytesCache {
    /// Connect to Redis at `url` (e.g. `redis://cache:6379`).
    pub async fn connect(url: &str) -> Result<Self, CacheError> {
        let client = redis::Client::open(url)?;
        let conn = client.get_connection_manager().await?;
        Ok(Self { conn })
    }

    /// Fetch a value. `Ok(None)` means a miss.
    pub async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let mut conn = self.conn.clone();
        let value: Option<Vec<u8>> = conn.get(key).await?;
        Ok(value)
    }

    /// Store a value with a TTL. Zero TTLs are rejected by Redis, so the
    /// caller is expected to treat `ttl <= 0` as cache-disabled and never
    /// get here.
    pub async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let () = conn.set_ex(key, value, ttl.as_secs()).await?;
        Ok(())
    }
}
