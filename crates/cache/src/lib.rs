//! Redis-backed byte cache and rate limiting for trackpulse.
//!
//! Both types share one failure philosophy: the cache is a performance
//! aid whose errors callers may ignore, while the rate limiter's counters
//! are the shared state that makes per-carrier limits hold fleet-wide.

pub mod bytes_cache;
pub mod rate_limiter;

pub use bytes_cache::BytesCache;
pub use rate_limiter::RateLimiter;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
}
