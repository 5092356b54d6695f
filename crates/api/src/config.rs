/// API server configuration loaded from environment variables.
///
/// All fields have defaults suitable for local development; override via
/// environment variables in production.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `8081`).
    pub port: u16,
    /// Redis URL for the current-status cache; unset disables the cache.
    pub redis_url: Option<String>,
    /// Cache TTL for current-status entries; `0` disables the cache.
    pub current_status_ttl_secs: u64,
    /// Stream topic carrying tracking updates.
    pub bus_topic: String,
    /// Stream partition count; must match the workers' setting.
    pub bus_partitions: i16,
}

impl ApiConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                   | Default            |
    /// |---------------------------|--------------------|
    /// | `HOST`                    | `0.0.0.0`          |
    /// | `PORT`                    | `8081`             |
    /// | `REDIS_URL`               | (unset, no cache)  |
    /// | `CURRENT_STATUS_TTL_SECS` | `30`               |
    /// | `BUS_TOPIC`               | `tracking.updated` |
    /// | `BUS_PARTITIONS`          | `16`               |
    pub fn from_env() -> Self {
        Self {
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: env_parse("PORT", 8081),
            redis_url: std::env::var("REDIS_URL").ok().filter(|s| !s.is_empty()),
            current_status_ttl_secs: env_parse("CURRENT_STATUS_TTL_SECS", 30),
            bus_topic: std::env::var("BUS_TOPIC")
                .unwrap_or_else(|_| trackpulse_bus::TOPIC_TRACKING_UPDATED.into()),
            bus_partitions: env_parse("BUS_PARTITIONS", 16),
        }
    }
}

/// Read an env var and parse it, falling back to `default` when unset.
/// Panics on malformed values: misconfiguration should fail fast.
pub(crate) fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T
where
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .unwrap_or_else(|e| panic!("{name} must be valid: {e}")),
        Err(_) => default,
    }
}
