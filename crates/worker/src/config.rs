//! Worker configuration from environment variables.

use std::time::Duration;

use trackpulse_poller::{PlannerConfig, PollerSettings};

/// Poll-worker configuration.
///
/// Zeroed scheduling fields mean "use the built-in default"; the poller
/// and planner sanitize them on construction.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Ops server bind address (default: `0.0.0.0`).
    pub host: String,
    /// Ops server bind port (default: `8082`).
    pub port: u16,

    pub poll_interval_secs: u64,
    pub batch_size: i64,
    pub concurrency: usize,
    pub lease_secs: u64,
    pub rate_limit_per_minute: i64,
    pub rate_limit_cdek_per_minute: i64,
    pub rate_limit_post_ru_per_minute: i64,

    pub next_check_in_transit_min_secs: u64,
    pub next_check_in_transit_max_secs: u64,
    pub next_check_unknown_secs: u64,
    pub backoff_1_secs: u64,
    pub backoff_2_secs: u64,
    pub backoff_3_secs: u64,
    pub backoff_4_secs: u64,

    /// Carrier adapter mode: `"v1"`, `"track24"`, or empty for the fake.
    pub carrier_mode: String,
    pub carrier_base_url: String,
    pub carrier_api_key: String,
    pub carrier_domain: String,

    pub bus_topic: String,
    pub bus_partitions: i16,

    /// Redis URL for the shared rate-limit counters; unset disables
    /// rate limiting.
    pub redis_url: Option<String>,
}

impl WorkerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                          | Default            |
    /// |----------------------------------|--------------------|
    /// | `WORKER_HOST`                    | `0.0.0.0`          |
    /// | `WORKER_PORT`                    | `8082`             |
    /// | `POLL_INTERVAL_SECS`             | `2`                |
    /// | `BATCH_SIZE`                     | `100`              |
    /// | `CONCURRENCY`                    | `10`               |
    /// | `LEASE_SECS`                     | `120`              |
    /// | `RATE_LIMIT_PER_MINUTE`          | `120`              |
    /// | `RATE_LIMIT_CDEK_PER_MINUTE`     | `0` (use default)  |
    /// | `RATE_LIMIT_POST_RU_PER_MINUTE`  | `0` (use default)  |
    /// | `NEXT_CHECK_*` / `BACKOFF_*_SECS`| `0` (use default)  |
    /// | `CARRIER_MODE`                   | (empty, fake)      |
    /// | `CARRIER_BASE_URL`               | (empty, fake)      |
    /// | `CARRIER_API_KEY`                | (empty)            |
    /// | `CARRIER_DOMAIN`                 | (empty)            |
    /// | `BUS_TOPIC`                      | `tracking.updated` |
    /// | `BUS_PARTITIONS`                 | `16`               |
    /// | `REDIS_URL`                      | (unset, no limits) |
    pub fn from_env() -> Self {
        Self {
            host: std::env::var("WORKER_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: env_parse("WORKER_PORT", 8082),

            poll_interval_secs: env_parse("POLL_INTERVAL_SECS", 2),
            batch_size: env_parse("BATCH_SIZE", 100),
            concurrency: env_parse("CONCURRENCY", 10),
            lease_secs: env_parse("LEASE_SECS", 120),
            rate_limit_per_minute: env_parse("RATE_LIMIT_PER_MINUTE", 120),
            rate_limit_cdek_per_minute: env_parse("RATE_LIMIT_CDEK_PER_MINUTE", 0),
            rate_limit_post_ru_per_minute: env_parse("RATE_LIMIT_POST_RU_PER_MINUTE", 0),

            next_check_in_transit_min_secs: env_parse("NEXT_CHECK_IN_TRANSIT_MIN_SECS", 0),
            next_check_in_transit_max_secs: env_parse("NEXT_CHECK_IN_TRANSIT_MAX_SECS", 0),
            next_check_unknown_secs: env_parse("NEXT_CHECK_UNKNOWN_SECS", 0),
            backoff_1_secs: env_parse("BACKOFF_1_SECS", 0),
            backoff_2_secs: env_parse("BACKOFF_2_SECS", 0),
            backoff_3_secs: env_parse("BACKOFF_3_SECS", 0),
            backoff_4_secs: env_parse("BACKOFF_4_SECS", 0),

            carrier_mode: std::env::var("CARRIER_MODE").unwrap_or_default(),
            carrier_base_url: std::env::var("CARRIER_BASE_URL").unwrap_or_default(),
            carrier_api_key: std::env::var("CARRIER_API_KEY").unwrap_or_default(),
            carrier_domain: std::env::var("CARRIER_DOMAIN").unwrap_or_default(),

            bus_topic: std::env::var("BUS_TOPIC")
                .unwrap_or_else(|_| trackpulse_bus::TOPIC_TRACKING_UPDATED.into()),
            bus_partitions: env_parse("BUS_PARTITIONS", 16),

            redis_url: std::env::var("REDIS_URL").ok().filter(|s| !s.is_empty()),
        }
    }

    /// Scheduler settings; zeroes collapse to defaults inside the poller.
    pub fn poller_settings(&self) -> PollerSettings {
        PollerSettings {
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            batch_size: self.batch_size,
            concurrency: self.concurrency,
            lease: Duration::from_secs(self.lease_secs),
            rate_limit_per_minute: self.rate_limit_per_minute,
            rate_limit_cdek_per_minute: self.rate_limit_cdek_per_minute,
            rate_limit_post_ru_per_minute: self.rate_limit_post_ru_per_minute,
        }
    }

    /// Planner delays; zeroes collapse to defaults inside the planner.
    pub fn planner_config(&self) -> PlannerConfig {
        PlannerConfig {
            in_transit_min_delay: Duration::from_secs(self.next_check_in_transit_min_secs),
            in_transit_max_delay: Duration::from_secs(self.next_check_in_transit_max_secs),
            unknown_delay: Duration::from_secs(self.next_check_unknown_secs),
            backoff1: Duration::from_secs(self.backoff_1_secs),
            backoff2: Duration::from_secs(self.backoff_2_secs),
            backoff3: Duration::from_secs(self.backoff_3_secs),
            backoff4: Duration::from_secs(self.backoff_4_secs),
            delivered_delay: Duration::ZERO,
        }
    }
}

/// Read an env var and parse it, falling back to `default` when unset.
/// Panics on malformed values: misconfiguration should fail fast.
fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T
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
