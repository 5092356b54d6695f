//! Re-check planning.
//!
//! A pure function from the outcome of a poll to the delay before the
//! next one:
//!
//! - DELIVERED is terminal, so its delay is effectively "never again"
//!   (the claim query filters DELIVERED out anyway).
//! - IN_TRANSIT re-checks at a uniformly random point inside a window,
//!   spreading the fleet's load across time.
//! - Anything else (including UNKNOWN) uses a fixed delay.
//! - Failures back off on a four-step ladder keyed by the fail count.

use std::time::Duration;

use rand::Rng;
use trackpulse_core::TrackingStatus;

/// Delay configuration. Any non-positive field collapses to its default
/// in [`Planner::new`].
#[derive(Debug, Clone)]
pub struct PlannerConfig {
    pub delivered_delay: Duration,
    pub in_transit_min_delay: Duration,
    pub in_transit_max_delay: Duration,
    pub unknown_delay: Duration,
    pub backoff1: Duration,
    pub backoff2: Duration,
    pub backoff3: Duration,
    pub backoff4: Duration,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            delivered_delay: Duration::from_secs(365 * 24 * 60 * 60),
            in_transit_min_delay: Duration::from_secs(30 * 60),
            in_transit_max_delay: Duration::from_secs(120 * 60),
            unknown_delay: Duration::from_secs(90 * 60),
            backoff1: Duration::from_secs(5 * 60),
            backoff2: Duration::from_secs(15 * 60),
            backoff3: Duration::from_secs(30 * 60),
            backoff4: Duration::from_secs(60 * 60),
        }
    }
}

/// Computes next-check and backoff delays.
#[derive(Debug, Clone)]
pub struct Planner {
    cfg: PlannerConfig,
}

impl Planner {
    /// Build a planner, normalizing the configuration: zero durations
    /// collapse to their defaults, and `max < min` collapses to
    /// `max := min`.
    pub fn new(mut cfg: PlannerConfig) -> Self {
        let defaults = PlannerConfig::default();
        if cfg.delivered_delay.is_zero() {
            cfg.delivered_delay = defaults.delivered_delay;
        }
        if cfg.in_transit_min_delay.is_zero() {
            cfg.in_transit_min_delay = defaults.in_transit_min_delay;
        }
        if cfg.in_transit_max_delay.is_zero() {
            cfg.in_transit_max_delay = defaults.in_transit_max_delay;
        }
        if cfg.unknown_delay.is_zero() {
            cfg.unknown_delay = defaults.unknown_delay;
        }
        if cfg.backoff1.is_zero() {
            cfg.backoff1 = defaults.backoff1;
        }
        if cfg.backoff2.is_zero() {
            cfg.backoff2 = defaults.backoff2;
        }
        if cfg.backoff3.is_zero() {
            cfg.backoff3 = defaults.backoff3;
        }
        if cfg.backoff4.is_zero() {
            cfg.backoff4 = defaults.backoff4;
        }
        if cfg.in_transit_max_delay < cfg.in_transit_min_delay {
            cfg.in_transit_max_delay = cfg.in_transit_min_delay;
        }
        Self { cfg }
    }

    /// The normalized configuration in effect.
    pub fn config(&self) -> &PlannerConfig {
        &self.cfg
    }

    /// Delay until the next check after a successful carrier response.
    ///
    /// IN_TRANSIT is sampled uniformly (second resolution, bounds
    /// inclusive); `min == max` short-circuits the sampling.
    pub fn next_check_delay(&self, status: TrackingStatus) -> Duration {
        match status {
            TrackingStatus::Delivered => self.cfg.delivered_delay,
            TrackingStatus::InTransit => {
                let min = self.cfg.in_transit_min_delay.as_secs();
                let max = self.cfg.in_transit_max_delay.as_secs();
                if min == max {
                    Duration::from_secs(min)
                } else {
                    Duration::from_secs(rand::rng().random_range(min..=max))
                }
            }
            TrackingStatus::Unknown => self.cfg.unknown_delay,
        }
    }

    /// Delay until the next check after the `next_fail_count`-th
    /// consecutive failure.
    pub fn backoff_delay(&self, next_fail_count: i32) -> Duration {
        match next_fail_count {
            i32::MIN..=1 => self.cfg.backoff1,
            2 => self.cfg.backoff2,
            3 => self.cfg.backoff3,
            _ => self.cfg.backoff4,
        }
    }
}

impl Default for Planner {
    fn default() -> Self {
        Self::new(PlannerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_ladder() {
        let planner = Planner::default();
        assert_eq!(planner.backoff_delay(0), Duration::from_secs(5 * 60));
        assert_eq!(planner.backoff_delay(1), Duration::from_secs(5 * 60));
        assert_eq!(planner.backoff_delay(2), Duration::from_secs(15 * 60));
        assert_eq!(planner.backoff_delay(3), Duration::from_secs(30 * 60));
        assert_eq!(planner.backoff_delay(4), Duration::from_secs(60 * 60));
        assert_eq!(planner.backoff_delay(100), Duration::from_secs(60 * 60));
    }

    #[test]
    fn backoff_is_monotone() {
        let planner = Planner::default();
        let mut previous = Duration::ZERO;
        for count in 0..10 {
            let delay = planner.backoff_delay(count);
            assert!(delay >= previous, "backoff decreased at count {count}");
            previous = delay;
        }
    }

    #[test]
    fn delivered_is_effectively_terminal() {
        let planner = Planner::default();
        assert_eq!(
            planner.next_check_delay(TrackingStatus::Delivered),
            Duration::from_secs(365 * 24 * 60 * 60)
        );
    }

    #[test]
    fn unknown_uses_fixed_delay() {
        let planner = Planner::default();
        assert_eq!(
            planner.next_check_delay(TrackingStatus::Unknown),
            Duration::from_secs(90 * 60)
        );
    }

    #[test]
    fn in_transit_stays_within_bounds() {
        let planner = Planner::default();
        let min = Duration::from_secs(30 * 60);
        let max = Duration::from_secs(120 * 60);
        for _ in 0..1000 {
            let delay = planner.next_check_delay(TrackingStatus::InTransit);
            assert!(delay >= min && delay <= max, "delay out of bounds: {delay:?}");
            assert_eq!(delay.subsec_nanos(), 0, "delay is not whole seconds");
        }
    }

    #[test]
    fn in_transit_equal_bounds_short_circuit() {
        let planner = Planner::new(PlannerConfig {
            in_transit_min_delay: Duration::from_secs(600),
            in_transit_max_delay: Duration::from_secs(600),
            ..Default::default()
        });
        assert_eq!(
            planner.next_check_delay(TrackingStatus::InTransit),
            Duration::from_secs(600)
        );
    }

    #[test]
    fn zero_fields_collapse_to_defaults() {
        let planner = Planner::new(PlannerConfig {
            delivered_delay: Duration::ZERO,
            in_transit_min_delay: Duration::ZERO,
            in_transit_max_delay: Duration::ZERO,
            unknown_delay: Duration::ZERO,
            backoff1: Duration::ZERO,
            backoff2: Duration::ZERO,
            backoff3: Duration::ZERO,
            backoff4: Duration::ZERO,
        });
        let defaults = PlannerConfig::default();
        assert_eq!(planner.config().delivered_delay, defaults.delivered_delay);
        assert_eq!(planner.config().unknown_delay, defaults.unknown_delay);
        assert_eq!(planner.config().backoff4, defaults.backoff4);
    }

    #[test]
    fn max_below_min_collapses_to_min() {
        let planner = Planner::new(PlannerConfig {
            in_transit_min_delay: Duration::from_secs(3600),
            in_transit_max_delay: Duration::from_secs(60),
            ..Default::default()
        });
        assert_eq!(planner.config().in_transit_max_delay, Duration::from_secs(3600));
        assert_eq!(
            planner.next_check_delay(TrackingStatus::InTransit),
            Duration::from_secs(3600)
        );
    }
}
