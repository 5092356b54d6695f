//! The scheduler loop.
//!
//! One long-lived task alternates between ticker fires and trigger tokens.
//! Each cycle claims a leased batch, fans the trackings out over a
//! semaphore-bounded set of tasks, and drains completely before the next
//! cycle may start. A failed tracking is simply left alone: its lease
//! expires and the row re-enters the due set.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{TimeZone, Utc};
use serde::Serialize;
use sqlx::PgPool;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use trackpulse_bus::{BusError, Publisher, TrackingEventMessage, TrackingUpdated};
use trackpulse_cache::{CacheError, RateLimiter};
use trackpulse_carrier::CarrierClient;
use trackpulse_core::types::Timestamp;
use trackpulse_db::models::Tracking;
use trackpulse_db::repositories::TrackingRepo;

use crate::planner::Planner;

/// Window for the per-carrier minute counters. Longer than a minute so
/// bucket expiry absorbs clock skew between workers.
const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(70);

/// Local pacing pause after a soft rate-limit denial.
const RATE_LIMIT_PAUSE: Duration = Duration::from_millis(500);

/// Publish attempts before a tracking's cycle is abandoned.
const PUBLISH_ATTEMPTS: u32 = 10;

/// Linear backoff step between publish attempts. The stream may not be
/// reachable in the first seconds after a cold start.
const PUBLISH_RETRY_STEP: Duration = Duration::from_millis(150);

/// Tunable scheduler settings. Non-positive values collapse to defaults.
#[derive(Debug, Clone)]
pub struct PollerSettings {
    /// Ticker period between claim cycles.
    pub poll_interval: Duration,
    /// Maximum trackings claimed per cycle.
    pub batch_size: i64,
    /// Maximum simultaneous in-flight carrier calls.
    pub concurrency: usize,
    /// Lease duration set on claim.
    pub lease: Duration,
    /// Default per-carrier calls per minute.
    pub rate_limit_per_minute: i64,
    /// CDEK override; 0 means use the default.
    pub rate_limit_cdek_per_minute: i64,
    /// Post RU override; 0 means use the default.
    pub rate_limit_post_ru_per_minute: i64,
}

impl Default for PollerSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            batch_size: 100,
            concurrency: 10,
            lease: Duration::from_secs(120),
            rate_limit_per_minute: 120,
            rate_limit_cdek_per_minute: 0,
            rate_limit_post_ru_per_minute: 0,
        }
    }
}

impl PollerSettings {
    fn sanitized(mut self) -> Self {
        let defaults = Self::default();
        if self.poll_interval.is_zero() {
            self.poll_interval = defaults.poll_interval;
        }
        if self.batch_size <= 0 {
            self.batch_size = defaults.batch_size;
        }
        if self.concurrency == 0 {
            self.concurrency = defaults.concurrency;
        }
        if self.lease.is_zero() {
            self.lease = defaults.lease;
        }
        if self.rate_limit_per_minute <= 0 {
            self.rate_limit_per_minute = defaults.rate_limit_per_minute;
        }
        self
    }
}

/// Read-only scheduler statistics snapshot.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PollerStats {
    pub started_at: Timestamp,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_cycle_at: Option<Timestamp>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_trigger_at: Option<Timestamp>,
    pub total_claimed: i64,
    pub total_processed: i64,
    pub total_errors: i64,
    pub in_flight: i64,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub last_error: String,
}

/// Concurrently mutated counters backing [`PollerStats`].
struct StatsCell {
    started_at: Timestamp,
    last_cycle_at_ms: AtomicI64,
    last_trigger_at_ms: AtomicI64,
    total_claimed: AtomicI64,
    total_processed: AtomicI64,
    total_errors: AtomicI64,
    in_flight: AtomicI64,
    last_error: Mutex<String>,
}

impl StatsCell {
    fn new() -> Self {
        Self {
            started_at: Utc::now(),
            last_cycle_at_ms: AtomicI64::new(0),
            last_trigger_at_ms: AtomicI64::new(0),
            total_claimed: AtomicI64::new(0),
            total_processed: AtomicI64::new(0),
            total_errors: AtomicI64::new(0),
            in_flight: AtomicI64::new(0),
            last_error: Mutex::new(String::new()),
        }
    }

    fn record_error(&self, error: &str) {
        self.total_errors.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut slot) = self.last_error.lock() {
            *slot = error.to_string();
        }
    }

    fn snapshot(&self) -> PollerStats {
        PollerStats {
            started_at: self.started_at,
            last_cycle_at: from_millis(self.last_cycle_at_ms.load(Ordering::Relaxed)),
            last_trigger_at: from_millis(self.last_trigger_at_ms.load(Ordering::Relaxed)),
            total_claimed: self.total_claimed.load(Ordering::Relaxed),
            total_processed: self.total_processed.load(Ordering::Relaxed),
            total_errors: self.total_errors.load(Ordering::Relaxed),
            in_flight: self.in_flight.load(Ordering::Relaxed),
            last_error: self
                .last_error
                .lock()
                .map(|slot| slot.clone())
                .unwrap_or_default(),
        }
    }
}

fn from_millis(ms: i64) -> Option<Timestamp> {
    if ms == 0 {
        return None;
    }
    Utc.timestamp_millis_opt(ms).single()
}

/// Shared dependencies for the loop and its per-tracking tasks.
struct PollerContext {
    pool: PgPool,
    carrier: CarrierClient,
    publisher: Publisher,
    limiter: Option<RateLimiter>,
    topic: String,
    planner: Planner,
    settings: PollerSettings,
    stats: StatsCell,
}

/// Errors that abort a single tracking's cycle. The claim lease is left
/// in place; the row re-queues once it expires.
#[derive(Debug, thiserror::Error)]
pub enum PollerError {
    #[error("rate limiter error: {0}")]
    RateLimiter(#[from] CacheError),

    #[error("serialize update: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("publish update: {0}")]
    Publish(BusError),
}

/// The poll scheduler. Built once at startup, then consumed by
/// [`Poller::run`]; interactions from elsewhere (ops endpoints) go
/// through a [`PollerHandle`].
pub struct Poller {
    ctx: Arc<PollerContext>,
    trigger_tx: mpsc::Sender<()>,
    trigger_rx: mpsc::Receiver<()>,
}

/// Cheap clone giving access to triggering and stats.
#[derive(Clone)]
pub struct PollerHandle {
    ctx: Arc<PollerContext>,
    trigger_tx: mpsc::Sender<()>,
}

impl PollerHandle {
    /// Request an immediate poll cycle (best-effort, non-blocking).
    ///
    /// The trigger channel holds one token; a second trigger within one
    /// cycle is dropped silently since the pending token already covers it.
    pub fn trigger(&self) {
        self.ctx
            .stats
            .last_trigger_at_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
        let _ = self.trigger_tx.try_send(());
    }

    /// Snapshot the scheduler statistics.
    pub fn stats(&self) -> PollerStats {
        self.ctx.stats.snapshot()
    }
}

impl Poller {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pool: PgPool,
        carrier: CarrierClient,
        publisher: Publisher,
        limiter: Option<RateLimiter>,
        topic: impl Into<String>,
        settings: PollerSettings,
        planner: Planner,
    ) -> Self {
        let (trigger_tx, trigger_rx) = mpsc::channel(1);
        let ctx = Arc::new(PollerContext {
            pool,
            carrier,
            publisher,
            limiter,
            topic: topic.into(),
            planner,
            settings: settings.sanitized(),
            stats: StatsCell::new(),
        });
        Self {
            ctx,
            trigger_tx,
            trigger_rx,
        }
    }

    /// Handle for ops surfaces; valid for the scheduler's whole lifetime.
    pub fn handle(&self) -> PollerHandle {
        PollerHandle {
            ctx: Arc::clone(&self.ctx),
            trigger_tx: self.trigger_tx.clone(),
        }
    }

    /// Run claim cycles until the token is cancelled.
    ///
    /// A cycle drains completely before the next tick is honored, so the
    /// batch size bounds the work in flight even when cycles take longer
    /// than the poll interval.
    pub async fn run(self, cancel: CancellationToken) {
        let Poller {
            ctx,
            trigger_tx: _trigger_tx,
            mut trigger_rx,
        } = self;

        let mut ticker = tokio::time::interval(ctx.settings.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        tracing::info!(
            poll_interval_ms = ctx.settings.poll_interval.as_millis() as u64,
            batch_size = ctx.settings.batch_size,
            concurrency = ctx.settings.concurrency,
            "Poll scheduler started",
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Poll scheduler shutting down");
                    return;
                }
                _ = ticker.tick() => run_cycle(&ctx).await,
                Some(()) = trigger_rx.recv() => run_cycle(&ctx).await,
            }
        }
    }
}

/// One claim cycle: claim a batch, dispatch it, wait for the drain.
async fn run_cycle(ctx: &Arc<PollerContext>) {
    let now = Utc::now();
    ctx.stats
        .last_cycle_at_ms
        .store(now.timestamp_millis(), Ordering::Relaxed);

    let items = match TrackingRepo::claim_due(
        &ctx.pool,
        now,
        ctx.settings.batch_size,
        ctx.settings.lease,
    )
    .await
    {
        Ok(items) => items,
        Err(e) => {
            tracing::error!(error = %e, "Claim due trackings failed");
            ctx.stats.record_error(&e.to_string());
            return;
        }
    };

    if items.is_empty() {
        return;
    }
    ctx.stats
        .total_claimed
        .fetch_add(items.len() as i64, Ordering::Relaxed);

    let semaphore = Arc::new(Semaphore::new(ctx.settings.concurrency));
    let mut tasks: JoinSet<()> = JoinSet::new();

    for tracking in items {
        // Acquire before spawning so dispatch itself is back-pressured.
        let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
            break;
        };
        let ctx = Arc::clone(ctx);
        ctx.stats.in_flight.fetch_add(1, Ordering::Relaxed);
        tasks.spawn(async move {
            let _permit = permit;
            if let Err(e) = process_one(&ctx, &tracking).await {
                ctx.stats.record_error(&e.to_string());
                tracing::error!(
                    tracking_id = tracking.id,
                    error = %e,
                    "Process tracking failed",
                );
            }
            ctx.stats.total_processed.fetch_add(1, Ordering::Relaxed);
            ctx.stats.in_flight.fetch_sub(1, Ordering::Relaxed);
        });
    }

    while tasks.join_next().await.is_some() {}
}

/// Poll one claimed tracking and publish the outcome.
async fn process_one(ctx: &PollerContext, tracking: &Tracking) -> Result<(), PollerError> {
    let now = Utc::now();

    if let Some(limiter) = &ctx.limiter {
        let limit = carrier_limit(&ctx.settings, &tracking.carrier_code);
        let key = carrier_minute_key(&tracking.carrier_code, now);
        let (allowed, count) = limiter.allow(&key, limit, RATE_LIMIT_WINDOW).await?;
        if !allowed {
            // Soft limit: the counter already incremented, so pace locally
            // and proceed with the call.
            tracing::warn!(
                carrier = %tracking.carrier_code,
                count,
                "Rate limit exceeded, pacing",
            );
            tokio::time::sleep(RATE_LIMIT_PAUSE).await;
        }
    }

    let mut update = TrackingUpdated {
        tracking_id: tracking.id,
        checked_at: Some(now),
        ..Default::default()
    };

    match ctx
        .carrier
        .get_tracking(&tracking.carrier_code, &tracking.track_number)
        .await
    {
        Err(e) => {
            update.error = Some(e.to_string());
            let delay = ctx.planner.backoff_delay(tracking.check_fail_count + 1);
            update.next_check_at = Some(now + chrono::Duration::seconds(delay.as_secs() as i64));
        }
        Ok(result) => {
            let delay = ctx.planner.next_check_delay(result.status);
            update.status = Some(result.status.as_str().to_string());
            update.status_raw = Some(result.status_raw);
            update.status_at = result.status_at;
            update.next_check_at = Some(now + chrono::Duration::seconds(delay.as_secs() as i64));
            update.events = result
                .events
                .into_iter()
                .map(|e| TrackingEventMessage {
                    status: e.status.as_str().to_string(),
                    status_raw: e.status_raw,
                    event_time: e.event_time,
                    location: e.location,
                    message: e.message,
                    payload: e.payload,
                })
                .collect();
        }
    }

    let key = update.partition_key();
    let value = serde_json::to_vec(&update)?;

    let mut last_err: Option<BusError> = None;
    for attempt in 1..=PUBLISH_ATTEMPTS {
        match ctx.publisher.publish(&ctx.topic, &key, &value).await {
            Ok(()) => {
                last_err = None;
                break;
            }
            Err(e) => {
                last_err = Some(e);
                tokio::time::sleep(PUBLISH_RETRY_STEP * attempt).await;
            }
        }
    }
    match last_err {
        Some(e) => Err(PollerError::Publish(e)),
        None => Ok(()),
    }
}

/// Resolve the per-minute limit for a carrier: specific override when
/// configured, otherwise the fleet default.
fn carrier_limit(settings: &PollerSettings, carrier_code: &str) -> i64 {
    match carrier_code {
        "CDEK" if settings.rate_limit_cdek_per_minute > 0 => settings.rate_limit_cdek_per_minute,
        "POST_RU" if settings.rate_limit_post_ru_per_minute > 0 => {
            settings.rate_limit_post_ru_per_minute
        }
        _ => settings.rate_limit_per_minute,
    }
}

/// Counter key for a carrier's current minute bucket,
/// e.g. `rl:carrier:CDEK:202501010003`.
fn carrier_minute_key(carrier_code: &str, now: Timestamp) -> String {
    format!("rl:carrier:{carrier_code}:{}", now.format("%Y%m%d%H%M"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minute_key_shares_bucket_within_a_minute() {
        let a = Utc.with_ymd_and_hms(2025, 1, 1, 0, 3, 5).unwrap();
        let b = Utc.with_ymd_and_hms(2025, 1, 1, 0, 3, 59).unwrap();
        assert_eq!(carrier_minute_key("CDEK", a), carrier_minute_key("CDEK", b));
        assert_eq!(carrier_minute_key("CDEK", a), "rl:carrier:CDEK:202501010003");
    }

    #[test]
    fn minute_key_splits_across_minutes_and_carriers() {
        let a = Utc.with_ymd_and_hms(2025, 1, 1, 0, 3, 59).unwrap();
        let b = Utc.with_ymd_and_hms(2025, 1, 1, 0, 4, 0).unwrap();
        assert_ne!(carrier_minute_key("CDEK", a), carrier_minute_key("CDEK", b));
        assert_ne!(
            carrier_minute_key("CDEK", a),
            carrier_minute_key("POST_RU", a)
        );
    }

    #[test]
    fn carrier_limit_prefers_configured_overrides() {
        let settings = PollerSettings {
            rate_limit_per_minute: 120,
            rate_limit_cdek_per_minute: 30,
            rate_limit_post_ru_per_minute: 0,
            ..Default::default()
        };
        assert_eq!(carrier_limit(&settings, "CDEK"), 30);
        // Zero override falls back to the default.
        assert_eq!(carrier_limit(&settings, "POST_RU"), 120);
        assert_eq!(carrier_limit(&settings, "DHL"), 120);
    }

    #[test]
    fn settings_sanitize_non_positive_fields() {
        let settings = PollerSettings {
            poll_interval: Duration::ZERO,
            batch_size: 0,
            concurrency: 0,
            lease: Duration::ZERO,
            rate_limit_per_minute: 0,
            rate_limit_cdek_per_minute: 0,
            rate_limit_post_ru_per_minute: 0,
        }
        .sanitized();
        let defaults = PollerSettings::default();
        assert_eq!(settings.poll_interval, defaults.poll_interval);
        assert_eq!(settings.batch_size, defaults.batch_size);
        assert_eq!(settings.concurrency, defaults.concurrency);
        assert_eq!(settings.lease, defaults.lease);
        assert_eq!(settings.rate_limit_per_minute, defaults.rate_limit_per_minute);
    }

    #[test]
    fn stats_snapshot_reports_counters() {
        let stats = StatsCell::new();
        stats.total_claimed.fetch_add(5, Ordering::Relaxed);
        stats.record_error("boom");
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.total_claimed, 5);
        assert_eq!(snapshot.total_errors, 1);
        assert_eq!(snapshot.last_error, "boom");
        assert!(snapshot.last_cycle_at.is_none());
    }

    #[test]
    fn stats_serialize_camel_case() {
        let stats = StatsCell::new().snapshot();
        let json = serde_json::to_value(&stats).unwrap();
        assert!(json.get("startedAt").is_some());
        assert!(json.get("totalClaimed").is_some());
        assert!(json.get("inFlight").is_some());
        // Empty optional fields are omitted.
        assert!(json.get("lastCycleAt").is_none());
        assert!(json.get("lastError").is_none());
    }
}
