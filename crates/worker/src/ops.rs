//! Operational HTTP surface for the poll worker.
//!
//! Small read-mostly router: liveness/readiness, the scheduler stats
//! snapshot, the effective operational settings (no secrets), and a
//! trigger endpoint that forces an immediate poll cycle.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

use trackpulse_poller::{PollerHandle, PollerStats};

use crate::config::WorkerConfig;

#[derive(Clone)]
pub struct OpsState {
    pub poller: PollerHandle,
    pub config: Arc<WorkerConfig>,
}

pub fn router(state: OpsState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/stats", get(stats))
        .route("/config", get(config))
        .route("/trigger", post(trigger))
        .with_state(state)
}

async fn healthz() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

async fn readyz() -> Json<Value> {
    Json(json!({"status": "ready"}))
}

async fn stats(State(state): State<OpsState>) -> Json<PollerStats> {
    Json(state.poller.stats())
}

/// Operational worker settings only; secrets and connection strings are
/// deliberately not exposed.
async fn config(State(state): State<OpsState>) -> Json<Value> {
    let config = &state.config;
    Json(json!({
        "pollIntervalSeconds": config.poll_interval_secs,
        "batchSize": config.batch_size,
        "concurrency": config.concurrency,
        "leaseSeconds": config.lease_secs,
        "rateLimitPerMinute": config.rate_limit_per_minute,
        "rateLimitCDEKPerMinute": config.rate_limit_cdek_per_minute,
        "rateLimitPostRuPerMinute": config.rate_limit_post_ru_per_minute,
        "nextCheckInTransitMinSeconds": config.next_check_in_transit_min_secs,
        "nextCheckInTransitMaxSeconds": config.next_check_in_transit_max_secs,
        "nextCheckUnknownSeconds": config.next_check_unknown_secs,
    }))
}

async fn trigger(State(state): State<OpsState>) -> Json<Value> {
    state.poller.trigger();
    Json(json!({"triggered": true}))
}
