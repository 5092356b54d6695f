//! Adapter for the "v1" carrier emulator API.
//!
//! `GET {base}/v1/tracking/{carrier}/{track}?apiKey=...` returning a JSON
//! body with top-level `status` / `status_raw` / `status_at` / `events`.

use std::time::Duration;

use serde::Deserialize;
use trackpulse_core::types::Timestamp;
use trackpulse_core::TrackingStatus;

use crate::client::{CarrierError, CarrierEvent, TrackingResult};

/// HTTP request timeout for a single upstream call.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

pub struct EmulatorV1Client {
    base_url: String,
    api_key: String,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct V1Event {
    #[serde(default)]
    status: String,
    #[serde(default)]
    status_raw: String,
    event_time: Timestamp,
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    payload: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct V1Body {
    #[serde(default)]
    status: String,
    #[serde(default)]
    status_raw: String,
    status_at: Option<Timestamp>,
    #[serde(default)]
    events: Vec<V1Event>,
}

impl EmulatorV1Client {
    pub fn new(base_url: &str, api_key: &str) -> Self {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("Failed to build reqwest HTTP client");
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            http,
        }
    }

    pub async fn get_tracking(
        &self,
        carrier_code: &str,
        track_number: &str,
    ) -> Result<TrackingResult, CarrierError> {
        let mut url = reqwest::Url::parse(&self.base_url)
            .map_err(|e| CarrierError::Permanent(format!("invalid base url: {e}")))?;
        url.path_segments_mut()
            .map_err(|()| CarrierError::Permanent("base url cannot have segments".into()))?
            .extend(["v1", "tracking", carrier_code, track_number]);
        if !self.api_key.is_empty() {
            url.query_pairs_mut().append_pair("apiKey", &self.api_key);
        }

        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| CarrierError::Transient(format!("carrier request failed: {e}")))?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(CarrierError::Transient("carrier rate limit (429)".into()));
        }
        if !status.is_success() {
            return Err(CarrierError::Transient(format!(
                "carrier http {}",
                status.as_u16()
            )));
        }

        let body: V1Body = response
            .json()
            .await
            .map_err(|e| CarrierError::Permanent(format!("decode carrier response: {e}")))?;

        Ok(map_body(body))
    }
}

/// Map the decoded body into the normalized result. An empty upstream
/// status is UNKNOWN, as is any string outside the closed set.
fn map_body(body: V1Body) -> TrackingResult {
    let events = body
        .events
        .into_iter()
        .map(|e| CarrierEvent {
            status: TrackingStatus::from_raw(&e.status),
            status_raw: e.status_raw,
            event_time: e.event_time,
            location: e.location,
            message: e.message,
            payload: e.payload,
        })
        .collect();

    TrackingResult {
        status: TrackingStatus::from_raw(&body.status),
        status_raw: body.status_raw,
        status_at: body.status_at,
        events,
    }
}
