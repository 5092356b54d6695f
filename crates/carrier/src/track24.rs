//! Adapter for the Track24-style tracking API.
//!
//! `GET {base}/tracking.json.php?apiKey&domain&code&pretty=true` returns
//! `{"status": "ok", "data": {"events": [...]}}` where each event's
//! `operationDateTime` is `dd.MM.yyyy HH:mm:ss` (treated as UTC). The
//! upstream has no normalized status, so the latest operation's wording
//! decides between IN_TRANSIT and DELIVERED.

use std::time::Duration;

use chrono::{NaiveDateTime, Utc};
use serde::Deserialize;
use trackpulse_core::types::Timestamp;
use trackpulse_core::TrackingStatus;

use crate::client::{CarrierError, CarrierEvent, TrackingResult};

/// HTTP request timeout for a single upstream call.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Upstream event time layout, e.g. `02.07.2014 19:16:00`.
const EVENT_TIME_FORMAT: &str = "%d.%m.%Y %H:%M:%S";

pub struct Track24Client {
    base_url: String,
    api_key: String,
    domain: String,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct Track24Event {
    #[serde(rename = "operationDateTime", default)]
    operation_date_time: String,
    #[serde(rename = "operationAttribute", default)]
    operation_attribute: String,
    #[serde(rename = "operationPlaceName", default)]
    operation_place_name: String,
}

#[derive(Debug, Default, Deserialize)]
struct Track24Data {
    #[serde(default)]
    events: Vec<Track24Event>,
}

#[derive(Debug, Deserialize)]
struct Track24Body {
    status: String,
    #[serde(default)]
    data: Track24Data,
}

impl Track24Client {
    pub fn new(base_url: &str, api_key: &str, domain: &str) -> Self {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("Failed to build reqwest HTTP client");
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            domain: domain.to_string(),
            http,
        }
    }

    pub async fn get_tracking(
        &self,
        _carrier_code: &str,
        track_number: &str,
    ) -> Result<TrackingResult, CarrierError> {
        // Track24 auto-detects the carrier from the track number; the
        // carrier code is not part of the request.
        let url = format!("{}/tracking.json.php", self.base_url);
        let response = self
            .http
            .get(&url)
            .query(&[
                ("apiKey", self.api_key.as_str()),
                ("domain", self.domain.as_str()),
                ("code", track_number),
                ("pretty", "true"),
            ])
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

        let body: Track24Body = response
            .json()
            .await
            .map_err(|e| CarrierError::Permanent(format!("decode carrier response: {e}")))?;

        if body.status != "ok" {
            return Err(CarrierError::Transient(format!(
                "carrier status={}",
                body.status
            )));
        }

        Ok(map_body(body, Utc::now()))
    }
}

/// Map the decoded body into the normalized result.
fn map_body(body: Track24Body, now: Timestamp) -> TrackingResult {
    let mut status_raw = String::new();
    let mut events = Vec::with_capacity(body.data.events.len());

    for event in &body.data.events {
        status_raw = event.operation_attribute.clone();
        events.push(CarrierEvent {
            status: TrackingStatus::InTransit,
            status_raw: event.operation_attribute.clone(),
            event_time: parse_event_time(&event.operation_date_time).unwrap_or(now),
            location: non_empty(&event.operation_place_name),
            message: non_empty(&event.operation_attribute),
            payload: None,
        });
    }

    let status = match body.data.events.last() {
        Some(last) if contains_delivered_hint(&last.operation_attribute) => {
            TrackingStatus::Delivered
        }
        _ => TrackingStatus::InTransit,
    };

    TrackingResult {
        status,
        status_raw,
        status_at: Some(now),
        events,
    }
}

/// Parse the upstream `dd.MM.yyyy HH:mm:ss` layout as UTC.
fn parse_event_time(raw: &str) -> Option<Timestamp> {
    if raw.is_empty() {
        return None;
    }
    NaiveDateTime::parse_from_str(raw, EVENT_TIME_FORMAT)
        .ok()
        .map(|dt| dt.and_utc())
}

/// Does the operation wording say the parcel reached its recipient?
/// Covers the Russian stems ("вруч", "достав") and the English token.
fn contains_delivered_hint(attribute: &str) -> bool {
    let lowered = attribute.to_lowercase();
    lowered.contains("вруч") || lowered.contains("достав") || lowered.contains("delivered")
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn parses_upstream_event_time_as_utc() {
        let parsed = parse_event_time("02.07.2014 19:16:00").unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2014, 7, 2, 19, 16, 0).unwrap());
    }

    #[test]
    fn unparseable_event_time_is_none() {
        assert!(parse_event_time("").is_none());
        assert!(parse_event_time("2014-07-02T19:16:00Z").is_none());
    }

    #[test]
    fn delivered_hints() {
        assert!(contains_delivered_hint("Вручение адресату"));
        assert!(contains_delivered_hint("Доставлено"));
        assert!(contains_delivered_hint("Delivered to recipient"));
        assert!(!contains_delivered_hint("Принято в отделении связи"));
    }

    #[test]
    fn last_operation_promotes_to_delivered() {
        let body: Track24Body = serde_json::from_str(
            r#"{
                "status": "ok",
                "data": {
                    "events": [
                        {
                            "operationDateTime": "01.07.2014 10:00:00",
                            "operationAttribute": "Принято в отделении связи",
                            "operationPlaceName": "Moscow"
                        },
                        {
                            "operationDateTime": "02.07.2014 19:16:00",
                            "operationAttribute": "Вручение адресату",
                            "operationPlaceName": "Omsk"
                        }
                    ]
                }
            }"#,
        )
        .unwrap();

        let now = Utc::now();
        let result = map_body(body, now);
        assert_eq!(result.status, TrackingStatus::Delivered);
        assert_eq!(result.status_raw, "Вручение адресату");
        assert_eq!(result.events.len(), 2);
        // Events themselves keep the in-transit normalization.
        assert_eq!(result.events[1].status, TrackingStatus::InTransit);
        assert_eq!(result.events[1].location.as_deref(), Some("Omsk"));
        assert_eq!(
            result.events[0].event_time,
            Utc.with_ymd_and_hms(2014, 7, 1, 10, 0, 0).unwrap()
        );
    }

    #[test]
    fn no_events_stays_in_transit() {
        let body: Track24Body =
            serde_json::from_str(r#"{"status": "ok", "data": {"events": []}}"#).unwrap();
        let result = map_body(body, Utc::now());
        assert_eq!(result.status, TrackingStatus::InTransit);
        assert!(result.events.is_empty());
        assert!(result.status_raw.is_empty());
    }
}
