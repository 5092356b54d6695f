//! The carrier capability contract and the adapter selector.

use trackpulse_core::types::Timestamp;
use trackpulse_core::TrackingStatus;

use crate::emulator_v1::EmulatorV1Client;
use crate::fake::FakeClient;
use crate::track24::Track24Client;

/// Normalized answer from a carrier for one tracking.
#[derive(Debug, Clone)]
pub struct TrackingResult {
    pub status: TrackingStatus,
    pub status_raw: String,
    pub status_at: Option<Timestamp>,
    pub events: Vec<CarrierEvent>,
}

/// One carrier-authored event.
#[derive(Debug, Clone)]
pub struct CarrierEvent {
    pub status: TrackingStatus,
    pub status_raw: String,
    pub event_time: Timestamp,
    pub location: Option<String>,
    pub message: Option<String>,
    pub payload: Option<serde_json::Value>,
}

/// Carrier call failures.
///
/// Transient errors (timeouts, 429s, 5xx) are expected to clear on a
/// later poll; permanent errors (undecodable bodies) will not.
#[derive(Debug, thiserror::Error)]
pub enum CarrierError {
    #[error("transient carrier error: {0}")]
    Transient(String),

    #[error("permanent carrier error: {0}")]
    Permanent(String),
}

/// The adapter selected at startup.
pub enum CarrierClient {
    /// Deterministic local fake; no network.
    Fake(FakeClient),
    /// Emulator "v1" JSON API.
    EmulatorV1(EmulatorV1Client),
    /// Track24-style JSON API.
    Track24(Track24Client),
}

impl CarrierClient {
    /// Build the adapter for a configured mode string.
    ///
    /// `"v1"` and `"track24"` require a base URL; anything else (including
    /// an empty base URL) falls back to the local fake.
    pub fn from_mode(mode: &str, base_url: &str, api_key: &str, domain: &str) -> Self {
        if base_url.is_empty() {
            return CarrierClient::Fake(FakeClient::new());
        }
        match mode {
            "v1" => CarrierClient::EmulatorV1(EmulatorV1Client::new(base_url, api_key)),
            "track24" => {
                CarrierClient::Track24(Track24Client::new(base_url, api_key, domain))
            }
            _ => CarrierClient::Fake(FakeClient::new()),
        }
    }

    /// Fetch and normalize the current state of one tracking.
    pub async fn get_tracking(
        &self,
        carrier_code: &str,
        track_number: &str,
    ) -> Result<TrackingResult, CarrierError> {
        match self {
            CarrierClient::Fake(c) => Ok(c.get_tracking(carrier_code, track_number)),
            CarrierClient::EmulatorV1(c) => c.get_tracking(carrier_code, track_number).await,
            CarrierClient::Track24(c) => c.get_tracking(carrier_code, track_number).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_base_url_selects_fake() {
        let client = CarrierClient::from_mode("v1", "", "key", "");
        assert!(matches!(client, CarrierClient::Fake(_)));
    }

    #[test]
    fn unknown_mode_selects_fake() {
        let client = CarrierClient::from_mode("gdeposylka", "http://emu:9000", "", "");
        assert!(matches!(client, CarrierClient::Fake(_)));
    }

    #[test]
    fn configured_modes_select_http_adapters() {
        assert!(matches!(
            CarrierClient::from_mode("v1", "http://emu:9000", "k", ""),
            CarrierClient::EmulatorV1(_)
        ));
        assert!(matches!(
            CarrierClient::from_mode("track24", "http://emu:9000", "k", "example.org"),
            CarrierClient::Track24(_)
        ));
    }
}
