//! Deterministic local carrier fake.
//!
//! Hashes `(carrier_code, track_number)` so a given tracking always
//! reports the same status: roughly one key in five is DELIVERED, the
//! rest stay IN_TRANSIT. Useful for demos and tests without an upstream.

use chrono::Utc;
use trackpulse_core::TrackingStatus;

use crate::client::{CarrierEvent, TrackingResult};

pub struct FakeClient;

impl FakeClient {
    pub fn new() -> Self {
        FakeClient
    }

    pub fn get_tracking(&self, carrier_code: &str, track_number: &str) -> TrackingResult {
        let now = Utc::now();

        let mut hash: u32 = 0x811c_9dc5;
        for b in carrier_code
            .as_bytes()
            .iter()
            .chain(b"|")
            .chain(track_number.as_bytes())
        {
            hash ^= u32::from(*b);
            hash = hash.wrapping_mul(0x0100_0193);
        }

        let status = if hash % 5 == 0 {
            TrackingStatus::Delivered
        } else {
            TrackingStatus::InTransit
        };

        TrackingResult {
            status,
            status_raw: status.as_str().to_string(),
            status_at: Some(now),
            events: vec![CarrierEvent {
                status,
                status_raw: status.as_str().to_string(),
                event_time: now,
                location: None,
                message: Some("fake carrier update".to_string()),
                payload: None,
            }],
        }
    }
}

impl Default for FakeClient {
    fn default() -> Self {
        Self::new()
    }
}
