//! Wire records published on the tracking-updates stream.
//!
//! JSON with RFC3339 UTC timestamps. Optional fields are omitted when
//! absent, so an error update carries no status fields and a success
//! update carries no `error`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use trackpulse_core::types::{DbId, Timestamp};

/// Default topic for tracking updates.
pub const TOPIC_TRACKING_UPDATED: &str = "tracking.updated";

/// One observed state change of a tracking, emitted by the poll scheduler
/// and consumed by the update applier.
///
/// Exactly one of `error` or `(status, status_raw, ...)` is meaningful;
/// `checked_at` and `next_check_at` are carried either way.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrackingUpdated {
    pub tracking_id: DbId,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checked_at: Option<Timestamp>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_raw: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_at: Option<Timestamp>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_check_at: Option<Timestamp>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<TrackingEventMessage>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A carrier event carried inside a [`TrackingUpdated`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingEventMessage {
    pub status: String,
    pub status_raw: String,
    pub event_time: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Opaque structured payload, passed through verbatim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl TrackingUpdated {
    /// The stream key: the tracking id as decimal ASCII. All updates for
    /// one tracking land on one partition.
    pub fn partition_key(&self) -> String {
        self.tracking_id.to_string()
    }
}
