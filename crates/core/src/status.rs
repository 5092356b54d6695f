//! Normalized tracking statuses.
//!
//! Carrier adapters map arbitrary upstream strings into this closed set;
//! everything downstream (planner, store, wire records) speaks only these
//! three values. The database stores them as TEXT.

use serde::{Deserialize, Serialize};

/// Normalized status of a tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrackingStatus {
    /// Nothing known yet, or an upstream string we do not recognize.
    #[serde(rename = "UNKNOWN")]
    Unknown,
    /// The parcel is moving.
    #[serde(rename = "IN_TRANSIT")]
    InTransit,
    /// Terminal: the parcel reached its recipient.
    #[serde(rename = "DELIVERED")]
    Delivered,
}

impl TrackingStatus {
    /// The canonical string stored in the database and sent on the wire.
    pub fn as_str(self) -> &'static str {
        match self {
            TrackingStatus::Unknown => "UNKNOWN",
            TrackingStatus::InTransit => "IN_TRANSIT",
            TrackingStatus::Delivered => "DELIVERED",
        }
    }

    /// Parse a raw status string. Anything outside the closed set maps to
    /// [`TrackingStatus::Unknown`].
    pub fn from_raw(raw: &str) -> Self {
        match raw {
            "IN_TRANSIT" => TrackingStatus::InTransit,
            "DELIVERED" => TrackingStatus::Delivered,
            _ => TrackingStatus::Unknown,
        }
    }
}

impl std::fmt::Display for TrackingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
