//! Carrier adapters.
//!
//! Heterogeneous upstreams are folded into one capability:
//! `get_tracking(carrier_code, track_number)` returning a normalized
//! [`TrackingResult`]. The concrete adapter is a tagged selector chosen
//! once at startup from configuration, never at call time.

pub mod client;
pub mod emulator_v1;
pub mod fake;
pub mod track24;

pub use client::{CarrierClient, CarrierError, CarrierEvent, TrackingResult};
