//! Tracking service façade.
//!
//! The surface used by the API handlers and the stream consumer:
//! registration, reads (through the current-status cache when enabled),
//! refresh, and [`TrackingService::apply_update`] — the consumer-side
//! state machine that turns `TrackingUpdated` records into durable rows.

mod trackings;

pub use trackings::{ServiceError, TrackingService};
