//! Row models and DTOs for the tracking store.

pub mod tracking;

pub use tracking::{
    NewTrackingEvent, Tracking, TrackingCreateInput, TrackingEvent, TrackingUpdate,
};
