//! The poll scheduler.
//!
//! A fleet of these workers cooperatively drains due trackings from the
//! store: claim a batch under row locks, call the carrier under per-carrier
//! rate limits, and publish the outcome to the update stream. The
//! [`Planner`] decides when each tracking is checked next.

pub mod planner;
pub mod poller;

pub use planner::{Planner, PlannerConfig};
pub use poller::{Poller, PollerHandle, PollerSettings, PollerStats};
