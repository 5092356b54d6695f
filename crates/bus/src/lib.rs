//! Durable message stream for tracking updates.
//!
//! The stream is a Postgres table (`bus_messages`) partitioned by a stable
//! hash of the message key. Delivery is at-least-once: the consumer marks a
//! message consumed in the same transaction that row-locked it, and only
//! after the handler has returned successfully, so a crash between handling
//! and commit redelivers. Ordering holds per partition as long as consumer
//! instances own disjoint partition sets (one instance owning all partitions
//! is the default).

pub mod consumer;
pub mod messages;
pub mod publisher;
mod schema;

pub use consumer::Consumer;
pub use messages::{TrackingEventMessage, TrackingUpdated, TOPIC_TRACKING_UPDATED};
pub use publisher::Publisher;
pub use schema::bootstrap_schema;

/// Boxed error returned by consumer handlers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors from the bus itself (handler failures are wrapped, not flattened,
/// so the caller can tell transport problems from apply problems).
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Handler error: {0}")]
    Handler(#[source] BoxError),
}

/// FNV-1a over the key bytes, folded onto the partition count.
///
/// FNV is stable across processes and versions, which is what makes
/// "same key, same partition" hold for every producer in the fleet.
pub(crate) fn partition_for(key: &[u8], partitions: i16) -> i16 {
    let mut hash: u32 = 0x811c_9dc5;
    for &b in key {
        hash ^= u32::from(b);
        hash = hash.wrapping_mul(0x0100_0193);
    }
    (hash % u32::from(partitions.max(1) as u16)) as i16
}
