//! Publishing side of the stream.

use sqlx::PgPool;

use crate::{partition_for, BusError};

/// Appends messages to the stream, assigning each to a partition by a
/// stable hash of its key.
#[derive(Clone)]
pub struct Publisher {
    pool: PgPool,
    partitions: i16,
}

impl Publisher {
    /// Create a publisher over `partitions` partitions (clamped to at
    /// least 1). The partition count must match what consumers were
    /// configured with, for the same reason a Kafka topic's partition
    /// count is fixed.
    pub fn new(pool: PgPool, partitions: i16) -> Self {
        Self {
            pool,
            partitions: partitions.max(1),
        }
    }

    /// Durably append one message.
    pub async fn publish(&self, topic: &str, key: &str, value: &[u8]) -> Result<(), BusError> {
        let partition = partition_for(key.as_bytes(), self.partitions);
        sqlx::query(
            "INSERT INTO bus_messages (topic, partition_no, partition_key, payload) \
             VALUES ($1, $2, $3, $4)",
        )
        .bind(topic)
        .bind(partition)
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
