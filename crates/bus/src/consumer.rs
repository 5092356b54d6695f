//! Consuming side of the stream.

use std::future::Future;
use std::time::Duration;

use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use trackpulse_core::types::DbId;

use crate::{BoxError, BusError};

/// How long to wait before re-polling an empty partition set.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Sequentially consumes messages from a set of partitions in id order.
///
/// One consumer instance should own each partition; horizontal scaling
/// comes from splitting the partition set across instances, not from
/// concurrent consumption of a single partition.
pub struct Consumer {
    pool: PgPool,
    topic: String,
    partitions: Vec<i16>,
    poll_interval: Duration,
}

impl Consumer {
    /// Create a consumer owning all of `0..partition_count`.
    pub fn new(pool: PgPool, topic: impl Into<String>, partition_count: i16) -> Self {
        Self {
            pool,
            topic: topic.into(),
            partitions: (0..partition_count.max(1)).collect(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Restrict the consumer to an explicit partition set.
    pub fn with_partitions(mut self, partitions: Vec<i16>) -> Self {
        if !partitions.is_empty() {
            self.partitions = partitions;
        }
        self
    }

    /// Consume messages until cancelled.
    ///
    /// The handler is invoked with the raw key and payload bytes. A message
    /// is marked consumed in the same transaction that locked it, and only
    /// after the handler returns `Ok` -- a handler error stops consumption
    /// and surfaces as [`BusError::Handler`] with the message left pending,
    /// so a restarted consumer re-delivers it. Cancellation ends the loop
    /// with `Ok(())`.
    pub async fn consume<H, Fut>(
        &self,
        cancel: &CancellationToken,
        mut handler: H,
    ) -> Result<(), BusError>
    where
        H: FnMut(Vec<u8>, Vec<u8>) -> Fut,
        Fut: Future<Output = Result<(), BoxError>>,
    {
        loop {
            if cancel.is_cancelled() {
                tracing::info!(topic = %self.topic, "Consumer cancelled");
                return Ok(());
            }

            if self.consume_next(&mut handler).await? {
                continue;
            }

            // Nothing pending: idle until the next poll or cancellation.
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!(topic = %self.topic, "Consumer cancelled");
                    return Ok(());
                }
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }

    /// Handle at most one pending message. Returns `true` if one was
    /// processed and committed.
    async fn consume_next<H, Fut>(&self, handler: &mut H) -> Result<bool, BusError>
    where
        H: FnMut(Vec<u8>, Vec<u8>) -> Fut,
        Fut: Future<Output = Result<(), BoxError>>,
    {
        let mut tx = self.pool.begin().await?;

        let row: Option<(DbId, String, Vec<u8>)> = sqlx::query_as(
            "SELECT id, partition_key, payload FROM bus_messages \
             WHERE topic = $1 AND partition_no = ANY($2) AND consumed_at IS NULL \
             ORDER BY id ASC \
             LIMIT 1 \
             FOR UPDATE SKIP LOCKED",
        )
        .bind(&self.topic)
        .bind(&self.partitions)
        .fetch_optional(&mut *tx)
        .await?;

        let Some((id, key, payload)) = row else {
            return Ok(false);
        };

        // Commit only after the handler succeeds; the dropped transaction
        // on the error path leaves the message pending for redelivery.
        handler(key.into_bytes(), payload)
            .await
            .map_err(BusError::Handler)?;

        sqlx::query("UPDATE bus_messages SET consumed_at = NOW() WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(true)
    }
}
