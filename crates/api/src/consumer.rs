//! The update-applier consumer task.
//!
//! Decodes `TrackingUpdated` records from the stream and applies them
//! through the service. Any handler error — a malformed message or a
//! failed apply transaction — stops consumption with the message left
//! pending; the process shuts down and at-least-once redelivery takes
//! over after restart (apply is idempotent, so replays are safe).

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use trackpulse_bus::{BoxError, Consumer, TrackingUpdated};
use trackpulse_service::TrackingService;

/// Spawn the consumer loop.
///
/// When the loop ends on an error, the cancellation token is tripped so
/// the rest of the process (the HTTP server) shuts down with it.
pub fn spawn(
    service: Arc<TrackingService>,
    consumer: Consumer,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!("Update consumer started");

        let result = consumer
            .consume(&cancel, |_key, value| {
                let service = Arc::clone(&service);
                async move {
                    let msg: TrackingUpdated =
                        serde_json::from_slice(&value).map_err(|e| Box::new(e) as BoxError)?;
                    service
                        .apply_update(msg)
                        .await
                        .map_err(|e| Box::new(e) as BoxError)
                }
            })
            .await;

        match result {
            Ok(()) => tracing::info!("Update consumer stopped"),
            Err(e) => {
                tracing::error!(error = %e, "Update consumer failed, initiating shutdown");
                cancel.cancel();
            }
        }
    })
}
