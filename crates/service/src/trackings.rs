//! Service implementation.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use chrono::Utc;
use trackpulse_bus::TrackingUpdated;
use trackpulse_cache::BytesCache;
use trackpulse_core::types::DbId;
use trackpulse_core::CoreError;
use trackpulse_db::models::{
    NewTrackingEvent, Tracking, TrackingCreateInput, TrackingEvent, TrackingUpdate,
};
use trackpulse_db::repositories::{TrackingEventRepo, TrackingRepo};
use trackpulse_db::DbPool;

/// Largest accepted registration batch.
const MAX_CREATE_BATCH: usize = 10_000;

/// Minutes after `checked_at` used when an update arrives without
/// `next_check_at`.
const FALLBACK_NEXT_CHECK_MINUTES: i64 = 60;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// The tracking service façade.
///
/// Cache behavior: with no cache handle or a non-positive TTL the service
/// acts as if there is no cache at all; the store stays the single source
/// of truth either way, so every read path works identically with the
/// cache disabled.
pub struct TrackingService {
    pool: DbPool,
    cache: Option<BytesCache>,
    current_ttl: Duration,
}

impl TrackingService {
    pub fn new(pool: DbPool, cache: Option<BytesCache>, current_ttl: Duration) -> Self {
        Self {
            pool,
            cache,
            current_ttl,
        }
    }

    fn cache(&self) -> Option<&BytesCache> {
        if self.current_ttl.is_zero() {
            return None;
        }
        self.cache.as_ref()
    }

    /// Register a batch of trackings.
    ///
    /// Rejects empty input, oversized batches, and items with a missing
    /// carrier code or track number. Duplicate `(carrier, track)` pairs are
    /// collapsed to their first occurrence before hitting the store.
    pub async fn create_trackings(
        &self,
        items: Vec<TrackingCreateInput>,
    ) -> Result<Vec<Tracking>, ServiceError> {
        let clean = sanitize_create_inputs(items)?;
        Ok(TrackingRepo::create_or_get(&self.pool, &clean).await?)
    }

    /// Fetch trackings by id, returning rows in the input order and
    /// omitting ids that do not exist.
    ///
    /// Reads through the current-status cache when enabled; any cache
    /// problem (miss, decode failure, transport error) falls back to the
    /// store and is repaired by re-populating the key.
    pub async fn get_trackings_by_ids(&self, ids: &[DbId]) -> Result<Vec<Tracking>, ServiceError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut found: HashMap<DbId, Tracking> = HashMap::with_capacity(ids.len());
        let mut missing: Vec<DbId> = Vec::new();

        if let Some(cache) = self.cache() {
            for &id in ids {
                match cache.get(&current_key(id)).await {
                    Ok(Some(bytes)) => match serde_json::from_slice::<Tracking>(&bytes) {
                        Ok(tracking) => {
                            found.insert(id, tracking);
                        }
                        Err(_) => missing.push(id),
                    },
                    Ok(None) => missing.push(id),
                    Err(_) => missing.push(id),
                }
            }
        } else {
            missing.extend_from_slice(ids);
        }

        if !missing.is_empty() {
            let from_db = TrackingRepo::get_by_ids(&self.pool, &missing).await?;
            if let Some(cache) = self.cache() {
                for tracking in &from_db {
                    self.populate_cache(cache, tracking).await;
                }
            }
            for tracking in from_db {
                found.insert(tracking.id, tracking);
            }
        }

        Ok(ids.iter().filter_map(|id| found.remove(id)).collect())
    }

    /// List event history for one tracking, newest first.
    pub async fn list_tracking_events(
        &self,
        tracking_id: DbId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<TrackingEvent>, ServiceError> {
        Ok(TrackingEventRepo::list(&self.pool, tracking_id, limit, offset).await?)
    }

    /// Make a tracking due for the next scheduler tick ("check now").
    pub async fn refresh_tracking(&self, tracking_id: DbId) -> Result<(), ServiceError> {
        if tracking_id == 0 {
            return Err(CoreError::Validation("trackingId is required".to_string()).into());
        }
        Ok(TrackingRepo::refresh(&self.pool, tracking_id).await?)
    }

    /// Apply one `TrackingUpdated` record from the stream.
    ///
    /// Validates the id, defaults missing timestamps, and hands the write
    /// to the store as a single transaction (see
    /// [`TrackingRepo::apply_update`]); replaying the same record is a
    /// no-op for the row state and the event set. On success the
    /// current-status cache is refreshed best-effort.
    pub async fn apply_update(&self, msg: TrackingUpdated) -> Result<(), ServiceError> {
        if msg.tracking_id == 0 {
            return Err(CoreError::Validation("tracking_id is required".to_string()).into());
        }

        let checked_at = msg.checked_at.unwrap_or_else(Utc::now);
        let next_check_at = msg
            .next_check_at
            .unwrap_or_else(|| checked_at + chrono::Duration::minutes(FALLBACK_NEXT_CHECK_MINUTES));

        let events = msg
            .events
            .into_iter()
            .map(|e| NewTrackingEvent {
                status: e.status,
                status_raw: e.status_raw,
                event_time: e.event_time,
                location: e.location,
                message: e.message,
                payload: e.payload,
            })
            .collect();

        let update = TrackingUpdate {
            tracking_id: msg.tracking_id,
            checked_at,
            status: msg.status.unwrap_or_default(),
            status_raw: msg.status_raw.unwrap_or_default(),
            status_at: msg.status_at,
            next_check_at,
            events,
            error: msg.error,
        };

        TrackingRepo::apply_update(&self.pool, &update).await?;

        // Refresh the cached current status; failures only cost a later
        // cache miss.
        if let Some(cache) = self.cache() {
            match TrackingRepo::get_by_ids(&self.pool, &[update.tracking_id]).await {
                Ok(rows) if rows.len() == 1 => self.populate_cache(cache, &rows[0]).await,
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(
                        tracking_id = update.tracking_id,
                        error = %e,
                        "Cache refresh read failed",
                    );
                }
            }
        }

        Ok(())
    }

    async fn populate_cache(&self, cache: &BytesCache, tracking: &Tracking) {
        let Ok(bytes) = serde_json::to_vec(tracking) else {
            return;
        };
        if let Err(e) = cache
            .set(&current_key(tracking.id), &bytes, self.current_ttl)
            .await
        {
            tracing::warn!(tracking_id = tracking.id, error = %e, "Cache set failed");
        }
    }
}

/// Cache key for a tracking's current status.
fn current_key(id: DbId) -> String {
    format!("tracking:{id}:current")
}

/// Validate and de-duplicate registration input, keeping the first
/// occurrence of each `(carrier_code, track_number)` pair.
fn sanitize_create_inputs(
    items: Vec<TrackingCreateInput>,
) -> Result<Vec<TrackingCreateInput>, CoreError> {
    if items.is_empty() {
        return Err(CoreError::Validation("items is empty".to_string()));
    }
    if items.len() > MAX_CREATE_BATCH {
        return Err(CoreError::Validation(format!(
            "too many items (max {MAX_CREATE_BATCH})"
        )));
    }

    let mut seen: HashSet<(String, String)> = HashSet::with_capacity(items.len());
    let mut clean: Vec<TrackingCreateInput> = Vec::with_capacity(items.len());
    for item in items {
        if item.carrier_code.is_empty() {
            return Err(CoreError::Validation("carrierCode is required".to_string()));
        }
        if item.track_number.is_empty() {
            return Err(CoreError::Validation("trackNumber is required".to_string()));
        }
        if seen.insert((item.carrier_code.clone(), item.track_number.clone())) {
            clean.push(item);
        }
    }
    Ok(clean)
}
