//! Tracking registration, reads, and refresh.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;

use trackpulse_core::types::DbId;
use trackpulse_db::models::{Tracking, TrackingCreateInput, TrackingEvent};

use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/trackings", post(create_trackings).get(get_trackings))
        .route("/trackings/{id}/events", get(list_events))
        .route("/trackings/{id}/refresh", post(refresh_tracking))
}

#[derive(Debug, Deserialize)]
struct CreateTrackingsRequest {
    items: Vec<TrackingCreateInput>,
}

/// `POST /api/v1/trackings` — register a batch of trackings (idempotent
/// upsert on the carrier/track natural key).
async fn create_trackings(
    State(state): State<AppState>,
    Json(request): Json<CreateTrackingsRequest>,
) -> AppResult<Json<DataResponse<Vec<Tracking>>>> {
    let trackings = state.service.create_trackings(request.items).await?;
    Ok(Json(DataResponse { data: trackings }))
}

#[derive(Debug, Deserialize)]
struct GetTrackingsQuery {
    /// Comma-separated tracking ids, e.g. `?ids=1,2,3`.
    ids: String,
}

/// `GET /api/v1/trackings?ids=...` — current rows in the requested order,
/// omitting ids that do not exist.
async fn get_trackings(
    State(state): State<AppState>,
    Query(query): Query<GetTrackingsQuery>,
) -> AppResult<Json<DataResponse<Vec<Tracking>>>> {
    let ids = parse_ids(&query.ids)?;
    let trackings = state.service.get_trackings_by_ids(&ids).await?;
    Ok(Json(DataResponse { data: trackings }))
}

#[derive(Debug, Deserialize)]
struct ListEventsQuery {
    limit: Option<i64>,
    offset: Option<i64>,
}

/// `GET /api/v1/trackings/{id}/events` — event history, newest first.
async fn list_events(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
    Query(query): Query<ListEventsQuery>,
) -> AppResult<Json<DataResponse<Vec<TrackingEvent>>>> {
    let events = state
        .service
        .list_tracking_events(id, query.limit.unwrap_or(0), query.offset.unwrap_or(0))
        .await?;
    Ok(Json(DataResponse { data: events }))
}

/// `POST /api/v1/trackings/{id}/refresh` — make the tracking due on the
/// next scheduler tick.
async fn refresh_tracking(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
) -> AppResult<StatusCode> {
    state.service.refresh_tracking(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Parse a comma-separated id list.
fn parse_ids(raw: &str) -> Result<Vec<DbId>, AppError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<DbId>()
                .map_err(|_| AppError::BadRequest(format!("invalid tracking id: {s}")))
        })
        .collect()
}
