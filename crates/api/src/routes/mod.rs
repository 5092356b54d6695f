//! HTTP route registration.

pub mod health;
pub mod trackings;

use axum::Router;

use crate::state::AppState;

/// All `/api/v1` routes.
pub fn api_routes() -> Router<AppState> {
    trackings::router()
}
