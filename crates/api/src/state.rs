use std::sync::Arc;

use trackpulse_service::TrackingService;

use crate::config::ApiConfig;

/// Shared application state available to all Axum handlers via
/// `State<AppState>`. Cheaply cloneable.
#[derive(Clone)]
pub struct AppState {
    /// The tracking service façade.
    pub service: Arc<TrackingService>,
    /// Server configuration.
    pub config: Arc<ApiConfig>,
}
