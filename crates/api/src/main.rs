use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use trackpulse_api::config::ApiConfig;
use trackpulse_api::{consumer, routes, state::AppState};
use trackpulse_cache::BytesCache;
use trackpulse_service::TrackingService;

/// How long to wait for Postgres to come up before giving up.
const DB_CONNECT_WAIT: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "trackpulse_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = ApiConfig::from_env();
    tracing::info!(host = %config.host, port = %config.port, "Loaded server configuration");

    // --- Database ---
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");

    let pool = trackpulse_db::connect_with_retry(&database_url, DB_CONNECT_WAIT)
        .await
        .expect("Failed to connect to database");
    tracing::info!("Database connection pool created");

    trackpulse_db::health_check(&pool)
        .await
        .expect("Database health check failed");

    trackpulse_db::bootstrap_schema(&pool)
        .await
        .expect("Failed to bootstrap tracking schema");
    trackpulse_bus::bootstrap_schema(&pool)
        .await
        .expect("Failed to bootstrap stream schema");
    tracing::info!("Database schema bootstrapped");

    // --- Current-status cache (optional) ---
    let cache_ttl = Duration::from_secs(config.current_status_ttl_secs);
    let cache = match (&config.redis_url, config.current_status_ttl_secs) {
        (Some(url), ttl) if ttl > 0 => match BytesCache::connect(url).await {
            Ok(cache) => {
                tracing::info!(ttl_secs = ttl, "Current-status cache enabled");
                Some(cache)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Redis unavailable, running without cache");
                None
            }
        },
        _ => {
            tracing::info!("Current-status cache disabled");
            None
        }
    };

    // --- Service ---
    let service = Arc::new(TrackingService::new(pool.clone(), cache, cache_ttl));

    // --- Update consumer ---
    let cancel = CancellationToken::new();
    let bus_consumer =
        trackpulse_bus::Consumer::new(pool.clone(), config.bus_topic.clone(), config.bus_partitions);
    let consumer_handle = consumer::spawn(Arc::clone(&service), bus_consumer, cancel.clone());

    // --- Router ---
    let app_state = AppState {
        service,
        config: Arc::new(config.clone()),
    };

    let app = axum::Router::new()
        .merge(routes::health::router())
        .nest("/api/v1", routes::api_routes())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .with_state(app_state);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    // The server drains when a signal arrives or when the consumer dies.
    let shutdown_cancel = cancel.clone();
    let consumer_died = cancel.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::select! {
                () = shutdown_signal() => shutdown_cancel.cancel(),
                () = consumer_died.cancelled() => {}
            }
        })
        .await
        .expect("Server error");

    // --- Post-shutdown cleanup ---
    cancel.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(5), consumer_handle).await;
    tracing::info!("Graceful shutdown complete");
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix) so the server shuts
/// down cleanly whether stopped interactively or by a process manager.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
