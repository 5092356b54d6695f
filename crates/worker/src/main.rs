mod config;
mod ops;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use trackpulse_bus::Publisher;
use trackpulse_cache::RateLimiter;
use trackpulse_carrier::CarrierClient;
use trackpulse_poller::{Planner, Poller};

use config::WorkerConfig;

/// How long to wait for Postgres to come up before giving up.
const DB_CONNECT_WAIT: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "trackpulse_worker=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = Arc::new(WorkerConfig::from_env());
    tracing::info!(
        host = %config.host,
        port = config.port,
        carrier_mode = %config.carrier_mode,
        "Loaded worker configuration",
    );

    // --- Database ---
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");

    let pool = trackpulse_db::connect_with_retry(&database_url, DB_CONNECT_WAIT)
        .await
        .expect("Failed to connect to database");
    tracing::info!("Database connection pool created");

    trackpulse_db::bootstrap_schema(&pool)
        .await
        .expect("Failed to bootstrap tracking schema");
    trackpulse_bus::bootstrap_schema(&pool)
        .await
        .expect("Failed to bootstrap stream schema");
    tracing::info!("Database schema bootstrapped");

    // --- Rate limiter (optional) ---
    let limiter = match &config.redis_url {
        Some(url) => match RateLimiter::connect(url).await {
            Ok(limiter) => {
                tracing::info!("Rate limiter connected");
                Some(limiter)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Redis unavailable, running without rate limits");
                None
            }
        },
        None => {
            tracing::info!("No REDIS_URL configured, running without rate limits");
            None
        }
    };

    // --- Carrier adapter ---
    let carrier = CarrierClient::from_mode(
        &config.carrier_mode,
        &config.carrier_base_url,
        &config.carrier_api_key,
        &config.carrier_domain,
    );

    // --- Poller ---
    let publisher = Publisher::new(pool.clone(), config.bus_partitions);
    let planner = Planner::new(config.planner_config());
    let poller = Poller::new(
        pool.clone(),
        carrier,
        publisher,
        limiter,
        config.bus_topic.clone(),
        config.poller_settings(),
        planner,
    );
    let handle = poller.handle();

    // --- Shutdown wiring ---
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            cancel.cancel();
        });
    }

    // --- Ops HTTP server ---
    let ops_state = ops::OpsState {
        poller: handle,
        config: Arc::clone(&config),
    };
    let ops_router = ops::router(ops_state).layer(TraceLayer::new_for_http());

    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid WORKER_HOST address"),
        config.port,
    );
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind ops address");
    tracing::info!(%addr, "Ops server listening");

    let ops_cancel = cancel.clone();
    let ops_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, ops_router)
            .with_graceful_shutdown(ops_cancel.cancelled_owned())
            .await
        {
            tracing::error!(error = %e, "Ops server stopped");
        }
    });

    // --- Run the scheduler until cancelled ---
    poller.run(cancel.clone()).await;

    let _ = tokio::time::timeout(Duration::from_secs(5), ops_handle).await;
    tracing::info!("Graceful shutdown complete");
}

/// Wait for a termination signal (SIGINT or SIGTERM on Unix).
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
