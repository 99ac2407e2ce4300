//! Strata REST API
//!
//! HTTP API layer for Strata, built with Axum.
//!
//! # Endpoints
//!
//! ## Ingest
//! - `POST /api/v1/samples` - Batch of raw samples
//!
//! ## Query
//! - `GET /api/v1/series/:id/summary` - Summary of one series
//! - `GET /api/v1/series/:id/data` - Downsampled series
//! - `GET /api/v1/series/:id/latest` - Most recent raw sample
//! - `POST /api/v1/groups/summary` - Summary over several series
//! - `POST /api/v1/groups/data` - Downsampled group
//!
//! ## Aggregation
//! - `POST /api/v1/aggregation/run` - Run due aggregation passes
//!
//! ## Health
//! - `GET /health/live` - Liveness probe
//! - `GET /health/ready` - Readiness probe
//! - `GET /health` - Full health status
//!
//! # Example
//!
//! ```rust,ignore
//! use strata::api::{serve, ApiConfig, AppState};
//! use strata::clock::SystemClock;
//! use strata::server::{MetricsServer, ServerOptions};
//! use strata::storage::MemoryStore;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = Arc::new(MetricsServer::new(
//!         Arc::new(MemoryStore::new()),
//!         Arc::new(SystemClock),
//!         ServerOptions::default(),
//!     ));
//!     let config = ApiConfig::default();
//!
//!     serve(AppState::new(server, config.clone()), &config).await?;
//!     Ok(())
//! }
//! ```

pub mod dto;
pub mod error;
pub mod routes;
pub mod state;

pub use error::{ApiError, ApiResult};
pub use state::{ApiConfig, AppState};

use axum::{
    routing::{get, post},
    Router,
};
use std::future::Future;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Build the API router with all routes and middleware
pub fn build_router(state: AppState) -> Router {
    let api_routes = Router::new()
        // Ingest routes
        .route("/samples", post(routes::ingest::ingest_samples))
        // Query routes
        .route("/series/:id/summary", get(routes::query::series_summary))
        .route("/series/:id/data", get(routes::query::series_data))
        .route("/series/:id/latest", get(routes::query::series_latest))
        .route("/groups/summary", post(routes::query::group_summary))
        .route("/groups/data", post(routes::query::group_data))
        // Aggregation routes
        .route("/aggregation/run", post(routes::aggregation::run_aggregation));

    let health_routes = Router::new()
        .route("/live", get(routes::health::liveness))
        .route("/ready", get(routes::health::readiness))
        .route("/", get(routes::health::full_health));

    // Create shared state
    let shared_state = Arc::new(state);

    Router::new()
        .nest("/api/v1", api_routes)
        .nest("/health", health_routes)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(shared_state)
}

/// Start the API server and run until a shutdown signal arrives
pub async fn serve(state: AppState, config: &ApiConfig) -> Result<(), ApiError> {
    serve_with_shutdown(state, config, shutdown_signal()).await
}

/// Start the API server and run until `shutdown` resolves
pub async fn serve_with_shutdown<F>(
    state: AppState,
    config: &ApiConfig,
    shutdown: F,
) -> Result<(), ApiError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let router = build_router(state);

    let addr = config.addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Strata API listening on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| ApiError::Internal(format!("Server error: {}", e)))?;

    tracing::info!("Strata API shut down gracefully");
    Ok(())
}

/// Wait for shutdown signal
pub async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, starting graceful shutdown");
}
