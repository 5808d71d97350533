// crates/server/src/lib.rs
//! Mediaforge server library.
//!
//! This crate provides the Axum-based HTTP server for the mediaforge
//! generation-job subsystem: a validated submission queue, a worker
//! pool that drives provider adapters, and an SSE surface that streams
//! per-job status frames to observers.

pub mod config;
pub mod error;
pub mod jobs;
pub mod metrics;
pub mod routes;
pub mod state;

pub use config::Config;
pub use error::*;
pub use jobs::{
    HttpProvider, JobStore, Provider, ProviderError, ProviderRegistry, RetryPolicy, WorkerPool,
};
pub use metrics::init_metrics;
pub use routes::api_routes;
pub use state::AppState;

use std::sync::Arc;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use jobs::{spawn_watchdog, WatchdogConfig};

/// Create the Axum application with all routes and middleware.
///
/// This sets up:
/// - API routes (health, jobs, metrics)
/// - CORS for development (allows any origin)
/// - Request tracing
pub fn create_app(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(api_routes(state))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// Assemble the full job runtime: store, worker pool, and watchdog.
///
/// Returns the shared application state for [`create_app`]. The worker
/// and watchdog tasks run for the life of the tokio runtime; tests use
/// this with a scripted [`ProviderRegistry`] to exercise the whole
/// pipeline in-process.
pub fn spawn_runtime(config: &Config, registry: ProviderRegistry) -> Arc<AppState> {
    let (store, claim_rx) = JobStore::new(config.queue_cap);

    WorkerPool::spawn(
        config.workers,
        store.clone(),
        claim_rx,
        Arc::new(registry),
        RetryPolicy {
            max_retries: config.max_retries,
            base_delay: config.retry_base,
        },
    );

    spawn_watchdog(
        store.clone(),
        WatchdogConfig {
            interval: config.sweep_interval,
            stall_timeout: config.stall_timeout,
            retention: config.retention,
        },
    );

    AppState::new(store)
}

// ============================================================================
// Integration Tests
// ============================================================================
