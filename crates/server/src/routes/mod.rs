//! API route handlers for the mediaforge server.

pub mod health;
pub mod jobs;

use std::sync::Arc;

use axum::routing::get;
use axum::Router;

use crate::state::AppState;

/// Create the combined API router with all routes under /api prefix.
///
/// Routes:
/// - GET  /api/health - Health check
/// - POST /api/jobs - Submit a generation job
/// - GET  /api/jobs - List active jobs
/// - GET  /api/jobs/:id - Snapshot of one job
/// - GET  /api/jobs/:id/stream - SSE stream of status frames
/// - POST /api/jobs/:id/cancel - Request cancellation
/// - GET  /api/metrics - Prometheus metrics
pub fn api_routes(state: Arc<AppState>) -> Router {
    Router::new()
        .nest("/api", health::router())
        .nest("/api", jobs::router())
        .route("/api/metrics", get(crate::metrics::render_metrics))
        .with_state(state)
}
