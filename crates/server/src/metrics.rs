// crates/server/src/metrics.rs
//! Application metrics for Prometheus monitoring.
//!
//! This module provides:
//! - Prometheus metrics recorder initialization
//! - Metric definitions (counters and gauges)
//! - Helper functions for recording metrics
//! - `/api/metrics` endpoint handler

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;

use mediaforge_types::{JobKind, JobStatus};

/// Global Prometheus handle for rendering metrics.
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Call once at startup, before any metrics are recorded. Returns
/// `true` if initialization succeeded, `false` if already initialized.
pub fn init_metrics() -> bool {
    if PROMETHEUS_HANDLE.get().is_some() {
        return false;
    }

    let recorder = PrometheusBuilder::new().build_recorder();
    let handle = recorder.handle();

    if metrics::set_global_recorder(recorder).is_err() {
        tracing::warn!("Failed to set global metrics recorder (already set)");
        return false;
    }
    if PROMETHEUS_HANDLE.set(handle).is_err() {
        tracing::warn!("Failed to store Prometheus handle (already set)");
    }

    describe_metrics();
    tracing::info!("Prometheus metrics initialized");
    true
}

fn describe_metrics() {
    describe_counter!(
        "mediaforge_jobs_submitted_total",
        "Jobs accepted at submission, labeled by kind"
    );
    describe_counter!(
        "mediaforge_jobs_terminal_total",
        "Jobs reaching a terminal status, labeled by status"
    );
    describe_counter!(
        "mediaforge_provider_retries_total",
        "Transient provider failures retried, labeled by kind"
    );
    describe_gauge!(
        "mediaforge_queue_depth",
        "Jobs currently waiting in the submission queue"
    );
}

/// Record an accepted submission.
pub fn record_submit(kind: JobKind) {
    counter!("mediaforge_jobs_submitted_total", "kind" => kind.as_str()).increment(1);
}

/// Record a job reaching a terminal status.
pub fn record_terminal(status: JobStatus) {
    counter!("mediaforge_jobs_terminal_total", "status" => status.as_str()).increment(1);
}

/// Record a retried transient provider failure.
pub fn record_retry(kind: JobKind) {
    counter!("mediaforge_provider_retries_total", "kind" => kind.as_str()).increment(1);
}

/// Record the current submission-queue depth.
pub fn record_queue_depth(depth: usize) {
    gauge!("mediaforge_queue_depth").set(depth as f64);
}

/// GET /api/metrics — render all metrics in Prometheus text format.
pub async fn render_metrics() -> String {
    match PROMETHEUS_HANDLE.get() {
        Some(handle) => handle.render(),
        None => String::new(),
    }
}
