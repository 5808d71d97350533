// crates/server/src/jobs/watchdog.rs
//! Periodic sweep bounding resource usage from stuck providers.
//!
//! Force-fails any `Running` job whose `updated_at` has not advanced
//! past the stall timeout, and collects terminal jobs once the
//! retention window elapses.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;

use super::store::JobStore;

#[derive(Debug, Clone, Copy)]
pub struct WatchdogConfig {
    pub interval: Duration,
    /// A `Running` job with no update for this long is force-failed.
    pub stall_timeout: Duration,
    /// Terminal jobs are kept this long before collection.
    pub retention: Duration,
}

/// Spawn the sweep loop. Runs until the task is aborted.
pub fn spawn_watchdog(store: Arc<JobStore>, config: WatchdogConfig) -> JoinHandle<()> {
    let stall = chrono::Duration::from_std(config.stall_timeout)
        .unwrap_or_else(|_| chrono::Duration::seconds(300));
    let retention = chrono::Duration::from_std(config.retention)
        .unwrap_or_else(|_| chrono::Duration::seconds(3600));

    tokio::spawn(async move {
        loop {
            tokio::time::sleep(config.interval).await;
            let (stalled, collected) = store.sweep(Utc::now(), stall, retention);
            if stalled > 0 || collected > 0 {
                tracing::info!(stalled, collected, "Watchdog sweep");
            }
        }
    })
}
