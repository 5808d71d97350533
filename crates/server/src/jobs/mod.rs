// crates/server/src/jobs/mod.rs
//! The job subsystem: store, worker pool, providers, watchdog.

pub mod provider;
pub mod store;
pub mod watchdog;
pub mod worker;

pub use provider::{HttpProvider, ProgressFn, Provider, ProviderError, ProviderRegistry};
pub use store::{ClaimedJob, JobStore, TransitionError, TransitionPayload};
pub use watchdog::{spawn_watchdog, WatchdogConfig};
pub use worker::{RetryPolicy, WorkerPool};
