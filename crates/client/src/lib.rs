// crates/client/src/lib.rs
//! Mediaforge client library.
//!
//! Submits generation jobs to a mediaforge server and tracks them over
//! the SSE status stream: local state machine, bounded reconnects, and
//! guaranteed stream release when the watch handle is dropped.

pub mod error;
pub mod sse;
pub mod tracker;

pub use error::TrackerError;
pub use tracker::{JobTracker, JobWatch, ReconnectPolicy, TrackerState};
