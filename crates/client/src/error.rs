// crates/client/src/error.rs
use thiserror::Error;

use mediaforge_types::JobError;

/// Failures surfaced by the tracker.
///
/// Server-side rejections of a submission (`InvalidParams`, `Busy`) are
/// not errors here: they land the watch in `Terminal(Failed)` instead.
#[derive(Debug, Error)]
pub enum TrackerError {
    /// Transport-level failure talking to the server.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Structured API error for non-submission calls (e.g. unknown id).
    #[error(transparent)]
    Api(#[from] JobError),

    /// Response the client could not interpret.
    #[error("protocol error: {0}")]
    Protocol(String),
}
