// crates/types/src/wire.rs
//! Request/response bodies for the job API.
//!
//! These three calls — submit, stream, cancel — are the entire surface
//! the rest of the application uses; nothing else reaches into the
//! store or worker pool.

use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;
use crate::job::{JobId, JobKind};

/// POST /api/jobs request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub kind: JobKind,
    pub params: serde_json::Value,
}

/// POST /api/jobs response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    pub job_id: JobId,
}

/// POST /api/jobs/{id}/cancel response body.
///
/// `acknowledged` is false when the job was already terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelResponse {
    pub acknowledged: bool,
}

/// Structured JSON error body for API errors.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub error_kind: ErrorKind,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(error_kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            error_kind,
            message: message.into(),
        }
    }
}
