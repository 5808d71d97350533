// crates/types/src/error.rs
//! Error taxonomy shared between server and client.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classification of every failure the job subsystem can surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    /// Submission payload rejected; no job was created.
    InvalidParams,
    /// Submission queue at capacity; no job was created.
    Busy,
    /// Unknown job id.
    NotFound,
    /// Provider failure that is retried inside the worker
    /// (network, timeout, rate limit).
    ProviderTransient,
    /// Provider failure that fails the job immediately
    /// (malformed response, provider-reported bad input).
    ProviderPermanent,
    /// Client-side stream failure; the job may still be running
    /// server-side.
    Connection,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidParams => "invalidParams",
            ErrorKind::Busy => "busy",
            ErrorKind::NotFound => "notFound",
            ErrorKind::ProviderTransient => "providerTransient",
            ErrorKind::ProviderPermanent => "providerPermanent",
            ErrorKind::Connection => "connection",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured error carried on failed jobs and in API error bodies.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[error("{kind}: {message}")]
pub struct JobError {
    pub kind: ErrorKind,
    pub message: String,
}

impl JobError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidParams, message)
    }

    pub fn busy(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Busy, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }
}
