// crates/types/src/lib.rs
//! Shared types for the mediaforge generation-job service.
//!
//! This crate defines the job data model, the status state machine, the
//! wire types exchanged between server and client, and the error
//! taxonomy. It has no runtime dependencies so both the server and the
//! client tracker can build on it.

pub mod error;
pub mod job;
pub mod wire;

pub use error::{ErrorKind, JobError};
pub use job::{Job, JobFrame, JobId, JobKind, JobStatus};
pub use wire::{CancelResponse, ErrorResponse, SubmitRequest, SubmitResponse};
