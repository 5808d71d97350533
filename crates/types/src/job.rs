// crates/types/src/job.rs
//! Job data model and status state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::JobError;

/// Unique identifier for a generation job, assigned at submission.
pub type JobId = Uuid;

/// The kind of generation work a job performs.
///
/// The kind selects the provider adapter that executes the job; the
/// `params` payload is opaque to everything except that adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Text,
    Image,
    Video,
    Audio,
    Speech,
}

impl JobKind {
    /// All kinds, in a stable order (used for config and registry setup).
    pub const ALL: [JobKind; 5] = [
        JobKind::Text,
        JobKind::Image,
        JobKind::Video,
        JobKind::Audio,
        JobKind::Speech,
    ];

    /// Lowercase name, matching the wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Text => "text",
            JobKind::Image => "image",
            JobKind::Video => "video",
            JobKind::Audio => "audio",
            JobKind::Speech => "speech",
        }
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a job.
///
/// The store is the only component that moves a job between statuses.
/// Legal edges:
///
/// ```text
/// Queued ──> Running ──> Completed
///    │          │  └───> Failed
///    │          └──────> Cancelled
///    └─────────────────> Cancelled
/// ```
///
/// No edge leaves a terminal status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Whether this status admits no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Whether the edge `self -> next` is legal.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Queued, Running) | (Queued, Cancelled) | (Running, Completed) | (Running, Failed) | (Running, Cancelled)
        )
    }

    /// Lowercase name, matching the wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A generation job as held by the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: JobId,
    pub kind: JobKind,
    /// Provider-specific request payload. Validated at submission,
    /// opaque afterwards.
    pub params: serde_json::Value,
    pub status: JobStatus,
    /// Advisory progress, 0-100. Monotonically non-decreasing.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
    /// Present only when `status` is `Completed`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    /// Present only when `status` is `Failed`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JobError>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Create a freshly-submitted job in `Queued` status.
    pub fn new(kind: JobKind, params: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            kind,
            params,
            status: JobStatus::Queued,
            progress: None,
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// The status frame observers see for the current state.
    pub fn frame(&self) -> JobFrame {
        JobFrame {
            job_id: self.id,
            status: self.status,
            progress: self.progress,
            result: self.result.clone(),
            error: self.error.clone(),
        }
    }
}

/// One status event on a job's stream.
///
/// The first frame a subscriber receives is always the current
/// snapshot; the stream ends after a terminal frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobFrame {
    pub job_id: JobId,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JobError>,
}
