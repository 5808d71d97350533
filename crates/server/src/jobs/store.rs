// crates/server/src/jobs/store.rs
//! Authoritative job store.
//!
//! The store owns all job state. Workers, the watchdog, and the cancel
//! endpoint only *propose* transitions; the store accepts or rejects
//! them against the state machine in [`JobStatus::can_transition_to`]
//! and rejected edges are logged, never applied.
//!
//! Each entry carries its own mutex (single-writer discipline per job
//! id) and its own `broadcast` channel, so publishing a frame can never
//! stall a worker and a late cancel can never race a completion into
//! two terminal states.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

use mediaforge_types::{Job, JobError, JobFrame, JobId, JobKind, JobStatus};

use crate::metrics::{record_queue_depth, record_submit, record_terminal};

/// Per-subscriber buffer for status frames. A job emits at most a
/// handful of transition frames plus advisory progress, so a small
/// ring is plenty; laggards are resynced from the snapshot.
const EVENT_BUFFER: usize = 64;

/// Fields a proposed transition may carry.
#[derive(Debug, Default, Clone)]
pub struct TransitionPayload {
    pub progress: Option<u8>,
    pub result: Option<String>,
    pub error: Option<JobError>,
}

/// Rejection of a proposed transition.
///
/// Internal to the server: proposers log and move on, nothing maps
/// this onto the wire taxonomy.
#[derive(Debug, Error)]
pub enum TransitionError {
    #[error("unknown job id {0}")]
    NotFound(JobId),
    #[error("illegal transition {from} -> {to}")]
    Illegal { from: JobStatus, to: JobStatus },
}

struct JobEntry {
    job: Mutex<Job>,
    events: broadcast::Sender<JobFrame>,
    cancel: CancellationToken,
}

/// A claimed job handed to a worker: the data it needs plus the
/// cooperative cancellation token.
pub struct ClaimedJob {
    pub id: JobId,
    pub kind: JobKind,
    pub params: serde_json::Value,
    pub cancel: CancellationToken,
}

/// Authoritative, thread-safe map from job id to job state.
pub struct JobStore {
    jobs: RwLock<HashMap<JobId, Arc<JobEntry>>>,
    claim_tx: mpsc::Sender<JobId>,
    queue_cap: usize,
}

impl JobStore {
    /// Create a store with a bounded submission queue.
    ///
    /// Returns the store and the claim receiver the worker pool drains.
    pub fn new(queue_cap: usize) -> (Arc<Self>, mpsc::Receiver<JobId>) {
        let (claim_tx, claim_rx) = mpsc::channel(queue_cap);
        let store = Arc::new(Self {
            jobs: RwLock::new(HashMap::new()),
            claim_tx,
            queue_cap,
        });
        (store, claim_rx)
    }

    /// Validate params and enqueue a new job.
    ///
    /// Fails with `InvalidParams` (no job created) on a bad payload and
    /// with `Busy` (no job created) when the queue is at capacity.
    pub fn submit(&self, kind: JobKind, params: serde_json::Value) -> Result<JobId, JobError> {
        validate_params(kind, &params)?;

        // Reserve a queue slot before creating the job so a full queue
        // never leaves an orphaned entry behind.
        let permit = self.claim_tx.try_reserve().map_err(|_| {
            JobError::busy(format!("submission queue at capacity ({})", self.queue_cap))
        })?;

        let job = Job::new(kind, params);
        let id = job.id;
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        let entry = Arc::new(JobEntry {
            job: Mutex::new(job),
            events,
            cancel: CancellationToken::new(),
        });

        self.jobs
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, entry);
        permit.send(id);

        record_submit(kind);
        record_queue_depth(self.queue_cap - self.claim_tx.capacity());
        tracing::info!(job_id = %id, kind = %kind, "Job submitted");
        Ok(id)
    }

    /// Current state of a job.
    pub fn snapshot(&self, id: JobId) -> Result<Job, JobError> {
        let entry = self.entry(id)?;
        let job = entry.job.lock().unwrap_or_else(|e| e.into_inner());
        Ok(job.clone())
    }

    /// Snapshot plus a live event receiver, taken atomically.
    ///
    /// The snapshot is always the first frame a subscriber should emit,
    /// even if it is already terminal; every frame published after it
    /// arrives on the receiver, in store-apply order.
    pub fn subscribe(&self, id: JobId) -> Result<(JobFrame, broadcast::Receiver<JobFrame>), JobError> {
        let entry = self.entry(id)?;
        let job = entry.job.lock().unwrap_or_else(|e| e.into_inner());
        let rx = entry.events.subscribe();
        Ok((job.frame(), rx))
    }

    /// Propose a status transition. Illegal edges are rejected and
    /// logged; the job is left untouched.
    pub fn apply_transition(
        &self,
        id: JobId,
        proposed: JobStatus,
        payload: TransitionPayload,
    ) -> Result<(), TransitionError> {
        let entry = self.entry(id).map_err(|_| TransitionError::NotFound(id))?;
        let mut job = entry.job.lock().unwrap_or_else(|e| e.into_inner());
        Self::transition_locked(&entry, &mut job, proposed, payload)
    }

    /// The one place a transition is decided and applied. Callers hold
    /// the entry lock, so the status check and the mutation are atomic.
    fn transition_locked(
        entry: &JobEntry,
        job: &mut Job,
        proposed: JobStatus,
        payload: TransitionPayload,
    ) -> Result<(), TransitionError> {
        if !job.status.can_transition_to(proposed) {
            tracing::warn!(
                job_id = %job.id,
                from = %job.status,
                to = %proposed,
                "Rejected illegal transition"
            );
            return Err(TransitionError::Illegal {
                from: job.status,
                to: proposed,
            });
        }

        job.status = proposed;
        if let Some(p) = payload.progress {
            apply_progress(job, p);
        }
        if proposed == JobStatus::Completed {
            job.result = payload.result;
            job.progress = Some(100);
        }
        if proposed == JobStatus::Failed {
            job.error = payload.error;
        }
        job.updated_at = Utc::now();

        if proposed.is_terminal() {
            // Wake any worker checkpoint still watching this job.
            entry.cancel.cancel();
            record_terminal(proposed);
        }

        tracing::info!(job_id = %job.id, status = %proposed, "Job transition applied");

        // Publish while holding the entry lock so subscribers can never
        // observe a snapshot/event interleaving that reorders frames.
        let _ = entry.events.send(job.frame());
        Ok(())
    }

    /// Advisory progress update. Only meaningful while `Running`;
    /// regressions are clamped to the current value.
    pub fn set_progress(&self, id: JobId, progress: u8) -> Result<(), JobError> {
        let entry = self.entry(id)?;
        let mut job = entry.job.lock().unwrap_or_else(|e| e.into_inner());
        if job.status != JobStatus::Running {
            return Ok(());
        }
        if apply_progress(&mut job, progress) {
            job.updated_at = Utc::now();
            let _ = entry.events.send(job.frame());
        }
        Ok(())
    }

    /// Claim a queued job for execution, transitioning it to `Running`.
    ///
    /// Returns `None` when the id no longer names a `Queued` job — in
    /// particular when it was cancelled while still in the queue, or
    /// already collected. The stale queue slot is simply skipped.
    pub fn claim(&self, id: JobId) -> Option<ClaimedJob> {
        let entry = self.entry(id).ok()?;
        let mut job = entry.job.lock().unwrap_or_else(|e| e.into_inner());
        if job.status != JobStatus::Queued {
            tracing::debug!(job_id = %id, status = %job.status, "Skipping stale queue entry");
            return None;
        }
        job.status = JobStatus::Running;
        job.updated_at = Utc::now();
        let _ = entry.events.send(job.frame());
        record_queue_depth(self.queue_cap - self.claim_tx.capacity());
        tracing::info!(job_id = %id, kind = %job.kind, "Job claimed");
        Some(ClaimedJob {
            id,
            kind: job.kind,
            params: job.params.clone(),
            cancel: entry.cancel.clone(),
        })
    }

    /// Request cancellation.
    ///
    /// A `Queued` job is marked `Cancelled` immediately and never runs.
    /// A `Running` job has its token cancelled; the worker applies the
    /// `Cancelled` transition at its next checkpoint (an in-flight
    /// provider call is not interrupted). Returns `Ok(false)` when the
    /// job was already terminal.
    pub fn cancel(&self, id: JobId) -> Result<bool, JobError> {
        let entry = self.entry(id)?;
        // Decide and apply under one lock: a concurrent cancel (or a
        // worker racing to terminal) sees either Queued or terminal,
        // never a half-applied edge. Double-cancel is valid input and
        // acknowledges false.
        let mut job = entry.job.lock().unwrap_or_else(|e| e.into_inner());
        match job.status {
            JobStatus::Queued => {
                let _ = Self::transition_locked(
                    &entry,
                    &mut job,
                    JobStatus::Cancelled,
                    TransitionPayload::default(),
                );
                Ok(true)
            }
            JobStatus::Running => {
                entry.cancel.cancel();
                tracing::info!(job_id = %id, "Cancellation requested for running job");
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Snapshots of all non-terminal jobs.
    pub fn active_jobs(&self) -> Vec<Job> {
        let jobs = self.jobs.read().unwrap_or_else(|e| e.into_inner());
        let mut active: Vec<Job> = jobs
            .values()
            .map(|e| e.job.lock().unwrap_or_else(|p| p.into_inner()).clone())
            .filter(|j| !j.status.is_terminal())
            .collect();
        active.sort_by_key(|j| j.created_at);
        active
    }

    /// Watchdog sweep: force-fail stalled `Running` jobs and collect
    /// terminal jobs past the retention window.
    ///
    /// Returns `(stalled, collected)` counts.
    pub fn sweep(&self, now: DateTime<Utc>, stall: chrono::Duration, retention: chrono::Duration) -> (usize, usize) {
        let ids: Vec<JobId> = {
            let jobs = self.jobs.read().unwrap_or_else(|e| e.into_inner());
            jobs.keys().copied().collect()
        };

        let mut stalled = 0;
        let mut expired = Vec::new();
        for id in ids {
            let Ok(entry) = self.entry(id) else { continue };
            let (status, updated_at) = {
                let job = entry.job.lock().unwrap_or_else(|e| e.into_inner());
                (job.status, job.updated_at)
            };
            if status == JobStatus::Running && now - updated_at > stall {
                let payload = TransitionPayload {
                    error: Some(JobError::new(
                        mediaforge_types::ErrorKind::ProviderTransient,
                        format!("job stalled: no update for {}s", (now - updated_at).num_seconds()),
                    )),
                    ..Default::default()
                };
                // A worker may have finished in the meantime; a rejected
                // edge here just means the job is no longer stalled.
                if self.apply_transition(id, JobStatus::Failed, payload).is_ok() {
                    tracing::warn!(job_id = %id, "Watchdog force-failed stalled job");
                    stalled += 1;
                }
            } else if status.is_terminal() && now - updated_at > retention {
                expired.push(id);
            }
        }

        if !expired.is_empty() {
            let mut jobs = self.jobs.write().unwrap_or_else(|e| e.into_inner());
            for id in &expired {
                jobs.remove(id);
            }
        }
        (stalled, expired.len())
    }

    fn entry(&self, id: JobId) -> Result<Arc<JobEntry>, JobError> {
        let jobs = self.jobs.read().unwrap_or_else(|e| e.into_inner());
        jobs.get(&id)
            .cloned()
            .ok_or_else(|| JobError::not_found(format!("unknown job id {id}")))
    }
}

/// Clamp-monotonic progress update. Returns whether the value changed.
fn apply_progress(job: &mut Job, progress: u8) -> bool {
    let clamped = progress.min(100).max(job.progress.unwrap_or(0));
    if job.progress == Some(clamped) {
        return false;
    }
    job.progress = Some(clamped);
    true
}

/// Submission-time schema check for a job kind's params.
///
/// Every kind requires an object payload with a non-empty string
/// `prompt`; the rest of the payload is opaque to the store and
/// interpreted only by the provider adapter.
fn validate_params(kind: JobKind, params: &serde_json::Value) -> Result<(), JobError> {
    let obj = params
        .as_object()
        .ok_or_else(|| JobError::invalid_params(format!("{kind} params must be a JSON object")))?;
    match obj.get("prompt").and_then(|p| p.as_str()) {
        Some(prompt) if !prompt.trim().is_empty() => Ok(()),
        Some(_) => Err(JobError::invalid_params(format!(
            "{kind} params require a non-empty 'prompt'"
        ))),
        None => Err(JobError::invalid_params(format!(
            "{kind} params require a string 'prompt'"
        ))),
    }
}
