// crates/client/src/tracker.rs
//! Client-side job tracker: submit a generation job and follow its
//! status over the server's SSE stream.
//!
//! A [`JobWatch`] owns a background task that consumes the stream and
//! mirrors it into a local state machine. The stream is released on
//! every exit path: a terminal frame, [`JobWatch::cancel`], or simply
//! dropping the handle.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use mediaforge_types::{
    ErrorResponse, Job, JobError, JobFrame, JobId, JobKind, JobStatus, SubmitRequest,
    SubmitResponse,
};

use crate::error::TrackerError;
use crate::sse::SseDecoder;

/// Local view of a tracked job's lifecycle.
///
/// `ConnectionLost` is client-only: the stream could not be kept open,
/// but the job may well still be running server-side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerState {
    Idle,
    Submitting,
    Streaming(JobStatus),
    Terminal(JobStatus),
    ConnectionLost,
}

/// Reconnect policy for a dropped stream.
///
/// Reopening is always safe: the stream replays the current snapshot
/// as its first frame.
#[derive(Debug, Clone, Copy)]
pub struct ReconnectPolicy {
    /// Consecutive failed connections tolerated before giving up.
    pub max_attempts: u32,
    /// Delay between reconnect attempts.
    pub delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_millis(500),
        }
    }
}

/// Entry point: submits jobs and hands out [`JobWatch`] handles.
pub struct JobTracker {
    client: reqwest::Client,
    base_url: String,
    reconnect: ReconnectPolicy,
}

impl JobTracker {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            reconnect: ReconnectPolicy::default(),
        }
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Submit a job and start following it.
    ///
    /// A server-side rejection (`InvalidParams`, `Busy`) is not a
    /// transport error: it returns a watch already in
    /// `Terminal(Failed)` carrying the rejection, and no stream is ever
    /// opened. `Err` is reserved for transport and protocol failures.
    pub async fn submit(
        &self,
        kind: JobKind,
        params: serde_json::Value,
    ) -> Result<JobWatch, TrackerError> {
        let response = self
            .client
            .post(format!("{}/api/jobs", self.base_url))
            .json(&SubmitRequest { kind, params })
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::CREATED {
            let accepted: SubmitResponse = response.json().await?;
            tracing::info!(job_id = %accepted.job_id, %kind, "Job submitted");
            return Ok(self.spawn_watch(accepted.job_id));
        }

        match parse_error(response).await? {
            err if matches!(
                err.kind,
                mediaforge_types::ErrorKind::InvalidParams | mediaforge_types::ErrorKind::Busy
            ) =>
            {
                tracing::warn!(error_kind = %err.kind, message = %err.message, "Submission rejected");
                Ok(JobWatch::rejected(err))
            }
            err => Err(TrackerError::Api(err)),
        }
    }

    /// Follow an already-submitted job (a second observer on the same
    /// stream). Unknown ids fail synchronously with `NotFound`.
    pub async fn watch(&self, job_id: JobId) -> Result<JobWatch, TrackerError> {
        self.snapshot(job_id).await?;
        Ok(self.spawn_watch(job_id))
    }

    /// Fetch the current snapshot of a job.
    pub async fn snapshot(&self, job_id: JobId) -> Result<Job, TrackerError> {
        let response = self
            .client
            .get(format!("{}/api/jobs/{job_id}", self.base_url))
            .send()
            .await?;
        if response.status().is_success() {
            return Ok(response.json().await?);
        }
        Err(TrackerError::Api(parse_error(response).await?))
    }

    fn spawn_watch(&self, job_id: JobId) -> JobWatch {
        let shared = Arc::new(WatchShared::new(TrackerState::Submitting));
        let (tx, rx) = mpsc::unbounded_channel();
        let stop = CancellationToken::new();

        let task = tokio::spawn(stream_task(
            self.client.clone(),
            format!("{}/api/jobs/{job_id}/stream", self.base_url),
            self.reconnect,
            shared.clone(),
            tx,
            stop.clone(),
        ));

        JobWatch {
            job_id: Some(job_id),
            shared,
            events: rx,
            task: Some(task),
            stop,
            cancel_endpoint: Some((
                self.client.clone(),
                format!("{}/api/jobs/{job_id}/cancel", self.base_url),
            )),
        }
    }
}

/// Decode a structured API error body.
async fn parse_error(response: reqwest::Response) -> Result<JobError, TrackerError> {
    let status = response.status();
    let body: ErrorResponse = response
        .json()
        .await
        .map_err(|e| TrackerError::Protocol(format!("unreadable error body ({status}): {e}")))?;
    Ok(JobError::new(body.error_kind, body.message))
}

/// Handle to one tracked job.
///
/// Dropping the handle aborts the background stream task.
#[derive(Debug)]
pub struct JobWatch {
    job_id: Option<JobId>,
    shared: Arc<WatchShared>,
    events: mpsc::UnboundedReceiver<JobFrame>,
    task: Option<JoinHandle<()>>,
    stop: CancellationToken,
    cancel_endpoint: Option<(reqwest::Client, String)>,
}

impl JobWatch {
    /// Watch for a submission the server rejected: already terminal,
    /// no stream, no job id.
    fn rejected(error: JobError) -> Self {
        let shared = WatchShared::new(TrackerState::Terminal(JobStatus::Failed));
        *lock(&shared.error) = Some(error);
        let (_tx, rx) = mpsc::unbounded_channel();
        Self {
            job_id: None,
            shared: Arc::new(shared),
            events: rx,
            task: None,
            stop: CancellationToken::new(),
            cancel_endpoint: None,
        }
    }

    /// Server-assigned id; `None` when the submission was rejected.
    pub fn job_id(&self) -> Option<JobId> {
        self.job_id
    }

    pub fn state(&self) -> TrackerState {
        *lock(&self.shared.state)
    }

    /// The most recent frame observed on the stream.
    pub fn last_frame(&self) -> Option<JobFrame> {
        lock(&self.shared.last_frame).clone()
    }

    /// The failure carried by a `Terminal(Failed)` state, whether from
    /// a rejected submission or a failed frame.
    pub fn error(&self) -> Option<JobError> {
        lock(&self.shared.error).clone()
    }

    /// Next frame from the stream; `None` once it has closed (terminal
    /// frame, cancellation, or connection given up).
    pub async fn next_event(&mut self) -> Option<JobFrame> {
        self.events.recv().await
    }

    /// Drain the stream to its end and return the final state.
    pub async fn wait(&mut self) -> TrackerState {
        while self.next_event().await.is_some() {}
        self.state()
    }

    /// Close the local stream and notify the server, fire-and-forget.
    ///
    /// Never blocks; the server-side cancel is best-effort and its
    /// outcome is not awaited.
    pub fn cancel(&self) {
        self.stop.cancel();
        if let Some((client, url)) = self.cancel_endpoint.clone() {
            tokio::spawn(async move {
                if let Err(e) = client.post(&url).send().await {
                    tracing::debug!(error = %e, "Cancel notification failed");
                }
            });
        }
    }
}

impl Drop for JobWatch {
    fn drop(&mut self) {
        self.stop.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[derive(Debug)]
struct WatchShared {
    state: Mutex<TrackerState>,
    last_frame: Mutex<Option<JobFrame>>,
    error: Mutex<Option<JobError>>,
}

impl WatchShared {
    fn new(state: TrackerState) -> Self {
        Self {
            state: Mutex::new(state),
            last_frame: Mutex::new(None),
            error: Mutex::new(None),
        }
    }

    fn set_state(&self, state: TrackerState) {
        *lock(&self.state) = state;
    }

    /// Mirror one frame into the local state machine.
    fn observe(&self, frame: &JobFrame) {
        let state = if frame.status.is_terminal() {
            TrackerState::Terminal(frame.status)
        } else {
            TrackerState::Streaming(frame.status)
        };
        *lock(&self.state) = state;
        if let Some(error) = &frame.error {
            *lock(&self.error) = Some(error.clone());
        }
        *lock(&self.last_frame) = Some(frame.clone());
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

enum StreamOutcome {
    /// A terminal frame arrived; the watch is done.
    Terminal,
    /// Local cancellation.
    Stopped,
    /// The stream ended or failed before a terminal frame.
    Dropped { received_any: bool },
}

async fn stream_task(
    client: reqwest::Client,
    stream_url: String,
    policy: ReconnectPolicy,
    shared: Arc<WatchShared>,
    tx: mpsc::UnboundedSender<JobFrame>,
    stop: CancellationToken,
) {
    let mut failures: u32 = 0;
    loop {
        match consume_stream(&client, &stream_url, &shared, &tx, &stop).await {
            StreamOutcome::Terminal | StreamOutcome::Stopped => return,
            StreamOutcome::Dropped { received_any } => {
                // A connection that produced frames resets the budget.
                failures = if received_any { 1 } else { failures + 1 };
                if failures > policy.max_attempts {
                    tracing::warn!(url = %stream_url, failures, "Stream lost, giving up");
                    shared.set_state(TrackerState::ConnectionLost);
                    return;
                }
                tracing::debug!(url = %stream_url, attempt = failures, "Reconnecting stream");
                tokio::select! {
                    _ = tokio::time::sleep(policy.delay) => {}
                    _ = stop.cancelled() => return,
                }
            }
        }
    }
}

/// Consume one stream connection until it yields a terminal frame,
/// drops, or is stopped locally.
async fn consume_stream(
    client: &reqwest::Client,
    stream_url: &str,
    shared: &WatchShared,
    tx: &mpsc::UnboundedSender<JobFrame>,
    stop: &CancellationToken,
) -> StreamOutcome {
    let response = tokio::select! {
        r = client.get(stream_url).send() => r,
        _ = stop.cancelled() => return StreamOutcome::Stopped,
    };
    let response = match response {
        Ok(r) if r.status().is_success() => r,
        Ok(r) => {
            tracing::debug!(url = %stream_url, status = %r.status(), "Stream request refused");
            return StreamOutcome::Dropped {
                received_any: false,
            };
        }
        Err(e) => {
            tracing::debug!(url = %stream_url, error = %e, "Stream request failed");
            return StreamOutcome::Dropped {
                received_any: false,
            };
        }
    };

    let mut body = response.bytes_stream();
    let mut decoder = SseDecoder::new();
    let mut received_any = false;
    loop {
        let chunk = tokio::select! {
            c = body.next() => c,
            _ = stop.cancelled() => return StreamOutcome::Stopped,
        };
        match chunk {
            Some(Ok(bytes)) => {
                for payload in decoder.push(&bytes) {
                    let frame: JobFrame = match serde_json::from_str(&payload) {
                        Ok(frame) => frame,
                        Err(e) => {
                            tracing::warn!(error = %e, "Skipping undecodable frame");
                            continue;
                        }
                    };
                    received_any = true;
                    let terminal = frame.status.is_terminal();
                    shared.observe(&frame);
                    let _ = tx.send(frame);
                    if terminal {
                        return StreamOutcome::Terminal;
                    }
                }
            }
            Some(Err(e)) => {
                tracing::debug!(url = %stream_url, error = %e, "Stream body error");
                return StreamOutcome::Dropped { received_any };
            }
            // Ended without a terminal frame; reconnect.
            None => return StreamOutcome::Dropped { received_any },
        }
    }
}
