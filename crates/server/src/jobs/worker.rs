// crates/server/src/jobs/worker.rs
//! Fixed-size worker pool that executes queued jobs.
//!
//! Workers drain the claim queue FIFO, run the provider adapter for the
//! job's kind, and report transitions back to the store. Transient
//! provider failures are retried with exponential backoff; cancellation
//! is checked at checkpoints (before each attempt and during backoff),
//! never by killing an in-flight provider call.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use mediaforge_types::{ErrorKind, JobError, JobId, JobStatus};

use super::provider::{ProgressFn, ProviderError, ProviderRegistry};
use super::store::{ClaimedJob, JobStore, TransitionPayload};
use crate::metrics::record_retry;

/// Retry policy for transient provider failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Maximum retries after the first attempt.
    pub max_retries: u32,
    /// First backoff delay; doubles on each retry.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(250),
        }
    }
}

/// Handle to the spawned pool. Workers exit when the claim channel
/// closes (i.e. the store is dropped).
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `workers` tasks draining the claim queue.
    pub fn spawn(
        workers: usize,
        store: Arc<JobStore>,
        claim_rx: mpsc::Receiver<JobId>,
        registry: Arc<ProviderRegistry>,
        policy: RetryPolicy,
    ) -> Self {
        let claims = Arc::new(Mutex::new(claim_rx));
        let handles = (0..workers)
            .map(|worker_id| {
                let store = store.clone();
                let claims = claims.clone();
                let registry = registry.clone();
                tokio::spawn(async move {
                    worker_loop(worker_id, store, claims, registry, policy).await;
                })
            })
            .collect();
        Self { handles }
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

async fn worker_loop(
    worker_id: usize,
    store: Arc<JobStore>,
    claims: Arc<Mutex<mpsc::Receiver<JobId>>>,
    registry: Arc<ProviderRegistry>,
    policy: RetryPolicy,
) {
    loop {
        // Hold the receiver lock only while waiting for the next id so
        // idle workers contend fairly for claims.
        let id = {
            let mut rx = claims.lock().await;
            rx.recv().await
        };
        let Some(id) = id else {
            tracing::debug!(worker_id, "Claim queue closed, worker exiting");
            return;
        };
        // Cancelled-while-queued ids are stale; skip them.
        let Some(claimed) = store.claim(id) else {
            continue;
        };
        run_job(&store, &registry, policy, claimed).await;
    }
}

/// Execute one claimed job to a terminal proposal.
async fn run_job(
    store: &Arc<JobStore>,
    registry: &ProviderRegistry,
    policy: RetryPolicy,
    claimed: ClaimedJob,
) {
    let ClaimedJob {
        id,
        kind,
        params,
        cancel,
    } = claimed;

    let Some(provider) = registry.get(kind) else {
        // Misconfiguration: a kind passed validation with no adapter.
        fail(store, id, ErrorKind::ProviderPermanent, format!("no provider configured for kind {kind}"));
        return;
    };

    let progress: ProgressFn = {
        let store = store.clone();
        Arc::new(move |p| {
            let _ = store.set_progress(id, p);
        })
    };

    let mut attempt: u32 = 0;
    let mut delay = policy.base_delay;
    loop {
        // Checkpoint: a cancel that arrived before this attempt wins.
        if cancel.is_cancelled() {
            propose_cancelled(store, id);
            return;
        }

        match provider.generate(&params, &progress).await {
            Ok(url) => {
                let payload = TransitionPayload {
                    result: Some(url),
                    ..Default::default()
                };
                if let Err(e) = store.apply_transition(id, JobStatus::Completed, payload) {
                    // Lost the race against a watchdog failure; the
                    // store kept the authoritative terminal state.
                    tracing::warn!(job_id = %id, error = %e, "Completion rejected");
                }
                return;
            }
            Err(ProviderError::Transient(msg)) if attempt < policy.max_retries => {
                attempt += 1;
                record_retry(kind);
                tracing::warn!(
                    job_id = %id,
                    provider = provider.name(),
                    attempt,
                    max_retries = policy.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %msg,
                    "Transient provider failure, retrying"
                );
                // Checkpoint: backoff sleeps abort on cancellation.
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => {
                        propose_cancelled(store, id);
                        return;
                    }
                }
                delay *= 2;
            }
            Err(ProviderError::Transient(msg)) => {
                fail(
                    store,
                    id,
                    ErrorKind::ProviderTransient,
                    format!("retries exhausted after {attempt} attempts: {msg}"),
                );
                return;
            }
            Err(ProviderError::Permanent(msg)) => {
                fail(store, id, ErrorKind::ProviderPermanent, msg);
                return;
            }
        }
    }
}

fn fail(store: &JobStore, id: JobId, kind: ErrorKind, message: String) {
    tracing::error!(job_id = %id, error_kind = %kind, message = %message, "Job failed");
    let payload = TransitionPayload {
        error: Some(JobError::new(kind, message)),
        ..Default::default()
    };
    if let Err(e) = store.apply_transition(id, JobStatus::Failed, payload) {
        tracing::warn!(job_id = %id, error = %e, "Failure proposal rejected");
    }
}

fn propose_cancelled(store: &JobStore, id: JobId) {
    // The token is also cancelled when another proposer already landed
    // a terminal transition; a rejection here just means that.
    if store
        .apply_transition(id, JobStatus::Cancelled, TransitionPayload::default())
        .is_ok()
    {
        tracing::info!(job_id = %id, "Job cancelled at worker checkpoint");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::provider::Provider;
    use async_trait::async_trait;
    use mediaforge_types::JobKind;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    /// Provider that replays a script of outcomes, one per call.
    struct ScriptedProvider {
        outcomes: StdMutex<VecDeque<Result<String, ProviderError>>>,
        calls: AtomicUsize,
        progress_ticks: Vec<u8>,
    }

    impl ScriptedProvider {
        fn new(outcomes: Vec<Result<String, ProviderError>>) -> Self {
            Self {
                outcomes: StdMutex::new(outcomes.into()),
                calls: AtomicUsize::new(0),
                progress_ticks: Vec::new(),
            }
        }

        fn with_progress(mut self, ticks: Vec<u8>) -> Self {
            self.progress_ticks = ticks;
            self
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Provider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn generate(
            &self,
            _params: &serde_json::Value,
            progress: &ProgressFn,
        ) -> Result<String, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            for tick in &self.progress_ticks {
                progress(*tick);
            }
            self.outcomes
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(ProviderError::Permanent("script exhausted".into())))
        }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(1),
        }
    }

    fn params() -> serde_json::Value {
        serde_json::json!({"prompt": "a sunrise over water"})
    }

    async fn wait_terminal(store: &JobStore, id: JobId) -> mediaforge_types::Job {
        for _ in 0..200 {
            let job = store.snapshot(id).unwrap();
            if job.status.is_terminal() {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("job never reached a terminal status");
    }

    fn pool_with(
        provider: Arc<ScriptedProvider>,
        workers: usize,
    ) -> (Arc<JobStore>, WorkerPool) {
        let (store, claim_rx) = JobStore::new(16);
        let registry = Arc::new(ProviderRegistry::new().register(JobKind::Video, provider));
        let pool = WorkerPool::spawn(workers, store.clone(), claim_rx, registry, fast_policy());
        (store, pool)
    }

    #[tokio::test]
    async fn job_completes_with_result_url() {
        let provider = Arc::new(
            ScriptedProvider::new(vec![Ok("https://cdn.example/v.mp4".into())])
                .with_progress(vec![25, 75]),
        );
        let (store, _pool) = pool_with(provider.clone(), 1);

        let id = store.submit(JobKind::Video, params()).unwrap();
        let job = wait_terminal(&store, id).await;

        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.result.as_deref(), Some("https://cdn.example/v.mp4"));
        assert_eq!(job.progress, Some(100));
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn transient_failures_are_retried_until_success() {
        let transient = || Err(ProviderError::Transient("timeout".into()));
        let provider = Arc::new(ScriptedProvider::new(vec![
            transient(),
            transient(),
            transient(),
            Ok("https://cdn.example/v.mp4".into()),
        ]));
        let (store, _pool) = pool_with(provider.clone(), 1);

        let id = store.submit(JobKind::Video, params()).unwrap();
        let job = wait_terminal(&store, id).await;

        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(provider.calls(), 4, "three retries then success");
    }

    #[tokio::test]
    async fn exhausted_retries_fail_transient() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Err(ProviderError::Transient("rate limited".into())),
            Err(ProviderError::Transient("rate limited".into())),
            Err(ProviderError::Transient("rate limited".into())),
            Err(ProviderError::Transient("rate limited".into())),
        ]));
        let (store, _pool) = pool_with(provider.clone(), 1);

        let id = store.submit(JobKind::Video, params()).unwrap();
        let job = wait_terminal(&store, id).await;

        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(
            job.error.as_ref().map(|e| e.kind),
            Some(ErrorKind::ProviderTransient)
        );
        assert_eq!(provider.calls(), 4, "initial attempt plus max_retries");
    }

    #[tokio::test]
    async fn permanent_failure_is_not_retried() {
        let provider = Arc::new(ScriptedProvider::new(vec![Err(ProviderError::Permanent(
            "bad input".into(),
        ))]));
        let (store, _pool) = pool_with(provider.clone(), 1);

        let id = store.submit(JobKind::Video, params()).unwrap();
        let job = wait_terminal(&store, id).await;

        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(
            job.error.as_ref().map(|e| e.kind),
            Some(ErrorKind::ProviderPermanent)
        );
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn cancelled_while_queued_never_runs() {
        let provider = Arc::new(ScriptedProvider::new(vec![Ok("unused".into())]));
        // No workers yet: submit and cancel while queued.
        let (store, claim_rx) = JobStore::new(16);
        let id = store.submit(JobKind::Video, params()).unwrap();
        store.cancel(id).unwrap();

        let registry = Arc::new(ProviderRegistry::new().register(JobKind::Video, provider.clone()));
        let _pool = WorkerPool::spawn(1, store.clone(), claim_rx, registry, fast_policy());

        let job = wait_terminal(&store, id).await;
        assert_eq!(job.status, JobStatus::Cancelled);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(provider.calls(), 0, "worker must never see the job");
    }

    #[tokio::test]
    async fn cancel_between_retries_lands_cancelled() {
        // First attempt fails transient; cancellation arrives during
        // the (long) backoff sleep and aborts it.
        let provider = Arc::new(ScriptedProvider::new(vec![Err(ProviderError::Transient(
            "timeout".into(),
        ))]));
        let (store, claim_rx) = JobStore::new(16);
        let registry = Arc::new(ProviderRegistry::new().register(JobKind::Video, provider.clone()));
        let policy = RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_secs(60),
        };
        let _pool = WorkerPool::spawn(1, store.clone(), claim_rx, registry, policy);

        let id = store.submit(JobKind::Video, params()).unwrap();
        // Wait for the job to enter backoff, then cancel.
        for _ in 0..200 {
            if provider.calls() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        store.cancel(id).unwrap();

        let job = wait_terminal(&store, id).await;
        assert_eq!(job.status, JobStatus::Cancelled);
        assert_eq!(provider.calls(), 1, "no attempt after cancellation");
    }

    #[tokio::test]
    async fn missing_provider_fails_permanent() {
        let (store, claim_rx) = JobStore::new(16);
        let registry = Arc::new(ProviderRegistry::new());
        let _pool = WorkerPool::spawn(1, store.clone(), claim_rx, registry, fast_policy());

        let id = store.submit(JobKind::Speech, params()).unwrap();
        let job = wait_terminal(&store, id).await;
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(
            job.error.as_ref().map(|e| e.kind),
            Some(ErrorKind::ProviderPermanent)
        );
    }

    #[tokio::test]
    async fn pool_runs_jobs_concurrently() {
        // Two slow jobs on two workers finish in roughly one job's time.
        struct SlowProvider;
        #[async_trait]
        impl Provider for SlowProvider {
            fn name(&self) -> &str {
                "slow"
            }
            async fn generate(
                &self,
                _params: &serde_json::Value,
                _progress: &ProgressFn,
            ) -> Result<String, ProviderError> {
                tokio::time::sleep(Duration::from_millis(100)).await;
                Ok("https://cdn.example/x".into())
            }
        }

        let (store, claim_rx) = JobStore::new(16);
        let registry = Arc::new(ProviderRegistry::new().register(JobKind::Video, Arc::new(SlowProvider)));
        let pool = WorkerPool::spawn(2, store.clone(), claim_rx, registry, fast_policy());
        assert_eq!(pool.len(), 2);

        let start = std::time::Instant::now();
        let a = store.submit(JobKind::Video, params()).unwrap();
        let b = store.submit(JobKind::Video, params()).unwrap();
        wait_terminal(&store, a).await;
        wait_terminal(&store, b).await;
        assert!(
            start.elapsed() < Duration::from_millis(400),
            "two workers should overlap execution"
        );
    }
}
