// crates/server/src/jobs/provider.rs
//! Provider trait defining the interface to generation backends.
//!
//! A provider adapter is the only component that interprets a job's
//! `params`. Failures are classified at the adapter boundary: transient
//! failures are retried by the worker, permanent ones fail the job
//! immediately.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use mediaforge_types::JobKind;

/// Callback a provider may use to report advisory progress (0-100).
pub type ProgressFn = Arc<dyn Fn(u8) + Send + Sync>;

/// Failure classification for a provider call.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Network failure, timeout, or rate limit. Retried with backoff.
    #[error("transient provider failure: {0}")]
    Transient(String),

    /// Malformed response or provider-reported bad input. Not retried.
    #[error("permanent provider failure: {0}")]
    Permanent(String),
}

/// Trait for generation backends (image, video, audio, speech, text).
///
/// Implementations include:
/// - `HttpProvider` — posts params to a hosted generation endpoint
/// - scripted in-process providers in tests
#[async_trait]
pub trait Provider: Send + Sync {
    /// Adapter name for logging (e.g. "http:video").
    fn name(&self) -> &str;

    /// Execute one generation request and return the content URL.
    async fn generate(
        &self,
        params: &serde_json::Value,
        progress: &ProgressFn,
    ) -> Result<String, ProviderError>;
}

/// Maps each job kind to the adapter that executes it.
pub struct ProviderRegistry {
    providers: HashMap<JobKind, Arc<dyn Provider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self {
            providers: HashMap::new(),
        }
    }

    pub fn register(mut self, kind: JobKind, provider: Arc<dyn Provider>) -> Self {
        self.providers.insert(kind, provider);
        self
    }

    pub fn get(&self, kind: JobKind) -> Option<Arc<dyn Provider>> {
        self.providers.get(&kind).cloned()
    }

    /// Build the production registry: one `HttpProvider` per configured
    /// endpoint.
    pub fn from_endpoints(
        endpoints: &HashMap<JobKind, String>,
        timeout: Duration,
    ) -> Self {
        let client = reqwest::Client::new();
        let mut registry = Self::new();
        for (kind, endpoint) in endpoints {
            registry = registry.register(
                *kind,
                Arc::new(HttpProvider::new(*kind, client.clone(), endpoint.clone(), timeout)),
            );
        }
        registry
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Production adapter: posts the job params to a hosted generation
/// endpoint and expects `{"url": "..."}` back.
pub struct HttpProvider {
    name: String,
    client: reqwest::Client,
    endpoint: String,
    timeout: Duration,
}

impl HttpProvider {
    pub fn new(kind: JobKind, client: reqwest::Client, endpoint: String, timeout: Duration) -> Self {
        Self {
            name: format!("http:{kind}"),
            client,
            endpoint,
            timeout,
        }
    }
}

#[async_trait]
impl Provider for HttpProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(
        &self,
        params: &serde_json::Value,
        _progress: &ProgressFn,
    ) -> Result<String, ProviderError> {
        let response = self
            .client
            .post(&self.endpoint)
            .timeout(self.timeout)
            .json(params)
            .send()
            .await
            .map_err(|e| {
                // Connect failures and timeouts are retryable.
                ProviderError::Transient(format!("{}: {e}", self.name))
            })?;

        let status = response.status();
        if status.as_u16() == 429 || status.is_server_error() {
            return Err(ProviderError::Transient(format!(
                "{}: endpoint returned {status}",
                self.name
            )));
        }
        if !status.is_success() {
            return Err(ProviderError::Permanent(format!(
                "{}: endpoint rejected request with {status}",
                self.name
            )));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ProviderError::Permanent(format!("{}: malformed body: {e}", self.name)))?;
        body.get("url")
            .and_then(|u| u.as_str())
            .map(str::to_owned)
            .ok_or_else(|| {
                ProviderError::Permanent(format!("{}: response missing 'url'", self.name))
            })
    }
}
