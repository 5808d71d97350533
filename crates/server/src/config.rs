// crates/server/src/config.rs
//! Environment-driven server configuration.
//!
//! Every knob has a default; retry counts, backoff timing, stall
//! thresholds, and retention windows are deployment policy, not code.

use std::collections::HashMap;
use std::time::Duration;

use mediaforge_types::JobKind;

/// Default port for the server.
const DEFAULT_PORT: u16 = 47310;

/// Runtime configuration, read from `MEDIAFORGE_*` environment
/// variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    /// Worker pool size (N).
    pub workers: usize,
    /// Submission queue capacity; beyond it, submit fails `Busy`.
    pub queue_cap: usize,
    /// Max retries for transient provider failures (R).
    pub max_retries: u32,
    /// First backoff delay; doubles per retry.
    pub retry_base: Duration,
    /// Per-request timeout for provider calls.
    pub provider_timeout: Duration,
    /// Running jobs with no update for this long are force-failed.
    pub stall_timeout: Duration,
    /// Terminal jobs are retained this long before collection.
    pub retention: Duration,
    /// Watchdog sweep interval.
    pub sweep_interval: Duration,
    /// Generation endpoint per job kind.
    pub provider_endpoints: HashMap<JobKind, String>,
}

impl Config {
    /// Read configuration from the environment.
    pub fn from_env() -> Self {
        let base_url = env_string("MEDIAFORGE_PROVIDER_URL")
            .unwrap_or_else(|| "http://127.0.0.1:9800".to_string());
        let mut provider_endpoints = HashMap::new();
        for kind in JobKind::ALL {
            let var = format!("MEDIAFORGE_PROVIDER_URL_{}", kind.as_str().to_uppercase());
            let endpoint = std::env::var(&var)
                .unwrap_or_else(|_| format!("{}/generate/{kind}", base_url.trim_end_matches('/')));
            provider_endpoints.insert(kind, endpoint);
        }

        Self {
            port: env_parse("MEDIAFORGE_PORT")
                .or_else(|| env_parse("PORT"))
                .unwrap_or(DEFAULT_PORT),
            workers: env_parse("MEDIAFORGE_WORKERS").unwrap_or(4),
            queue_cap: env_parse("MEDIAFORGE_QUEUE_CAP").unwrap_or(64),
            max_retries: env_parse("MEDIAFORGE_MAX_RETRIES").unwrap_or(3),
            retry_base: Duration::from_millis(env_parse("MEDIAFORGE_RETRY_BASE_MS").unwrap_or(250)),
            provider_timeout: Duration::from_secs(
                env_parse("MEDIAFORGE_PROVIDER_TIMEOUT_SECS").unwrap_or(120),
            ),
            stall_timeout: Duration::from_secs(
                env_parse("MEDIAFORGE_STALL_TIMEOUT_SECS").unwrap_or(300),
            ),
            retention: Duration::from_secs(env_parse("MEDIAFORGE_RETENTION_SECS").unwrap_or(3600)),
            sweep_interval: Duration::from_secs(
                env_parse("MEDIAFORGE_SWEEP_INTERVAL_SECS").unwrap_or(30),
            ),
            provider_endpoints,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let mut provider_endpoints = HashMap::new();
        for kind in JobKind::ALL {
            provider_endpoints.insert(kind, format!("http://127.0.0.1:9800/generate/{kind}"));
        }
        Self {
            port: DEFAULT_PORT,
            workers: 4,
            queue_cap: 64,
            max_retries: 3,
            retry_base: Duration::from_millis(250),
            provider_timeout: Duration::from_secs(120),
            stall_timeout: Duration::from_secs(300),
            retention: Duration::from_secs(3600),
            sweep_interval: Duration::from_secs(30),
            provider_endpoints,
        }
    }
}

fn env_string(var: &str) -> Option<String> {
    std::env::var(var).ok().filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(var: &str) -> Option<T> {
    match std::env::var(var) {
        Ok(raw) => match raw.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(var, value = %raw, "Ignoring unparseable config value");
                None
            }
        },
        Err(_) => None,
    }
}
