// crates/server/src/main.rs
//! Mediaforge server binary.
//!
//! Starts the Axum HTTP server, the worker pool, and the watchdog.
//! All configuration comes from `MEDIAFORGE_*` environment variables;
//! see [`mediaforge_server::Config`] for the knobs and defaults.

use std::net::SocketAddr;

use anyhow::Result;
use tracing_subscriber::EnvFilter;

use mediaforge_server::{create_app, init_metrics, spawn_runtime, Config, ProviderRegistry};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("mediaforge=info,tower_http=warn")),
        )
        .compact()
        .init();

    init_metrics();

    let config = Config::from_env();
    tracing::info!(
        port = config.port,
        workers = config.workers,
        queue_cap = config.queue_cap,
        max_retries = config.max_retries,
        "Starting mediaforge v{}",
        env!("CARGO_PKG_VERSION")
    );

    let registry = ProviderRegistry::from_endpoints(&config.provider_endpoints, config.provider_timeout);
    let state = spawn_runtime(&config, registry);
    let app = create_app(state);

    let addr = SocketAddr::from(([127, 0, 0, 1], config.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "Listening");

    axum::serve(listener, app).await?;

    Ok(())
}
