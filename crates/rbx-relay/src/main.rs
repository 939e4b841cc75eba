//! rbx-relay: authenticated forwarding relay for the Roblox web APIs.
//!
//! Spreads outbound traffic across a rotating egress pool (direct plus
//! optional HTTP proxies) and retries rate-limited or failed attempts
//! through different egress paths before giving up.

mod auth;
mod config;
mod dispatch;
mod server;
mod stats;

use std::time::Duration;

use config::RelayConfig;
use dispatch::egress::EgressSelector;
use dispatch::forward::HttpForwarder;
use dispatch::retry::{RetryOrchestrator, RetryPolicy};
use server::AppState;
use stats::StatsRecorder;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    // Determine config path
    let config_path = {
        let args: Vec<String> = std::env::args().collect();
        // Check for --config flag first
        args.iter()
            .position(|a| a == "--config")
            .and_then(|i| args.get(i + 1).cloned())
            // Fall back to positional arg
            .or_else(|| args.get(1).filter(|a| !a.starts_with('-')).cloned())
            .or_else(|| std::env::var("RELAY_CONFIG").ok())
            .unwrap_or_else(|| "rbx-relay.toml".to_string())
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = RelayConfig::load(&config_path)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        tracing::info!(
            config_path = %config_path,
            listen_address = %config.server.listen_address,
            upstream_host = %config.upstream.host,
            proxies_enabled = config.proxies.enabled,
            proxy_endpoints = config.proxies.endpoints.len(),
            "Starting rbx-relay"
        );

        run(config).await
    })
}

async fn run(config: RelayConfig) -> anyhow::Result<()> {
    let selector = EgressSelector::from_config(&config.proxies)?;
    tracing::info!(
        strategy = ?selector.strategy(),
        proxies = selector.proxy_count(),
        "Egress pool ready"
    );

    let stats = StatsRecorder::new(selector.descriptors());
    let forwarder = HttpForwarder::new(
        selector.descriptors(),
        Duration::from_secs(config.upstream.timeout_secs),
    )?;
    let policy = RetryPolicy {
        max_attempts: config.upstream.max_attempts.max(1),
        retry_delay: Duration::from_millis(config.upstream.retry_delay_ms),
    };

    let state = AppState {
        engine: RetryOrchestrator::new(selector, stats, policy),
        forwarder,
        config,
    };

    server::run(state).await
}
