//! Mealscope Analysis Relay
//!
//! Single-binary service that:
//! 1. Authenticates clients with a shared bearer token
//! 2. Enforces the authoritative per-device daily limit and image dedup
//! 3. Runs the two-tier vision pipeline against the upstream provider
//! 4. Returns an AnalysisResult or a typed JSON error

mod config;
mod limits;
mod metrics;
mod relay;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vision::{ModelChain, VisionClient};

use crate::config::Config;
use crate::limits::{DedupCache, DeviceRateLimiter};
use crate::relay::{AppState, ServiceMetrics, build_router};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting mealscope-relay");

    // Install Prometheus metrics recorder before any metrics are emitted
    let prometheus_handle = metrics::install_recorder();

    // CLI: simple --config flag parsing
    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config_path = Config::resolve_path(cli_config_path);
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        listen_addr = %config.relay.listen_addr,
        base_url = %config.upstream.base_url,
        daily_per_device = config.limits.daily_per_device,
        dedup_window_secs = config.limits.dedup_window_secs,
        "configuration loaded"
    );

    let api_key = config
        .upstream
        .api_key
        .ok_or_else(|| anyhow::anyhow!("upstream API key missing after config load"))?;
    let auth_token = config
        .relay
        .auth_token
        .ok_or_else(|| anyhow::anyhow!("auth token missing after config load"))?;

    let vision = VisionClient::new(reqwest::Client::new(), config.upstream.base_url, api_key)
        .with_models(
            ModelChain::new(config.upstream.tier1_models),
            ModelChain::new(config.upstream.tier2_models),
        )
        .with_timeout(Duration::from_secs(config.relay.timeout_secs));

    let state = AppState {
        vision: Arc::new(vision),
        auth_token: Arc::new(auth_token),
        limiter: Arc::new(DeviceRateLimiter::new(config.limits.daily_per_device)),
        dedup: Arc::new(DedupCache::new(Duration::from_secs(
            config.limits.dedup_window_secs,
        ))),
        max_image_base64_bytes: config.relay.max_image_base64_bytes,
        metrics: ServiceMetrics::new(),
        prometheus: prometheus_handle,
    };

    let app = build_router(state, config.relay.max_connections);

    let listener = TcpListener::bind(config.relay.listen_addr)
        .await
        .with_context(|| format!("failed to bind to {}", config.relay.listen_addr))?;

    info!(addr = %config.relay.listen_addr, "accepting requests");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("shutdown complete");
    Ok(())
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
