//! Market Crypto Proxy Binary
//!
//! Starts the exchange market data proxy.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin market-crypto-proxy
//! ```
//!
//! # Environment Variables
//!
//! - `MCP_HTTP_HOST` / `MCP_HTTP_PORT`: listen address (default: 0.0.0.0:8000)
//! - `MCP_CACHE_TTL_SECS`: ticker cache TTL (default: 10)
//! - `MCP_CACHE_CAPACITY`: ticker cache entries (default: 1000)
//! - `MCP_COALESCE_REQUESTS`: share concurrent ticker misses (default: true)
//! - `MCP_STREAM_DEFAULT_INTERVAL_SECS`: stream poll interval (default: 5)
//! - `MCP_STREAM_MIN_INTERVAL_SECS`: smallest accepted interval (default: 1)
//! - `MCP_UPSTREAM_TIMEOUT_SECS`: exchange request timeout (default: 10)
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: false)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use market_crypto_proxy::infrastructure::telemetry;
use market_crypto_proxy::{
    AppState, ExchangeRegistry, HttpAdapterFactory, HttpServer, ProxyConfig, StreamBroker,
    TickerCache, TickerService, init_metrics, spawn_sweeper,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();

    // Initialize telemetry (OpenTelemetry + tracing)
    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting Market Crypto Proxy");

    if let Err(e) = init_metrics() {
        tracing::warn!(error = %e, "Prometheus recorder not installed, /metrics disabled");
    }

    let config = ProxyConfig::from_env().context("invalid configuration")?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    // Exchange adapters are built lazily on first use
    let factory = Arc::new(HttpAdapterFactory::new(config.upstream.clone()));
    let registry = Arc::new(ExchangeRegistry::new(factory));

    let cache = Arc::new(TickerCache::new(config.cache.capacity));
    let sweeper = spawn_sweeper(
        Arc::clone(&cache),
        config.cache.sweep_interval,
        shutdown_token.child_token(),
    );

    let service = Arc::new(TickerService::new(registry, cache, &config.cache));
    let broker = Arc::new(StreamBroker::new(
        Arc::clone(&service),
        config.stream.clone(),
        shutdown_token.child_token(),
    ));

    let state = Arc::new(AppState::new(
        env!("CARGO_PKG_VERSION"),
        service,
        Arc::clone(&broker),
        shutdown_token.clone(),
    ));
    let server = HttpServer::new(config.bind_address(), state, shutdown_token.clone());
    let mut server_handle = tokio::spawn(server.run());

    tracing::info!("Market proxy ready");

    let server_result = tokio::select! {
        () = await_shutdown(shutdown_token.clone()) => {
            // Open streams end once their tasks observe the token.
            match tokio::time::timeout(SHUTDOWN_TIMEOUT, &mut server_handle).await {
                Ok(result) => Some(result),
                Err(_) => {
                    tracing::warn!("HTTP server did not drain within the shutdown timeout");
                    server_handle.abort();
                    None
                }
            }
        }
        result = &mut server_handle => {
            shutdown_token.cancel();
            Some(result)
        }
    };

    match server_result {
        Some(Ok(Err(e))) => return Err(e).context("HTTP server failed"),
        Some(Err(e)) => return Err(e).context("HTTP server task panicked"),
        Some(Ok(Ok(()))) | None => {}
    }

    if tokio::time::timeout(SHUTDOWN_TIMEOUT, sweeper).await.is_err() {
        tracing::warn!("Cache sweeper did not stop within the shutdown timeout");
    }
    tracing::info!(
        open_streams = broker.active_subscriptions(),
        "Market proxy stopped"
    );
    Ok(())
}

/// Load .env file from current or ancestor directories.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &ProxyConfig) {
    tracing::info!(
        bind = %config.bind_address(),
        cache_ttl_secs = config.cache.ttl.as_secs(),
        cache_capacity = config.cache.capacity,
        coalesce_requests = config.cache.coalesce_requests,
        stream_default_interval_secs = config.stream.default_interval.as_secs(),
        stream_min_interval_secs = config.stream.min_interval.as_secs(),
        "Configuration loaded"
    );
    tracing::debug!(
        binance = %config.upstream.endpoints.binance,
        kraken = %config.upstream.endpoints.kraken,
        coinbase = %config.upstream.endpoints.coinbase,
        huobi = %config.upstream.endpoints.huobi,
        timeout_secs = config.upstream.timeout.as_secs(),
        max_attempts = config.upstream.max_attempts,
        "Exchange endpoints"
    );
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
