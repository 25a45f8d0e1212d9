//! Prometheus Metrics Module
//!
//! Exposes application metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Cache**: Ticker cache hits, misses and evictions
//! - **Upstream**: Exchange requests by outcome, and their latency
//! - **Coalescing**: Requests served by another caller's in-flight fetch
//! - **Streams**: Active SSE subscriptions and events pushed by kind
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the HTTP server port.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::domain::market::Exchange;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Calling it again after a successful install returns the existing handle.
///
/// # Errors
///
/// Returns an error if the global recorder cannot be installed, for example
/// because another recorder already owns it.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();

    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "market_proxy_cache_hits_total",
        "Ticker requests served from cache"
    );
    describe_counter!(
        "market_proxy_cache_misses_total",
        "Ticker requests that missed the cache"
    );
    describe_counter!(
        "market_proxy_cache_evictions_total",
        "Cache entries evicted to admit a new key"
    );

    describe_counter!(
        "market_proxy_upstream_requests_total",
        "Exchange REST calls by exchange, operation and outcome"
    );
    describe_histogram!(
        "market_proxy_upstream_request_seconds",
        "Exchange REST call latency, including retries"
    );

    describe_counter!(
        "market_proxy_coalesced_requests_total",
        "Ticker requests that waited on another caller's in-flight fetch"
    );

    describe_gauge!(
        "market_proxy_active_streams",
        "Number of open SSE price subscriptions"
    );
    describe_counter!(
        "market_proxy_stream_events_total",
        "SSE events pushed to subscribers by kind"
    );
}

// =============================================================================
// Metric Labels
// =============================================================================

/// Upstream operation label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamOperation {
    /// Ticker fetch.
    Ticker,
    /// OHLCV fetch.
    Ohlcv,
}

impl UpstreamOperation {
    /// Label value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ticker => "ticker",
            Self::Ohlcv => "ohlcv",
        }
    }
}

/// Upstream outcome label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamOutcome {
    /// 2xx with a decodable body.
    Success,
    /// Exchange answered with an error status or payload.
    ApiError,
    /// Connect, timeout or body read failure.
    NetworkError,
    /// Body did not match the expected shape.
    DecodeError,
}

impl UpstreamOutcome {
    /// Label value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::ApiError => "api_error",
            Self::NetworkError => "network_error",
            Self::DecodeError => "decode_error",
        }
    }
}

/// Stream event label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEventKind {
    /// Ticker payload.
    Ticker,
    /// Error notice.
    Error,
}

impl StreamEventKind {
    /// Label value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ticker => "ticker",
            Self::Error => "error",
        }
    }
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record a ticker cache hit.
pub fn record_cache_hit(exchange: Exchange) {
    counter!("market_proxy_cache_hits_total", "exchange" => exchange.as_str()).increment(1);
}

/// Record a ticker cache miss.
pub fn record_cache_miss(exchange: Exchange) {
    counter!("market_proxy_cache_misses_total", "exchange" => exchange.as_str()).increment(1);
}

/// Record an LRU eviction.
pub fn record_cache_eviction() {
    counter!("market_proxy_cache_evictions_total").increment(1);
}

/// Record a finished upstream call.
pub fn record_upstream_request(
    exchange: Exchange,
    operation: UpstreamOperation,
    outcome: UpstreamOutcome,
    elapsed: Duration,
) {
    counter!(
        "market_proxy_upstream_requests_total",
        "exchange" => exchange.as_str(),
        "operation" => operation.as_str(),
        "outcome" => outcome.as_str()
    )
    .increment(1);
    histogram!(
        "market_proxy_upstream_request_seconds",
        "exchange" => exchange.as_str(),
        "operation" => operation.as_str()
    )
    .record(elapsed.as_secs_f64());
}

/// Record a request that joined an in-flight fetch.
pub fn record_coalesced_request(exchange: Exchange) {
    counter!("market_proxy_coalesced_requests_total", "exchange" => exchange.as_str())
        .increment(1);
}

/// Update the open subscription count.
#[allow(clippy::cast_precision_loss)]
pub fn set_active_streams(count: usize) {
    gauge!("market_proxy_active_streams").set(count as f64);
}

/// Record an event pushed to a subscriber.
pub fn record_stream_event(kind: StreamEventKind) {
    counter!("market_proxy_stream_events_total", "kind" => kind.as_str()).increment(1);
}

// =============================================================================
// Tests
// =============================================================================
