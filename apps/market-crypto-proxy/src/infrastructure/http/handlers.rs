//! Request handlers for the public endpoints.

use std::convert::Infallible;
use std::time::Duration;

use axum::Json;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::sse::{Event, KeepAlive, Sse};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio_stream::{Stream, StreamExt};

use super::error::ApiError;
use super::server::SharedState;
use crate::application::ports::MarketDataError;
use crate::application::services::{DEFAULT_OHLCV_LIMIT, ExchangeRegistry, StreamEvent};
use crate::domain::market::{MarketSymbol, OhlcvBar, Ticker, Timeframe};
use crate::domain::subscription::SubscriptionStats;
use crate::infrastructure::cache::CacheStats;
use crate::infrastructure::metrics::get_metrics_handle;

const DEFAULT_TIMEFRAME: &str = "1m";

// =============================================================================
// Query Parameters
// =============================================================================

/// `GET /price` parameters.
#[derive(Debug, Default, Deserialize)]
pub struct PriceQuery {
    exchange: Option<String>,
    symbol: Option<String>,
}

/// `GET /history` parameters.
#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    exchange: Option<String>,
    symbol: Option<String>,
    timeframe: Option<String>,
    since: Option<i64>,
    limit: Option<usize>,
}

/// `GET /stream/price` parameters.
#[derive(Debug, Default, Deserialize)]
pub struct StreamQuery {
    exchange: Option<String>,
    symbol: Option<String>,
    /// Poll interval in seconds.
    interval: Option<u64>,
}

fn required(value: Option<String>, name: &str) -> Result<String, ApiError> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ApiError::missing_parameter(name))
}

// =============================================================================
// Response Types
// =============================================================================

/// `GET /health` body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Always `"ok"` while the process serves requests.
    pub status: &'static str,
    /// Current time in epoch milliseconds.
    pub time: i64,
    /// Proxy version.
    pub version: String,
    /// Seconds since startup.
    pub uptime_secs: u64,
    /// Ticker cache counters.
    pub cache: CacheStats,
    /// Open streaming subscriptions.
    pub active_streams: usize,
    /// Subscription and distinct pair counts.
    pub subscriptions: SubscriptionStats,
}

/// `GET /history` body.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryResponse {
    /// Unified symbol.
    pub symbol: String,
    /// Exchange name.
    pub exchange: String,
    /// Bar timeframe.
    pub timeframe: String,
    /// `[timestamp, open, high, low, close, volume]` rows, oldest first.
    pub data: Vec<OhlcvBar>,
}

// =============================================================================
// Probes
// =============================================================================

pub(super) async fn health_handler(State(state): State<SharedState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        time: Utc::now().timestamp_millis(),
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        cache: state.service.cache_stats(),
        active_streams: state.broker.active_subscriptions(),
        subscriptions: state.broker.stats(),
    })
}

pub(super) async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

pub(super) async fn readiness_handler(State(state): State<SharedState>) -> impl IntoResponse {
    if state.shutdown.is_cancelled() {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    } else {
        (StatusCode::OK, "READY")
    }
}

pub(super) async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                handle.render(),
            )
        },
    )
}

// =============================================================================
// Market Data
// =============================================================================

pub(super) async fn price_handler(
    State(state): State<SharedState>,
    query: Result<Query<PriceQuery>, QueryRejection>,
) -> Result<Json<Ticker>, ApiError> {
    let Query(query) = query?;
    let exchange = required(query.exchange, "exchange")?;
    let symbol = required(query.symbol, "symbol")?;

    let ticker = state.service.fetch_ticker(&exchange, &symbol).await?;
    Ok(Json(ticker))
}

pub(super) async fn history_handler(
    State(state): State<SharedState>,
    query: Result<Query<HistoryQuery>, QueryRejection>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let Query(query) = query?;
    let exchange = ExchangeRegistry::parse_exchange(&required(query.exchange, "exchange")?)?;
    let symbol =
        MarketSymbol::parse(&required(query.symbol, "symbol")?).map_err(MarketDataError::from)?;
    let timeframe: Timeframe = query
        .timeframe
        .as_deref()
        .unwrap_or(DEFAULT_TIMEFRAME)
        .parse()
        .map_err(MarketDataError::from)?;
    let limit = query.limit.unwrap_or(DEFAULT_OHLCV_LIMIT);

    let data = state
        .service
        .fetch_ohlcv(
            exchange.as_str(),
            &symbol.to_string(),
            timeframe,
            query.since,
            limit,
        )
        .await?;

    Ok(Json(HistoryResponse {
        symbol: symbol.to_string(),
        exchange: exchange.as_str().to_string(),
        timeframe: timeframe.as_str().to_string(),
        data,
    }))
}

pub(super) async fn stream_price_handler(
    State(state): State<SharedState>,
    query: Result<Query<StreamQuery>, QueryRejection>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let Query(query) = query?;
    let exchange = required(query.exchange, "exchange")?;
    let symbol = required(query.symbol, "symbol")?;
    let interval = query.interval.map(Duration::from_secs);

    let stream = state.broker.subscribe(&exchange, &symbol, interval)?;
    let events = stream.map(|event| Ok(to_sse_event(&event)));

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

fn to_sse_event(event: &StreamEvent) -> Event {
    match event {
        StreamEvent::Ticker(update) => Event::default()
            .event("ticker")
            .json_data(update)
            .unwrap_or_else(|e| {
                tracing::error!(error = %e, "Failed to encode ticker event");
                Event::default()
                    .event("error")
                    .data("failed to encode ticker update")
            }),
        StreamEvent::Error(message) => Event::default().event("error").data(message),
    }
}
