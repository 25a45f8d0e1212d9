//! Router assembly and the HTTP server loop.

use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::routing::get;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::handlers::{
    health_handler, history_handler, liveness_handler, metrics_handler, price_handler,
    readiness_handler, stream_price_handler,
};
use crate::application::services::{StreamBroker, TickerService};

// =============================================================================
// Application State
// =============================================================================

/// Shared state for every handler.
#[derive(Debug)]
pub struct AppState {
    pub(super) version: String,
    pub(super) started_at: Instant,
    pub(super) service: Arc<TickerService>,
    pub(super) broker: Arc<StreamBroker>,
    pub(super) shutdown: CancellationToken,
}

/// State handle stored in the router.
pub type SharedState = Arc<AppState>;

impl AppState {
    /// Create handler state.
    ///
    /// `shutdown` flips the readiness probe once cancelled.
    #[must_use]
    pub fn new(
        version: impl Into<String>,
        service: Arc<TickerService>,
        broker: Arc<StreamBroker>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            version: version.into(),
            started_at: Instant::now(),
            service,
            broker,
            shutdown,
        }
    }
}

/// Build the proxy's router.
///
/// # Endpoints
///
/// - `GET /health` - JSON status, cache stats and stream count
/// - `GET /healthz` - liveness probe
/// - `GET /readyz` - readiness probe
/// - `GET /metrics` - Prometheus text format
/// - `GET /price` - normalized ticker
/// - `GET /history` - OHLCV bars
/// - `GET /stream/price` - server-sent ticker events
pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/readyz", get(readiness_handler))
        .route("/metrics", get(metrics_handler))
        .route("/price", get(price_handler))
        .route("/history", get(history_handler))
        .route("/stream/price", get(stream_price_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// =============================================================================
// HTTP Server
// =============================================================================

/// Public HTTP server.
pub struct HttpServer {
    addr: String,
    state: SharedState,
    cancel: CancellationToken,
}

impl HttpServer {
    /// Create a server bound to `addr` once [`run`](Self::run) is called.
    #[must_use]
    pub fn new(addr: impl Into<String>, state: SharedState, cancel: CancellationToken) -> Self {
        Self {
            addr: addr.into(),
            state,
            cancel,
        }
    }

    /// Serve until cancelled, then drain open connections.
    ///
    /// # Errors
    ///
    /// Returns `HttpServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), HttpServerError> {
        let app = router(self.state);

        let listener = TcpListener::bind(&self.addr)
            .await
            .map_err(|e| HttpServerError::BindFailed(self.addr.clone(), e.to_string()))?;

        tracing::info!(addr = %self.addr, "HTTP server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HttpServerError::ServerFailed(e.to_string()))?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

// =============================================================================
// Errors
// =============================================================================

/// HTTP server errors.
#[derive(Debug, thiserror::Error)]
pub enum HttpServerError {
    /// Failed to bind the listen address.
    #[error("failed to bind to {0}: {1}")]
    BindFailed(String, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}
