#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements
    )
)]

//! Market Crypto Proxy - Exchange Market Data Gateway
//!
//! An HTTP proxy that puts several public crypto exchange REST APIs behind
//! one uniform interface. Tickers are cached for a short TTL to keep
//! upstream rate limits intact, concurrent misses share one upstream call,
//! and streaming clients receive polled price updates as server-sent events.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Market data types and subscription tracking
//!   - `market`: exchanges, symbols, tickers, OHLCV bars
//!   - `subscription`: active stream registry and lifecycle states
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: exchange adapter capability and error taxonomy
//!   - `services`: adapter registry, ticker service, stream broker
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `exchanges`: Binance, Kraken, Coinbase and Huobi REST adapters
//!   - `cache`: TTL + LRU cache
//!   - `http`: axum router, SSE endpoint, health and metrics probes
//!   - `config`: environment configuration
//!
//! # Data Flow
//!
//! ```text
//!                    ┌──────────────┐   miss   ┌──────────┐
//! GET /price ───────►│TickerService │─────────►│ Adapter  │──► Exchange REST
//!                    │  + TtlCache  │◄─────────│ Registry │
//!                    └──────▲───────┘          └──────────┘
//!                           │ poll every interval
//!                    ┌──────┴───────┐
//! GET /stream/price ◄│ StreamBroker │  one task per subscription
//!                    └──────────────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Market data types with no I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::market::{Exchange, MarketSymbol, OhlcvBar, Ticker, TickerUpdate, Timeframe};
pub use domain::subscription::{Subscription, SubscriptionRegistry, SubscriptionState};

// Ports and services
pub use application::ports::{AdapterFactory, ExchangeAdapter, MarketDataError};
pub use application::services::{
    ExchangeRegistry, PriceStream, StreamBroker, StreamEvent, TickerCache, TickerService,
};

// Infrastructure config
pub use infrastructure::config::{ConfigError, ProxyConfig};

// Cache
pub use infrastructure::cache::{CacheStats, TtlCache, spawn_sweeper};

// Exchange adapters
pub use infrastructure::exchanges::HttpAdapterFactory;

// HTTP server
pub use infrastructure::http::{AppState, HttpServer, HttpServerError, router};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
