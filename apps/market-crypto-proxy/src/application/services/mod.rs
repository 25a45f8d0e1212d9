//! Application Services
//!
//! Services that orchestrate exchange adapters, the ticker cache and
//! streaming subscriptions.
//!
//! - `ExchangeRegistry`: allow-list and memoized adapter lookup
//! - `TickerService`: cached, coalesced ticker fetches and OHLCV passthrough
//! - `StreamBroker`: per-subscription polling tasks feeding SSE clients

mod registry;
mod stream_broker;
mod ticker_service;

pub use registry::ExchangeRegistry;
pub use stream_broker::{PriceStream, StreamBroker, StreamEvent};
pub use ticker_service::{
    DEFAULT_OHLCV_LIMIT, MAX_OHLCV_LIMIT, TickerCache, TickerKey, TickerService,
};
