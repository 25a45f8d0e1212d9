//! Exchange Adapters
//!
//! REST implementations of [`ExchangeAdapter`] for every allow-listed
//! exchange, built on one shared HTTP client with retry and backoff.
//!
//! # Components
//!
//! - `ExchangeHttpClient`: reqwest wrapper with timeout, retry and metrics
//! - `BinanceAdapter`, `KrakenAdapter`, `CoinbaseAdapter`, `HuobiAdapter`
//! - `HttpAdapterFactory`: builds the right adapter for an [`Exchange`]

mod binance;
mod client;
mod coinbase;
mod error;
mod huobi;
pub mod json;
mod kraken;
mod retry;

use std::sync::Arc;

pub use binance::BinanceAdapter;
pub use client::ExchangeHttpClient;
pub use coinbase::CoinbaseAdapter;
pub use error::ExchangeClientError;
pub use huobi::HuobiAdapter;
pub use kraken::KrakenAdapter;
pub use retry::{Backoff, RetryPolicy};

use crate::application::ports::{AdapterFactory, ExchangeAdapter, MarketDataError};
use crate::domain::market::{Exchange, OhlcvBar};
use crate::infrastructure::config::UpstreamSettings;

/// Builds REST adapters from upstream settings.
#[derive(Debug, Clone, Default)]
pub struct HttpAdapterFactory {
    settings: UpstreamSettings,
}

impl HttpAdapterFactory {
    /// Create a factory using `settings` for every adapter.
    #[must_use]
    pub const fn new(settings: UpstreamSettings) -> Self {
        Self { settings }
    }
}

impl AdapterFactory for HttpAdapterFactory {
    fn create(&self, exchange: Exchange) -> Result<Arc<dyn ExchangeAdapter>, MarketDataError> {
        let client = ExchangeHttpClient::new(exchange, &self.settings)
            .map_err(|e| e.into_market_error(exchange))?;

        tracing::debug!(
            exchange = %exchange,
            base_url = self.settings.endpoints.url_for(exchange),
            "Created exchange adapter"
        );

        let adapter: Arc<dyn ExchangeAdapter> = match exchange {
            Exchange::Binance => Arc::new(BinanceAdapter::new(client)),
            Exchange::Kraken => Arc::new(KrakenAdapter::new(client)),
            Exchange::Coinbase => Arc::new(CoinbaseAdapter::new(client)),
            Exchange::Huobi => Arc::new(HuobiAdapter::new(client)),
        };
        Ok(adapter)
    }
}

/// Keep `limit` ascending bars: the first ones at or after `since`, or the
/// most recent ones when `since` is absent.
fn select_window(mut bars: Vec<OhlcvBar>, since: Option<i64>, limit: usize) -> Vec<OhlcvBar> {
    if let Some(since) = since {
        bars.retain(|bar| bar.timestamp >= since);
        bars.truncate(limit);
    } else if bars.len() > limit {
        bars.drain(..bars.len() - limit);
    }
    bars
}
