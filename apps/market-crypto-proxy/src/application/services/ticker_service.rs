//! Ticker Fetch Service
//!
//! Combines the adapter registry with the TTL cache:
//! - Cache hits return without touching the exchange
//! - Misses fetch live, normalize, and populate the cache
//! - Failed fetches never populate the cache
//!
//! With coalescing enabled, concurrent misses for one `(exchange, symbol)`
//! share a single upstream call. Followers receive the leader's result; if
//! the leader is cancelled first, they fetch on their own.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::broadcast;

use super::registry::ExchangeRegistry;
use crate::application::ports::MarketDataError;
use crate::domain::market::{Exchange, MarketSymbol, OhlcvBar, Ticker, Timeframe};
use crate::infrastructure::cache::{CacheStats, TtlCache};
use crate::infrastructure::config::CacheSettings;
use crate::infrastructure::metrics;

/// Default number of OHLCV bars.
pub const DEFAULT_OHLCV_LIMIT: usize = 100;

/// Largest accepted OHLCV limit.
pub const MAX_OHLCV_LIMIT: usize = 1_000;

/// Cache key for tickers.
pub type TickerKey = (Exchange, MarketSymbol);

/// Shared ticker cache.
pub type TickerCache = TtlCache<TickerKey, Ticker>;

type FetchResult = Result<Ticker, MarketDataError>;

/// Cached, normalizing front for exchange market data.
pub struct TickerService {
    registry: Arc<ExchangeRegistry>,
    cache: Arc<TickerCache>,
    ttl: Duration,
    coalesce: bool,
    in_flight: Mutex<HashMap<TickerKey, broadcast::Sender<FetchResult>>>,
}

impl std::fmt::Debug for TickerService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TickerService")
            .field("ttl", &self.ttl)
            .field("coalesce", &self.coalesce)
            .field("in_flight", &self.in_flight.lock().len())
            .finish_non_exhaustive()
    }
}

enum Role {
    Cached(Box<Ticker>),
    Leader(broadcast::Sender<FetchResult>),
    Follower(broadcast::Receiver<FetchResult>),
}

/// Removes the in-flight entry when the leader finishes or is dropped.
struct InFlightGuard<'a> {
    in_flight: &'a Mutex<HashMap<TickerKey, broadcast::Sender<FetchResult>>>,
    key: &'a TickerKey,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.in_flight.lock().remove(self.key);
    }
}

impl TickerService {
    /// Create a service over `registry`, storing tickers in `cache`.
    #[must_use]
    pub fn new(
        registry: Arc<ExchangeRegistry>,
        cache: Arc<TickerCache>,
        settings: &CacheSettings,
    ) -> Self {
        Self {
            registry,
            cache,
            ttl: settings.ttl,
            coalesce: settings.coalesce_requests,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Registry used to resolve exchanges.
    #[must_use]
    pub const fn registry(&self) -> &Arc<ExchangeRegistry> {
        &self.registry
    }

    /// Cache counters.
    #[must_use]
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Fetch a ticker by exchange name and unified symbol.
    ///
    /// # Errors
    ///
    /// - [`MarketDataError::ExchangeNotSupported`] for unknown exchanges
    /// - [`MarketDataError::InvalidRequest`] for malformed symbols
    /// - [`MarketDataError::SymbolNotFound`] / [`MarketDataError::ExternalApi`]
    ///   from the exchange
    pub async fn fetch_ticker(&self, exchange: &str, symbol: &str) -> FetchResult {
        let exchange = ExchangeRegistry::parse_exchange(exchange)?;
        let symbol = MarketSymbol::parse(symbol)?;
        self.ticker(exchange, &symbol).await
    }

    /// Fetch a ticker for already validated inputs.
    ///
    /// # Errors
    ///
    /// Returns the adapter's error; nothing is cached on failure.
    pub async fn ticker(&self, exchange: Exchange, symbol: &MarketSymbol) -> FetchResult {
        let key = (exchange, symbol.clone());

        if let Some(ticker) = self.cache.get(&key) {
            metrics::record_cache_hit(exchange);
            tracing::trace!(exchange = %exchange, symbol = %symbol, "Ticker cache hit");
            return Ok(ticker);
        }
        metrics::record_cache_miss(exchange);

        if !self.coalesce {
            return self.fetch_live(&key).await;
        }

        loop {
            let role = {
                let mut in_flight = self.in_flight.lock();
                if let Some(tx) = in_flight.get(&key) {
                    Role::Follower(tx.subscribe())
                } else if let Some(ticker) = self.cache.peek(&key) {
                    // A leader finished between the miss above and this lock.
                    Role::Cached(Box::new(ticker))
                } else {
                    let (tx, _) = broadcast::channel(1);
                    in_flight.insert(key.clone(), tx.clone());
                    Role::Leader(tx)
                }
            };

            match role {
                Role::Cached(ticker) => return Ok(*ticker),
                Role::Leader(tx) => {
                    let guard = InFlightGuard {
                        in_flight: &self.in_flight,
                        key: &key,
                    };
                    let result = self.fetch_live(&key).await;
                    drop(guard);
                    // No receivers is fine.
                    let _ = tx.send(result.clone());
                    return result;
                }
                Role::Follower(mut rx) => {
                    metrics::record_coalesced_request(exchange);
                    tracing::trace!(exchange = %exchange, symbol = %symbol, "Joined in-flight ticker fetch");

                    if let Ok(result) = rx.recv().await {
                        return result;
                    }
                    // Leader went away without a result.
                    if let Some(ticker) = self.cache.get(&key) {
                        return Ok(ticker);
                    }
                    tracing::debug!(
                        exchange = %exchange,
                        symbol = %symbol,
                        "In-flight fetch abandoned, retrying"
                    );
                }
            }
        }
    }

    async fn fetch_live(&self, key: &TickerKey) -> FetchResult {
        let (exchange, symbol) = key;
        let adapter = self.registry.adapter(*exchange)?;

        let snapshot = adapter.fetch_ticker(symbol).await.inspect_err(|e| {
            tracing::warn!(exchange = %exchange, symbol = %symbol, error = %e, "Ticker fetch failed");
        })?;

        let ticker = Ticker::from_snapshot(symbol, snapshot, Utc::now());
        if let Some((evicted_exchange, evicted_symbol)) =
            self.cache.insert(key.clone(), ticker.clone(), self.ttl)
        {
            metrics::record_cache_eviction();
            tracing::debug!(
                exchange = %evicted_exchange,
                symbol = %evicted_symbol,
                "Evicted least recently used ticker"
            );
        }

        Ok(ticker)
    }

    /// Fetch OHLCV bars, bypassing the cache.
    ///
    /// # Errors
    ///
    /// - [`MarketDataError::ExchangeNotSupported`] for unknown exchanges
    /// - [`MarketDataError::InvalidRequest`] for malformed symbols or a
    ///   `limit` outside `1..=1000`
    /// - [`MarketDataError::SymbolNotFound`] / [`MarketDataError::ExternalApi`]
    ///   from the exchange
    pub async fn fetch_ohlcv(
        &self,
        exchange: &str,
        symbol: &str,
        timeframe: Timeframe,
        since: Option<i64>,
        limit: usize,
    ) -> Result<Vec<OhlcvBar>, MarketDataError> {
        let exchange = ExchangeRegistry::parse_exchange(exchange)?;
        let symbol = MarketSymbol::parse(symbol)?;
        if !(1..=MAX_OHLCV_LIMIT).contains(&limit) {
            return Err(MarketDataError::invalid_request(format!(
                "limit must be between 1 and {MAX_OHLCV_LIMIT}"
            )));
        }

        let adapter = self.registry.adapter(exchange)?;
        let mut bars = adapter
            .fetch_ohlcv(&symbol, timeframe, since, limit)
            .await
            .inspect_err(|e| {
                tracing::warn!(
                    exchange = %exchange,
                    symbol = %symbol,
                    timeframe = %timeframe,
                    error = %e,
                    "OHLCV fetch failed"
                );
            })?;

        bars.truncate(limit);
        Ok(bars)
    }
}
