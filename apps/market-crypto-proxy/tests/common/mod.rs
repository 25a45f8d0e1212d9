//! Shared fixtures for integration tests.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use mockall::mock;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use tokio_util::sync::CancellationToken;

use market_crypto_proxy::domain::market::TickerSnapshot;
use market_crypto_proxy::infrastructure::config::{CacheSettings, StreamSettings};
use market_crypto_proxy::{
    AdapterFactory, Exchange, ExchangeAdapter, ExchangeRegistry, MarketDataError, MarketSymbol,
    OhlcvBar, StreamBroker, TickerCache, TickerService, Timeframe,
};

mock! {
    pub Adapter {}

    #[async_trait]
    impl ExchangeAdapter for Adapter {
        fn exchange(&self) -> Exchange;

        async fn fetch_ticker(&self, symbol: &MarketSymbol) -> Result<TickerSnapshot, MarketDataError>;

        async fn fetch_ohlcv(
            &self,
            symbol: &MarketSymbol,
            timeframe: Timeframe,
            since: Option<i64>,
            limit: usize,
        ) -> Result<Vec<OhlcvBar>, MarketDataError>;
    }
}

/// Adapter that replays scripted ticker results after a fixed delay.
///
/// The last scripted result repeats once the script runs out.
pub struct ScriptedAdapter {
    delay: Duration,
    script: Mutex<Vec<Result<TickerSnapshot, MarketDataError>>>,
    calls: AtomicUsize,
}

impl ScriptedAdapter {
    pub fn new(delay: Duration, script: Vec<Result<TickerSnapshot, MarketDataError>>) -> Self {
        assert!(!script.is_empty(), "script needs at least one result");
        Self {
            delay,
            script: Mutex::new(script),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_result(&self) -> Result<TickerSnapshot, MarketDataError> {
        let mut script = self.script.lock();
        if script.len() > 1 {
            script.remove(0)
        } else {
            script[0].clone()
        }
    }
}

#[async_trait]
impl ExchangeAdapter for ScriptedAdapter {
    fn exchange(&self) -> Exchange {
        Exchange::Binance
    }

    async fn fetch_ticker(&self, _symbol: &MarketSymbol) -> Result<TickerSnapshot, MarketDataError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.next_result()
    }

    async fn fetch_ohlcv(
        &self,
        _symbol: &MarketSymbol,
        _timeframe: Timeframe,
        _since: Option<i64>,
        _limit: usize,
    ) -> Result<Vec<OhlcvBar>, MarketDataError> {
        Ok(vec![])
    }
}

/// Factory handing out the same adapter for every exchange.
pub struct SharedAdapterFactory(pub Arc<dyn ExchangeAdapter>);

impl AdapterFactory for SharedAdapterFactory {
    fn create(&self, _exchange: Exchange) -> Result<Arc<dyn ExchangeAdapter>, MarketDataError> {
        Ok(Arc::clone(&self.0))
    }
}

/// Factory routing each exchange to its own adapter.
pub struct PerExchangeFactory(pub Vec<(Exchange, Arc<dyn ExchangeAdapter>)>);

impl AdapterFactory for PerExchangeFactory {
    fn create(&self, exchange: Exchange) -> Result<Arc<dyn ExchangeAdapter>, MarketDataError> {
        self.0
            .iter()
            .find(|(candidate, _)| *candidate == exchange)
            .map(|(_, adapter)| Arc::clone(adapter))
            .ok_or_else(|| MarketDataError::external(exchange, "no adapter configured"))
    }
}

pub fn snapshot(last: i64, timestamp: i64) -> TickerSnapshot {
    TickerSnapshot {
        timestamp: Some(timestamp),
        last: Some(Decimal::from(last)),
        bid: Some(Decimal::from(last - 1)),
        ask: Some(Decimal::from(last + 1)),
        high: None,
        low: None,
        volume: Some(Decimal::new(125, 1)),
        raw: serde_json::json!({ "lastPrice": last.to_string() }),
    }
}

pub fn bar(timestamp: i64, close: i64) -> OhlcvBar {
    OhlcvBar {
        timestamp,
        open: Decimal::from(close - 1),
        high: Decimal::from(close + 2),
        low: Decimal::from(close - 2),
        close: Decimal::from(close),
        volume: Decimal::ONE,
    }
}

pub fn external_error(message: &str) -> MarketDataError {
    MarketDataError::external(Exchange::Binance, message)
}

pub fn cache_settings(ttl: Duration, coalesce: bool) -> CacheSettings {
    CacheSettings {
        ttl,
        coalesce_requests: coalesce,
        ..CacheSettings::default()
    }
}

pub fn service_with(adapter: Arc<dyn ExchangeAdapter>, settings: &CacheSettings) -> Arc<TickerService> {
    service_with_factory(Arc::new(SharedAdapterFactory(adapter)), settings)
}

pub fn service_with_factory(
    factory: Arc<dyn AdapterFactory>,
    settings: &CacheSettings,
) -> Arc<TickerService> {
    let registry = Arc::new(ExchangeRegistry::new(factory));
    let cache = Arc::new(TickerCache::new(settings.capacity));
    Arc::new(TickerService::new(registry, cache, settings))
}

pub fn broker_with(service: Arc<TickerService>, cancel: CancellationToken) -> Arc<StreamBroker> {
    Arc::new(StreamBroker::new(service, StreamSettings::default(), cancel))
}
