//! Exchange Adapter Registry
//!
//! Resolves allow-listed exchange names to adapters, building each adapter
//! once and reusing it afterwards.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::application::ports::{AdapterFactory, ExchangeAdapter, MarketDataError};
use crate::domain::market::Exchange;

/// Memoizing registry of exchange adapters.
pub struct ExchangeRegistry {
    factory: Arc<dyn AdapterFactory>,
    adapters: RwLock<HashMap<Exchange, Arc<dyn ExchangeAdapter>>>,
}

impl fmt::Debug for ExchangeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let built: Vec<_> = self.adapters.read().keys().map(|e| e.as_str()).collect();
        f.debug_struct("ExchangeRegistry")
            .field("built", &built)
            .finish_non_exhaustive()
    }
}

impl ExchangeRegistry {
    /// Create a registry that builds adapters with `factory`.
    #[must_use]
    pub fn new(factory: Arc<dyn AdapterFactory>) -> Self {
        Self {
            factory,
            adapters: RwLock::new(HashMap::new()),
        }
    }

    /// Exchanges this registry can resolve.
    #[must_use]
    pub const fn supported() -> &'static [Exchange] {
        Exchange::all()
    }

    /// Check `name` against the allow-list.
    ///
    /// # Errors
    ///
    /// Returns [`MarketDataError::ExchangeNotSupported`] for unknown names.
    pub fn parse_exchange(name: &str) -> Result<Exchange, MarketDataError> {
        Exchange::from_name(name).ok_or_else(|| MarketDataError::ExchangeNotSupported {
            name: name.trim().to_string(),
        })
    }

    /// Resolve an exchange name to its adapter.
    ///
    /// # Errors
    ///
    /// Returns [`MarketDataError::ExchangeNotSupported`] for unknown names
    /// and [`MarketDataError::ExternalApi`] if the adapter cannot be built.
    pub fn resolve(&self, name: &str) -> Result<Arc<dyn ExchangeAdapter>, MarketDataError> {
        self.adapter(Self::parse_exchange(name)?)
    }

    /// Adapter for an already validated exchange.
    ///
    /// A failed construction is not remembered; the next call tries again.
    ///
    /// # Errors
    ///
    /// Returns [`MarketDataError::ExternalApi`] if the adapter cannot be built.
    pub fn adapter(&self, exchange: Exchange) -> Result<Arc<dyn ExchangeAdapter>, MarketDataError> {
        if let Some(adapter) = self.adapters.read().get(&exchange) {
            return Ok(Arc::clone(adapter));
        }

        let adapter = self.factory.create(exchange).inspect_err(|e| {
            tracing::error!(exchange = %exchange, error = %e, "Failed to build exchange adapter");
        })?;

        let mut adapters = self.adapters.write();
        Ok(Arc::clone(adapters.entry(exchange).or_insert(adapter)))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use test_case::test_case;

    use super::*;
    use crate::domain::market::{MarketSymbol, OhlcvBar, TickerSnapshot, Timeframe};

    struct NullAdapter(Exchange);

    #[async_trait]
    impl ExchangeAdapter for NullAdapter {
        fn exchange(&self) -> Exchange {
            self.0
        }

        async fn fetch_ticker(
            &self,
            _symbol: &MarketSymbol,
        ) -> Result<TickerSnapshot, MarketDataError> {
            Ok(TickerSnapshot::default())
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

    #[derive(Default)]
    struct CountingFactory {
        built: AtomicUsize,
        fail_first: bool,
    }

    impl AdapterFactory for CountingFactory {
        fn create(&self, exchange: Exchange) -> Result<Arc<dyn ExchangeAdapter>, MarketDataError> {
            let n = self.built.fetch_add(1, Ordering::SeqCst);
            if self.fail_first && n == 0 {
                return Err(MarketDataError::external(exchange, "client build failed"));
            }
            Ok(Arc::new(NullAdapter(exchange)))
        }
    }

    #[test_case("binance", Exchange::Binance)]
    #[test_case("Kraken", Exchange::Kraken)]
    #[test_case(" coinbase", Exchange::Coinbase)]
    #[test_case("HUOBI", Exchange::Huobi)]
    fn resolve_allow_listed(name: &str, expected: Exchange) {
        let registry = ExchangeRegistry::new(Arc::new(CountingFactory::default()));
        assert_eq!(registry.resolve(name).unwrap().exchange(), expected);
    }

    #[test_case("ftx")]
    #[test_case("bitfinex")]
    #[test_case("")]
    fn resolve_rejects_unknown(name: &str) {
        let registry = ExchangeRegistry::new(Arc::new(CountingFactory::default()));
        let err = registry.resolve(name).err().unwrap();
        assert_eq!(
            err,
            MarketDataError::ExchangeNotSupported {
                name: name.to_string()
            }
        );
    }

    #[test]
    fn adapters_are_memoized() {
        let factory = Arc::new(CountingFactory::default());
        let registry = ExchangeRegistry::new(Arc::clone(&factory) as Arc<dyn AdapterFactory>);

        let a = registry.resolve("binance").unwrap();
        let b = registry.resolve("BINANCE").unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(factory.built.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failed_construction_is_retried() {
        let factory = Arc::new(CountingFactory {
            fail_first: true,
            ..CountingFactory::default()
        });
        let registry = ExchangeRegistry::new(Arc::clone(&factory) as Arc<dyn AdapterFactory>);

        let err = registry.resolve("kraken").err().unwrap();
        assert_eq!(err.kind(), "external_api");

        assert!(registry.resolve("kraken").is_ok());
        assert_eq!(factory.built.load(Ordering::SeqCst), 2);
    }
}
