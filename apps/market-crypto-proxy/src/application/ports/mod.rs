//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern. These are the contracts that
//! infrastructure adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - `ExchangeAdapter`: public market data from one exchange
//! - `AdapterFactory`: builds an adapter for an allow-listed exchange
//!
//! Every port speaks [`MarketDataError`]; venue and transport errors are
//! converted before they cross this boundary.

use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::market::{
    Exchange, InvalidSymbol, InvalidTimeframe, MarketSymbol, OhlcvBar, TickerSnapshot, Timeframe,
};

// =============================================================================
// Errors
// =============================================================================

/// Uniform error taxonomy for market data operations.
///
/// `Clone` so a coalesced upstream failure can be handed to every waiter.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MarketDataError {
    /// Exchange name is not on the allow-list.
    #[error("Exchange not supported: {name}")]
    ExchangeNotSupported {
        /// The rejected name as supplied by the caller.
        name: String,
    },

    /// The exchange does not list the symbol.
    #[error("Symbol {symbol} not found on {exchange}")]
    SymbolNotFound {
        /// Exchange that was asked.
        exchange: String,
        /// Unified symbol.
        symbol: String,
    },

    /// Caller-supplied parameters are malformed or out of range.
    #[error("Invalid request: {message}")]
    InvalidRequest {
        /// What was wrong.
        message: String,
    },

    /// Transport or protocol failure talking to the exchange.
    #[error("{exchange} API error: {message}")]
    ExternalApi {
        /// Exchange that failed.
        exchange: String,
        /// Error details.
        message: String,
    },

    /// Bug or unexpected condition inside the proxy.
    #[error("Internal error: {message}")]
    Internal {
        /// Error details.
        message: String,
    },
}

impl MarketDataError {
    /// Build an [`MarketDataError::InvalidRequest`].
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Build an [`MarketDataError::ExternalApi`].
    pub fn external(exchange: Exchange, message: impl Into<String>) -> Self {
        Self::ExternalApi {
            exchange: exchange.as_str().to_string(),
            message: message.into(),
        }
    }

    /// Build an [`MarketDataError::SymbolNotFound`].
    #[must_use]
    pub fn symbol_not_found(exchange: Exchange, symbol: &MarketSymbol) -> Self {
        Self::SymbolNotFound {
            exchange: exchange.as_str().to_string(),
            symbol: symbol.to_string(),
        }
    }

    /// Short label for logs and metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::ExchangeNotSupported { .. } => "exchange_not_supported",
            Self::SymbolNotFound { .. } => "symbol_not_found",
            Self::InvalidRequest { .. } => "invalid_request",
            Self::ExternalApi { .. } => "external_api",
            Self::Internal { .. } => "internal",
        }
    }
}

impl From<InvalidSymbol> for MarketDataError {
    fn from(err: InvalidSymbol) -> Self {
        Self::invalid_request(err.to_string())
    }
}

impl From<InvalidTimeframe> for MarketDataError {
    fn from(err: InvalidTimeframe) -> Self {
        Self::invalid_request(err.to_string())
    }
}

// =============================================================================
// Exchange Adapter Port
// =============================================================================

/// Public market data from a single exchange.
///
/// This is a driven (secondary/outbound) port. The infrastructure layer
/// provides one REST implementation per allow-listed exchange.
#[async_trait]
pub trait ExchangeAdapter: Send + Sync {
    /// Exchange this adapter talks to.
    fn exchange(&self) -> Exchange;

    /// Fetch the current ticker for `symbol`.
    ///
    /// Fields the venue does not publish are left `None`; normalization
    /// happens in the ticker service.
    async fn fetch_ticker(&self, symbol: &MarketSymbol) -> Result<TickerSnapshot, MarketDataError>;

    /// Fetch up to `limit` OHLCV bars in ascending time order, starting at
    /// `since` (epoch ms) when given, otherwise the most recent bars.
    async fn fetch_ohlcv(
        &self,
        symbol: &MarketSymbol,
        timeframe: Timeframe,
        since: Option<i64>,
        limit: usize,
    ) -> Result<Vec<OhlcvBar>, MarketDataError>;
}

/// Builds adapters for allow-listed exchanges.
///
/// Construction may fail (for example, an HTTP client that cannot be
/// built); that surfaces as a normal `ExternalApi` error.
pub trait AdapterFactory: Send + Sync {
    /// Create a fresh adapter for `exchange`.
    ///
    /// # Errors
    ///
    /// Returns [`MarketDataError::ExternalApi`] if the adapter cannot be
    /// constructed.
    fn create(&self, exchange: Exchange) -> Result<Arc<dyn ExchangeAdapter>, MarketDataError>;
}
