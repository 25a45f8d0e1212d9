//! Domain Layer - Core market data types.
//!
//! This layer contains the venue-agnostic types the proxy serves and the
//! bookkeeping for streaming subscriptions. Nothing here performs I/O.

/// Exchanges, symbols, timeframes, tickers and OHLCV bars.
pub mod market;

/// Streaming subscription tracking.
pub mod subscription;
