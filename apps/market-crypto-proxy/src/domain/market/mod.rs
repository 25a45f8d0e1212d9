//! Market Data Types
//!
//! Canonical, venue-agnostic representation of the data the proxy serves:
//! exchanges, unified symbols, timeframes, tickers and OHLCV bars.
//!
//! Prices are carried as `Decimal` internally and rendered as JSON numbers
//! on the wire.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::ser::SerializeTuple;
use serde::{Deserialize, Serialize, Serializer};

// =============================================================================
// Exchange
// =============================================================================

/// Exchanges on the proxy's allow-list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Exchange {
    /// Binance spot.
    Binance,
    /// Kraken spot.
    Kraken,
    /// Coinbase Exchange (formerly Coinbase Pro).
    Coinbase,
    /// Huobi (HTX) spot.
    Huobi,
}

impl Exchange {
    /// Every supported exchange.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[Self::Binance, Self::Kraken, Self::Coinbase, Self::Huobi]
    }

    /// Short name used in query strings and cache keys.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Binance => "binance",
            Self::Kraken => "kraken",
            Self::Coinbase => "coinbase",
            Self::Huobi => "huobi",
        }
    }

    /// Look up an exchange by short name (case-insensitive, surrounding
    /// whitespace ignored). Returns `None` for names off the allow-list.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "binance" => Some(Self::Binance),
            "kraken" => Some(Self::Kraken),
            "coinbase" => Some(Self::Coinbase),
            "huobi" => Some(Self::Huobi),
            _ => None,
        }
    }
}

impl fmt::Display for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Symbol
// =============================================================================

/// A symbol that could not be parsed into `BASE/QUOTE` form.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid symbol '{0}': expected BASE/QUOTE, e.g. BTC/USDT")]
pub struct InvalidSymbol(pub String);

/// Unified `BASE/QUOTE` market symbol.
///
/// Both legs are upper-cased on parse so `btc/usdt` and `BTC/USDT` share a
/// cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MarketSymbol {
    base: String,
    quote: String,
}

impl MarketSymbol {
    /// Parse a unified symbol.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidSymbol`] unless the input is two non-empty
    /// alphanumeric legs separated by a single `/`.
    pub fn parse(input: &str) -> Result<Self, InvalidSymbol> {
        let trimmed = input.trim();
        let Some((base, quote)) = trimmed.split_once('/') else {
            return Err(InvalidSymbol(input.to_string()));
        };

        let valid_leg =
            |leg: &str| !leg.is_empty() && leg.chars().all(|c| c.is_ascii_alphanumeric());
        if !valid_leg(base) || !valid_leg(quote) {
            return Err(InvalidSymbol(input.to_string()));
        }

        Ok(Self {
            base: base.to_ascii_uppercase(),
            quote: quote.to_ascii_uppercase(),
        })
    }

    /// Base asset, e.g. `BTC`.
    #[must_use]
    pub fn base(&self) -> &str {
        &self.base
    }

    /// Quote asset, e.g. `USDT`.
    #[must_use]
    pub fn quote(&self) -> &str {
        &self.quote
    }

    /// Base and quote joined by `separator`, e.g. `BTCUSDT` or `BTC-USD`.
    #[must_use]
    pub fn joined(&self, separator: &str) -> String {
        format!("{}{separator}{}", self.base, self.quote)
    }
}

impl fmt::Display for MarketSymbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.base, self.quote)
    }
}

impl FromStr for MarketSymbol {
    type Err = InvalidSymbol;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

// =============================================================================
// Timeframe
// =============================================================================

/// A timeframe string that is not one of the supported bar sizes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported timeframe '{0}': expected one of 1m, 5m, 15m, 30m, 1h, 4h, 1d, 1w")]
pub struct InvalidTimeframe(pub String);

/// OHLCV bar size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Timeframe {
    /// One minute.
    OneMinute,
    /// Five minutes.
    FiveMinutes,
    /// Fifteen minutes.
    FifteenMinutes,
    /// Thirty minutes.
    ThirtyMinutes,
    /// One hour.
    OneHour,
    /// Four hours.
    FourHours,
    /// One day.
    OneDay,
    /// One week.
    OneWeek,
}

impl Timeframe {
    /// Canonical string form (`1m`, `1h`, ...).
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::OneMinute => "1m",
            Self::FiveMinutes => "5m",
            Self::FifteenMinutes => "15m",
            Self::ThirtyMinutes => "30m",
            Self::OneHour => "1h",
            Self::FourHours => "4h",
            Self::OneDay => "1d",
            Self::OneWeek => "1w",
        }
    }

    /// Bar length in seconds.
    #[must_use]
    pub const fn seconds(self) -> i64 {
        match self {
            Self::OneMinute => 60,
            Self::FiveMinutes => 300,
            Self::FifteenMinutes => 900,
            Self::ThirtyMinutes => 1_800,
            Self::OneHour => 3_600,
            Self::FourHours => 14_400,
            Self::OneDay => 86_400,
            Self::OneWeek => 604_800,
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Timeframe {
    type Err = InvalidTimeframe;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "1m" => Ok(Self::OneMinute),
            "5m" => Ok(Self::FiveMinutes),
            "15m" => Ok(Self::FifteenMinutes),
            "30m" => Ok(Self::ThirtyMinutes),
            "1h" => Ok(Self::OneHour),
            "4h" => Ok(Self::FourHours),
            "1d" => Ok(Self::OneDay),
            "1w" => Ok(Self::OneWeek),
            _ => Err(InvalidTimeframe(s.to_string())),
        }
    }
}

// =============================================================================
// Ticker
// =============================================================================

/// Ticker fields as reported by one venue, before normalization.
///
/// Every field is optional because venues differ in what they publish.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickerSnapshot {
    /// Venue-reported timestamp in epoch milliseconds.
    pub timestamp: Option<i64>,
    /// Last traded price.
    pub last: Option<Decimal>,
    /// Best bid.
    pub bid: Option<Decimal>,
    /// Best ask.
    pub ask: Option<Decimal>,
    /// Rolling high.
    pub high: Option<Decimal>,
    /// Rolling low.
    pub low: Option<Decimal>,
    /// Rolling base-asset volume.
    pub volume: Option<Decimal>,
    /// Untouched upstream payload.
    pub raw: serde_json::Value,
}

/// Normalized point-in-time ticker.
///
/// `timestamp` is always populated; all other price fields serialize as
/// `null` when the venue did not report them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticker {
    /// Unified symbol, e.g. `BTC/USDT`.
    pub symbol: String,
    /// Epoch milliseconds.
    pub timestamp: i64,
    /// ISO-8601 rendering of `timestamp`.
    pub datetime: Option<String>,
    /// Last traded price.
    #[serde(default, with = "rust_decimal::serde::float_option")]
    pub last: Option<Decimal>,
    /// Best bid.
    #[serde(default, with = "rust_decimal::serde::float_option")]
    pub bid: Option<Decimal>,
    /// Best ask.
    #[serde(default, with = "rust_decimal::serde::float_option")]
    pub ask: Option<Decimal>,
    /// Rolling high.
    #[serde(default, with = "rust_decimal::serde::float_option")]
    pub high: Option<Decimal>,
    /// Rolling low.
    #[serde(default, with = "rust_decimal::serde::float_option")]
    pub low: Option<Decimal>,
    /// Rolling base-asset volume.
    #[serde(default, with = "rust_decimal::serde::float_option")]
    pub volume: Option<Decimal>,
    /// Upstream payload the ticker was built from.
    #[serde(default)]
    pub raw: serde_json::Value,
}

impl Ticker {
    /// Build a normalized ticker from a venue snapshot.
    ///
    /// `fetched_at` stands in for the timestamp when the venue omits it.
    #[must_use]
    pub fn from_snapshot(
        symbol: &MarketSymbol,
        snapshot: TickerSnapshot,
        fetched_at: DateTime<Utc>,
    ) -> Self {
        let timestamp = snapshot
            .timestamp
            .unwrap_or_else(|| fetched_at.timestamp_millis());

        Self {
            symbol: symbol.to_string(),
            timestamp,
            datetime: iso8601_millis(timestamp),
            last: snapshot.last,
            bid: snapshot.bid,
            ask: snapshot.ask,
            high: snapshot.high,
            low: snapshot.low,
            volume: snapshot.volume,
            raw: snapshot.raw,
        }
    }
}

/// Streaming subset of a ticker pushed to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickerUpdate {
    /// Unified symbol.
    pub symbol: String,
    /// Last traded price.
    #[serde(default, with = "rust_decimal::serde::float_option")]
    pub last: Option<Decimal>,
    /// Best bid.
    #[serde(default, with = "rust_decimal::serde::float_option")]
    pub bid: Option<Decimal>,
    /// Best ask.
    #[serde(default, with = "rust_decimal::serde::float_option")]
    pub ask: Option<Decimal>,
    /// Epoch milliseconds.
    pub timestamp: i64,
}

impl From<&Ticker> for TickerUpdate {
    fn from(ticker: &Ticker) -> Self {
        Self {
            symbol: ticker.symbol.clone(),
            last: ticker.last,
            bid: ticker.bid,
            ask: ticker.ask,
            timestamp: ticker.timestamp,
        }
    }
}

fn iso8601_millis(timestamp_ms: i64) -> Option<String> {
    DateTime::from_timestamp_millis(timestamp_ms)
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true))
}

// =============================================================================
// OHLCV
// =============================================================================

/// One OHLCV bar.
///
/// Serializes as the positional array `[timestamp, open, high, low, close,
/// volume]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OhlcvBar {
    /// Bar open time in epoch milliseconds.
    pub timestamp: i64,
    /// Open price.
    pub open: Decimal,
    /// High price.
    pub high: Decimal,
    /// Low price.
    pub low: Decimal,
    /// Close price.
    pub close: Decimal,
    /// Base-asset volume.
    pub volume: Decimal,
}

impl Serialize for OhlcvBar {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut row = serializer.serialize_tuple(6)?;
        row.serialize_element(&self.timestamp)?;
        for value in [self.open, self.high, self.low, self.close, self.volume] {
            row.serialize_element(&value.to_f64())?;
        }
        row.end()
    }
}

// =============================================================================
// Tests
// =============================================================================
