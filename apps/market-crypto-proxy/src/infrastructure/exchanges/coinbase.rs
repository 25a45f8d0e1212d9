//! Coinbase Exchange adapter.
//!
//! - Ticker: `GET /products/BTC-USD/ticker`
//! - Candles: `GET /products/BTC-USD/candles?granularity=<secs>[&start=&end=]`
//!
//! The ticker has no rolling high/low. Candles arrive newest first as
//! `[time(secs), low, high, open, close, volume]`, at most 300 per call.
//! Unknown products answer 404.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;

use super::client::ExchangeHttpClient;
use super::error::ExchangeClientError;
use super::json::{decimal_at, decimal_field, integer};
use super::select_window;
use crate::application::ports::{ExchangeAdapter, MarketDataError};
use crate::domain::market::{Exchange, MarketSymbol, OhlcvBar, TickerSnapshot, Timeframe};
use crate::infrastructure::metrics::UpstreamOperation;

const MAX_CANDLES: usize = 300;

/// Coinbase Exchange REST adapter.
#[derive(Debug, Clone)]
pub struct CoinbaseAdapter {
    client: ExchangeHttpClient,
}

impl CoinbaseAdapter {
    /// Wrap a client pointed at the Coinbase Exchange API.
    #[must_use]
    pub const fn new(client: ExchangeHttpClient) -> Self {
        Self { client }
    }

    fn product_id(symbol: &MarketSymbol) -> String {
        symbol.joined("-")
    }

    /// Candle granularity in seconds, if Coinbase offers the timeframe.
    const fn granularity(timeframe: Timeframe) -> Option<i64> {
        match timeframe {
            Timeframe::OneMinute => Some(60),
            Timeframe::FiveMinutes => Some(300),
            Timeframe::FifteenMinutes => Some(900),
            Timeframe::OneHour => Some(3_600),
            Timeframe::OneDay => Some(86_400),
            Timeframe::ThirtyMinutes | Timeframe::FourHours | Timeframe::OneWeek => None,
        }
    }

    fn map_error(err: ExchangeClientError, symbol: &MarketSymbol) -> MarketDataError {
        match err {
            ExchangeClientError::Status { status: 404, .. } => {
                MarketDataError::symbol_not_found(Exchange::Coinbase, symbol)
            }
            other => other.into_market_error(Exchange::Coinbase),
        }
    }
}

fn iso8601_secs(timestamp_secs: i64) -> Option<String> {
    DateTime::<Utc>::from_timestamp(timestamp_secs, 0)
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Secs, true))
}

#[async_trait]
impl ExchangeAdapter for CoinbaseAdapter {
    fn exchange(&self) -> Exchange {
        Exchange::Coinbase
    }

    async fn fetch_ticker(&self, symbol: &MarketSymbol) -> Result<TickerSnapshot, MarketDataError> {
        let path = format!("/products/{}/ticker", Self::product_id(symbol));
        let raw: Value = self
            .client
            .get_json(UpstreamOperation::Ticker, &path, &[])
            .await
            .map_err(|e| Self::map_error(e, symbol))?;

        let timestamp = raw
            .get("time")
            .and_then(Value::as_str)
            .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
            .map(|dt| dt.timestamp_millis());

        Ok(TickerSnapshot {
            timestamp,
            last: decimal_field(&raw, "price"),
            bid: decimal_field(&raw, "bid"),
            ask: decimal_field(&raw, "ask"),
            high: None,
            low: None,
            volume: decimal_field(&raw, "volume"),
            raw,
        })
    }

    async fn fetch_ohlcv(
        &self,
        symbol: &MarketSymbol,
        timeframe: Timeframe,
        since: Option<i64>,
        limit: usize,
    ) -> Result<Vec<OhlcvBar>, MarketDataError> {
        let granularity = Self::granularity(timeframe).ok_or_else(|| {
            MarketDataError::invalid_request(format!(
                "timeframe {timeframe} is not available on coinbase"
            ))
        })?;

        let mut query = vec![("granularity", granularity.to_string())];
        if let Some(since) = since {
            let start = since.div_euclid(1_000);
            let window = i64::try_from(limit.min(MAX_CANDLES)).unwrap_or(1);
            let end = start + granularity * window;
            if let (Some(start), Some(end)) = (iso8601_secs(start), iso8601_secs(end)) {
                query.push(("start", start));
                query.push(("end", end));
            }
        }

        let path = format!("/products/{}/candles", Self::product_id(symbol));
        let rows: Vec<Value> = self
            .client
            .get_json(UpstreamOperation::Ohlcv, &path, &query)
            .await
            .map_err(|e| Self::map_error(e, symbol))?;

        let mut bars = rows
            .iter()
            .map(parse_candle)
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| MarketDataError::external(Exchange::Coinbase, "malformed candle row"))?;
        bars.sort_by_key(|bar| bar.timestamp);

        Ok(select_window(bars, since, limit))
    }
}

fn parse_candle(row: &Value) -> Option<OhlcvBar> {
    Some(OhlcvBar {
        timestamp: integer(row.get(0)?)?.checked_mul(1_000)?,
        low: decimal_at(row, 1)?,
        high: decimal_at(row, 2)?,
        open: decimal_at(row, 3)?,
        close: decimal_at(row, 4)?,
        volume: decimal_at(row, 5)?,
    })
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;
    use serde_json::json;
    use test_case::test_case;

    use super::*;

    #[test]
    fn product_id_uses_dash() {
        let symbol = MarketSymbol::parse("btc/usd").unwrap();
        assert_eq!(CoinbaseAdapter::product_id(&symbol), "BTC-USD");
    }

    #[test_case(Timeframe::OneMinute, Some(60))]
    #[test_case(Timeframe::OneHour, Some(3_600))]
    #[test_case(Timeframe::FourHours, None)]
    #[test_case(Timeframe::OneWeek, None)]
    fn granularity_mapping(timeframe: Timeframe, expected: Option<i64>) {
        assert_eq!(CoinbaseAdapter::granularity(timeframe), expected);
    }

    #[test]
    fn parse_candle_reorders_columns() {
        let row = json!([1_415_398_768, 0.32, 4.2, 0.35, 4.2, 12.3]);
        let bar = parse_candle(&row).unwrap();

        assert_eq!(bar.timestamp, 1_415_398_768_000);
        assert_eq!(bar.low, Decimal::new(32, 2));
        assert_eq!(bar.high, Decimal::new(42, 1));
        assert_eq!(bar.open, Decimal::new(35, 2));
        assert_eq!(bar.volume, Decimal::new(123, 1));
    }

    #[test]
    fn not_found_maps_to_symbol_not_found() {
        let symbol = MarketSymbol::parse("FOO/USD").unwrap();
        let err = CoinbaseAdapter::map_error(
            ExchangeClientError::Status {
                status: 404,
                body: r#"{"message":"NotFound"}"#.to_string(),
            },
            &symbol,
        );
        assert_eq!(err.kind(), "symbol_not_found");
    }

    #[test]
    fn iso_formatting() {
        assert_eq!(iso8601_secs(0).as_deref(), Some("1970-01-01T00:00:00Z"));
    }
}
