//! Kraken spot adapter.
//!
//! - Ticker: `GET /0/public/Ticker?pair=XBTUSDT`
//! - OHLC: `GET /0/public/OHLC?pair=XBTUSDT&interval=<minutes>[&since=<secs>]`
//!
//! Kraken answers 200 with a non-empty `error` array on failure, and calls
//! bitcoin `XBT`. The ticker carries no timestamp.

use async_trait::async_trait;
use serde_json::Value;

use super::client::ExchangeHttpClient;
use super::json::{decimal_at, integer};
use super::select_window;
use crate::application::ports::{ExchangeAdapter, MarketDataError};
use crate::domain::market::{Exchange, MarketSymbol, OhlcvBar, TickerSnapshot, Timeframe};
use crate::infrastructure::metrics::UpstreamOperation;

/// Kraken REST adapter.
#[derive(Debug, Clone)]
pub struct KrakenAdapter {
    client: ExchangeHttpClient,
}

impl KrakenAdapter {
    /// Wrap a client pointed at the Kraken API.
    #[must_use]
    pub const fn new(client: ExchangeHttpClient) -> Self {
        Self { client }
    }

    fn market_id(symbol: &MarketSymbol) -> String {
        format!("{}{}", kraken_asset(symbol.base()), kraken_asset(symbol.quote()))
    }

    const fn interval_minutes(timeframe: Timeframe) -> u32 {
        match timeframe {
            Timeframe::OneMinute => 1,
            Timeframe::FiveMinutes => 5,
            Timeframe::FifteenMinutes => 15,
            Timeframe::ThirtyMinutes => 30,
            Timeframe::OneHour => 60,
            Timeframe::FourHours => 240,
            Timeframe::OneDay => 1_440,
            Timeframe::OneWeek => 10_080,
        }
    }

    async fn public(
        &self,
        operation: UpstreamOperation,
        path: &str,
        query: &[(&str, String)],
        symbol: &MarketSymbol,
    ) -> Result<Value, MarketDataError> {
        let payload: Value = self
            .client
            .get_json(operation, path, query)
            .await
            .map_err(|e| e.into_market_error(Exchange::Kraken))?;

        let errors: Vec<&str> = payload
            .get("error")
            .and_then(Value::as_array)
            .map(|errs| errs.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();

        if errors.iter().any(|e| e.contains("Unknown asset pair")) {
            return Err(MarketDataError::symbol_not_found(Exchange::Kraken, symbol));
        }
        if !errors.is_empty() {
            return Err(MarketDataError::external(Exchange::Kraken, errors.join("; ")));
        }

        payload
            .get("result")
            .cloned()
            .ok_or_else(|| MarketDataError::external(Exchange::Kraken, "response has no result"))
    }
}

fn kraken_asset(asset: &str) -> &str {
    match asset {
        "BTC" => "XBT",
        "DOGE" => "XDG",
        other => other,
    }
}

/// First pair entry of a `result` object, skipping the OHLC `last` cursor.
fn first_pair(result: &Value) -> Option<&Value> {
    result
        .as_object()?
        .iter()
        .find(|(key, _)| key.as_str() != "last")
        .map(|(_, value)| value)
}

#[async_trait]
impl ExchangeAdapter for KrakenAdapter {
    fn exchange(&self) -> Exchange {
        Exchange::Kraken
    }

    async fn fetch_ticker(&self, symbol: &MarketSymbol) -> Result<TickerSnapshot, MarketDataError> {
        let result = self
            .public(
                UpstreamOperation::Ticker,
                "/0/public/Ticker",
                &[("pair", Self::market_id(symbol))],
                symbol,
            )
            .await?;

        let Some(ticker) = first_pair(&result).cloned() else {
            return Err(MarketDataError::symbol_not_found(Exchange::Kraken, symbol));
        };

        // Array fields: [today, last 24 hours]; a/b/c: [price, ...].
        let nested = |field: &str, index: usize| ticker.get(field).and_then(|v| decimal_at(v, index));

        Ok(TickerSnapshot {
            timestamp: None,
            last: nested("c", 0),
            bid: nested("b", 0),
            ask: nested("a", 0),
            high: nested("h", 1),
            low: nested("l", 1),
            volume: nested("v", 1),
            raw: ticker,
        })
    }

    async fn fetch_ohlcv(
        &self,
        symbol: &MarketSymbol,
        timeframe: Timeframe,
        since: Option<i64>,
        limit: usize,
    ) -> Result<Vec<OhlcvBar>, MarketDataError> {
        let mut query = vec![
            ("pair", Self::market_id(symbol)),
            ("interval", Self::interval_minutes(timeframe).to_string()),
        ];
        if let Some(since) = since {
            // Kraken's cursor is exclusive and in seconds.
            query.push(("since", (since / 1_000 - 1).to_string()));
        }

        let result = self
            .public(UpstreamOperation::Ohlcv, "/0/public/OHLC", &query, symbol)
            .await?;

        let rows = first_pair(&result)
            .and_then(Value::as_array)
            .ok_or_else(|| MarketDataError::external(Exchange::Kraken, "OHLC result has no rows"))?;

        let mut bars = rows
            .iter()
            .map(parse_ohlc)
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| MarketDataError::external(Exchange::Kraken, "malformed OHLC row"))?;
        bars.sort_by_key(|bar| bar.timestamp);

        Ok(select_window(bars, since, limit))
    }
}

fn parse_ohlc(row: &Value) -> Option<OhlcvBar> {
    // [time(secs), open, high, low, close, vwap, volume, count]
    Some(OhlcvBar {
        timestamp: integer(row.get(0)?)?.checked_mul(1_000)?,
        open: decimal_at(row, 1)?,
        high: decimal_at(row, 2)?,
        low: decimal_at(row, 3)?,
        close: decimal_at(row, 4)?,
        volume: decimal_at(row, 6)?,
    })
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;
    use serde_json::json;

    use super::*;

    #[test]
    fn market_id_uses_xbt() {
        let symbol = MarketSymbol::parse("BTC/USDT").unwrap();
        assert_eq!(KrakenAdapter::market_id(&symbol), "XBTUSDT");

        let symbol = MarketSymbol::parse("ETH/BTC").unwrap();
        assert_eq!(KrakenAdapter::market_id(&symbol), "ETHXBT");
    }

    #[test]
    fn first_pair_skips_last_cursor() {
        let result = json!({"last": 1_688_671_200, "XXBTZUSD": [[1]]});
        assert_eq!(first_pair(&result), Some(&json!([[1]])));
    }

    #[test]
    fn parse_ohlc_row_converts_seconds() {
        let row = json!([1_688_671_200, "30306.1", "30306.2", "30305.7", "30305.7", "30306.1", "3.39243896", 23]);
        let bar = parse_ohlc(&row).unwrap();

        assert_eq!(bar.timestamp, 1_688_671_200_000);
        assert_eq!(bar.volume, Decimal::new(339_243_896, 8));
    }
}
