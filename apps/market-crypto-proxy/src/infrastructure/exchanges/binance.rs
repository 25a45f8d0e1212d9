//! Binance spot adapter.
//!
//! - Ticker: `GET /api/v3/ticker/24hr?symbol=BTCUSDT`
//! - Klines: `GET /api/v3/klines?symbol=BTCUSDT&interval=1m&limit=100[&startTime=ms]`
//!
//! Unknown symbols come back as HTTP 400 with `{"code":-1121,...}`.

use async_trait::async_trait;
use serde_json::Value;

use super::client::ExchangeHttpClient;
use super::error::ExchangeClientError;
use super::json::{decimal_at, decimal_field, integer};
use crate::application::ports::{ExchangeAdapter, MarketDataError};
use crate::domain::market::{Exchange, MarketSymbol, OhlcvBar, TickerSnapshot, Timeframe};
use crate::infrastructure::metrics::UpstreamOperation;

const INVALID_SYMBOL_CODE: i64 = -1121;
const MAX_KLINES: usize = 1_000;

/// Binance REST adapter.
#[derive(Debug, Clone)]
pub struct BinanceAdapter {
    client: ExchangeHttpClient,
}

impl BinanceAdapter {
    /// Wrap a client pointed at the Binance API.
    #[must_use]
    pub const fn new(client: ExchangeHttpClient) -> Self {
        Self { client }
    }

    fn market_id(symbol: &MarketSymbol) -> String {
        symbol.joined("")
    }

    fn map_error(err: ExchangeClientError, symbol: &MarketSymbol) -> MarketDataError {
        if let ExchangeClientError::Status { status: 400, body } = &err
            && let Ok(payload) = serde_json::from_str::<Value>(body)
            && payload.get("code").and_then(Value::as_i64) == Some(INVALID_SYMBOL_CODE)
        {
            return MarketDataError::symbol_not_found(Exchange::Binance, symbol);
        }
        err.into_market_error(Exchange::Binance)
    }
}

#[async_trait]
impl ExchangeAdapter for BinanceAdapter {
    fn exchange(&self) -> Exchange {
        Exchange::Binance
    }

    async fn fetch_ticker(&self, symbol: &MarketSymbol) -> Result<TickerSnapshot, MarketDataError> {
        let raw: Value = self
            .client
            .get_json(
                UpstreamOperation::Ticker,
                "/api/v3/ticker/24hr",
                &[("symbol", Self::market_id(symbol))],
            )
            .await
            .map_err(|e| Self::map_error(e, symbol))?;

        if !raw.is_object() {
            return Err(MarketDataError::external(
                Exchange::Binance,
                "ticker response is not an object",
            ));
        }

        Ok(TickerSnapshot {
            timestamp: raw.get("closeTime").and_then(integer),
            last: decimal_field(&raw, "lastPrice"),
            bid: decimal_field(&raw, "bidPrice"),
            ask: decimal_field(&raw, "askPrice"),
            high: decimal_field(&raw, "highPrice"),
            low: decimal_field(&raw, "lowPrice"),
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
        let mut query = vec![
            ("symbol", Self::market_id(symbol)),
            ("interval", timeframe.as_str().to_string()),
            ("limit", limit.min(MAX_KLINES).to_string()),
        ];
        if let Some(since) = since {
            query.push(("startTime", since.to_string()));
        }

        let rows: Vec<Value> = self
            .client
            .get_json(UpstreamOperation::Ohlcv, "/api/v3/klines", &query)
            .await
            .map_err(|e| Self::map_error(e, symbol))?;

        let mut bars = rows
            .iter()
            .map(parse_kline)
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| MarketDataError::external(Exchange::Binance, "malformed kline row"))?;
        bars.sort_by_key(|bar| bar.timestamp);
        bars.truncate(limit);
        Ok(bars)
    }
}

fn parse_kline(row: &Value) -> Option<OhlcvBar> {
    Some(OhlcvBar {
        timestamp: integer(row.get(0)?)?,
        open: decimal_at(row, 1)?,
        high: decimal_at(row, 2)?,
        low: decimal_at(row, 3)?,
        close: decimal_at(row, 4)?,
        volume: decimal_at(row, 5)?,
    })
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;
    use serde_json::json;

    use super::*;

    #[test]
    fn market_id_joins_legs() {
        let symbol = MarketSymbol::parse("eth/usdt").unwrap();
        assert_eq!(BinanceAdapter::market_id(&symbol), "ETHUSDT");
    }

    #[test]
    fn parse_kline_row() {
        let row = json!([
            1_499_040_000_000_i64,
            "0.01634790",
            "0.80000000",
            "0.01575800",
            "0.01577100",
            "148976.11427815",
            1_499_644_799_999_i64,
            "2434.19055334",
            308,
            "1756.87402397",
            "28.46694368",
            "0"
        ]);

        let bar = parse_kline(&row).unwrap();
        assert_eq!(bar.timestamp, 1_499_040_000_000);
        assert_eq!(bar.open, Decimal::new(1_634_790, 8));
        assert_eq!(bar.close, Decimal::new(1_577_100, 8));
    }

    #[test]
    fn invalid_symbol_code_maps_to_not_found() {
        let symbol = MarketSymbol::parse("FOO/BAR").unwrap();
        let err = BinanceAdapter::map_error(
            ExchangeClientError::Status {
                status: 400,
                body: r#"{"code":-1121,"msg":"Invalid symbol."}"#.to_string(),
            },
            &symbol,
        );
        assert_eq!(
            err,
            MarketDataError::symbol_not_found(Exchange::Binance, &symbol)
        );
    }

    #[test]
    fn other_client_errors_are_external() {
        let symbol = MarketSymbol::parse("BTC/USDT").unwrap();
        let err = BinanceAdapter::map_error(
            ExchangeClientError::Status {
                status: 400,
                body: r#"{"code":-1100,"msg":"Illegal characters"}"#.to_string(),
            },
            &symbol,
        );
        assert_eq!(err.kind(), "external_api");
    }
}
