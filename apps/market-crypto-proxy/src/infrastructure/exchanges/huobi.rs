//! Huobi (HTX) spot adapter.
//!
//! - Ticker: `GET /market/detail/merged?symbol=btcusdt`
//! - Klines: `GET /market/history/kline?symbol=btcusdt&period=1min&size=N`
//!
//! Responses carry `"status": "ok" | "error"` with HTTP 200 either way.
//! Klines arrive newest first and the endpoint has no start parameter, so
//! `since` is applied client-side over the largest page.

use async_trait::async_trait;
use serde_json::Value;

use super::client::ExchangeHttpClient;
use super::json::{decimal_at, decimal_field, integer};
use super::select_window;
use crate::application::ports::{ExchangeAdapter, MarketDataError};
use crate::domain::market::{Exchange, MarketSymbol, OhlcvBar, TickerSnapshot, Timeframe};
use crate::infrastructure::metrics::UpstreamOperation;

const MAX_KLINES: usize = 2_000;

/// Huobi REST adapter.
#[derive(Debug, Clone)]
pub struct HuobiAdapter {
    client: ExchangeHttpClient,
}

impl HuobiAdapter {
    /// Wrap a client pointed at the Huobi API.
    #[must_use]
    pub const fn new(client: ExchangeHttpClient) -> Self {
        Self { client }
    }

    fn market_id(symbol: &MarketSymbol) -> String {
        symbol.joined("").to_ascii_lowercase()
    }

    const fn period(timeframe: Timeframe) -> &'static str {
        match timeframe {
            Timeframe::OneMinute => "1min",
            Timeframe::FiveMinutes => "5min",
            Timeframe::FifteenMinutes => "15min",
            Timeframe::ThirtyMinutes => "30min",
            Timeframe::OneHour => "60min",
            Timeframe::FourHours => "4hour",
            Timeframe::OneDay => "1day",
            Timeframe::OneWeek => "1week",
        }
    }

    async fn market(
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
            .map_err(|e| e.into_market_error(Exchange::Huobi))?;

        if payload.get("status").and_then(Value::as_str) == Some("ok") {
            return Ok(payload);
        }

        let message = payload
            .get("err-msg")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        if message.contains("invalid symbol") {
            return Err(MarketDataError::symbol_not_found(Exchange::Huobi, symbol));
        }
        Err(MarketDataError::external(Exchange::Huobi, message))
    }
}

#[async_trait]
impl ExchangeAdapter for HuobiAdapter {
    fn exchange(&self) -> Exchange {
        Exchange::Huobi
    }

    async fn fetch_ticker(&self, symbol: &MarketSymbol) -> Result<TickerSnapshot, MarketDataError> {
        let raw = self
            .market(
                UpstreamOperation::Ticker,
                "/market/detail/merged",
                &[("symbol", Self::market_id(symbol))],
                symbol,
            )
            .await?;

        let tick = raw
            .get("tick")
            .ok_or_else(|| MarketDataError::external(Exchange::Huobi, "response has no tick"))?;

        // bid/ask are [price, size]; amount is base volume, vol is quote volume.
        Ok(TickerSnapshot {
            timestamp: raw.get("ts").and_then(integer),
            last: decimal_field(tick, "close"),
            bid: tick.get("bid").and_then(|v| decimal_at(v, 0)),
            ask: tick.get("ask").and_then(|v| decimal_at(v, 0)),
            high: decimal_field(tick, "high"),
            low: decimal_field(tick, "low"),
            volume: decimal_field(tick, "amount"),
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
        let size = if since.is_some() {
            MAX_KLINES
        } else {
            limit.min(MAX_KLINES)
        };
        let query = [
            ("symbol", Self::market_id(symbol)),
            ("period", Self::period(timeframe).to_string()),
            ("size", size.to_string()),
        ];

        let payload = self
            .market(UpstreamOperation::Ohlcv, "/market/history/kline", &query, symbol)
            .await?;

        let rows = payload
            .get("data")
            .and_then(Value::as_array)
            .ok_or_else(|| MarketDataError::external(Exchange::Huobi, "response has no data"))?;

        let mut bars = rows
            .iter()
            .map(parse_kline)
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| MarketDataError::external(Exchange::Huobi, "malformed kline row"))?;
        bars.sort_by_key(|bar| bar.timestamp);

        Ok(select_window(bars, since, limit))
    }
}

fn parse_kline(row: &Value) -> Option<OhlcvBar> {
    Some(OhlcvBar {
        timestamp: integer(row.get("id")?)?.checked_mul(1_000)?,
        open: decimal_field(row, "open")?,
        high: decimal_field(row, "high")?,
        low: decimal_field(row, "low")?,
        close: decimal_field(row, "close")?,
        volume: decimal_field(row, "amount")?,
    })
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;
    use serde_json::json;

    use super::*;

    #[test]
    fn market_id_is_lowercase() {
        let symbol = MarketSymbol::parse("BTC/USDT").unwrap();
        assert_eq!(HuobiAdapter::market_id(&symbol), "btcusdt");
    }

    #[test]
    fn period_mapping() {
        assert_eq!(HuobiAdapter::period(Timeframe::OneHour), "60min");
        assert_eq!(HuobiAdapter::period(Timeframe::OneWeek), "1week");
    }

    #[test]
    fn parse_kline_object() {
        let row = json!({
            "id": 1_629_769_200,
            "open": 49_056.37,
            "close": 49_025.51,
            "low": 49_022.86,
            "high": 49_056.38,
            "amount": 3.946_281_917_950_9,
            "vol": 193_489.814_993_7,
            "count": 196
        });

        let bar = parse_kline(&row).unwrap();
        assert_eq!(bar.timestamp, 1_629_769_200_000);
        assert_eq!(bar.open, Decimal::new(4_905_637, 2));
        assert_eq!(bar.high, Decimal::new(4_905_638, 2));
    }
}
