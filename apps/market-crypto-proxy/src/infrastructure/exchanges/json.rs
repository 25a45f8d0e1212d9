//! Helpers for pulling prices out of loosely typed exchange payloads.
//!
//! Venues disagree on whether prices are JSON strings or numbers, so every
//! accessor accepts both.

use rust_decimal::Decimal;
use serde_json::Value;

/// Parse a price from a JSON string or number.
#[must_use]
pub fn decimal(value: &Value) -> Option<Decimal> {
    match value {
        Value::String(s) => parse_decimal(s),
        Value::Number(n) => n
            .as_i64()
            .map(Decimal::from)
            .or_else(|| parse_decimal(&n.to_string())),
        _ => None,
    }
}

/// Price at `field` of a JSON object.
#[must_use]
pub fn decimal_field(value: &Value, field: &str) -> Option<Decimal> {
    value.get(field).and_then(decimal)
}

/// Price at position `index` of a JSON array.
#[must_use]
pub fn decimal_at(value: &Value, index: usize) -> Option<Decimal> {
    value.get(index).and_then(decimal)
}

/// Integer from a JSON string or number.
#[must_use]
pub fn integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| {
            #[allow(clippy::cast_possible_truncation)]
            n.as_f64().map(|f| f as i64)
        }),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn parse_decimal(s: &str) -> Option<Decimal> {
    let s = s.trim();
    s.parse::<Decimal>()
        .ok()
        .or_else(|| Decimal::from_scientific(s).ok())
}
