//! Lenient money parsing.
//!
//! Prices reach the engine from search results and backend responses as
//! numbers, numeric strings, or not at all. Anything that does not parse to a
//! non-negative decimal is treated as zero instead of failing the read.

use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::str::FromStr;

/// Convert a loosely typed JSON value into a non-negative amount.
pub fn amount_from_value(value: &Value) -> Decimal {
    let parsed = match value {
        Value::Number(n) => parse_amount(&n.to_string()),
        Value::String(s) => parse_amount(s),
        _ => None,
    };
    clamp(parsed.unwrap_or_default())
}

/// Parse a textual amount, accepting plain and scientific notation.
pub fn parse_amount(raw: &str) -> Option<Decimal> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    Decimal::from_str(raw)
        .or_else(|_| Decimal::from_scientific(raw))
        .ok()
}

/// Negative amounts are invalid prices and collapse to zero.
pub fn clamp(amount: Decimal) -> Decimal {
    if amount.is_sign_negative() {
        Decimal::ZERO
    } else {
        amount
    }
}

/// `deserialize_with` helper for required amount fields.
pub fn lenient<'de, D>(deserializer: D) -> Result<Decimal, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(amount_from_value(&value))
}

/// `deserialize_with` helper for optional amount fields; `null` stays `None`.
pub fn lenient_opt<'de, D>(deserializer: D) -> Result<Option<Decimal>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    if value.is_null() {
        return Ok(None);
    }
    Ok(Some(amount_from_value(&value)))
}
