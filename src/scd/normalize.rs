//! Value normalization applied before attribute comparison
//!
//! The same normalizer runs on the incoming value and on the stored value,
//! so formatting noise (`"1104.0"` vs `1104`, `" 12.50"` vs `12.5`) never
//! produces a new version.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;

/// How a tracked column is canonicalized
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Normalizer {
    /// Compare as-is
    Raw,
    /// Trim and collapse inner whitespace; blank becomes null
    Text,
    /// [`Normalizer::Text`] then upper-case
    UpperText,
    /// Exact decimal rounded to `scale` places, stored as a string
    Decimal {
        /// Fractional digits kept
        scale: u32,
    },
    /// Whole number; a zero fraction is accepted
    Integer,
    /// Identifier-like code; drops a spurious `.0` fraction, keeps leading zeros
    Code,
}

impl Normalizer {
    /// Normalize one value; the error is a human-readable reason
    pub fn apply(&self, value: &Value) -> Result<Value, String> {
        if value.is_null() {
            return Ok(Value::Null);
        }

        match self {
            Normalizer::Raw => Ok(value.clone()),
            Normalizer::Text => Ok(text(value)),
            Normalizer::UpperText => Ok(match text(value) {
                Value::String(s) => Value::String(s.to_uppercase()),
                other => other,
            }),
            Normalizer::Decimal { scale } => match parse_decimal(value)? {
                Some(d) => Ok(Value::String(
                    d.round_dp_with_strategy(*scale, RoundingStrategy::MidpointAwayFromZero)
                        .normalize()
                        .to_string(),
                )),
                None => Ok(Value::Null),
            },
            Normalizer::Integer => match parse_decimal(value)? {
                Some(d) if d.fract().is_zero() => d
                    .to_i64()
                    .map(Value::from)
                    .ok_or_else(|| format!("{d} does not fit in an integer")),
                Some(d) => Err(format!("{d} is not a whole number")),
                None => Ok(Value::Null),
            },
            Normalizer::Code => Ok(code(value)),
        }
    }
}

fn scalar_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn text(value: &Value) -> Value {
    let collapsed = scalar_string(value)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    if collapsed.is_empty() {
        Value::Null
    } else {
        Value::String(collapsed)
    }
}

/// Exact decimal from a number or numeric string; blank is `None`
pub(crate) fn parse_decimal(value: &Value) -> Result<Option<Decimal>, String> {
    let raw = match value {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.trim().replace(',', ""),
        Value::Bool(_) | Value::Array(_) | Value::Object(_) => {
            return Err(format!("{value} is not numeric"))
        }
        Value::Null => return Ok(None),
    };
    if raw.is_empty() {
        return Ok(None);
    }
    Decimal::from_str(&raw)
        .or_else(|_| Decimal::from_scientific(&raw))
        .map(Some)
        .map_err(|_| format!("'{raw}' is not numeric"))
}

fn code(value: &Value) -> Value {
    let raw = scalar_string(value);
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Value::Null;
    }
    match trimmed.split_once('.') {
        Some((whole, fraction))
            if !whole.is_empty()
                && whole.chars().all(|c| c.is_ascii_digit())
                && fraction.chars().all(|c| c == '0') =>
        {
            Value::String(whole.to_string())
        }
        _ => Value::String(trimmed.to_string()),
    }
}
