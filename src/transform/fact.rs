//! `fact_transaction` construction and upsert

use super::catalog::dim_property_spec;
use crate::extract::parse_date;
use crate::scd::normalize::parse_decimal;
use crate::scd::{DimensionTable, Normalizer, SourceRow};
use crate::stage::StageError;
use rust_decimal::Decimal;
use serde_json::Value;
use std::collections::HashMap;

/// Column holding the fact's surrogate key
pub const TRANSACTION_KEY: &str = "transaction_key";
/// Column identifying a transaction
pub const RECORDER_ID: &str = "recorder_id";

/// Coarse transaction category
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionCategory {
    /// Arms-length transfer with a positive amount
    Sale,
    /// Zero-amount instrument
    Mortgage,
    /// Anything else
    Other,
}

impl TransactionCategory {
    /// Classify from the arms-length flag and document amount
    pub fn classify(arms_length: bool, amount: Option<Decimal>) -> Self {
        match amount {
            Some(a) if arms_length && a > Decimal::ZERO => TransactionCategory::Sale,
            Some(a) if a.is_zero() => TransactionCategory::Mortgage,
            _ => TransactionCategory::Other,
        }
    }

    /// Stored label
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionCategory::Sale => "SALE",
            TransactionCategory::Mortgage => "MORTGAGE",
            TransactionCategory::Other => "OTHER",
        }
    }
}

fn flag(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
        Some(Value::String(s)) => {
            let s = s.trim().to_ascii_uppercase();
            !matches!(s.as_str(), "" | "0" | "N" | "NO" | "FALSE")
        }
        Some(_) => true,
    }
}

/// Party counts per recorder id
pub type PartyCounts = HashMap<String, u64>;

/// Build one fact row from a raw transaction
///
/// `property_key` is the `dim_property` version in effect on the recorded
/// date (the current version when the date predates history), or null when
/// the property is unknown.
pub fn build_fact(
    raw: &SourceRow,
    properties: &DimensionTable,
    grantors: &PartyCounts,
    grantees: &PartyCounts,
) -> Result<SourceRow, StageError> {
    let recorder_id = match raw.get(RECORDER_ID) {
        Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        _ => {
            return Err(StageError::Validation(format!(
                "transaction row is missing {RECORDER_ID}"
            )))
        }
    };

    let amount = raw
        .get("document_amount")
        .map(parse_decimal)
        .transpose()
        .map_err(|reason| {
            StageError::Validation(format!("transaction {recorder_id}: document_amount {reason}"))
        })?
        .flatten();
    let arms_length = flag(raw.get("arms_length_code"));
    let category = TransactionCategory::classify(arms_length, amount);

    let as_of = raw.get("recorded_date").and_then(parse_date);
    let property_key = dim_property_spec()
        .natural_key_of(raw)
        .ok()
        .and_then(|key| {
            as_of
                .and_then(|date| properties.version_on(&key, date))
                .or_else(|| properties.current(&key))
        })
        .map_or(Value::Null, |row| Value::from(row.surrogate_key));

    let grantor_count = grantors.get(&recorder_id).copied().unwrap_or(0);
    let grantee_count = grantees.get(&recorder_id).copied().unwrap_or(0);

    let text = |column: &str| -> Result<Value, StageError> {
        raw.get(column)
            .map_or(Ok(Value::Null), |v| Normalizer::Text.apply(v))
            .map_err(StageError::Validation)
    };

    let mut fact = SourceRow::new();
    fact.insert(RECORDER_ID.into(), Value::String(recorder_id));
    fact.insert("property_key".into(), property_key);
    fact.insert(
        "tax_assessor_id".into(),
        raw.get("tax_assessor_id")
            .map_or(Ok(Value::Null), |v| Normalizer::Code.apply(v))
            .map_err(StageError::Validation)?,
    );
    fact.insert("transaction_date".into(), text("recorded_date")?);
    fact.insert("instrument_date".into(), text("instrument_date")?);
    fact.insert("document_type_code".into(), text("document_type_code")?);
    fact.insert(
        "document_amount".into(),
        amount.map_or(Value::Null, |a| Value::String(a.normalize().to_string())),
    );
    fact.insert("arms_length_flag".into(), Value::Bool(arms_length));
    fact.insert(
        "transaction_category".into(),
        Value::String(category.as_str().to_string()),
    );
    fact.insert(
        "is_sale".into(),
        Value::Bool(category == TransactionCategory::Sale),
    );
    fact.insert("grantor_count".into(), Value::from(grantor_count));
    fact.insert("grantee_count".into(), Value::from(grantee_count));
    fact.insert(
        "has_multiple_parties".into(),
        Value::Bool(grantor_count + grantee_count > 2),
    );
    Ok(fact)
}

/// Upsert `incoming` facts by recorder id; returns rows inserted or changed
///
/// Existing rows keep their transaction key.
pub fn upsert_facts(table: &mut Vec<SourceRow>, incoming: Vec<SourceRow>) -> u64 {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut next_key = 1u64;
    for (i, row) in table.iter().enumerate() {
        if let Some(id) = row.get(RECORDER_ID).and_then(Value::as_str) {
            index.insert(id.to_string(), i);
        }
        if let Some(key) = row.get(TRANSACTION_KEY).and_then(Value::as_u64) {
            next_key = next_key.max(key + 1);
        }
    }

    let mut changed = 0;
    for mut fact in incoming {
        let Some(id) = fact.get(RECORDER_ID).and_then(Value::as_str).map(str::to_string) else {
            continue;
        };
        match index.get(&id) {
            Some(&i) => {
                let existing = &mut table[i];
                if let Some(key) = existing.get(TRANSACTION_KEY) {
                    fact.insert(TRANSACTION_KEY.into(), key.clone());
                }
                if *existing != fact {
                    *existing = fact;
                    changed += 1;
                }
            }
            None => {
                fact.insert(TRANSACTION_KEY.into(), Value::from(next_key));
                next_key += 1;
                index.insert(id, table.len());
                table.push(fact);
                changed += 1;
            }
        }
    }
    changed
}
