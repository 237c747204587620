//! Standard check families

use super::{AnalyticsSnapshot, ValidationReport, Validator, DEFAULT_FK_THRESHOLD};
use crate::scd::normalize::parse_decimal;
use crate::scd::{DimensionTable, SourceRow};
use rust_decimal::Decimal;
use serde_json::Value;
use std::collections::HashSet;

const STRICT: f64 = 100.0;

fn present(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::String(s)) => !s.trim().is_empty(),
        Some(_) => true,
    }
}

fn count_present(rows: &[SourceRow], column: &str) -> u64 {
    rows.iter().filter(|r| present(r.get(column))).count() as u64
}

fn distinct<T: std::hash::Hash + Eq>(items: impl Iterator<Item = T>) -> u64 {
    items.collect::<HashSet<_>>().len() as u64
}

/// Key and date columns are populated
#[derive(Debug, Clone, Copy, Default)]
pub struct RequiredFieldChecks;

impl Validator for RequiredFieldChecks {
    fn name(&self) -> &str {
        "required_fields"
    }

    fn validate(&self, snapshot: &AnalyticsSnapshot, report: &mut ValidationReport) {
        const CATEGORY: &str = "REQUIRED_FIELD";

        for dim in [&snapshot.dim_property, &snapshot.dim_entity] {
            if dim.is_empty() {
                continue;
            }
            let keyed = dim
                .rows()
                .iter()
                .filter(|r| !r.natural_key.trim().is_empty())
                .count() as u64;
            report.add_check(
                CATEGORY,
                format!("{}.natural_key NOT NULL", dim.name()),
                keyed,
                dim.len() as u64,
                STRICT,
                "",
            );
        }

        let facts = &snapshot.fact_transaction;
        if !facts.is_empty() {
            for column in ["recorder_id", "transaction_date", "transaction_category"] {
                report.add_check(
                    CATEGORY,
                    format!("fact_transaction.{column} NOT NULL"),
                    count_present(facts, column),
                    facts.len() as u64,
                    STRICT,
                    "",
                );
            }
        }
    }
}

/// Surrogate and natural keys are unique
#[derive(Debug, Clone, Copy, Default)]
pub struct UniquenessChecks;

impl Validator for UniquenessChecks {
    fn name(&self) -> &str {
        "uniqueness"
    }

    fn validate(&self, snapshot: &AnalyticsSnapshot, report: &mut ValidationReport) {
        const CATEGORY: &str = "UNIQUENESS";

        for dim in [&snapshot.dim_property, &snapshot.dim_entity] {
            if dim.is_empty() {
                continue;
            }
            let total = dim.len() as u64;
            report.add_check(
                CATEGORY,
                format!("{}.surrogate_key is unique", dim.name()),
                distinct(dim.rows().iter().map(|r| r.surrogate_key)),
                total,
                STRICT,
                "",
            );
            report.add_check(
                CATEGORY,
                format!("{} (natural_key, valid_from) is unique", dim.name()),
                distinct(dim.rows().iter().map(|r| (r.natural_key.as_str(), r.valid_from))),
                total,
                STRICT,
                "SCD Type 2 version key must be unique",
            );
        }

        let facts = &snapshot.fact_transaction;
        if !facts.is_empty() {
            for column in ["transaction_key", "recorder_id"] {
                let values = facts
                    .iter()
                    .filter_map(|r| r.get(column))
                    .filter(|v| !v.is_null())
                    .map(Value::to_string);
                report.add_check(
                    CATEGORY,
                    format!("fact_transaction.{column} is unique"),
                    distinct(values),
                    facts.len() as u64,
                    STRICT,
                    "",
                );
            }
        }
    }
}

/// Every member's versions partition time with one current version
#[derive(Debug, Clone, Copy, Default)]
pub struct ScdHistoryChecks;

impl ScdHistoryChecks {
    fn check(dim: &DimensionTable, report: &mut ValidationReport) {
        if dim.is_empty() {
            return;
        }
        let members = dim.member_count() as u64;
        let violations = dim.history_violations();
        let message = violations
            .first()
            .map(|v| format!("{} broken: first {}", violations.len(), v))
            .unwrap_or_default();
        report.add_check(
            "SCD_HISTORY",
            format!("{} history is contiguous", dim.name()),
            members.saturating_sub(violations.len() as u64),
            members,
            STRICT,
            message,
        );
    }
}

impl Validator for ScdHistoryChecks {
    fn name(&self) -> &str {
        "scd_history"
    }

    fn validate(&self, snapshot: &AnalyticsSnapshot, report: &mut ValidationReport) {
        Self::check(&snapshot.dim_property, report);
        Self::check(&snapshot.dim_entity, report);
    }
}

/// Fact foreign keys resolve to dimension rows
#[derive(Debug, Clone, Copy)]
pub struct ReferentialIntegrityChecks {
    threshold: f64,
}

impl Default for ReferentialIntegrityChecks {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_FK_THRESHOLD,
        }
    }
}

impl ReferentialIntegrityChecks {
    /// Checks with a custom pass threshold (percent)
    pub fn with_threshold(threshold: f64) -> Self {
        Self { threshold }
    }
}

impl Validator for ReferentialIntegrityChecks {
    fn name(&self) -> &str {
        "referential_integrity"
    }

    fn validate(&self, snapshot: &AnalyticsSnapshot, report: &mut ValidationReport) {
        let facts = &snapshot.fact_transaction;
        if facts.is_empty() {
            return;
        }
        let keys: Vec<&Value> = facts
            .iter()
            .filter_map(|r| r.get("property_key"))
            .filter(|v| !v.is_null())
            .collect();
        let valid = keys
            .iter()
            .filter(|v| {
                v.as_u64()
                    .and_then(|k| snapshot.dim_property.by_surrogate_key(k))
                    .is_some()
            })
            .count() as u64;
        report.add_check(
            "REFERENTIAL_INTEGRITY",
            "fact_transaction.property_key -> dim_property",
            valid,
            keys.len() as u64,
            self.threshold,
            "non-null foreign keys must exist in the parent table",
        );
    }
}

/// Domain rules over facts
#[derive(Debug, Clone, Copy, Default)]
pub struct BusinessRuleChecks;

impl Validator for BusinessRuleChecks {
    fn name(&self) -> &str {
        "business_rules"
    }

    fn validate(&self, snapshot: &AnalyticsSnapshot, report: &mut ValidationReport) {
        const CATEGORY: &str = "BUSINESS_LOGIC";
        let facts = &snapshot.fact_transaction;
        if facts.is_empty() {
            return;
        }

        let sales: Vec<&SourceRow> = facts
            .iter()
            .filter(|r| r.get("is_sale").and_then(Value::as_bool).unwrap_or(false))
            .collect();
        if !sales.is_empty() {
            let with_amount = sales
                .iter()
                .filter(|r| {
                    r.get("document_amount")
                        .and_then(|v| parse_decimal(v).ok().flatten())
                        .is_some_and(|a| a > Decimal::ZERO)
                })
                .count() as u64;
            report.add_check(
                CATEGORY,
                "sales have document_amount > 0",
                with_amount,
                sales.len() as u64,
                STRICT,
                "",
            );
        }

        let count = |r: &SourceRow, column: &str| r.get(column).and_then(Value::as_u64).unwrap_or(0);
        let with_parties = facts
            .iter()
            .filter(|r| count(r, "grantor_count") + count(r, "grantee_count") > 0)
            .count() as u64;
        report.add_check(
            CATEGORY,
            "transactions have at least one party",
            with_parties,
            facts.len() as u64,
            95.0,
            "",
        );
    }
}
