//! Extractors that land raw source tables into the warehouse
//!
//! Two sources are available: per-period CSV drops on disk
//! ([`FlatFileExtractor`]) and a paginated GraphQL endpoint
//! ([`GraphqlExtractor`]). Both land the same four raw tables.

pub mod flat_file;
pub mod graphql;

pub use flat_file::FlatFileExtractor;
pub use graphql::{GraphqlConfig, GraphqlExtractor};

use crate::planner::Period;
use crate::scd::SourceRow;
use crate::stage::StageError;
use chrono::NaiveDate;
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;

/// Raw table definition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawTable {
    /// Table name (file stem in drops and in the warehouse)
    pub name: &'static str,
    /// Column identifying a row; duplicates keep the last occurrence
    pub identity: &'static str,
    /// Date column restricting rows to the period window, if any
    pub date_column: Option<&'static str>,
}

/// Raw tables landed by every extractor, in extraction order
pub const RAW_TABLES: [RawTable; 4] = [
    RawTable {
        name: "properties",
        identity: "tax_assessor_id",
        date_column: None,
    },
    RawTable {
        name: "transactions",
        identity: "recorder_id",
        date_column: Some("recorded_date"),
    },
    RawTable {
        name: "grantors",
        identity: "grantor_id",
        date_column: None,
    },
    RawTable {
        name: "grantees",
        identity: "grantee_id",
        date_column: None,
    },
];

/// Look up a raw table by name
pub fn raw_table(name: &str) -> Option<&'static RawTable> {
    RAW_TABLES.iter().find(|t| t.name == name)
}

/// Errors raised while constructing an extractor
#[derive(Debug, thiserror::Error)]
pub enum ExtractSetupError {
    /// HTTP client could not be built
    #[error("failed to build HTTP client: {0}")]
    Http(#[from] reqwest::Error),

    /// Query document unreadable
    #[error("failed to read query {path}: {message}")]
    Query {
        /// Query file
        path: PathBuf,
        /// Read failure
        message: String,
    },

    /// No query document found for any raw table
    #[error("no <table>.graphql query documents found in {0}")]
    NoQueries(PathBuf),

    /// Missing or invalid setting
    #[error("invalid extractor configuration: {0}")]
    Config(String),
}

/// Identity value of `row` as a string key
pub(crate) fn identity_of(table: &RawTable, row: &SourceRow) -> Option<String> {
    match row.get(table.identity)? {
        Value::Null => None,
        Value::String(s) if s.trim().is_empty() => None,
        Value::String(s) => Some(s.trim().to_string()),
        other => Some(other.to_string()),
    }
}

/// Parse a date cell; accepts `YYYY-MM-DD` with an optional time suffix
pub(crate) fn parse_date(value: &Value) -> Option<NaiveDate> {
    let s = value.as_str()?.trim();
    let day = s.get(..10)?;
    NaiveDate::parse_from_str(day, "%Y-%m-%d").ok()
}

/// Keep rows inside the period window and collapse duplicate identities
///
/// Duplicates keep the position of their first occurrence and the values of
/// their last. Rows with a null date are dropped; an unparseable date or a
/// missing identity is a validation error.
pub(crate) fn prepare_rows(
    table: &RawTable,
    period: &Period,
    rows: Vec<SourceRow>,
) -> Result<Vec<SourceRow>, StageError> {
    let mut kept: Vec<SourceRow> = Vec::with_capacity(rows.len());
    let mut positions: HashMap<String, usize> = HashMap::new();

    for (index, row) in rows.into_iter().enumerate() {
        if let Some(column) = table.date_column {
            match row.get(column) {
                None | Some(Value::Null) => continue,
                Some(value) => {
                    let date = parse_date(value).ok_or_else(|| {
                        StageError::Validation(format!(
                            "{}: row {} has invalid {} {}",
                            table.name,
                            index + 1,
                            column,
                            value
                        ))
                    })?;
                    if !period.contains(date) {
                        continue;
                    }
                }
            }
        }

        let identity = identity_of(table, &row).ok_or_else(|| {
            StageError::Validation(format!(
                "{}: row {} is missing identity column '{}'",
                table.name,
                index + 1,
                table.identity
            ))
        })?;

        match positions.get(&identity) {
            Some(&i) => kept[i] = row,
            None => {
                positions.insert(identity, kept.len());
                kept.push(row);
            }
        }
    }

    Ok(kept)
}
