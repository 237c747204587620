//! Pipeline stages and the collaborator contracts that run them
//!
//! Extractors land raw rows for a period; transformers fold those rows into
//! the analytics tables. Both report failures as [`StageError`], whose
//! [`ErrorClass`] decides whether the executor retries.

use crate::planner::Period;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// A retryable unit of work within one period
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Pull raw records from the upstream source
    Extract,
    /// Build dimensions and facts from raw records
    Transform,
}

impl Stage {
    /// Stage name as recorded in checkpoints
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Extract => "extract",
            Stage::Transform => "transform",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Retry classification of a stage failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Timeouts, rate limits, temporary unavailability
    Transient,
    /// Malformed records, missing fields, schema drift
    Validation,
}

impl ErrorClass {
    /// Class name as shown in summaries
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::Transient => "transient",
            ErrorClass::Validation => "validation",
        }
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure raised by an extractor or transformer
#[derive(Debug, Clone, thiserror::Error)]
pub enum StageError {
    /// Call did not finish within the stage timeout
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// Upstream asked us to slow down
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// Upstream or local storage temporarily unavailable
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// Connection-level failure
    #[error("network error: {0}")]
    Network(String),

    /// Record failed validation
    #[error("validation error: {0}")]
    Validation(String),

    /// Response or file did not have the expected shape
    #[error("schema error: {0}")]
    Schema(String),
}

impl StageError {
    /// Retry classification
    pub fn class(&self) -> ErrorClass {
        match self {
            StageError::Timeout(_)
            | StageError::RateLimited(_)
            | StageError::Unavailable(_)
            | StageError::Network(_) => ErrorClass::Transient,
            StageError::Validation(_) | StageError::Schema(_) => ErrorClass::Validation,
        }
    }

    /// Whether the executor may retry after this error
    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Transient
    }
}

/// Outcome of a successful extract call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractResult {
    /// Rows landed per raw table
    pub tables: BTreeMap<String, u64>,
}

impl ExtractResult {
    /// Total rows landed across tables
    pub fn row_count(&self) -> u64 {
        self.tables.values().sum()
    }
}

/// Outcome of a successful transform call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformResult {
    /// Rows written or changed per analytics table
    pub tables_updated: BTreeMap<String, u64>,
}

impl TransformResult {
    /// Total rows changed across tables
    pub fn row_count(&self) -> u64 {
        self.tables_updated.values().sum()
    }
}

/// Pulls raw records for a period and lands them append-only
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Source name used in logs and raw-record lineage
    fn name(&self) -> &str;

    /// Extract and land every raw table for `period`
    async fn extract(&self, period: &Period) -> Result<ExtractResult, StageError>;
}

/// Folds landed raw records for a period into the analytics tables
#[async_trait]
pub trait Transformer: Send + Sync {
    /// Build dimensions and facts for `period`
    async fn transform(&self, period: &Period) -> Result<TransformResult, StageError>;
}
