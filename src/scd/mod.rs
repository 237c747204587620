//! Slowly-changing dimension (Type 2) merge engine
//!
//! Folds batches of source rows into versioned dimension tables. For each
//! natural key the versions ordered by `valid_from` partition time with no
//! gaps or overlaps, and at most one version is current. Re-applying a batch
//! changes nothing.
//!
//! Members that stop appearing in batches keep their current version open;
//! deletions are not modeled.
//!
//! ```rust
//! use property_etl::scd::{DimensionSpec, DimensionTable, Normalizer, SourceRow};
//! use chrono::NaiveDate;
//! use serde_json::json;
//!
//! let spec = DimensionSpec::new("dim_property", "tax_assessor_id")
//!     .track("zip", Normalizer::Code);
//! let mut table = DimensionTable::new("dim_property");
//!
//! let mut row = SourceRow::new();
//! row.insert("tax_assessor_id".into(), json!("A123"));
//! row.insert("zip".into(), json!("94105.0"));
//!
//! let jan = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
//! let stats = table.merge(&spec, &[row.clone()], jan).unwrap();
//! assert_eq!(stats.inserted, 1);
//!
//! // identical batch: no new version
//! let stats = table.merge(&spec, &[row], jan).unwrap();
//! assert_eq!(stats.changed(), 0);
//! assert_eq!(table.current("A123").unwrap().attributes["zip"], json!("94105"));
//! ```

pub mod merge;
pub mod normalize;
pub mod table;

pub use merge::{plan_merge, DimensionRow, DimensionSpec, MergeAction, MergePlan, TrackedColumn};
pub use normalize::Normalizer;
pub use table::{DimensionTable, MergeStats};

use crate::stage::StageError;
use chrono::NaiveDate;
use std::collections::BTreeMap;

/// One incoming record: column name to scalar value
pub type SourceRow = BTreeMap<String, serde_json::Value>;

/// Normalized tracked attributes of a dimension version
pub type Attributes = BTreeMap<String, serde_json::Value>;

/// SCD merge errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ScdError {
    /// Source row has no usable natural key
    #[error("{table}: row is missing natural key column '{column}'")]
    MissingNaturalKey {
        /// Dimension table
        table: String,
        /// Key column
        column: String,
    },

    /// Tracked value could not be normalized
    #[error("{table}: invalid value in column '{column}': {reason}")]
    InvalidValue {
        /// Dimension table
        table: String,
        /// Source column
        column: String,
        /// Why normalization failed
        reason: String,
    },

    /// Batch would rewrite history before the current version
    #[error("{table}: batch effective {effective} for '{natural_key}' predates current version from {current_from}")]
    StaleBatch {
        /// Dimension table
        table: String,
        /// Member key
        natural_key: String,
        /// Batch effective date
        effective: NaiveDate,
        /// Start of the current version
        current_from: NaiveDate,
    },

    /// Two current versions for one member
    #[error("{table}: more than one current version for '{natural_key}'")]
    DuplicateCurrent {
        /// Dimension table
        table: String,
        /// Member key
        natural_key: String,
    },

    /// Two versions share a surrogate key
    #[error("{table}: duplicate surrogate key {surrogate_key}")]
    DuplicateSurrogateKey {
        /// Dimension table
        table: String,
        /// Surrogate key
        surrogate_key: u64,
    },

    /// Plan refers to a version that is not current
    #[error("{table}: no current version with surrogate key {surrogate_key}")]
    UnknownRow {
        /// Dimension table
        table: String,
        /// Surrogate key
        surrogate_key: u64,
    },

    /// Versions do not partition time
    #[error("{table}: broken history for '{natural_key}': {reason}")]
    HistoryViolation {
        /// Dimension table
        table: String,
        /// Member key
        natural_key: String,
        /// What is wrong
        reason: String,
    },
}

impl From<ScdError> for StageError {
    fn from(e: ScdError) -> Self {
        StageError::Validation(e.to_string())
    }
}
