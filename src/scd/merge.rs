//! SCD Type 2 merge planning
//!
//! [`plan_merge`] compares a batch against the current versions of a
//! [`DimensionTable`] and returns the inserts, expirations and same-day
//! corrections needed to fold it in. Planning does not mutate the table.

use super::normalize::Normalizer;
use super::table::DimensionTable;
use super::{Attributes, ScdError, SourceRow};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::debug;

/// A tracked (versioned) attribute of a dimension
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedColumn {
    /// Attribute name in the dimension
    pub name: String,
    /// Column read from the source row
    pub source: String,
    /// Canonicalization applied before comparison
    pub normalizer: Normalizer,
}

/// Shape of one SCD Type 2 dimension
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DimensionSpec {
    table: String,
    natural_key: String,
    key_normalizer: Normalizer,
    tracked: Vec<TrackedColumn>,
}

impl DimensionSpec {
    /// Spec for `table` keyed by source column `natural_key`
    pub fn new(table: impl Into<String>, natural_key: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            natural_key: natural_key.into(),
            key_normalizer: Normalizer::Code,
            tracked: Vec::new(),
        }
    }

    /// Override how the natural key is canonicalized (default: code)
    pub fn with_key_normalizer(mut self, normalizer: Normalizer) -> Self {
        self.key_normalizer = normalizer;
        self
    }

    /// Track `name`, read from the source column of the same name
    pub fn track(self, name: &str, normalizer: Normalizer) -> Self {
        self.track_from(name, name, normalizer)
    }

    /// Track `name`, read from source column `source`
    pub fn track_from(mut self, name: &str, source: &str, normalizer: Normalizer) -> Self {
        self.tracked.push(TrackedColumn {
            name: name.to_string(),
            source: source.to_string(),
            normalizer,
        });
        self
    }

    /// Dimension table name
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Natural key source column
    pub fn natural_key(&self) -> &str {
        &self.natural_key
    }

    /// Tracked attributes
    pub fn tracked(&self) -> &[TrackedColumn] {
        &self.tracked
    }

    /// Canonical natural key of `row`
    pub fn natural_key_of(&self, row: &SourceRow) -> Result<String, ScdError> {
        let missing = || ScdError::MissingNaturalKey {
            table: self.table.clone(),
            column: self.natural_key.clone(),
        };
        let raw = row.get(&self.natural_key).ok_or_else(missing)?;
        match self.key_normalizer.apply(raw) {
            Ok(Value::String(key)) if !key.is_empty() => Ok(key),
            Ok(Value::Number(n)) => Ok(n.to_string()),
            Ok(_) => Err(missing()),
            Err(reason) => Err(ScdError::InvalidValue {
                table: self.table.clone(),
                column: self.natural_key.clone(),
                reason,
            }),
        }
    }

    /// Normalized tracked attributes of a source row
    pub fn project(&self, row: &SourceRow) -> Result<Attributes, ScdError> {
        self.normalize_by(|column| row.get(&column.source))
    }

    /// Re-normalize stored attributes so they compare like incoming ones
    pub fn normalize_stored(&self, attributes: &Attributes) -> Result<Attributes, ScdError> {
        self.normalize_by(|column| attributes.get(&column.name))
    }

    fn normalize_by<'a>(
        &self,
        lookup: impl Fn(&TrackedColumn) -> Option<&'a Value>,
    ) -> Result<Attributes, ScdError> {
        let mut out = Attributes::new();
        for column in &self.tracked {
            let value = match lookup(column) {
                Some(v) => column
                    .normalizer
                    .apply(v)
                    .map_err(|reason| ScdError::InvalidValue {
                        table: self.table.clone(),
                        column: column.source.clone(),
                        reason,
                    })?,
                None => Value::Null,
            };
            out.insert(column.name.clone(), value);
        }
        Ok(out)
    }
}

/// One version of a dimension member
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionRow {
    /// Generated key, unique across the table
    pub surrogate_key: u64,
    /// Real-world identifier
    pub natural_key: String,
    /// Normalized tracked attributes
    pub attributes: Attributes,
    /// First day this version is in effect
    pub valid_from: NaiveDate,
    /// First day this version is no longer in effect; `None` while open
    pub valid_to: Option<NaiveDate>,
    /// Whether this is the live version
    pub is_current: bool,
}

impl DimensionRow {
    /// Open current version starting at `valid_from`
    pub fn open(
        surrogate_key: u64,
        natural_key: impl Into<String>,
        attributes: Attributes,
        valid_from: NaiveDate,
    ) -> Self {
        Self {
            surrogate_key,
            natural_key: natural_key.into(),
            attributes,
            valid_from,
            valid_to: None,
            is_current: true,
        }
    }

    /// Whether this version is in effect on `date`
    pub fn covers(&self, date: NaiveDate) -> bool {
        date >= self.valid_from && self.valid_to.map_or(true, |end| date < end)
    }
}

/// A single change to a dimension table
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum MergeAction {
    /// Add a new current version
    Insert(DimensionRow),
    /// Close the current version
    Expire {
        /// Version to close
        surrogate_key: u64,
        /// Member key
        natural_key: String,
        /// Closing date (exclusive)
        valid_to: NaiveDate,
    },
    /// Replace attributes of a version that began on the batch date
    Correct {
        /// Version to correct
        surrogate_key: u64,
        /// Member key
        natural_key: String,
        /// Replacement attributes
        attributes: Attributes,
    },
}

/// Changes needed to fold one batch into a dimension
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MergePlan {
    /// Changes in application order
    pub actions: Vec<MergeAction>,
    /// Members whose attributes already matched
    pub unchanged: u64,
}

impl MergePlan {
    /// Number of inserted versions
    pub fn inserted(&self) -> u64 {
        self.count(|a| matches!(a, MergeAction::Insert(_)))
    }

    /// Number of expired versions
    pub fn expired(&self) -> u64 {
        self.count(|a| matches!(a, MergeAction::Expire { .. }))
    }

    /// Number of in-place corrections
    pub fn corrected(&self) -> u64 {
        self.count(|a| matches!(a, MergeAction::Correct { .. }))
    }

    /// Whether the batch changes nothing
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    fn count(&self, predicate: impl Fn(&MergeAction) -> bool) -> u64 {
        self.actions.iter().filter(|a| predicate(a)).count() as u64
    }
}

/// Plan how `batch`, effective on `effective`, changes `table`
///
/// Duplicate natural keys in the batch resolve to the last row. Keys absent
/// from the batch are left untouched.
pub fn plan_merge(
    spec: &DimensionSpec,
    table: &DimensionTable,
    batch: &[SourceRow],
    effective: NaiveDate,
) -> Result<MergePlan, ScdError> {
    let mut incoming: BTreeMap<String, Attributes> = BTreeMap::new();
    for row in batch {
        let key = spec.natural_key_of(row)?;
        let attributes = spec.project(row)?;
        incoming.insert(key, attributes);
    }

    let mut plan = MergePlan::default();
    let mut next_key = table.next_surrogate_key();

    for (key, attributes) in incoming {
        let Some(current) = table.current(&key) else {
            plan.actions
                .push(MergeAction::Insert(DimensionRow::open(next_key, key, attributes, effective)));
            next_key += 1;
            continue;
        };

        if spec.normalize_stored(&current.attributes)? == attributes {
            plan.unchanged += 1;
            continue;
        }

        if effective < current.valid_from {
            // a replayed earlier batch is fine as long as it matches history
            let matches_history = match table.version_on(&key, effective) {
                Some(version) => spec.normalize_stored(&version.attributes)? == attributes,
                None => false,
            };
            if matches_history {
                plan.unchanged += 1;
                continue;
            }
            return Err(ScdError::StaleBatch {
                table: spec.table().to_string(),
                natural_key: key,
                effective,
                current_from: current.valid_from,
            });
        }

        if effective == current.valid_from {
            plan.actions.push(MergeAction::Correct {
                surrogate_key: current.surrogate_key,
                natural_key: key,
                attributes,
            });
            continue;
        }

        plan.actions.push(MergeAction::Expire {
            surrogate_key: current.surrogate_key,
            natural_key: key.clone(),
            valid_to: effective,
        });
        plan.actions
            .push(MergeAction::Insert(DimensionRow::open(next_key, key, attributes, effective)));
        next_key += 1;
    }

    debug!(
        table = %spec.table(),
        inserted = plan.inserted(),
        expired = plan.expired(),
        corrected = plan.corrected(),
        unchanged = plan.unchanged,
        "Merge planned"
    );
    Ok(plan)
}
