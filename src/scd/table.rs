//! In-memory SCD Type 2 dimension table

use super::merge::{plan_merge, DimensionRow, DimensionSpec, MergeAction, MergePlan};
use super::ScdError;
use super::SourceRow;
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

/// Counts from applying one merge plan
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MergeStats {
    /// Versions inserted
    pub inserted: u64,
    /// Versions closed
    pub expired: u64,
    /// Versions corrected in place
    pub corrected: u64,
    /// Members already up to date
    pub unchanged: u64,
}

impl MergeStats {
    /// Rows written or changed
    pub fn changed(&self) -> u64 {
        self.inserted + self.expired + self.corrected
    }
}

/// Every version of every member of one dimension
#[derive(Debug, Clone, Default)]
pub struct DimensionTable {
    name: String,
    rows: Vec<DimensionRow>,
    current: HashMap<String, usize>,
    by_surrogate: HashMap<u64, usize>,
}

impl DimensionTable {
    /// Empty table
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Rebuild a table from stored rows, rejecting duplicate keys
    pub fn from_rows(name: impl Into<String>, rows: Vec<DimensionRow>) -> Result<Self, ScdError> {
        let mut table = Self::new(name);
        for row in rows {
            table.push(row)?;
        }
        Ok(table)
    }

    /// Rebuild a table without rejecting duplicate keys
    ///
    /// The first occurrence of a key wins its index. Meant for inspecting
    /// stored tables that may be damaged; [`Self::history_violations`] and a
    /// scan of [`Self::rows`] report what [`Self::from_rows`] would reject.
    pub fn from_rows_unchecked(name: impl Into<String>, rows: Vec<DimensionRow>) -> Self {
        let mut table = Self::new(name);
        for (index, row) in rows.iter().enumerate() {
            table.by_surrogate.entry(row.surrogate_key).or_insert(index);
            if row.is_current {
                table.current.entry(row.natural_key.clone()).or_insert(index);
            }
        }
        table.rows = rows;
        table
    }

    fn push(&mut self, row: DimensionRow) -> Result<(), ScdError> {
        let index = self.rows.len();
        if self.by_surrogate.insert(row.surrogate_key, index).is_some() {
            return Err(ScdError::DuplicateSurrogateKey {
                table: self.name.clone(),
                surrogate_key: row.surrogate_key,
            });
        }
        if row.is_current && self.current.insert(row.natural_key.clone(), index).is_some() {
            return Err(ScdError::DuplicateCurrent {
                table: self.name.clone(),
                natural_key: row.natural_key,
            });
        }
        self.rows.push(row);
        Ok(())
    }

    /// Table name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Every version, in insertion order
    pub fn rows(&self) -> &[DimensionRow] {
        &self.rows
    }

    /// Number of versions
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the table has no versions
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Current version of `natural_key`
    pub fn current(&self, natural_key: &str) -> Option<&DimensionRow> {
        self.current.get(natural_key).map(|&i| &self.rows[i])
    }

    /// Every current version
    pub fn current_rows(&self) -> impl Iterator<Item = &DimensionRow> {
        self.rows.iter().filter(|r| r.is_current)
    }

    /// Version with `surrogate_key`
    pub fn by_surrogate_key(&self, surrogate_key: u64) -> Option<&DimensionRow> {
        self.by_surrogate.get(&surrogate_key).map(|&i| &self.rows[i])
    }

    /// Versions of `natural_key` ordered by `valid_from`
    pub fn history(&self, natural_key: &str) -> Vec<&DimensionRow> {
        let mut versions: Vec<&DimensionRow> = self
            .rows
            .iter()
            .filter(|r| r.natural_key == natural_key)
            .collect();
        versions.sort_by_key(|r| r.valid_from);
        versions
    }

    /// Version of `natural_key` in effect on `date`
    pub fn version_on(&self, natural_key: &str, date: NaiveDate) -> Option<&DimensionRow> {
        self.rows
            .iter()
            .find(|r| r.natural_key == natural_key && r.covers(date))
    }

    /// Next unused surrogate key
    pub fn next_surrogate_key(&self) -> u64 {
        self.by_surrogate.keys().max().map_or(1, |max| max + 1)
    }

    /// Plan and apply `batch` effective on `effective`
    pub fn merge(
        &mut self,
        spec: &DimensionSpec,
        batch: &[SourceRow],
        effective: NaiveDate,
    ) -> Result<MergeStats, ScdError> {
        let plan = plan_merge(spec, self, batch, effective)?;
        self.apply(plan)
    }

    /// Apply a plan produced against this table's current state
    pub fn apply(&mut self, plan: MergePlan) -> Result<MergeStats, ScdError> {
        let mut stats = MergeStats {
            unchanged: plan.unchanged,
            ..MergeStats::default()
        };

        for action in plan.actions {
            match action {
                MergeAction::Expire {
                    surrogate_key,
                    natural_key,
                    valid_to,
                } => {
                    let index = self.current_index(&natural_key, surrogate_key)?;
                    let row = &mut self.rows[index];
                    if valid_to <= row.valid_from {
                        return Err(ScdError::HistoryViolation {
                            table: self.name.clone(),
                            natural_key,
                            reason: format!(
                                "cannot close version starting {} at {}",
                                row.valid_from, valid_to
                            ),
                        });
                    }
                    row.valid_to = Some(valid_to);
                    row.is_current = false;
                    self.current.remove(&natural_key);
                    stats.expired += 1;
                }
                MergeAction::Correct {
                    surrogate_key,
                    natural_key,
                    attributes,
                } => {
                    let index = self.current_index(&natural_key, surrogate_key)?;
                    self.rows[index].attributes = attributes;
                    stats.corrected += 1;
                }
                MergeAction::Insert(row) => {
                    self.push(row)?;
                    stats.inserted += 1;
                }
            }
        }

        Ok(stats)
    }

    fn current_index(&self, natural_key: &str, surrogate_key: u64) -> Result<usize, ScdError> {
        match self.current.get(natural_key) {
            Some(&i) if self.rows[i].surrogate_key == surrogate_key => Ok(i),
            _ => Err(ScdError::UnknownRow {
                table: self.name.clone(),
                surrogate_key,
            }),
        }
    }

    /// Members grouped with their versions ordered by `valid_from`
    fn grouped(&self) -> BTreeMap<&str, Vec<&DimensionRow>> {
        let mut groups: BTreeMap<&str, Vec<&DimensionRow>> = BTreeMap::new();
        for row in &self.rows {
            groups.entry(row.natural_key.as_str()).or_default().push(row);
        }
        for versions in groups.values_mut() {
            versions.sort_by_key(|r| r.valid_from);
        }
        groups
    }

    /// Number of distinct members
    pub fn member_count(&self) -> usize {
        self.grouped().len()
    }

    /// Check that every member's versions partition time
    pub fn verify_history(&self) -> Result<(), ScdError> {
        for (key, versions) in self.grouped() {
            self.check_versions(key, &versions)?;
        }
        Ok(())
    }

    /// Members whose history is broken, with the reason
    pub fn history_violations(&self) -> Vec<ScdError> {
        self.grouped()
            .into_iter()
            .filter_map(|(key, versions)| self.check_versions(key, &versions).err())
            .collect()
    }

    fn check_versions(&self, key: &str, versions: &[&DimensionRow]) -> Result<(), ScdError> {
        let violation = |reason: String| ScdError::HistoryViolation {
            table: self.name.clone(),
            natural_key: key.to_string(),
            reason,
        };

        let current = versions.iter().filter(|r| r.is_current).count();
        if current > 1 {
            return Err(violation(format!("{current} current versions")));
        }

        for pair in versions.windows(2) {
            let (earlier, later) = (pair[0], pair[1]);
            match earlier.valid_to {
                Some(end) if end == later.valid_from => {}
                Some(end) => {
                    return Err(violation(format!(
                        "version {} ends {} but next starts {}",
                        earlier.surrogate_key, end, later.valid_from
                    )))
                }
                None => {
                    return Err(violation(format!(
                        "version {} is open but is followed by {}",
                        earlier.surrogate_key, later.surrogate_key
                    )))
                }
            }
            if earlier.is_current {
                return Err(violation(format!(
                    "superseded version {} is still current",
                    earlier.surrogate_key
                )));
            }
        }

        for row in versions {
            if let Some(end) = row.valid_to {
                if end <= row.valid_from {
                    return Err(violation(format!(
                        "version {} has empty interval [{}, {})",
                        row.surrogate_key, row.valid_from, end
                    )));
                }
            }
            if row.is_current && row.valid_to.is_some() {
                return Err(violation(format!(
                    "current version {} is closed",
                    row.surrogate_key
                )));
            }
            if !row.is_current && row.valid_to.is_none() {
                return Err(violation(format!(
                    "version {} is open but not current",
                    row.surrogate_key
                )));
            }
        }

        Ok(())
    }
}
