//! Local warehouse: append-only raw layer plus analytics tables
//!
//! Layout under the data directory:
//!
//! ```text
//! raw/<table>.jsonl          one RawRecord per line, append-only
//! analytics/<table>.json     dimension or fact document, replaced atomically
//! ```

use crate::persist::{self, PersistError};
use crate::planner::Period;
use crate::scd::{DimensionRow, DimensionTable, ScdError, SourceRow};
use crate::stage::StageError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Metadata column added to rows handed to transforms
pub const EXTRACTED_AT_COLUMN: &str = "_extracted_at";

/// Warehouse errors
#[derive(Debug, thiserror::Error)]
pub enum WarehouseError {
    /// Filesystem error
    #[error("IO error on {path}: {message}")]
    Io {
        /// File involved
        path: PathBuf,
        /// Failure description
        message: String,
    },

    /// Atomic write or locked read failed
    #[error(transparent)]
    Persist(#[from] PersistError),

    /// A stored line or document is unreadable
    #[error("corrupt {path} at line {line}: {message}")]
    Corrupt {
        /// File involved
        path: PathBuf,
        /// 1-based line number (0 for whole documents)
        line: usize,
        /// Parse failure
        message: String,
    },

    /// Serialization failure
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Table name outside `[a-z0-9_]`
    #[error("invalid table name '{0}'")]
    InvalidTable(String),

    /// Stored dimension violates SCD invariants
    #[error(transparent)]
    Dimension(#[from] ScdError),
}

impl From<WarehouseError> for StageError {
    fn from(e: WarehouseError) -> Self {
        match e {
            WarehouseError::Io { .. } | WarehouseError::Persist(_) => {
                StageError::Unavailable(e.to_string())
            }
            WarehouseError::Corrupt { .. }
            | WarehouseError::Serialization(_)
            | WarehouseError::InvalidTable(_) => StageError::Schema(e.to_string()),
            WarehouseError::Dimension(scd) => scd.into(),
        }
    }
}

/// One landed raw row with its lineage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    /// Period the row was extracted for
    pub period: String,
    /// When it was landed
    pub extracted_at: DateTime<Utc>,
    /// Extractor that produced it
    pub source: String,
    /// The row itself
    pub row: SourceRow,
}

#[derive(Debug, Serialize, Deserialize)]
struct DimensionDocument {
    table: String,
    updated_at: DateTime<Utc>,
    rows: Vec<DimensionRow>,
}

#[derive(Debug, Serialize, Deserialize)]
struct FactDocument {
    table: String,
    updated_at: DateTime<Utc>,
    rows: Vec<SourceRow>,
}

/// Handle on a warehouse directory
#[derive(Debug, Clone)]
pub struct Warehouse {
    root: PathBuf,
}

impl Warehouse {
    /// Open (creating directories as needed) the warehouse at `root`
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, WarehouseError> {
        let root = root.into();
        for dir in [root.join("raw"), root.join("analytics")] {
            std::fs::create_dir_all(&dir).map_err(|e| WarehouseError::Io {
                path: dir.clone(),
                message: e.to_string(),
            })?;
        }
        Ok(Self { root })
    }

    /// Root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn checked(table: &str) -> Result<&str, WarehouseError> {
        let valid = !table.is_empty()
            && table
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
        if valid {
            Ok(table)
        } else {
            Err(WarehouseError::InvalidTable(table.to_string()))
        }
    }

    /// Path of a raw table
    pub fn raw_path(&self, table: &str) -> Result<PathBuf, WarehouseError> {
        Ok(self.root.join("raw").join(format!("{}.jsonl", Self::checked(table)?)))
    }

    /// Path of an analytics table
    pub fn analytics_path(&self, table: &str) -> Result<PathBuf, WarehouseError> {
        Ok(self
            .root
            .join("analytics")
            .join(format!("{}.json", Self::checked(table)?)))
    }

    /// Append `rows` to raw table `table`, durably
    ///
    /// The batch is serialized up front and appended in one locked write, so
    /// a reader never sees half of it and concurrent landings stay line-aligned.
    pub fn land(
        &self,
        table: &str,
        period: &Period,
        source: &str,
        rows: &[SourceRow],
    ) -> Result<u64, WarehouseError> {
        let path = self.raw_path(table)?;
        if rows.is_empty() {
            return Ok(0);
        }

        let extracted_at = Utc::now();
        let period_key = period.key();
        let mut buffer = Vec::new();
        for row in rows {
            let record = RawRecord {
                period: period_key.clone(),
                extracted_at,
                source: source.to_string(),
                row: row.clone(),
            };
            serde_json::to_writer(&mut buffer, &record)
                .map_err(|e| WarehouseError::Serialization(e.to_string()))?;
            buffer.push(b'\n');
        }
        persist::append_locked(&path, &buffer)?;

        debug!(table = %table, period = %period_key, rows = rows.len(), "Landed raw rows");
        Ok(rows.len() as u64)
    }

    /// Raw records of `table`, optionally only those landed for `period_key`
    pub fn read_raw(
        &self,
        table: &str,
        period_key: Option<&str>,
    ) -> Result<Vec<RawRecord>, WarehouseError> {
        let path = self.raw_path(table)?;
        let Some(contents) = persist::read_appended(&path)? else {
            return Ok(Vec::new());
        };

        let mut records = Vec::new();
        for (index, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let record: RawRecord =
                serde_json::from_str(line).map_err(|e| WarehouseError::Corrupt {
                    path: path.clone(),
                    line: index + 1,
                    message: e.to_string(),
                })?;
            if period_key.map_or(true, |key| record.period == key) {
                records.push(record);
            }
        }
        Ok(records)
    }

    /// Latest raw row per `key_column` for a period, with `_extracted_at`
    ///
    /// Rows without the key column are returned as-is so the caller can
    /// reject them with a proper error.
    pub fn latest_rows(
        &self,
        table: &str,
        period_key: &str,
        key_column: &str,
    ) -> Result<Vec<SourceRow>, WarehouseError> {
        let mut latest: Vec<(Option<String>, DateTime<Utc>, SourceRow)> = Vec::new();
        let mut positions: std::collections::HashMap<String, usize> = Default::default();

        for record in self.read_raw(table, Some(period_key))? {
            let key = record.row.get(key_column).and_then(|v| match v {
                serde_json::Value::Null => None,
                serde_json::Value::String(s) => Some(s.trim().to_string()),
                other => Some(other.to_string()),
            });
            let mut row = record.row;
            row.insert(
                EXTRACTED_AT_COLUMN.to_string(),
                serde_json::Value::String(record.extracted_at.to_rfc3339()),
            );

            match key.as_ref().and_then(|k| positions.get(k)) {
                Some(&i) => {
                    if record.extracted_at >= latest[i].1 {
                        latest[i] = (key, record.extracted_at, row);
                    }
                }
                None => {
                    if let Some(k) = &key {
                        positions.insert(k.clone(), latest.len());
                    }
                    latest.push((key, record.extracted_at, row));
                }
            }
        }

        Ok(latest.into_iter().map(|(_, _, row)| row).collect())
    }

    /// Load dimension `table`; empty if never written
    pub fn load_dimension(&self, table: &str) -> Result<DimensionTable, WarehouseError> {
        let path = self.analytics_path(table)?;
        if !path.exists() {
            return Ok(DimensionTable::new(table));
        }
        let document = self.read_dimension_document(&path)?;
        Ok(DimensionTable::from_rows(table, document.rows)?)
    }

    /// Load dimension `table` without enforcing key uniqueness
    pub fn inspect_dimension(&self, table: &str) -> Result<DimensionTable, WarehouseError> {
        let path = self.analytics_path(table)?;
        if !path.exists() {
            return Ok(DimensionTable::new(table));
        }
        let document = self.read_dimension_document(&path)?;
        Ok(DimensionTable::from_rows_unchecked(table, document.rows))
    }

    fn read_dimension_document(&self, path: &Path) -> Result<DimensionDocument, WarehouseError> {
        let contents = persist::read_locked(path)?;
        serde_json::from_str(&contents).map_err(|e| WarehouseError::Corrupt {
            path: path.to_path_buf(),
            line: e.line(),
            message: e.to_string(),
        })
    }

    /// Replace dimension document for `dimension`
    pub fn save_dimension(&self, dimension: &DimensionTable) -> Result<(), WarehouseError> {
        let path = self.analytics_path(dimension.name())?;
        let document = DimensionDocument {
            table: dimension.name().to_string(),
            updated_at: Utc::now(),
            rows: dimension.rows().to_vec(),
        };
        let json = serde_json::to_vec_pretty(&document)
            .map_err(|e| WarehouseError::Serialization(e.to_string()))?;
        persist::write_atomic(&path, &json)?;
        info!(table = %dimension.name(), rows = dimension.len(), "Dimension saved");
        Ok(())
    }

    /// Load fact table rows; empty if never written
    pub fn load_facts(&self, table: &str) -> Result<Vec<SourceRow>, WarehouseError> {
        let path = self.analytics_path(table)?;
        if !path.exists() {
            return Ok(Vec::new());
        }
        let contents = persist::read_locked(&path)?;
        let document: FactDocument =
            serde_json::from_str(&contents).map_err(|e| WarehouseError::Corrupt {
                path: path.clone(),
                line: e.line(),
                message: e.to_string(),
            })?;
        Ok(document.rows)
    }

    /// Replace fact table `table` with `rows`
    pub fn save_facts(&self, table: &str, rows: &[SourceRow]) -> Result<(), WarehouseError> {
        let path = self.analytics_path(table)?;
        let document = FactDocument {
            table: table.to_string(),
            updated_at: Utc::now(),
            rows: rows.to_vec(),
        };
        let json = serde_json::to_vec_pretty(&document)
            .map_err(|e| WarehouseError::Serialization(e.to_string()))?;
        persist::write_atomic(&path, &json)?;
        info!(table = %table, rows = rows.len(), "Fact table saved");
        Ok(())
    }
}
