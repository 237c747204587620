//! Durable checkpoint storage
//!
//! [`FileCheckpointStore`] keeps every record in memory and writes the whole
//! document through to disk on each mutation.

use super::{CheckpointError, CheckpointRecord};
use crate::persist::{self, PersistError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Current checkpoint file schema version
const SCHEMA_VERSION: &str = "1.0.0";

/// Key-value store of period checkpoints
///
/// Implementations must make `put` and `reset` durable before returning.
pub trait CheckpointStore: Send {
    /// Record for `period_key`, if any
    fn get(&self, period_key: &str) -> Option<CheckpointRecord>;

    /// Insert or overwrite a record
    fn put(&mut self, record: CheckpointRecord) -> Result<(), CheckpointError>;

    /// Remove a record; returns whether one existed
    fn reset(&mut self, period_key: &str) -> Result<bool, CheckpointError>;

    /// Every record, ordered by period key
    fn all(&self) -> Vec<CheckpointRecord>;
}

#[derive(Debug, Serialize, Deserialize)]
struct CheckpointFile {
    schema_version: String,
    updated_at: DateTime<Utc>,
    records: Vec<CheckpointRecord>,
}

/// JSON-file checkpoint store
#[derive(Debug)]
pub struct FileCheckpointStore {
    path: PathBuf,
    records: BTreeMap<String, CheckpointRecord>,
}

impl FileCheckpointStore {
    /// Open the store at `path`, loading existing records
    ///
    /// A missing file is an empty store; nothing is written until the first
    /// mutation.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, CheckpointError> {
        let path = path.into();
        let records = if path.exists() {
            Self::load(&path)?
        } else {
            debug!(path = %path.display(), "No checkpoint file, starting empty");
            BTreeMap::new()
        };

        Ok(Self { path, records })
    }

    /// Backing file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(path: &Path) -> Result<BTreeMap<String, CheckpointRecord>, CheckpointError> {
        let contents = persist::read_locked(path)?;
        let file: CheckpointFile = serde_json::from_str(&contents).map_err(|e| {
            warn!(path = %path.display(), error = %e, "Failed to deserialize checkpoint file");
            CheckpointError::Deserialization(e.to_string())
        })?;

        if file.schema_version != SCHEMA_VERSION {
            warn!(
                found_version = %file.schema_version,
                expected_version = SCHEMA_VERSION,
                "Checkpoint schema version mismatch"
            );
            return Err(CheckpointError::SchemaVersionMismatch {
                expected: SCHEMA_VERSION.to_string(),
                found: file.schema_version,
            });
        }

        let mut records = BTreeMap::new();
        for record in file.records {
            let key = record.period_key().to_string();
            if records.insert(key.clone(), record).is_some() {
                return Err(CheckpointError::Deserialization(format!(
                    "duplicate record for period {key}"
                )));
            }
        }

        info!(
            path = %path.display(),
            records = records.len(),
            "Checkpoint file loaded"
        );
        Ok(records)
    }

    fn flush(&self) -> Result<(), CheckpointError> {
        let file = CheckpointFile {
            schema_version: SCHEMA_VERSION.to_string(),
            updated_at: Utc::now(),
            records: self.records.values().cloned().collect(),
        };
        let json = serde_json::to_vec_pretty(&file)
            .map_err(|e| CheckpointError::Serialization(e.to_string()))?;
        persist::write_atomic(&self.path, &json).map_err(CheckpointError::from)
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn get(&self, period_key: &str) -> Option<CheckpointRecord> {
        self.records.get(period_key).cloned()
    }

    fn put(&mut self, record: CheckpointRecord) -> Result<(), CheckpointError> {
        let key = record.period_key().to_string();
        let status = record.status();
        let previous = self.records.insert(key.clone(), record);

        if let Err(e) = self.flush() {
            // keep memory in step with what is on disk
            match previous {
                Some(previous) => self.records.insert(key, previous),
                None => self.records.remove(&key),
            };
            return Err(e);
        }

        debug!(period = %key, status = %status, "Checkpoint written");
        Ok(())
    }

    fn reset(&mut self, period_key: &str) -> Result<bool, CheckpointError> {
        let Some(previous) = self.records.remove(period_key) else {
            return Ok(false);
        };

        if let Err(e) = self.flush() {
            self.records.insert(period_key.to_string(), previous);
            return Err(e);
        }

        info!(period = %period_key, "Checkpoint reset");
        Ok(true)
    }

    fn all(&self) -> Vec<CheckpointRecord> {
        self.records.values().cloned().collect()
    }
}

impl From<PersistError> for CheckpointError {
    fn from(e: PersistError) -> Self {
        CheckpointError::Persistence(e.to_string())
    }
}
