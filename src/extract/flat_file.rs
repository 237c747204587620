//! Extractor over per-period CSV drops
//!
//! Layout: `<drop_dir>/<YYYY-MM>/<table>.csv` with a header row.

use super::{prepare_rows, RAW_TABLES};
use crate::planner::Period;
use crate::scd::SourceRow;
use crate::stage::{ExtractResult, Extractor, StageError};
use crate::warehouse::Warehouse;
use async_trait::async_trait;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Reads CSV drops from a directory and lands them in the warehouse
#[derive(Debug, Clone)]
pub struct FlatFileExtractor {
    drop_dir: PathBuf,
    warehouse: Warehouse,
}

impl FlatFileExtractor {
    /// Extractor reading from `drop_dir`
    pub fn new(drop_dir: impl Into<PathBuf>, warehouse: Warehouse) -> Self {
        Self {
            drop_dir: drop_dir.into(),
            warehouse,
        }
    }

    /// Drop directory
    pub fn drop_dir(&self) -> &Path {
        &self.drop_dir
    }

    /// CSV file for `table` in `period`
    pub fn table_path(&self, period: &Period, table: &str) -> PathBuf {
        self.drop_dir.join(period.key()).join(format!("{table}.csv"))
    }

    fn extract_blocking(&self, period: &Period) -> Result<ExtractResult, StageError> {
        let mut result = ExtractResult::default();
        for table in RAW_TABLES.iter() {
            let path = self.table_path(period, table.name);
            let rows = read_csv(&path)?;
            let read = rows.len();
            let rows = prepare_rows(table, period, rows)?;
            let landed = self.warehouse.land(table.name, period, "flat_file", &rows)?;
            debug!(table = %table.name, read, landed, "Table extracted");
            result.tables.insert(table.name.to_string(), landed);
        }
        Ok(result)
    }
}

/// Read every record of a CSV file; a missing file yields no rows
fn read_csv(path: &Path) -> Result<Vec<SourceRow>, StageError> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::Headers)
        .from_path(path)
        .map_err(|e| csv_error(path, e))?;
    let headers = reader.headers().map_err(|e| csv_error(path, e))?.clone();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| csv_error(path, e))?;
        let row: SourceRow = headers
            .iter()
            .zip(record.iter())
            .map(|(column, cell)| {
                let value = if cell.is_empty() {
                    Value::Null
                } else {
                    Value::String(cell.to_string())
                };
                (column.to_string(), value)
            })
            .collect();
        rows.push(row);
    }
    Ok(rows)
}

fn csv_error(path: &Path, e: csv::Error) -> StageError {
    if let csv::ErrorKind::Io(io) = e.kind() {
        return StageError::Unavailable(format!("{}: {}", path.display(), io));
    }
    StageError::Validation(format!("{}: {}", path.display(), e))
}

#[async_trait]
impl Extractor for FlatFileExtractor {
    fn name(&self) -> &str {
        "flat_file"
    }

    async fn extract(&self, period: &Period) -> Result<ExtractResult, StageError> {
        let this = self.clone();
        let owned = period.clone();
        let result = tokio::task::spawn_blocking(move || this.extract_blocking(&owned))
            .await
            .map_err(|e| StageError::Unavailable(format!("extract task failed: {e}")))??;

        info!(
            period = %period.key(),
            rows = result.row_count(),
            "Flat-file extract complete"
        );
        Ok(result)
    }
}
