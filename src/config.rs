//! Pipeline configuration
//!
//! [`PipelineConfig`] carries everything needed to wire a backfill: where
//! checkpoints and the warehouse live, which extractor feeds it, and the
//! retry policy. The CLI builds it from flags; tests build it directly.

use crate::backfill::{BackfillConfig, StageExecutor};
use crate::extract::{ExtractSetupError, FlatFileExtractor, GraphqlConfig, GraphqlExtractor};
use crate::stage::Extractor;
use crate::transform::WarehouseTransformer;
use crate::warehouse::{Warehouse, WarehouseError};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;

/// Default checkpoint file
pub const DEFAULT_CHECKPOINT_PATH: &str = ".backfill_checkpoint.json";
/// Default warehouse directory
pub const DEFAULT_DATA_DIR: &str = "data";
/// Default CSV drop directory
pub const DEFAULT_DROP_DIR: &str = "drops";
/// Default GraphQL query directory
pub const DEFAULT_QUERY_DIR: &str = "queries";

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Extractor could not be built
    #[error(transparent)]
    Extract(#[from] ExtractSetupError),

    /// Warehouse could not be opened
    #[error(transparent)]
    Warehouse(#[from] WarehouseError),

    /// Required setting missing
    #[error("missing setting: {0}")]
    Missing(String),
}

/// Where raw records come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SourceKind {
    /// Per-period CSV drops on disk
    #[default]
    FlatFile,
    /// Paginated GraphQL endpoint
    Graphql,
}

impl FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "flat-file" | "flat_file" | "csv" => Ok(SourceKind::FlatFile),
            "graphql" => Ok(SourceKind::Graphql),
            _ => Err(format!(
                "Invalid source: {s}. Valid options: flat-file, graphql"
            )),
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SourceKind::FlatFile => "flat-file",
            SourceKind::Graphql => "graphql",
        })
    }
}

/// Everything a backfill run needs
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Checkpoint file
    pub checkpoint_path: PathBuf,
    /// Warehouse root
    pub data_dir: PathBuf,
    /// CSV drop root (flat-file source)
    pub drop_dir: PathBuf,
    /// Extractor selection
    pub source: SourceKind,
    /// Endpoint settings (GraphQL source)
    pub graphql: Option<GraphqlConfig>,
    /// Retry policy and period retry ceiling
    pub backfill: BackfillConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            checkpoint_path: PathBuf::from(DEFAULT_CHECKPOINT_PATH),
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            drop_dir: PathBuf::from(DEFAULT_DROP_DIR),
            source: SourceKind::FlatFile,
            graphql: None,
            backfill: BackfillConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Open (creating if needed) the warehouse
    pub fn warehouse(&self) -> Result<Warehouse, ConfigError> {
        Ok(Warehouse::open(&self.data_dir)?)
    }

    /// Build the configured extractor over `warehouse`
    pub fn extractor(&self, warehouse: &Warehouse) -> Result<Arc<dyn Extractor>, ConfigError> {
        match self.source {
            SourceKind::FlatFile => Ok(Arc::new(FlatFileExtractor::new(
                &self.drop_dir,
                warehouse.clone(),
            ))),
            SourceKind::Graphql => {
                let settings = self
                    .graphql
                    .clone()
                    .ok_or_else(|| ConfigError::Missing("graphql endpoint".to_string()))?;
                Ok(Arc::new(GraphqlExtractor::new(settings, warehouse.clone())?))
            }
        }
    }

    /// Stage executor wired to the configured extractor and the warehouse transformer
    pub fn build_executor(&self) -> Result<StageExecutor, ConfigError> {
        let warehouse = self.warehouse()?;
        let extractor = self.extractor(&warehouse)?;
        info!(
            source = %self.source,
            data_dir = %self.data_dir.display(),
            "Pipeline configured"
        );
        Ok(StageExecutor::new(
            extractor,
            Arc::new(WarehouseTransformer::new(warehouse)),
        )
        .with_policy(self.backfill.retry))
    }
}
