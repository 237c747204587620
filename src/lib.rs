//! # Property ETL Library
//!
//! Resumable, month-by-month backfill of county property records into a
//! small star-schema warehouse with SCD Type 2 dimensions.
//!
//! ## Features
//!
//! - **Checkpointed Backfill**: every period's progress is persisted after each
//!   status change, so an interrupted run resumes where it stopped
//! - **Stage Retries**: extract and transform are retried with exponential
//!   backoff; only transient error classes are retried
//! - **Period Retry Ceiling**: a period that keeps failing is marked exhausted
//!   until it is reset
//! - **SCD Type 2 Merge**: dimension history is versioned by effective date and
//!   re-applying a batch is a no-op
//! - **Sources**: per-month CSV drops or a paginated GraphQL endpoint
//! - **Data Quality**: threshold-based checks over the analytics tables
//!
//! ## Quick Start
//!
//! ```no_run
//! use property_etl::backfill::{BackfillOptions, BackfillOrchestrator};
//! use property_etl::checkpoint::FileCheckpointStore;
//! use property_etl::config::PipelineConfig;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = PipelineConfig::default();
//! let store = FileCheckpointStore::open(&config.checkpoint_path)?;
//! let mut orchestrator =
//!     BackfillOrchestrator::new(store, config.build_executor()?, config.backfill);
//!
//! let options = BackfillOptions::new("2024-01".parse()?, "2024-06".parse()?);
//! let summary = orchestrator.run(&options).await?;
//! println!("{} completed, {} failed", summary.completed_count(), summary.failed_count());
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`planner`] - Month ranges and per-period plan decisions
//! - [`checkpoint`] - Durable per-period progress and the run lock
//! - [`backfill`] - Stage executor with retries and the orchestrator loop
//! - [`extract`] - Raw record extractors (CSV drops, GraphQL)
//! - [`warehouse`] - Raw landing tables and analytics table storage
//! - [`transform`] - Raw to star schema: dimensions and the transaction fact
//! - [`scd`] - SCD Type 2 merge engine
//! - [`validation`] - Data-quality checks

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Backfill orchestration with stage retries
pub mod backfill;

/// Checkpoint persistence
pub mod checkpoint;

/// CLI command implementations
pub mod cli;

/// Pipeline configuration
pub mod config;

/// Raw record extractors
pub mod extract;

/// Prometheus metrics
pub mod metrics;

/// Atomic, locked file writes
pub mod persist;

/// Period planning
pub mod planner;

/// SCD Type 2 dimensions
pub mod scd;

/// Graceful shutdown coordination shared across modules
pub mod shutdown;

/// Stage contracts: extractor and transformer traits with classified errors
pub mod stage;

/// Raw to analytics transformation
pub mod transform;

/// Data-quality validation
pub mod validation;

/// File-backed warehouse
pub mod warehouse;

// Re-export commonly used types
pub use backfill::{BackfillOptions, BackfillOrchestrator, BackfillSummary, StageExecutor};
pub use checkpoint::{CheckpointRecord, CheckpointStore, FileCheckpointStore, PeriodStatus};
pub use planner::{Period, YearMonth};
pub use stage::{ErrorClass, ExtractResult, Extractor, Stage, StageError, TransformResult, Transformer};
