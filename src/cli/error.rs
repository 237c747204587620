//! CLI error types and conversions

use crate::backfill::BackfillError;
use crate::checkpoint::CheckpointError;
use crate::config::ConfigError;
use crate::warehouse::WarehouseError;

/// CLI errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Checkpoint store or run lock error
    #[error("checkpoint error: {0}")]
    CheckpointError(#[from] CheckpointError),

    /// Backfill aborted
    #[error("backfill error: {0}")]
    BackfillError(#[from] BackfillError),

    /// Pipeline could not be wired
    #[error("configuration error: {0}")]
    ConfigError(#[from] ConfigError),

    /// Warehouse could not be read
    #[error("warehouse error: {0}")]
    WarehouseError(#[from] WarehouseError),

    /// Invalid argument
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Result could not be rendered
    #[error("output error: {0}")]
    OutputError(String),

    /// Backfill finished with failed, exhausted or unprocessed periods
    #[error("backfill incomplete: {failed} failed period(s){}", incomplete_suffix(.halted, .interrupted))]
    Incomplete {
        /// Failed plus exhausted periods
        failed: usize,
        /// Stopped on first failure
        halted: bool,
        /// Stopped by shutdown
        interrupted: bool,
    },

    /// Data-quality checks failed
    #[error("data-quality validation failed: {0} check(s) failed")]
    ValidationFailed(usize),
}

fn incomplete_suffix(halted: &bool, interrupted: &bool) -> &'static str {
    match (*halted, *interrupted) {
        (_, true) => ", interrupted",
        (true, false) => ", halted on first failure",
        (false, false) => "",
    }
}
