//! Resumable backfill over monthly periods
//!
//! The [`BackfillOrchestrator`] plans a month range against the checkpoint
//! store and hands each pending period to the [`StageExecutor`].

pub mod config;
pub mod executor;
pub mod orchestrator;
pub mod summary;

pub use config::{BackfillConfig, RetryPolicy};
pub use executor::{StageExecutor, StageFailure, StageResult};
pub use orchestrator::{BackfillOptions, BackfillOrchestrator};
pub use summary::{BackfillSummary, FailedPeriod, PeriodReport, PeriodState};

use crate::checkpoint::CheckpointError;
use crate::planner::{PlanError, YearMonth};

/// Errors that abort a whole backfill run
#[derive(Debug, thiserror::Error)]
pub enum BackfillError {
    /// Checkpoint store failed; progress can no longer be tracked
    #[error("checkpoint error: {0}")]
    Persistence(#[from] CheckpointError),

    /// Period planning failed
    #[error("planning error: {0}")]
    Plan(#[from] PlanError),

    /// End month precedes start month
    #[error("invalid range: end {end} is before start {start}")]
    InvalidRange {
        /// Start month
        start: YearMonth,
        /// End month
        end: YearMonth,
    },
}
