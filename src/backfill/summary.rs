//! Per-period reports and the run summary

use super::executor::{StageFailure, StageResult};
use crate::checkpoint::PeriodStatus;
use crate::stage::{ErrorClass, Stage};
use serde::Serialize;

/// Where a period ended up in this run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PeriodState {
    /// Every requested stage succeeded
    Completed,
    /// Extract succeeded in an extract-only run
    Extracted,
    /// A stage failed
    Failed {
        /// Failed stage
        stage: Stage,
        /// Error class of the final failure
        class: ErrorClass,
        /// Final error message
        message: String,
    },
    /// Already done; not executed
    Skipped {
        /// Status found in the checkpoint
        status: PeriodStatus,
    },
    /// Retry ceiling reached; not executed
    Exhausted {
        /// Retries spent
        retry_count: u32,
    },
    /// Dry run: would execute starting at `from`
    Planned {
        /// First stage that would run
        from: Stage,
        /// Status found in the checkpoint
        #[serde(skip_serializing_if = "Option::is_none")]
        status: Option<PeriodStatus>,
    },
}

impl PeriodState {
    pub(crate) fn failed(stage: Stage, failure: StageFailure) -> Self {
        PeriodState::Failed {
            stage,
            class: failure.class,
            message: failure.message,
        }
    }

    /// Whether this state counts against the run
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            PeriodState::Failed { .. } | PeriodState::Exhausted { .. }
        )
    }
}

/// Outcome of one period
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PeriodReport {
    /// Period key
    pub period_key: String,
    /// Final state
    #[serde(flatten)]
    pub state: PeriodState,
    /// Stage runs performed in this run
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub stages: Vec<StageResult>,
}

impl PeriodReport {
    /// Report for a period
    pub fn new(period_key: impl Into<String>, state: PeriodState, stages: Vec<StageResult>) -> Self {
        Self {
            period_key: period_key.into(),
            state,
            stages,
        }
    }
}

/// A failed period as listed in the summary
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedPeriod {
    /// Period key
    pub period_key: String,
    /// Failed stage; `None` when exhausted without running
    pub stage: Option<Stage>,
    /// Error class, or `None` when exhausted
    pub class: Option<ErrorClass>,
}

/// Aggregate outcome of one orchestrator run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BackfillSummary {
    /// Whether this was a dry run
    pub dry_run: bool,
    /// Per-period outcomes, chronological
    pub periods: Vec<PeriodReport>,
    /// Stopped early because of `stop_on_error`
    pub halted: bool,
    /// Stopped early because shutdown was requested
    pub interrupted: bool,
}

impl BackfillSummary {
    fn count(&self, predicate: impl Fn(&PeriodState) -> bool) -> usize {
        self.periods.iter().filter(|p| predicate(&p.state)).count()
    }

    /// Periods that completed (or extracted, in extract-only runs)
    pub fn completed_count(&self) -> usize {
        self.count(|s| matches!(s, PeriodState::Completed | PeriodState::Extracted))
    }

    /// Periods that failed in this run
    pub fn failed_count(&self) -> usize {
        self.count(|s| matches!(s, PeriodState::Failed { .. }))
    }

    /// Periods skipped because they were already done
    pub fn skipped_count(&self) -> usize {
        self.count(|s| matches!(s, PeriodState::Skipped { .. }))
    }

    /// Periods past their retry ceiling
    pub fn exhausted_count(&self) -> usize {
        self.count(|s| matches!(s, PeriodState::Exhausted { .. }))
    }

    /// Periods a dry run would execute
    pub fn planned_count(&self) -> usize {
        self.count(|s| matches!(s, PeriodState::Planned { .. }))
    }

    /// Every failed or exhausted period with its stage and error class
    pub fn failed_periods(&self) -> Vec<FailedPeriod> {
        self.periods
            .iter()
            .filter_map(|p| match &p.state {
                PeriodState::Failed { stage, class, .. } => Some(FailedPeriod {
                    period_key: p.period_key.clone(),
                    stage: Some(*stage),
                    class: Some(*class),
                }),
                PeriodState::Exhausted { .. } => Some(FailedPeriod {
                    period_key: p.period_key.clone(),
                    stage: None,
                    class: None,
                }),
                _ => None,
            })
            .collect()
    }

    /// Report for `period_key`
    pub fn period(&self, period_key: &str) -> Option<&PeriodReport> {
        self.periods.iter().find(|p| p.period_key == period_key)
    }

    /// True when nothing failed, nothing was exhausted and the run finished
    pub fn is_success(&self) -> bool {
        !self.interrupted && !self.halted && self.periods.iter().all(|p| !p.state.is_failure())
    }
}
