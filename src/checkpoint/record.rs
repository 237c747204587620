//! Per-period checkpoint records and their status machine

use super::CheckpointError;
use crate::stage::{ErrorClass, Stage};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Processing status of one period
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeriodStatus {
    /// Known but not yet attempted
    #[default]
    Pending,
    /// An attempt is running (or crashed)
    InProgress,
    /// Extract succeeded; transform still outstanding
    ExtractDone,
    /// Every requested stage succeeded
    Completed,
    /// A stage failed
    Failed,
}

impl PeriodStatus {
    /// Status name as stored on disk
    pub fn as_str(&self) -> &'static str {
        match self {
            PeriodStatus::Pending => "pending",
            PeriodStatus::InProgress => "in_progress",
            PeriodStatus::ExtractDone => "extract_done",
            PeriodStatus::Completed => "completed",
            PeriodStatus::Failed => "failed",
        }
    }

    /// Whether moving to `next` is a legal transition
    ///
    /// `InProgress -> InProgress` and `Failed -> InProgress | ExtractDone`
    /// are the re-queue edges taken when a crashed or failed period is
    /// retried. `Completed` has no outgoing edge; only a reset leaves it.
    pub fn can_transition_to(&self, next: PeriodStatus) -> bool {
        use PeriodStatus::*;
        matches!(
            (self, next),
            (Pending, InProgress)
                | (InProgress, InProgress)
                | (InProgress, ExtractDone)
                | (InProgress, Completed)
                | (InProgress, Failed)
                | (ExtractDone, Completed)
                | (ExtractDone, Failed)
                | (Failed, InProgress)
                | (Failed, ExtractDone)
        )
    }
}

impl fmt::Display for PeriodStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of the latest run of one stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageOutcome {
    /// Whether the stage succeeded
    pub success: bool,
    /// Attempts spent, including retries
    pub attempts: u32,
    /// Failure class, when failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_class: Option<ErrorClass>,
    /// Failure summary, when failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// When the stage finished
    pub finished_at: DateTime<Utc>,
}

impl StageOutcome {
    /// Successful outcome
    pub fn success(attempts: u32) -> Self {
        Self {
            success: true,
            attempts,
            error_class: None,
            error: None,
            finished_at: Utc::now(),
        }
    }

    /// Failed outcome
    pub fn failure(attempts: u32, class: ErrorClass, error: impl Into<String>) -> Self {
        Self {
            success: false,
            attempts,
            error_class: Some(class),
            error: Some(error.into()),
            finished_at: Utc::now(),
        }
    }
}

/// Durable progress record for one period
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    period_key: String,
    status: PeriodStatus,
    #[serde(default)]
    stage_results: BTreeMap<Stage, StageOutcome>,
    #[serde(default)]
    attempted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    retry_count: u32,
}

impl CheckpointRecord {
    /// Fresh pending record
    pub fn new(period_key: impl Into<String>) -> Self {
        Self {
            period_key: period_key.into(),
            status: PeriodStatus::Pending,
            stage_results: BTreeMap::new(),
            attempted_at: None,
            completed_at: None,
            retry_count: 0,
        }
    }

    /// Period key (`YYYY-MM`)
    pub fn period_key(&self) -> &str {
        &self.period_key
    }

    /// Current status
    pub fn status(&self) -> PeriodStatus {
        self.status
    }

    /// Retries spent so far
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Start of the latest attempt
    pub fn attempted_at(&self) -> Option<DateTime<Utc>> {
        self.attempted_at
    }

    /// When the period completed
    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    /// Latest outcome per stage
    pub fn stage_results(&self) -> &BTreeMap<Stage, StageOutcome> {
        &self.stage_results
    }

    /// Latest outcome of `stage`
    pub fn stage(&self, stage: Stage) -> Option<&StageOutcome> {
        self.stage_results.get(&stage)
    }

    /// Whether extract has succeeded, so a retry may start at transform
    pub fn extract_succeeded(&self) -> bool {
        self.stage(Stage::Extract).is_some_and(|o| o.success)
    }

    /// The stage that failed most recently, if any
    pub fn failed_stage(&self) -> Option<(Stage, &StageOutcome)> {
        self.stage_results
            .iter()
            .filter(|(_, outcome)| !outcome.success)
            .max_by_key(|(_, outcome)| outcome.finished_at)
            .map(|(stage, outcome)| (*stage, outcome))
    }

    /// Move to `next`, rejecting illegal transitions
    pub fn transition(&mut self, next: PeriodStatus) -> Result<(), CheckpointError> {
        if !self.status.can_transition_to(next) {
            return Err(CheckpointError::InvalidTransition {
                period_key: self.period_key.clone(),
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        if next == PeriodStatus::Completed {
            self.completed_at = Some(Utc::now());
        }
        Ok(())
    }

    /// Start a new attempt in `status` with the planner's retry count
    pub fn begin_attempt(
        &mut self,
        status: PeriodStatus,
        retry_count: u32,
    ) -> Result<(), CheckpointError> {
        if self.status != status {
            self.transition(status)?;
        }
        self.retry_count = retry_count;
        self.attempted_at = Some(Utc::now());
        Ok(())
    }

    /// Record the outcome of a stage run
    pub fn record_stage(&mut self, stage: Stage, outcome: StageOutcome) {
        self.stage_results.insert(stage, outcome);
    }

    #[cfg(test)]
    pub(crate) fn force_state(&mut self, status: PeriodStatus, retry_count: u32) {
        self.status = status;
        self.retry_count = retry_count;
    }
}
