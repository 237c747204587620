//! Stage execution with retry and checkpointed status transitions

use super::config::RetryPolicy;
use super::summary::{PeriodReport, PeriodState};
use crate::checkpoint::{
    CheckpointError, CheckpointRecord, CheckpointStore, PeriodStatus, StageOutcome,
};
use crate::metrics::{self, PeriodMetrics};
use crate::planner::Period;
use crate::stage::{ErrorClass, Extractor, Stage, StageError, Transformer};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn, Instrument};

/// Failure detail of a stage run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageFailure {
    /// Retry classification of the final error
    pub class: ErrorClass,
    /// Final error message
    pub message: String,
}

/// Outcome of running one stage to completion or exhaustion
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageResult {
    /// Which stage ran
    pub stage: Stage,
    /// Whether it succeeded
    pub success: bool,
    /// Attempts spent
    pub attempts: u32,
    /// Rows reported by the collaborator on success
    pub rows: u64,
    /// Final error on failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<StageFailure>,
}

impl StageResult {
    fn to_outcome(&self) -> StageOutcome {
        match &self.error {
            None => StageOutcome::success(self.attempts),
            Some(failure) => StageOutcome::failure(self.attempts, failure.class, &failure.message),
        }
    }
}

/// Runs extract and transform for one period
pub struct StageExecutor {
    extractor: Arc<dyn Extractor>,
    transformer: Arc<dyn Transformer>,
    policy: RetryPolicy,
}

impl StageExecutor {
    /// Create an executor with the default retry policy
    pub fn new(extractor: Arc<dyn Extractor>, transformer: Arc<dyn Transformer>) -> Self {
        Self {
            extractor,
            transformer,
            policy: RetryPolicy::default(),
        }
    }

    /// Override the retry policy
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Retry policy in effect
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `stage` for `period`, retrying transient failures
    ///
    /// Never returns an error: exhaustion and non-retryable failures come
    /// back as an unsuccessful [`StageResult`].
    pub async fn run_stage(&self, stage: Stage, period: &Period) -> StageResult {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempts = 0;

        loop {
            attempts += 1;
            debug!(stage = %stage, attempt = attempts, "Running stage");

            match self.invoke(stage, period).await {
                Ok(rows) => {
                    metrics::record_stage_attempt(stage, Ok(()));
                    info!(stage = %stage, attempts = attempts, rows = rows, "Stage succeeded");
                    return StageResult {
                        stage,
                        success: true,
                        attempts,
                        rows,
                        error: None,
                    };
                }
                Err(e) => {
                    let class = e.class();
                    metrics::record_stage_attempt(stage, Err(class));

                    if e.is_retryable() && attempts < max_attempts {
                        let backoff = self.policy.backoff_after(attempts);
                        warn!(
                            stage = %stage,
                            attempt = attempts,
                            max_attempts = max_attempts,
                            backoff_ms = backoff.as_millis() as u64,
                            error = %e,
                            "Transient stage failure, retrying after backoff"
                        );
                        metrics::record_retry_backoff(stage, backoff, attempts);
                        tokio::time::sleep(backoff).await;
                        continue;
                    }

                    warn!(
                        stage = %stage,
                        attempts = attempts,
                        class = %class,
                        error = %e,
                        "Stage failed"
                    );
                    return StageResult {
                        stage,
                        success: false,
                        attempts,
                        rows: 0,
                        error: Some(StageFailure {
                            class,
                            message: e.to_string(),
                        }),
                    };
                }
            }
        }
    }

    /// One collaborator call under the stage timeout
    ///
    /// A call that times out is not cancelled: blocking work inside it cannot
    /// be stopped, so it is awaited to completion and its result discarded
    /// before the caller may start another attempt. Attempts never overlap.
    async fn invoke(&self, stage: Stage, period: &Period) -> Result<u64, StageError> {
        let extractor = Arc::clone(&self.extractor);
        let transformer = Arc::clone(&self.transformer);
        let owned = period.clone();
        let mut call = tokio::spawn(async move {
            match stage {
                Stage::Extract => extractor.extract(&owned).await.map(|r| r.row_count()),
                Stage::Transform => transformer.transform(&owned).await.map(|r| r.row_count()),
            }
        });

        let timeout = self.policy.stage_timeout;
        match tokio::time::timeout(timeout, &mut call).await {
            Ok(joined) => joined
                .unwrap_or_else(|e| Err(StageError::Unavailable(format!("{stage} task failed: {e}")))),
            Err(_) => {
                warn!(
                    stage = %stage,
                    timeout_ms = timeout.as_millis() as u64,
                    "Stage call timed out, waiting for it to settle"
                );
                let late = call.await;
                debug!(
                    stage = %stage,
                    succeeded = matches!(late, Ok(Ok(_))),
                    "Timed-out call settled"
                );
                Err(StageError::Timeout(timeout))
            }
        }
    }

    /// Run one period from `from`, writing every status change through `store`
    ///
    /// Only checkpoint persistence errors are returned as `Err`.
    pub async fn run_period<S: CheckpointStore + ?Sized>(
        &self,
        period: &Period,
        from: Stage,
        retry_count: u32,
        restart: bool,
        extract_only: bool,
        store: &mut S,
    ) -> Result<PeriodReport, CheckpointError> {
        let key = period.key();
        let span = tracing::info_span!(
            "period",
            period = %key,
            from = %from,
            retry_count = retry_count
        );

        self.run_period_inner(period, from, retry_count, restart, extract_only, store)
            .instrument(span)
            .await
    }

    async fn run_period_inner<S: CheckpointStore + ?Sized>(
        &self,
        period: &Period,
        from: Stage,
        retry_count: u32,
        restart: bool,
        extract_only: bool,
        store: &mut S,
    ) -> Result<PeriodReport, CheckpointError> {
        let key = period.key();
        let period_metrics = PeriodMetrics::start(&key);
        let mut record = match store.get(&key) {
            Some(existing) if !restart => existing,
            _ => CheckpointRecord::new(&key),
        };

        let begin_status = match from {
            Stage::Extract => PeriodStatus::InProgress,
            Stage::Transform => PeriodStatus::ExtractDone,
        };
        record.begin_attempt(begin_status, retry_count)?;
        store.put(record.clone())?;
        info!(extract_only = extract_only, "Period started");

        let mut stages = Vec::new();
        let mut rows = 0;

        if from == Stage::Extract {
            let result = self.run_stage(Stage::Extract, period).await;
            record.record_stage(Stage::Extract, result.to_outcome());
            rows += result.rows;
            let failure = result.error.clone();
            stages.push(result);

            if let Some(failure) = failure {
                record.transition(PeriodStatus::Failed)?;
                store.put(record)?;
                period_metrics.record_failure(Stage::Extract, failure.class, &failure.message);
                return Ok(PeriodReport::new(
                    &key,
                    PeriodState::failed(Stage::Extract, failure),
                    stages,
                ));
            }

            record.transition(PeriodStatus::ExtractDone)?;
            store.put(record.clone())?;
        }

        if extract_only {
            period_metrics.record_success(rows);
            return Ok(PeriodReport::new(&key, PeriodState::Extracted, stages));
        }

        let result = self.run_stage(Stage::Transform, period).await;
        record.record_stage(Stage::Transform, result.to_outcome());
        rows += result.rows;
        let failure = result.error.clone();
        stages.push(result);

        if let Some(failure) = failure {
            record.transition(PeriodStatus::Failed)?;
            store.put(record)?;
            period_metrics.record_failure(Stage::Transform, failure.class, &failure.message);
            return Ok(PeriodReport::new(
                &key,
                PeriodState::failed(Stage::Transform, failure),
                stages,
            ));
        }

        record.transition(PeriodStatus::Completed)?;
        store.put(record)?;
        period_metrics.record_success(rows);
        Ok(PeriodReport::new(&key, PeriodState::Completed, stages))
    }
}
