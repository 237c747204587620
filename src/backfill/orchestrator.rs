//! Top-level backfill driver

use super::config::BackfillConfig;
use super::executor::StageExecutor;
use super::summary::{BackfillSummary, PeriodReport, PeriodState};
use super::BackfillError;
use crate::checkpoint::{CheckpointStore, PeriodStatus};
use crate::metrics;
use crate::planner::{classify, plan_months, PlanAction, PlanOptions, PlannedPeriod, YearMonth};
use crate::shutdown::{self, SharedShutdown};
use indicatif::ProgressBar;
use tracing::{info, warn, Instrument};

/// What to backfill and how
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackfillOptions {
    /// First month, inclusive
    pub start: YearMonth,
    /// Last month, inclusive
    pub end: YearMonth,
    /// Plan and report only
    pub dry_run: bool,
    /// Skip the transform stage
    pub extract_only: bool,
    /// Halt at the first failed period
    pub stop_on_error: bool,
    /// Clear checkpoints in range before planning
    pub reset: bool,
    /// Re-execute completed periods
    pub force: bool,
}

impl BackfillOptions {
    /// Options for `start..=end` with every flag off
    pub fn new(start: YearMonth, end: YearMonth) -> Self {
        Self {
            start,
            end,
            dry_run: false,
            extract_only: false,
            stop_on_error: false,
            reset: false,
            force: false,
        }
    }

    /// Enable or disable dry-run
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Enable or disable extract-only
    pub fn with_extract_only(mut self, extract_only: bool) -> Self {
        self.extract_only = extract_only;
        self
    }

    /// Enable or disable stop-on-error
    pub fn with_stop_on_error(mut self, stop_on_error: bool) -> Self {
        self.stop_on_error = stop_on_error;
        self
    }

    /// Enable or disable reset
    pub fn with_reset(mut self, reset: bool) -> Self {
        self.reset = reset;
        self
    }

    /// Enable or disable force
    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }
}

/// Drives planning and execution across a month range
///
/// Periods run strictly one after another, earliest first.
pub struct BackfillOrchestrator<S: CheckpointStore> {
    store: S,
    executor: StageExecutor,
    config: BackfillConfig,
    shutdown: Option<SharedShutdown>,
    progress: Option<ProgressBar>,
}

impl<S: CheckpointStore> BackfillOrchestrator<S> {
    /// Create an orchestrator over `store`
    ///
    /// The executor's retry policy is replaced by `config.retry`.
    pub fn new(store: S, executor: StageExecutor, config: BackfillConfig) -> Self {
        Self {
            store,
            executor: executor.with_policy(config.retry),
            config,
            shutdown: shutdown::get_global_shutdown(),
            progress: None,
        }
    }

    /// Attach a shutdown handle checked between periods
    pub fn with_shutdown(mut self, shutdown: SharedShutdown) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Attach a progress bar advanced once per period
    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Checkpoint store
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Consume the orchestrator, returning its store
    pub fn into_store(self) -> S {
        self.store
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown
            .as_ref()
            .map(|s| s.is_shutdown_requested())
            .unwrap_or(false)
    }

    /// Run the backfill described by `options`
    ///
    /// Only checkpoint persistence failures and invalid ranges are returned
    /// as errors; stage failures are reported in the summary.
    pub async fn run(&mut self, options: &BackfillOptions) -> Result<BackfillSummary, BackfillError> {
        if options.end < options.start {
            return Err(BackfillError::InvalidRange {
                start: options.start,
                end: options.end,
            });
        }
        let periods = plan_months(options.start, options.end)?;

        let span = tracing::info_span!(
            "backfill",
            start = %options.start,
            end = %options.end,
            periods = periods.len(),
            dry_run = options.dry_run
        );

        async {
            if options.reset && !options.dry_run {
                for period in &periods {
                    self.store.reset(&period.key())?;
                }
                info!("Cleared checkpoints in range");
            }

            let plan_options = PlanOptions {
                force: options.force,
                extract_only: options.extract_only,
                max_period_retries: self.config.max_period_retries,
            };
            let plan: Vec<PlannedPeriod> = periods
                .into_iter()
                .map(|period| {
                    let record = if options.reset && options.dry_run {
                        None
                    } else {
                        self.store.get(&period.key())
                    };
                    classify(period, record.as_ref(), plan_options)
                })
                .collect();

            if let Some(progress) = &self.progress {
                progress.set_length(plan.len() as u64);
            }

            let summary = if options.dry_run {
                Self::dry_run_summary(&plan)
            } else {
                self.execute(plan, options).await?
            };

            if let Some(progress) = &self.progress {
                progress.finish_and_clear();
            }

            info!(
                completed = summary.completed_count(),
                failed = summary.failed_count(),
                skipped = summary.skipped_count(),
                exhausted = summary.exhausted_count(),
                planned = summary.planned_count(),
                halted = summary.halted,
                interrupted = summary.interrupted,
                "Backfill finished"
            );
            Ok::<_, BackfillError>(summary)
        }
        .instrument(span)
        .await
    }

    fn dry_run_summary(plan: &[PlannedPeriod]) -> BackfillSummary {
        let periods = plan
            .iter()
            .map(|planned| {
                let state = match planned.action {
                    PlanAction::Execute { from, .. } => PeriodState::Planned {
                        from,
                        status: planned.prior_status,
                    },
                    PlanAction::Skip => PeriodState::Skipped {
                        status: planned.prior_status.unwrap_or_default(),
                    },
                    PlanAction::Exhausted { retry_count } => PeriodState::Exhausted { retry_count },
                };
                PeriodReport::new(planned.period.key(), state, Vec::new())
            })
            .collect();

        BackfillSummary {
            dry_run: true,
            periods,
            ..Default::default()
        }
    }

    async fn execute(
        &mut self,
        plan: Vec<PlannedPeriod>,
        options: &BackfillOptions,
    ) -> Result<BackfillSummary, BackfillError> {
        let mut summary = BackfillSummary::default();

        for planned in plan {
            if self.shutdown_requested() {
                warn!(
                    next_period = %planned.period.key(),
                    completed = summary.completed_count(),
                    "Shutdown requested; stopping before next period"
                );
                summary.interrupted = true;
                break;
            }

            let key = planned.period.key();
            if let Some(progress) = &self.progress {
                progress.set_message(key.clone());
            }

            let report = match planned.action {
                PlanAction::Skip => {
                    info!(period = %key, status = ?planned.prior_status, "Skipping period");
                    PeriodReport::new(
                        &key,
                        PeriodState::Skipped {
                            status: planned.prior_status.unwrap_or_default(),
                        },
                        Vec::new(),
                    )
                }
                PlanAction::Exhausted { retry_count } => {
                    self.mark_exhausted(&key)?;
                    metrics::record_exhausted(&key, retry_count);
                    PeriodReport::new(&key, PeriodState::Exhausted { retry_count }, Vec::new())
                }
                PlanAction::Execute {
                    from,
                    retry_count,
                    restart,
                } => {
                    self.executor
                        .run_period(
                            &planned.period,
                            from,
                            retry_count,
                            restart,
                            options.extract_only,
                            &mut self.store,
                        )
                        .await?
                }
            };

            let failed = report.state.is_failure();
            summary.periods.push(report);
            if let Some(progress) = &self.progress {
                progress.inc(1);
            }

            if failed && options.stop_on_error {
                warn!(
                    period = %key,
                    completed = summary.completed_count(),
                    "Halting on first failure"
                );
                summary.halted = true;
                break;
            }
        }

        Ok(summary)
    }

    /// A crashed attempt past the ceiling is settled as failed
    fn mark_exhausted(&mut self, period_key: &str) -> Result<(), BackfillError> {
        if let Some(mut record) = self.store.get(period_key) {
            if record.status() == PeriodStatus::InProgress {
                record.transition(PeriodStatus::Failed)?;
                self.store.put(record)?;
            }
        }
        Ok(())
    }
}
