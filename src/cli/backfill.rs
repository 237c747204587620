//! Backfill command and global CLI arguments

use crate::backfill::config::{
    DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_PERIOD_RETRIES, DEFAULT_STAGE_TIMEOUT_SECS,
    INITIAL_BACKOFF_MS,
};
use crate::backfill::{
    BackfillConfig, BackfillOptions, BackfillOrchestrator, BackfillSummary, PeriodState,
    RetryPolicy,
};
use crate::checkpoint::{FileCheckpointStore, RunLock};
use crate::config::{
    PipelineConfig, SourceKind, DEFAULT_CHECKPOINT_PATH, DEFAULT_DATA_DIR, DEFAULT_DROP_DIR,
    DEFAULT_QUERY_DIR,
};
use crate::extract::graphql::DEFAULT_PAGE_SIZE;
use crate::extract::GraphqlConfig;
use crate::metrics;
use crate::planner::YearMonth;
use crate::shutdown::SharedShutdown;
use crate::validation::{DataQualityValidator, ValidationReport};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::{error, info};

use super::{CliError, ResetCommand, StatusCommand, ValidateCommand};

/// Property ETL CLI
#[derive(Parser, Debug)]
#[command(name = "property-etl")]
#[command(about = "Resumable monthly backfill of property records into an SCD Type 2 warehouse", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Output format (json or human)
    #[arg(long, global = true, default_value = "human")]
    pub output_format: OutputFormat,

    /// Checkpoint file
    #[arg(long, global = true, default_value = DEFAULT_CHECKPOINT_PATH)]
    pub checkpoint_path: PathBuf,

    /// Warehouse directory (raw and analytics tables)
    #[arg(long, global = true, default_value = DEFAULT_DATA_DIR)]
    pub data_dir: PathBuf,

    /// Source of raw records: flat-file or graphql
    #[arg(long, global = true, default_value = "flat-file")]
    pub source: SourceKind,

    /// Directory of per-month CSV drops (flat-file source)
    #[arg(long, global = true, default_value = DEFAULT_DROP_DIR)]
    pub drop_dir: PathBuf,

    /// GraphQL endpoint URL (graphql source)
    #[arg(long, global = true, env = "PROPERTY_ETL_ENDPOINT")]
    pub endpoint: Option<String>,

    /// Bearer token for the GraphQL endpoint
    #[arg(long, global = true, env = "PROPERTY_ETL_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Directory holding <table>.graphql query documents
    #[arg(long, global = true, default_value = DEFAULT_QUERY_DIR)]
    pub query_dir: PathBuf,

    /// Rows requested per GraphQL page
    #[arg(long, global = true, default_value_t = DEFAULT_PAGE_SIZE, value_parser = clap::value_parser!(u32).range(1..=10_000))]
    pub page_size: u32,

    /// Attempts per stage call, including the first (range: 1-20)
    #[arg(long, global = true, default_value_t = DEFAULT_MAX_ATTEMPTS, value_parser = clap::value_parser!(u32).range(1..=20))]
    pub max_attempts: u32,

    /// Retries a period may spend across runs before it is exhausted
    #[arg(long, global = true, default_value_t = DEFAULT_MAX_PERIOD_RETRIES)]
    pub max_period_retries: u32,

    /// Delay before the first stage retry, doubled per retry (milliseconds)
    #[arg(long, global = true, default_value_t = INITIAL_BACKOFF_MS)]
    pub initial_backoff_ms: u64,

    /// Per-call timeout for extract and transform (seconds)
    #[arg(long, global = true, default_value_t = DEFAULT_STAGE_TIMEOUT_SECS, value_parser = clap::value_parser!(u64).range(1..))]
    pub stage_timeout_secs: u64,

    /// Serve Prometheus metrics on this address (e.g. 127.0.0.1:9000)
    #[arg(long, global = true)]
    pub metrics_addr: Option<SocketAddr>,
}

impl Cli {
    /// Pipeline configuration described by the global flags
    pub fn pipeline_config(&self) -> PipelineConfig {
        let retry = RetryPolicy::default()
            .with_max_attempts(self.max_attempts)
            .with_initial_backoff(Duration::from_millis(self.initial_backoff_ms))
            .with_stage_timeout(Duration::from_secs(self.stage_timeout_secs));

        let graphql = self.endpoint.as_ref().map(|endpoint| {
            GraphqlConfig::new(endpoint.clone(), self.query_dir.clone())
                .with_api_key(self.api_key.clone())
                .with_page_size(self.page_size)
        });

        PipelineConfig {
            checkpoint_path: self.checkpoint_path.clone(),
            data_dir: self.data_dir.clone(),
            drop_dir: self.drop_dir.clone(),
            source: self.source,
            graphql,
            backfill: BackfillConfig {
                retry,
                max_period_retries: self.max_period_retries,
            },
        }
    }
}

/// CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a resumable backfill over a month range
    Backfill(BackfillArgs),

    /// Show every checkpoint record
    Status(StatusCommand),

    /// Clear one period's checkpoint so it runs fresh
    Reset(ResetCommand),

    /// Run data-quality checks over the analytics tables
    Validate(ValidateCommand),
}

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// JSON output
    Json,
    /// Human-readable output
    Human,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            "human" => Ok(OutputFormat::Human),
            _ => Err(format!("Invalid output format: {s}")),
        }
    }
}

/// Arguments for the backfill command
#[derive(Parser, Debug)]
pub struct BackfillArgs {
    /// First month (YYYY-MM)
    #[arg(long)]
    pub start: YearMonth,

    /// Last month, inclusive (YYYY-MM)
    #[arg(long)]
    pub end: YearMonth,

    /// Print the plan without running or writing anything
    #[arg(long, default_value_t = false)]
    pub dry_run: bool,

    /// Run extract only; transform later with a normal run
    #[arg(long, default_value_t = false)]
    pub extract_only: bool,

    /// Stop at the first failed period
    #[arg(long, default_value_t = false)]
    pub stop_on_error: bool,

    /// Clear checkpoints in the range before planning
    #[arg(long, default_value_t = false)]
    pub reset: bool,

    /// Re-run every period in the range, ignoring prior progress
    #[arg(long, default_value_t = false)]
    pub force: bool,

    /// Run data-quality checks after the backfill
    #[arg(long, default_value_t = false)]
    pub validate: bool,
}

impl BackfillArgs {
    fn options(&self) -> BackfillOptions {
        BackfillOptions::new(self.start, self.end)
            .with_dry_run(self.dry_run)
            .with_extract_only(self.extract_only)
            .with_stop_on_error(self.stop_on_error)
            .with_reset(self.reset)
            .with_force(self.force)
    }

    /// Execute the backfill
    pub async fn execute(&self, cli: &Cli, shutdown: SharedShutdown) -> Result<(), CliError> {
        if let Some(addr) = cli.metrics_addr {
            metrics::init_metrics(addr).map_err(CliError::InvalidArgument)?;
        }

        let config = cli.pipeline_config();
        // dry runs only read the checkpoint
        let mut lock = if self.dry_run {
            None
        } else {
            Some(RunLock::open(&config.checkpoint_path)?)
        };
        let _guard = match lock.as_mut() {
            Some(lock) => Some(lock.try_exclusive()?),
            None => None,
        };

        let store = FileCheckpointStore::open(&config.checkpoint_path)?;
        let executor = config.build_executor()?;
        let mut orchestrator = BackfillOrchestrator::new(store, executor, config.backfill)
            .with_shutdown(shutdown.clone());

        let progress = (cli.output_format == OutputFormat::Human && !self.dry_run)
            .then(create_progress_bar);
        if let Some(pb) = &progress {
            orchestrator = orchestrator.with_progress(pb.clone());
        }
        let watcher = progress.clone().map(|pb| {
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                shutdown.wait_for_shutdown().await;
                pb.set_message("stopping after current period");
            })
        });

        info!(
            start = %self.start,
            end = %self.end,
            source = %config.source,
            dry_run = self.dry_run,
            "Starting backfill"
        );
        let result = orchestrator.run(&self.options()).await;
        if let Some(handle) = watcher {
            handle.abort();
        }
        let summary = result?;

        let report = if self.validate && !self.dry_run {
            Some(DataQualityValidator::new(config.warehouse()?).run()?)
        } else {
            None
        };

        match cli.output_format {
            OutputFormat::Json => output_json(self, &summary, report.as_ref())?,
            OutputFormat::Human => output_human(self, &summary, report.as_ref()),
        }

        if !summary.is_success() {
            return Err(CliError::Incomplete {
                failed: summary.failed_count() + summary.exhausted_count(),
                halted: summary.halted,
                interrupted: summary.interrupted,
            });
        }
        if let Some(report) = report.filter(|r| !r.is_passing()) {
            return Err(CliError::ValidationFailed(report.failed_count()));
        }
        Ok(())
    }
}

/// Output the run as one JSON document
fn output_json(
    args: &BackfillArgs,
    summary: &BackfillSummary,
    report: Option<&ValidationReport>,
) -> Result<(), CliError> {
    let output = serde_json::json!({
        "success": summary.is_success(),
        "start": args.start,
        "end": args.end,
        "dry_run": summary.dry_run,
        "completed": summary.completed_count(),
        "failed": summary.failed_count(),
        "skipped": summary.skipped_count(),
        "exhausted": summary.exhausted_count(),
        "planned": summary.planned_count(),
        "halted": summary.halted,
        "interrupted": summary.interrupted,
        "failed_periods": summary.failed_periods(),
        "periods": summary.periods,
        "validation": report,
    });

    let text = serde_json::to_string(&output).map_err(|e| CliError::OutputError(e.to_string()))?;
    println!("{text}");
    Ok(())
}

fn describe(state: &PeriodState) -> String {
    match state {
        PeriodState::Completed => "completed".to_string(),
        PeriodState::Extracted => "extracted (transform pending)".to_string(),
        PeriodState::Failed {
            stage,
            class,
            message,
        } => format!("FAILED at {stage} ({class}): {message}"),
        PeriodState::Skipped { status } => format!("skipped ({status})"),
        PeriodState::Exhausted { retry_count } => {
            format!("EXHAUSTED after {retry_count} retries; reset to try again")
        }
        PeriodState::Planned { from, status } => match status {
            Some(status) => format!("would run from {from} (was {status})"),
            None => format!("would run from {from}"),
        },
    }
}

/// Output the run in human-readable form
fn output_human(args: &BackfillArgs, summary: &BackfillSummary, report: Option<&ValidationReport>) {
    let heading = if summary.dry_run {
        "Backfill plan"
    } else {
        "Backfill"
    };
    println!("\n{heading} {} .. {}", args.start, args.end);
    for period in &summary.periods {
        println!("  {}  {}", period.period_key, describe(&period.state));
    }

    if summary.dry_run {
        println!(
            "\nWould run: {}  Skipped: {}  Exhausted: {}",
            summary.planned_count(),
            summary.skipped_count(),
            summary.exhausted_count()
        );
    } else {
        println!(
            "\nCompleted: {}  Failed: {}  Skipped: {}  Exhausted: {}",
            summary.completed_count(),
            summary.failed_count(),
            summary.skipped_count(),
            summary.exhausted_count()
        );
    }

    let failed = summary.failed_periods();
    if !failed.is_empty() {
        let keys: Vec<&str> = failed.iter().map(|f| f.period_key.as_str()).collect();
        eprintln!("Failed periods: {}", keys.join(", "));
        error!(periods = ?keys, "Backfill had failures");
    }
    if summary.halted {
        eprintln!("Stopped at first failure (--stop-on-error)");
    }
    if summary.interrupted {
        eprintln!("Interrupted; rerun the same command to resume");
    }

    if let Some(report) = report {
        super::validate::print_report(report);
    }
}

/// Create the per-period progress bar
fn create_progress_bar() -> ProgressBar {
    let pb = ProgressBar::new(0);
    match ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} periods {msg}")
    {
        Ok(style) => pb.set_style(style.progress_chars("#>-")),
        Err(e) => error!("Invalid progress template: {}", e),
    }
    pb
}
