//! Checkpoint inspection and reset subcommands

use super::{Cli, CliError, OutputFormat};
use crate::checkpoint::{
    CheckpointRecord, CheckpointStore, FileCheckpointStore, PeriodStatus, RunLock,
};
use crate::planner::YearMonth;
use clap::Parser;

/// Show every checkpoint record
#[derive(Parser, Debug)]
pub struct StatusCommand {
    /// Only show periods that are not completed
    #[arg(long, default_value_t = false)]
    pub pending: bool,
}

impl StatusCommand {
    /// Execute the status command
    pub async fn execute(&self, cli: &Cli) -> Result<(), CliError> {
        let store = FileCheckpointStore::open(&cli.checkpoint_path)?;
        let records: Vec<CheckpointRecord> = store
            .all()
            .into_iter()
            .filter(|r| !self.pending || r.status() != PeriodStatus::Completed)
            .collect();

        match cli.output_format {
            OutputFormat::Json => {
                let text = serde_json::to_string_pretty(&records)
                    .map_err(|e| CliError::OutputError(e.to_string()))?;
                println!("{text}");
            }
            OutputFormat::Human => print_records(&records),
        }
        Ok(())
    }
}

fn print_records(records: &[CheckpointRecord]) {
    if records.is_empty() {
        println!("No checkpoint records");
        return;
    }

    println!(
        "{:<9} {:<14} {:>7}  {:<20} ERROR",
        "PERIOD", "STATUS", "RETRIES", "ATTEMPTED"
    );
    for record in records {
        let attempted = record
            .attempted_at()
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "-".to_string());
        let error = record
            .failed_stage()
            .and_then(|(stage, outcome)| {
                outcome
                    .error
                    .as_ref()
                    .map(|e| format!("{stage}: {e}"))
            })
            .unwrap_or_default();
        println!(
            "{:<9} {:<14} {:>7}  {:<20} {}",
            record.period_key(),
            record.status(),
            record.retry_count(),
            attempted,
            error
        );
    }
}

/// Clear one period's checkpoint so the next run starts it fresh
#[derive(Parser, Debug)]
pub struct ResetCommand {
    /// Period to clear (YYYY-MM)
    #[arg(long)]
    pub period: YearMonth,
}

impl ResetCommand {
    /// Execute the reset command
    pub async fn execute(&self, cli: &Cli) -> Result<(), CliError> {
        let mut lock = RunLock::open(&cli.checkpoint_path)?;
        let _guard = lock.try_exclusive()?;

        let mut store = FileCheckpointStore::open(&cli.checkpoint_path)?;
        let key = self.period.to_string();
        let removed = store.reset(&key)?;

        match cli.output_format {
            OutputFormat::Json => {
                println!("{}", serde_json::json!({ "period": key, "removed": removed }));
            }
            OutputFormat::Human if removed => println!("Reset {key}"),
            OutputFormat::Human => println!("No checkpoint for {key}"),
        }
        Ok(())
    }
}
