//! Data-quality validation subcommand

use super::{Cli, CliError, OutputFormat};
use crate::validation::{DataQualityValidator, ValidationReport};
use crate::warehouse::Warehouse;
use clap::Parser;

/// Run data-quality checks over the analytics tables
#[derive(Parser, Debug)]
pub struct ValidateCommand {
    /// Pass threshold (percent) for the fact -> dimension foreign-key check
    #[arg(long)]
    pub fk_threshold: Option<f64>,
}

impl ValidateCommand {
    /// Execute the validation command
    pub async fn execute(&self, cli: &Cli) -> Result<(), CliError> {
        if let Some(threshold) = self.fk_threshold {
            if !(0.0..=100.0).contains(&threshold) {
                return Err(CliError::InvalidArgument(format!(
                    "--fk-threshold must be between 0 and 100, got {threshold}"
                )));
            }
        }

        let warehouse = Warehouse::open(&cli.data_dir)?;

        let validator = match self.fk_threshold {
            Some(threshold) => DataQualityValidator::with_fk_threshold(warehouse, threshold),
            None => DataQualityValidator::new(warehouse),
        };
        let report = validator.run()?;

        match cli.output_format {
            OutputFormat::Json => {
                let text = serde_json::to_string_pretty(&report)
                    .map_err(|e| CliError::OutputError(e.to_string()))?;
                println!("{text}");
            }
            OutputFormat::Human => print_report(&report),
        }

        if report.is_passing() {
            Ok(())
        } else {
            Err(CliError::ValidationFailed(report.failed_count()))
        }
    }
}

/// Print a report as a check table followed by statistics
pub(crate) fn print_report(report: &ValidationReport) {
    println!("\nData-quality checks");
    for check in &report.checks {
        println!(
            "  [{}] {:<18} {:<50} {}/{} ({:.1}% >= {:.0}%)",
            check.status,
            check.category,
            check.name,
            check.passed,
            check.total,
            check.percentage(),
            check.threshold
        );
        if !check.message.is_empty() {
            println!("         {}", check.message);
        }
    }
    for stat in &report.statistics {
        println!("  {:<18} {:<50} {}", stat.category, stat.metric, stat.value);
    }
    println!(
        "\nPassed: {}  Warnings: {}  Failed: {}",
        report.passed_count(),
        report.warning_count(),
        report.failed_count()
    );
}
