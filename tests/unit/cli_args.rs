//! Unit tests for CLI argument parsing

use clap::Parser;
use property_etl::backfill::config::{
    DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_PERIOD_RETRIES, DEFAULT_STAGE_TIMEOUT_SECS,
};
use property_etl::cli::{Cli, Commands, OutputFormat};
use property_etl::config::{SourceKind, DEFAULT_CHECKPOINT_PATH};
use std::path::PathBuf;
use std::time::Duration;

fn backfill_args(extra: &[&str]) -> Vec<String> {
    let mut args: Vec<String> = ["property-etl", "backfill", "--start", "2024-01", "--end", "2024-06"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    args.extend(extra.iter().map(|s| s.to_string()));
    args
}

#[test]
fn test_defaults() {
    let cli = Cli::parse_from(backfill_args(&[]));

    assert_eq!(cli.output_format, OutputFormat::Human);
    assert_eq!(cli.checkpoint_path, PathBuf::from(DEFAULT_CHECKPOINT_PATH));
    assert_eq!(cli.source, SourceKind::FlatFile);
    assert_eq!(cli.max_attempts, DEFAULT_MAX_ATTEMPTS);
    assert_eq!(cli.max_period_retries, DEFAULT_MAX_PERIOD_RETRIES);
    assert_eq!(cli.stage_timeout_secs, DEFAULT_STAGE_TIMEOUT_SECS);
    assert!(cli.metrics_addr.is_none());

    match cli.command {
        Commands::Backfill(args) => {
            assert_eq!(args.start.to_string(), "2024-01");
            assert_eq!(args.end.to_string(), "2024-06");
            assert!(!args.dry_run);
            assert!(!args.extract_only);
            assert!(!args.stop_on_error);
            assert!(!args.reset);
            assert!(!args.force);
        }
        other => panic!("expected backfill, got {other:?}"),
    }
}

#[test]
fn test_flags_after_subcommand() {
    let cli = Cli::parse_from(backfill_args(&[
        "--dry-run",
        "--stop-on-error",
        "--output-format",
        "json",
        "--max-attempts",
        "5",
    ]));
    assert_eq!(cli.output_format, OutputFormat::Json);
    assert_eq!(cli.max_attempts, 5);
    match cli.command {
        Commands::Backfill(args) => {
            assert!(args.dry_run);
            assert!(args.stop_on_error);
        }
        other => panic!("expected backfill, got {other:?}"),
    }
}

#[test]
fn test_max_attempts_range() {
    assert!(Cli::try_parse_from(backfill_args(&["--max-attempts", "0"])).is_err());
    assert!(Cli::try_parse_from(backfill_args(&["--max-attempts", "21"])).is_err());
    assert!(Cli::try_parse_from(backfill_args(&["--max-attempts", "20"])).is_ok());
}

#[test]
fn test_invalid_month_rejected() {
    let args = ["property-etl", "backfill", "--start", "2024-1", "--end", "2024-02"];
    assert!(Cli::try_parse_from(args).is_err());
}

#[test]
fn test_pipeline_config_from_flags() {
    let cli = Cli::parse_from(backfill_args(&[
        "--max-attempts",
        "4",
        "--initial-backoff-ms",
        "250",
        "--stage-timeout-secs",
        "30",
        "--max-period-retries",
        "7",
        "--data-dir",
        "/tmp/wh",
    ]));
    let config = cli.pipeline_config();

    assert_eq!(config.backfill.retry.max_attempts, 4);
    assert_eq!(config.backfill.retry.initial_backoff, Duration::from_millis(250));
    assert_eq!(config.backfill.retry.stage_timeout, Duration::from_secs(30));
    assert_eq!(config.backfill.max_period_retries, 7);
    assert_eq!(config.data_dir, PathBuf::from("/tmp/wh"));
    assert!(config.graphql.is_none());
}

#[test]
fn test_graphql_settings_from_flags() {
    let cli = Cli::parse_from(backfill_args(&[
        "--source",
        "graphql",
        "--endpoint",
        "https://api.example.com/graphql",
        "--api-key",
        "secret",
        "--page-size",
        "100",
    ]));
    let config = cli.pipeline_config();

    assert_eq!(config.source, SourceKind::Graphql);
    let graphql = config.graphql.unwrap();
    assert_eq!(graphql.endpoint, "https://api.example.com/graphql");
    assert_eq!(graphql.api_key.as_deref(), Some("secret"));
    assert_eq!(graphql.page_size, 100);
}

#[test]
fn test_reset_requires_period() {
    assert!(Cli::try_parse_from(["property-etl", "reset"]).is_err());
    let cli = Cli::parse_from(["property-etl", "reset", "--period", "2024-03"]);
    match cli.command {
        Commands::Reset(cmd) => assert_eq!(cmd.period.to_string(), "2024-03"),
        other => panic!("expected reset, got {other:?}"),
    }
}

#[test]
fn test_validate_threshold_flag() {
    let cli = Cli::parse_from(["property-etl", "validate", "--fk-threshold", "90"]);
    match cli.command {
        Commands::Validate(cmd) => assert_eq!(cmd.fk_threshold, Some(90.0)),
        other => panic!("expected validate, got {other:?}"),
    }
}
