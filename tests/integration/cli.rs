//! Integration tests for the property-etl binary
//!
//! Tests verify:
//! - Backfill over CSV drops with JSON output
//! - Dry-run writes no checkpoint
//! - Status and reset operate on the checkpoint file
//! - Validate reports on the analytics tables
//! - Failures exit non-zero

use assert_cmd::Command;
use serde_json::Value;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn seed_january(drop_dir: &Path) {
    let dir = drop_dir.join("2024-01");
    fs::create_dir_all(&dir).unwrap();
    fs::write(
        dir.join("properties.csv"),
        "tax_assessor_id,address,city,market_value\nA1,1 Main St,Oakland,650000\n",
    )
    .unwrap();
    fs::write(
        dir.join("transactions.csv"),
        "recorder_id,tax_assessor_id,recorded_date,document_amount,arms_length_code\nR1,A1,2024-01-15,650000,Y\n",
    )
    .unwrap();
    fs::write(
        dir.join("grantees.csv"),
        "grantee_id,recorder_id,grantee_name,grantee_first_name,grantee_last_name\nE1,R1,Jane Doe,Jane,Doe\n",
    )
    .unwrap();
}

/// Command with every path pointed into `root`
fn etl(root: &Path) -> Command {
    let mut cmd = Command::cargo_bin("property-etl").unwrap();
    cmd.arg("--checkpoint-path")
        .arg(root.join("checkpoint.json"))
        .arg("--data-dir")
        .arg(root.join("data"))
        .arg("--drop-dir")
        .arg(root.join("drops"))
        .arg("--initial-backoff-ms")
        .arg("0")
        .env("RUST_LOG", "property_etl=warn");
    cmd
}

fn stdout_json(output: &std::process::Output) -> Value {
    serde_json::from_slice(&output.stdout).unwrap()
}

#[test]
fn test_backfill_json_output_and_rerun() {
    let temp_dir = TempDir::new().unwrap();
    seed_january(&temp_dir.path().join("drops"));

    let output = etl(temp_dir.path())
        .args(["--output-format", "json", "backfill", "--start", "2024-01", "--end", "2024-01"])
        .assert()
        .success()
        .get_output()
        .clone();
    let json = stdout_json(&output);
    assert_eq!(json["success"], true);
    assert_eq!(json["completed"], 1);
    assert_eq!(json["periods"][0]["period_key"], "2024-01");
    assert_eq!(json["periods"][0]["state"], "completed");
    assert!(temp_dir.path().join("checkpoint.json").exists());
    assert!(temp_dir
        .path()
        .join("data")
        .join("analytics")
        .join("fact_transaction.json")
        .exists());

    let output = etl(temp_dir.path())
        .args(["--output-format", "json", "backfill", "--start", "2024-01", "--end", "2024-01"])
        .assert()
        .success()
        .get_output()
        .clone();
    let json = stdout_json(&output);
    assert_eq!(json["skipped"], 1);
    assert_eq!(json["completed"], 0);
}

#[test]
fn test_backfill_with_validate_passes() {
    let temp_dir = TempDir::new().unwrap();
    seed_january(&temp_dir.path().join("drops"));

    let output = etl(temp_dir.path())
        .args([
            "--output-format",
            "json",
            "backfill",
            "--start",
            "2024-01",
            "--end",
            "2024-01",
            "--validate",
        ])
        .assert()
        .success()
        .get_output()
        .clone();
    let json = stdout_json(&output);
    assert!(!json["validation"]["checks"].as_array().unwrap().is_empty());
}

#[test]
fn test_dry_run_writes_no_checkpoint() {
    let temp_dir = TempDir::new().unwrap();

    let output = etl(temp_dir.path())
        .args([
            "--output-format",
            "json",
            "backfill",
            "--start",
            "2024-01",
            "--end",
            "2024-03",
            "--dry-run",
        ])
        .assert()
        .success()
        .get_output()
        .clone();
    let json = stdout_json(&output);
    assert_eq!(json["dry_run"], true);
    assert_eq!(json["planned"], 3);
    assert_eq!(json["periods"][0]["state"], "planned");
    assert_eq!(json["periods"][0]["from"], "extract");
    assert!(!temp_dir.path().join("checkpoint.json").exists());
}

#[test]
fn test_status_and_reset() {
    let temp_dir = TempDir::new().unwrap();
    seed_january(&temp_dir.path().join("drops"));
    etl(temp_dir.path())
        .args(["backfill", "--start", "2024-01", "--end", "2024-02"])
        .assert()
        .success();

    let output = etl(temp_dir.path())
        .args(["--output-format", "json", "status"])
        .assert()
        .success()
        .get_output()
        .clone();
    let records = stdout_json(&output);
    let records = records.as_array().unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0]["period_key"], "2024-01");
    assert_eq!(records[0]["status"], "completed");

    let output = etl(temp_dir.path())
        .args(["--output-format", "json", "reset", "--period", "2024-01"])
        .assert()
        .success()
        .get_output()
        .clone();
    assert_eq!(stdout_json(&output)["removed"], true);

    let output = etl(temp_dir.path())
        .args(["--output-format", "json", "status"])
        .assert()
        .success()
        .get_output()
        .clone();
    let records = stdout_json(&output);
    assert_eq!(records.as_array().unwrap().len(), 1);
    assert_eq!(records[0]["period_key"], "2024-02");
}

#[test]
fn test_validate_empty_warehouse() {
    let temp_dir = TempDir::new().unwrap();

    let output = etl(temp_dir.path())
        .args(["--output-format", "json", "validate"])
        .assert()
        .success()
        .get_output()
        .clone();
    let report = stdout_json(&output);
    assert_eq!(report["checks"].as_array().unwrap().len(), 0);
    assert_eq!(report["statistics"].as_array().unwrap().len(), 4);
}

#[test]
fn test_failed_period_exits_non_zero() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path().join("drops").join("2024-01");
    fs::create_dir_all(&dir).unwrap();
    fs::write(
        dir.join("transactions.csv"),
        "recorder_id,recorded_date\nR1,someday\n",
    )
    .unwrap();

    let output = etl(temp_dir.path())
        .args(["--output-format", "json", "backfill", "--start", "2024-01", "--end", "2024-01"])
        .assert()
        .failure()
        .get_output()
        .clone();
    let json = stdout_json(&output);
    assert_eq!(json["success"], false);
    assert_eq!(json["failed_periods"][0]["period_key"], "2024-01");
    assert_eq!(json["failed_periods"][0]["class"], "validation");
}

#[test]
fn test_inverted_range_exits_non_zero() {
    let temp_dir = TempDir::new().unwrap();
    etl(temp_dir.path())
        .args(["backfill", "--start", "2024-03", "--end", "2024-01"])
        .assert()
        .failure();
}

#[test]
fn test_invalid_month_is_rejected() {
    let temp_dir = TempDir::new().unwrap();
    etl(temp_dir.path())
        .args(["backfill", "--start", "2024-13", "--end", "2024-14"])
        .assert()
        .failure();
}

#[test]
fn test_graphql_source_without_endpoint_fails() {
    let temp_dir = TempDir::new().unwrap();
    etl(temp_dir.path())
        .env_remove("PROPERTY_ETL_ENDPOINT")
        .args([
            "--source",
            "graphql",
            "backfill",
            "--start",
            "2024-01",
            "--end",
            "2024-01",
        ])
        .assert()
        .failure();
}
