//! Integration tests for SCD Type 2 history across many batches

use chrono::NaiveDate;
use property_etl::scd::{DimensionSpec, DimensionTable, Normalizer, ScdError, SourceRow};
use serde_json::{json, Value};

fn spec() -> DimensionSpec {
    DimensionSpec::new("dim_property", "tax_assessor_id")
        .track("zip", Normalizer::Code)
        .track("market_value", Normalizer::Decimal { scale: 2 })
        .track_from("property_city", "city", Normalizer::UpperText)
}

fn row(id: &str, zip: Value, value: Value, city: &str) -> SourceRow {
    let mut row = SourceRow::new();
    row.insert("tax_assessor_id".into(), json!(id));
    row.insert("zip".into(), zip);
    row.insert("market_value".into(), value);
    row.insert("city".into(), json!(city));
    row
}

fn month(m: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, m, 1).unwrap()
}

#[test]
fn test_monthly_batches_build_contiguous_history() {
    let spec = spec();
    let mut table = DimensionTable::new("dim_property");

    let values = ["100000", "100000.00", "125000", "125000", "150000.5"];
    for (i, value) in values.iter().enumerate() {
        let batch = [row("A1", json!("94105"), json!(value), "San Francisco")];
        table.merge(&spec, &batch, month(i as u32 + 1)).unwrap();
    }

    let history = table.history("A1");
    assert_eq!(history.len(), 3);
    assert_eq!(history[0].valid_from, month(1));
    assert_eq!(history[0].valid_to, Some(month(3)));
    assert_eq!(history[1].valid_to, Some(month(5)));
    assert_eq!(history[2].valid_to, None);
    assert!(history[2].is_current);
    assert_eq!(history[2].attributes["market_value"], json!("150000.5"));
    assert_eq!(history[0].attributes["property_city"], json!("SAN FRANCISCO"));
    table.verify_history().unwrap();

    let feb = NaiveDate::from_ymd_opt(2024, 2, 14).unwrap();
    assert_eq!(
        table.version_on("A1", feb).unwrap().surrogate_key,
        history[0].surrogate_key
    );
}

#[test]
fn test_equivalent_formatting_is_not_a_change() {
    let spec = spec();
    let mut table = DimensionTable::new("dim_property");
    table
        .merge(&spec, &[row("A1", json!("94105"), json!("100"), "Oakland")], month(1))
        .unwrap();

    let stats = table
        .merge(
            &spec,
            &[row("A1", json!(94105.0), json!(100.0), "  oakland ")],
            month(2),
        )
        .unwrap();
    assert_eq!(stats.changed(), 0);
    assert_eq!(stats.unchanged, 1);
    assert_eq!(table.len(), 1);
}

#[test]
fn test_reapplying_batch_is_idempotent() {
    let spec = spec();
    let mut table = DimensionTable::new("dim_property");
    let batch = vec![
        row("A1", json!("94105"), json!("1"), "Oakland"),
        row("B2", json!("94607"), json!("2"), "Oakland"),
    ];

    table.merge(&spec, &batch, month(1)).unwrap();
    let snapshot = table.clone();
    let stats = table.merge(&spec, &batch, month(1)).unwrap();

    assert_eq!(stats.changed(), 0);
    assert_eq!(table.rows(), snapshot.rows());
}

#[test]
fn test_same_day_change_corrects_in_place() {
    let spec = spec();
    let mut table = DimensionTable::new("dim_property");
    table
        .merge(&spec, &[row("A1", json!("94105"), json!("1"), "Oakland")], month(1))
        .unwrap();

    let stats = table
        .merge(&spec, &[row("A1", json!("94105"), json!("2"), "Oakland")], month(1))
        .unwrap();
    assert_eq!(stats.corrected, 1);
    assert_eq!(table.len(), 1);
    assert_eq!(table.current("A1").unwrap().attributes["market_value"], json!("2"));
}

#[test]
fn test_earlier_batch_is_rejected() {
    let spec = spec();
    let mut table = DimensionTable::new("dim_property");
    table
        .merge(&spec, &[row("A1", json!("94105"), json!("1"), "Oakland")], month(3))
        .unwrap();

    let err = table
        .merge(&spec, &[row("A1", json!("94105"), json!("2"), "Oakland")], month(2))
        .unwrap_err();
    assert!(matches!(err, ScdError::StaleBatch { .. }));
    assert_eq!(table.len(), 1);
}

#[test]
fn test_absent_member_stays_current() {
    let spec = spec();
    let mut table = DimensionTable::new("dim_property");
    table
        .merge(
            &spec,
            &[
                row("A1", json!("94105"), json!("1"), "Oakland"),
                row("B2", json!("94607"), json!("2"), "Oakland"),
            ],
            month(1),
        )
        .unwrap();
    table
        .merge(&spec, &[row("A1", json!("94105"), json!("5"), "Oakland")], month(2))
        .unwrap();

    let b2 = table.current("B2").unwrap();
    assert!(b2.is_current);
    assert_eq!(b2.valid_to, None);
    assert_eq!(table.history("A1").len(), 2);
    assert_eq!(table.current_rows().count(), 2);
}

#[test]
fn test_surrogate_keys_are_unique_and_increasing() {
    let spec = spec();
    let mut table = DimensionTable::new("dim_property");
    for m in 1..=4 {
        let batch = [
            row("A1", json!("94105"), json!(m.to_string()), "Oakland"),
            row("B2", json!("94607"), json!((m * 10).to_string()), "Oakland"),
        ];
        table.merge(&spec, &batch, month(m)).unwrap();
    }

    let mut keys: Vec<u64> = table.rows().iter().map(|r| r.surrogate_key).collect();
    let total = keys.len();
    keys.sort_unstable();
    keys.dedup();
    assert_eq!(keys.len(), total);
    assert_eq!(total, 8);
    assert_eq!(table.next_surrogate_key(), 9);
}

#[test]
fn test_missing_natural_key_rejects_batch() {
    let spec = spec();
    let mut table = DimensionTable::new("dim_property");
    let mut bad = row("A1", json!("94105"), json!("1"), "Oakland");
    bad.remove("tax_assessor_id");

    let err = table.merge(&spec, &[bad], month(1)).unwrap_err();
    assert!(matches!(err, ScdError::MissingNaturalKey { .. }));
    assert!(table.is_empty());
}
