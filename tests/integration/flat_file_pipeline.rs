//! End-to-end tests: CSV drops through the warehouse to validation

use super::support::{fast_config, month};
use property_etl::backfill::{BackfillOptions, BackfillOrchestrator, PeriodState, RetryPolicy};
use property_etl::checkpoint::FileCheckpointStore;
use property_etl::config::{PipelineConfig, SourceKind};
use property_etl::stage::{ErrorClass, Stage};
use property_etl::transform::{DIM_ENTITY, DIM_PROPERTY, FACT_TRANSACTION};
use property_etl::validation::DataQualityValidator;
use property_etl::warehouse::Warehouse;
use serde_json::{json, Value};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;

const PROPERTY_HEADER: &str = "tax_assessor_id,parcel_number,address,city,state,zip,county,property_use_code,year_built,building_sqft,lot_sqft,units_count,assessed_value,market_value,latitude,longitude";
const TRANSACTION_HEADER: &str = "recorder_id,tax_assessor_id,recorded_date,instrument_date,document_type_code,document_amount,arms_length_code";
const GRANTOR_HEADER: &str = "grantor_id,recorder_id,grantor_name,grantor_first_name,grantor_last_name,grantor_entity_code,grantor_address";
const GRANTEE_HEADER: &str = "grantee_id,recorder_id,grantee_name,grantee_first_name,grantee_last_name,grantee_entity_code,grantee_address";

fn write_table(drop_dir: &Path, period: &str, table: &str, header: &str, rows: &[&str]) {
    let dir = drop_dir.join(period);
    fs::create_dir_all(&dir).unwrap();
    let mut body = String::from(header);
    for row in rows {
        body.push('\n');
        body.push_str(row);
    }
    body.push('\n');
    fs::write(dir.join(format!("{table}.csv")), body).unwrap();
}

fn seed_drops(drop_dir: &Path) {
    write_table(
        drop_dir,
        "2024-01",
        "properties",
        PROPERTY_HEADER,
        &[
            "A1,0012-034,1 Main St,Oakland,CA,94607,Alameda,SFR,1925,1400,5000,1,500000,650000,37.80,-122.27",
            "B2,0012-035,3 Main St,Oakland,CA,94607,Alameda,SFR,1931,1100,4000,1,400000,520000,37.81,-122.28",
        ],
    );
    write_table(
        drop_dir,
        "2024-01",
        "transactions",
        TRANSACTION_HEADER,
        &[
            "R1,A1,2024-01-15,2024-01-10,DEED,650000,Y",
            "R2,B2,2024-01-20,2024-01-18,MTG,0,N",
            // outside the period window
            "R0,A1,2023-12-30,2023-12-28,DEED,1,Y",
        ],
    );
    write_table(
        drop_dir,
        "2024-01",
        "grantors",
        GRANTOR_HEADER,
        &[
            "G1,R1,Jane Doe,Jane,Doe,,1 Main St",
            "G2,R2,Bob Roe,Bob,Roe,,3 Main St",
        ],
    );
    write_table(
        drop_dir,
        "2024-01",
        "grantees",
        GRANTEE_HEADER,
        &[
            "E1,R1,Acme Holdings LLC,,,LLC,9 Market St",
            "E2,R2,First Bank,,,C,10 Market St",
        ],
    );

    write_table(
        drop_dir,
        "2024-02",
        "properties",
        PROPERTY_HEADER,
        &["A1,0012-034,1 Main St,Oakland,CA,94607,Alameda,SFR,1925,1400,5000,1,500000,700000.00,37.80,-122.27"],
    );
    write_table(
        drop_dir,
        "2024-02",
        "transactions",
        TRANSACTION_HEADER,
        &["R3,A1,2024-02-05,2024-02-01,DEED,700000,Y"],
    );
    write_table(
        drop_dir,
        "2024-02",
        "grantors",
        GRANTOR_HEADER,
        &["G3,R3,Acme Holdings LLC,,,LLC,9 Market St"],
    );
    write_table(
        drop_dir,
        "2024-02",
        "grantees",
        GRANTEE_HEADER,
        &["E3,R3,Ann Poe,Ann,Poe,,1 Main St"],
    );
}

fn pipeline_config(root: &Path) -> PipelineConfig {
    PipelineConfig {
        checkpoint_path: root.join("checkpoint.json"),
        data_dir: root.join("data"),
        drop_dir: root.join("drops"),
        source: SourceKind::FlatFile,
        graphql: None,
        backfill: fast_config(),
    }
}

fn orchestrator(config: &PipelineConfig) -> BackfillOrchestrator<FileCheckpointStore> {
    let store = FileCheckpointStore::open(&config.checkpoint_path).unwrap();
    BackfillOrchestrator::new(store, config.build_executor().unwrap(), config.backfill)
}

fn fact<'a>(facts: &'a [property_etl::scd::SourceRow], recorder_id: &str) -> &'a property_etl::scd::SourceRow {
    facts
        .iter()
        .find(|f| f["recorder_id"] == json!(recorder_id))
        .unwrap()
}

#[tokio::test]
async fn test_two_months_build_versioned_star_schema() {
    let dir = TempDir::new().unwrap();
    let config = pipeline_config(dir.path());
    seed_drops(&config.drop_dir);

    let summary = orchestrator(&config)
        .run(&BackfillOptions::new(month("2024-01"), month("2024-02")))
        .await
        .unwrap();
    assert!(summary.is_success(), "{summary:?}");
    assert_eq!(summary.completed_count(), 2);

    let warehouse = Warehouse::open(&config.data_dir).unwrap();
    let properties = warehouse.load_dimension(DIM_PROPERTY).unwrap();
    let a1 = properties.history("A1");
    assert_eq!(a1.len(), 2);
    assert_eq!(a1[0].attributes["market_value"], json!("650000"));
    assert_eq!(a1[1].attributes["market_value"], json!("700000"));
    assert_eq!(a1[0].attributes["property_city"], json!("OAKLAND"));
    assert_eq!(properties.history("B2").len(), 1);
    properties.verify_history().unwrap();

    let entities = warehouse.load_dimension(DIM_ENTITY).unwrap();
    assert_eq!(entities.member_count(), 5);
    assert_eq!(
        entities.current("ACME HOLDINGS LLC").unwrap().attributes["entity_type"],
        json!("LLC")
    );

    let facts = warehouse.load_facts(FACT_TRANSACTION).unwrap();
    assert_eq!(facts.len(), 3);
    assert!(facts.iter().all(|f| f["recorder_id"] != json!("R0")));
    assert_eq!(fact(&facts, "R1")["property_key"], json!(a1[0].surrogate_key));
    assert_eq!(fact(&facts, "R3")["property_key"], json!(a1[1].surrogate_key));
    assert_eq!(fact(&facts, "R1")["transaction_category"], json!("SALE"));
    assert_eq!(fact(&facts, "R2")["transaction_category"], json!("MORTGAGE"));
    assert_eq!(fact(&facts, "R2")["is_sale"], json!(false));
    assert_eq!(fact(&facts, "R3")["grantor_count"], json!(1));

    let report = DataQualityValidator::new(warehouse).run().unwrap();
    assert!(report.is_passing(), "{report:?}");
    assert_eq!(report.failed_count(), 0);
    assert!(!report.checks.is_empty());
}

#[tokio::test]
async fn test_forced_rerun_lands_again_but_changes_nothing() {
    let dir = TempDir::new().unwrap();
    let config = pipeline_config(dir.path());
    seed_drops(&config.drop_dir);
    let range = BackfillOptions::new(month("2024-01"), month("2024-02"));

    orchestrator(&config).run(&range).await.unwrap();
    let warehouse = Warehouse::open(&config.data_dir).unwrap();
    let dims_before = warehouse.load_dimension(DIM_PROPERTY).unwrap();
    let facts_before = warehouse.load_facts(FACT_TRANSACTION).unwrap();
    let raw_before = warehouse.read_raw("transactions", None).unwrap().len();

    let summary = orchestrator(&config).run(&range.with_force(true)).await.unwrap();
    assert!(summary.is_success());
    for period in &summary.periods {
        let transform = period
            .stages
            .iter()
            .find(|s| s.stage == Stage::Transform)
            .unwrap();
        assert_eq!(transform.rows, 0, "{} changed rows", period.period_key);
    }

    // raw landing is append-only
    assert_eq!(
        warehouse.read_raw("transactions", None).unwrap().len(),
        raw_before * 2
    );
    assert_eq!(
        warehouse.load_dimension(DIM_PROPERTY).unwrap().rows(),
        dims_before.rows()
    );
    assert_eq!(warehouse.load_facts(FACT_TRANSACTION).unwrap(), facts_before);
}

#[tokio::test]
async fn test_bad_drop_fails_period_until_fixed() {
    let dir = TempDir::new().unwrap();
    let config = pipeline_config(dir.path());
    seed_drops(&config.drop_dir);
    write_table(
        &config.drop_dir,
        "2024-02",
        "transactions",
        TRANSACTION_HEADER,
        &["R3,A1,not-a-date,2024-02-01,DEED,700000,Y"],
    );
    let range = BackfillOptions::new(month("2024-01"), month("2024-02"));

    let summary = orchestrator(&config).run(&range).await.unwrap();
    assert_eq!(summary.completed_count(), 1);
    match &summary.period("2024-02").unwrap().state {
        PeriodState::Failed { stage, class, .. } => {
            assert_eq!(*stage, Stage::Extract);
            assert_eq!(*class, ErrorClass::Validation);
        }
        other => panic!("expected extract failure, got {other:?}"),
    }

    write_table(
        &config.drop_dir,
        "2024-02",
        "transactions",
        TRANSACTION_HEADER,
        &["R3,A1,2024-02-05,2024-02-01,DEED,700000,Y"],
    );
    let summary = orchestrator(&config).run(&range).await.unwrap();
    assert!(summary.is_success());
    assert_eq!(summary.skipped_count(), 1);

    let warehouse = Warehouse::open(&config.data_dir).unwrap();
    let facts: Vec<Value> = warehouse
        .load_facts(FACT_TRANSACTION)
        .unwrap()
        .into_iter()
        .map(|f| f["recorder_id"].clone())
        .collect();
    assert!(facts.contains(&json!("R3")));
}

#[tokio::test]
async fn test_missing_drop_completes_empty_period() {
    let dir = TempDir::new().unwrap();
    let config = pipeline_config(dir.path());

    let summary = orchestrator(&config)
        .run(&BackfillOptions::new(month("2024-05"), month("2024-05")))
        .await
        .unwrap();
    assert!(summary.is_success());
    assert_eq!(summary.periods[0].stages[0].rows, 0);

    let warehouse = Warehouse::open(&config.data_dir).unwrap();
    assert!(warehouse.load_facts(FACT_TRANSACTION).unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_timed_out_extracts_land_whole_batches() {
    let dir = TempDir::new().unwrap();
    let mut config = pipeline_config(dir.path());
    let rows: Vec<String> = (0..20_000)
        .map(|i| {
            format!("P{i},0012-{i},{i} Main St,Oakland,CA,94607,Alameda,SFR,1925,1400,5000,1,500000,650000,37.80,-122.27")
        })
        .collect();
    let rows: Vec<&str> = rows.iter().map(String::as_str).collect();
    write_table(&config.drop_dir, "2024-01", "properties", PROPERTY_HEADER, &rows);

    config.backfill.retry = RetryPolicy::immediate(3).with_stage_timeout(Duration::from_millis(1));
    let range = BackfillOptions::new(month("2024-01"), month("2024-01"));
    let summary = orchestrator(&config)
        .run(&range.with_extract_only(true))
        .await
        .unwrap();
    let attempts = summary.period("2024-01").unwrap().stages[0].attempts;
    assert!(attempts >= 1);

    // every attempt ran to completion, one after another
    let warehouse = Warehouse::open(&config.data_dir).unwrap();
    let landed = warehouse.read_raw("properties", Some("2024-01")).unwrap();
    assert_eq!(landed.len(), 20_000 * attempts as usize);

    config.backfill = fast_config();
    let summary = orchestrator(&config).run(&range).await.unwrap();
    assert!(summary.is_success(), "{summary:?}");

    let properties = warehouse.load_dimension(DIM_PROPERTY).unwrap();
    assert_eq!(properties.member_count(), 20_000);
    assert_eq!(properties.history("P19999").len(), 1);
    properties.verify_history().unwrap();
}
