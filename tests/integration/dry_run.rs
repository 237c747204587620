//! Integration tests for dry-run planning

use super::support::{checkpoint_path, month, orchestrator, ScriptedPipeline};
use property_etl::backfill::{BackfillError, BackfillOptions, PeriodState};
use property_etl::checkpoint::PeriodStatus;
use property_etl::stage::{Stage, StageError};
use std::fs;
use tempfile::TempDir;

#[tokio::test]
async fn test_dry_run_plans_without_running_or_writing() {
    let dir = TempDir::new().unwrap();
    let pipeline = ScriptedPipeline::new();

    let summary = orchestrator(dir.path(), &pipeline)
        .run(&BackfillOptions::new(month("2024-01"), month("2024-03")).with_dry_run(true))
        .await
        .unwrap();

    assert!(summary.dry_run);
    assert_eq!(summary.planned_count(), 3);
    assert!(summary.periods.iter().all(|p| p.state
        == PeriodState::Planned {
            from: Stage::Extract,
            status: None,
        }));
    assert!(pipeline.calls(Stage::Extract).is_empty());
    assert!(!checkpoint_path(dir.path()).exists());
}

#[tokio::test]
async fn test_dry_run_reflects_checkpoint_state() {
    let dir = TempDir::new().unwrap();
    let pipeline = ScriptedPipeline::new();
    pipeline.fail(
        Stage::Transform,
        "2024-02",
        StageError::Validation("bad".into()),
        1,
    );
    let range = BackfillOptions::new(month("2024-01"), month("2024-03"));
    orchestrator(dir.path(), &pipeline)
        .run(&range.with_stop_on_error(true))
        .await
        .unwrap();
    let before = fs::read(checkpoint_path(dir.path())).unwrap();
    pipeline.clear_calls();

    let summary = orchestrator(dir.path(), &pipeline)
        .run(&range.with_dry_run(true))
        .await
        .unwrap();

    assert_eq!(
        summary.period("2024-01").unwrap().state,
        PeriodState::Skipped {
            status: PeriodStatus::Completed
        }
    );
    assert_eq!(
        summary.period("2024-02").unwrap().state,
        PeriodState::Planned {
            from: Stage::Transform,
            status: Some(PeriodStatus::Failed),
        }
    );
    assert_eq!(
        summary.period("2024-03").unwrap().state,
        PeriodState::Planned {
            from: Stage::Extract,
            status: None,
        }
    );
    assert!(summary.is_success());
    assert!(pipeline.calls(Stage::Extract).is_empty());
    assert!(pipeline.calls(Stage::Transform).is_empty());
    assert_eq!(fs::read(checkpoint_path(dir.path())).unwrap(), before);
}

#[tokio::test]
async fn test_dry_run_with_reset_plans_fresh_but_clears_nothing() {
    let dir = TempDir::new().unwrap();
    let pipeline = ScriptedPipeline::new();
    let range = BackfillOptions::new(month("2024-01"), month("2024-02"));
    orchestrator(dir.path(), &pipeline).run(&range).await.unwrap();
    let before = fs::read(checkpoint_path(dir.path())).unwrap();

    let summary = orchestrator(dir.path(), &pipeline)
        .run(&range.with_dry_run(true).with_reset(true))
        .await
        .unwrap();

    assert_eq!(summary.planned_count(), 2);
    assert_eq!(fs::read(checkpoint_path(dir.path())).unwrap(), before);
}

#[tokio::test]
async fn test_inverted_range_is_rejected() {
    let dir = TempDir::new().unwrap();
    let pipeline = ScriptedPipeline::new();

    let result = orchestrator(dir.path(), &pipeline)
        .run(&BackfillOptions::new(month("2024-03"), month("2024-01")))
        .await;
    assert!(matches!(result, Err(BackfillError::InvalidRange { .. })));
}
