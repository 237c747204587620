//! Integration tests for checkpointed resume across runs

use super::support::{checkpoint_path, month, orchestrator, ScriptedPipeline};
use async_trait::async_trait;
use property_etl::backfill::{
    BackfillOptions, BackfillOrchestrator, PeriodState, StageExecutor,
};
use property_etl::checkpoint::{
    CheckpointRecord, CheckpointStore, FileCheckpointStore, PeriodStatus,
};
use property_etl::planner::Period;
use property_etl::shutdown::{ShutdownCoordinator, SharedShutdown};
use property_etl::stage::{Stage, StageError, TransformResult, Transformer};
use std::sync::Arc;
use tempfile::TempDir;

#[tokio::test]
async fn test_fresh_run_completes_every_period() {
    let dir = TempDir::new().unwrap();
    let pipeline = ScriptedPipeline::new();

    let summary = orchestrator(dir.path(), &pipeline)
        .run(&BackfillOptions::new(month("2024-01"), month("2024-03")))
        .await
        .unwrap();

    assert!(summary.is_success());
    assert_eq!(summary.completed_count(), 3);
    assert_eq!(
        pipeline.calls(Stage::Extract),
        vec!["2024-01", "2024-02", "2024-03"]
    );
    assert_eq!(
        pipeline.calls(Stage::Transform),
        vec!["2024-01", "2024-02", "2024-03"]
    );

    let store = FileCheckpointStore::open(checkpoint_path(dir.path())).unwrap();
    for key in ["2024-01", "2024-02", "2024-03"] {
        let record = store.get(key).unwrap();
        assert_eq!(record.status(), PeriodStatus::Completed);
        assert_eq!(record.retry_count(), 0);
        assert!(record.completed_at().is_some());
    }
}

#[tokio::test]
async fn test_rerun_skips_completed_periods() {
    let dir = TempDir::new().unwrap();
    let pipeline = ScriptedPipeline::new();
    let options = BackfillOptions::new(month("2024-01"), month("2024-02"));

    orchestrator(dir.path(), &pipeline).run(&options).await.unwrap();
    pipeline.clear_calls();

    let summary = orchestrator(dir.path(), &pipeline).run(&options).await.unwrap();
    assert!(summary.is_success());
    assert_eq!(summary.skipped_count(), 2);
    assert!(pipeline.calls(Stage::Extract).is_empty());
    assert!(pipeline.calls(Stage::Transform).is_empty());
}

#[tokio::test]
async fn test_extended_range_only_runs_new_periods() {
    let dir = TempDir::new().unwrap();
    let pipeline = ScriptedPipeline::new();

    orchestrator(dir.path(), &pipeline)
        .run(&BackfillOptions::new(month("2023-11"), month("2023-12")))
        .await
        .unwrap();
    pipeline.clear_calls();

    let summary = orchestrator(dir.path(), &pipeline)
        .run(&BackfillOptions::new(month("2023-11"), month("2024-02")))
        .await
        .unwrap();
    assert_eq!(summary.skipped_count(), 2);
    assert_eq!(summary.completed_count(), 2);
    assert_eq!(pipeline.calls(Stage::Extract), vec!["2024-01", "2024-02"]);
}

#[tokio::test]
async fn test_extract_only_then_transform() {
    let dir = TempDir::new().unwrap();
    let pipeline = ScriptedPipeline::new();
    let range = BackfillOptions::new(month("2024-01"), month("2024-02"));

    let summary = orchestrator(dir.path(), &pipeline)
        .run(&range.with_extract_only(true))
        .await
        .unwrap();
    assert!(summary.is_success());
    assert!(summary
        .periods
        .iter()
        .all(|p| p.state == PeriodState::Extracted));
    assert!(pipeline.calls(Stage::Transform).is_empty());

    let store = FileCheckpointStore::open(checkpoint_path(dir.path())).unwrap();
    assert_eq!(store.get("2024-01").unwrap().status(), PeriodStatus::ExtractDone);
    pipeline.clear_calls();

    let summary = orchestrator(dir.path(), &pipeline).run(&range).await.unwrap();
    assert_eq!(summary.completed_count(), 2);
    assert!(pipeline.calls(Stage::Extract).is_empty());
    assert_eq!(pipeline.calls(Stage::Transform), vec!["2024-01", "2024-02"]);
}

#[tokio::test]
async fn test_crashed_attempt_is_retried_from_extract() {
    let dir = TempDir::new().unwrap();
    {
        let mut store = FileCheckpointStore::open(checkpoint_path(dir.path())).unwrap();
        let mut record = CheckpointRecord::new("2024-01");
        record.begin_attempt(PeriodStatus::InProgress, 0).unwrap();
        store.put(record).unwrap();
    }

    let pipeline = ScriptedPipeline::new();
    let summary = orchestrator(dir.path(), &pipeline)
        .run(&BackfillOptions::new(month("2024-01"), month("2024-01")))
        .await
        .unwrap();

    assert_eq!(summary.completed_count(), 1);
    assert_eq!(pipeline.calls(Stage::Extract), vec!["2024-01"]);

    let store = FileCheckpointStore::open(checkpoint_path(dir.path())).unwrap();
    let record = store.get("2024-01").unwrap();
    assert_eq!(record.status(), PeriodStatus::Completed);
    assert_eq!(record.retry_count(), 1);
}

#[tokio::test]
async fn test_force_reruns_completed_periods() {
    let dir = TempDir::new().unwrap();
    let pipeline = ScriptedPipeline::new();
    let range = BackfillOptions::new(month("2024-01"), month("2024-02"));

    orchestrator(dir.path(), &pipeline).run(&range).await.unwrap();
    pipeline.clear_calls();

    let summary = orchestrator(dir.path(), &pipeline)
        .run(&range.with_force(true))
        .await
        .unwrap();
    assert_eq!(summary.completed_count(), 2);
    assert_eq!(pipeline.calls(Stage::Extract), vec!["2024-01", "2024-02"]);
}

/// Requests shutdown while transforming, like Ctrl+C mid-period
struct InterruptingTransformer {
    inner: Arc<ScriptedPipeline>,
    shutdown: SharedShutdown,
}

#[async_trait]
impl Transformer for InterruptingTransformer {
    async fn transform(&self, period: &Period) -> Result<TransformResult, StageError> {
        self.shutdown.request_shutdown();
        self.inner.transform(period).await
    }
}

#[tokio::test]
async fn test_shutdown_finishes_current_period_then_resumes() {
    let dir = TempDir::new().unwrap();
    let pipeline = ScriptedPipeline::new();
    let shutdown = ShutdownCoordinator::shared();
    let range = BackfillOptions::new(month("2024-01"), month("2024-03"));

    let store = FileCheckpointStore::open(checkpoint_path(dir.path())).unwrap();
    let transformer = Arc::new(InterruptingTransformer {
        inner: pipeline.clone(),
        shutdown: shutdown.clone(),
    });
    let executor = StageExecutor::new(pipeline.clone(), transformer);
    let mut interrupted = BackfillOrchestrator::new(store, executor, super::support::fast_config())
        .with_shutdown(shutdown);

    let summary = interrupted.run(&range).await.unwrap();
    assert!(summary.interrupted);
    assert!(!summary.is_success());
    assert_eq!(summary.periods.len(), 1);
    assert_eq!(summary.periods[0].state, PeriodState::Completed);

    pipeline.clear_calls();
    let summary = orchestrator(dir.path(), &pipeline)
        .with_shutdown(ShutdownCoordinator::shared())
        .run(&range)
        .await
        .unwrap();
    assert!(summary.is_success());
    assert_eq!(summary.skipped_count(), 1);
    assert_eq!(pipeline.calls(Stage::Extract), vec!["2024-02", "2024-03"]);
}

#[tokio::test]
async fn test_shutdown_before_start_runs_nothing() {
    let dir = TempDir::new().unwrap();
    let pipeline = ScriptedPipeline::new();
    let shutdown = ShutdownCoordinator::shared();
    shutdown.request_shutdown();

    let summary = orchestrator(dir.path(), &pipeline)
        .with_shutdown(shutdown)
        .run(&BackfillOptions::new(month("2024-01"), month("2024-02")))
        .await
        .unwrap();
    assert!(summary.interrupted);
    assert!(summary.periods.is_empty());
    assert!(pipeline.calls(Stage::Extract).is_empty());
}
