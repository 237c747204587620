//! Shared fixtures for backfill integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use property_etl::backfill::{BackfillConfig, BackfillOrchestrator, RetryPolicy, StageExecutor};
use property_etl::checkpoint::{
    CheckpointError, CheckpointRecord, CheckpointStore, FileCheckpointStore,
};
use property_etl::planner::{Period, YearMonth};
use property_etl::stage::{
    ExtractResult, Extractor, Stage, StageError, TransformResult, Transformer,
};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Extractor and transformer that records calls and fails on demand
#[derive(Default)]
pub struct ScriptedPipeline {
    calls: Mutex<Vec<(Stage, String)>>,
    failures: Mutex<HashMap<(Stage, String), VecDeque<StageError>>>,
}

impl ScriptedPipeline {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fail `stage` of `period` with `error` for the next `times` calls
    pub fn fail(&self, stage: Stage, period: &str, error: StageError, times: usize) {
        let mut failures = self.failures.lock().unwrap();
        let queue = failures.entry((stage, period.to_string())).or_default();
        queue.extend(std::iter::repeat(error).take(times));
    }

    /// Periods `stage` was called for, in call order
    pub fn calls(&self, stage: Stage) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(s, _)| *s == stage)
            .map(|(_, p)| p.clone())
            .collect()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    fn call(&self, stage: Stage, period: &Period) -> Result<(), StageError> {
        let key = period.key();
        self.calls.lock().unwrap().push((stage, key.clone()));
        match self
            .failures
            .lock()
            .unwrap()
            .get_mut(&(stage, key))
            .and_then(VecDeque::pop_front)
        {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Extractor for ScriptedPipeline {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn extract(&self, period: &Period) -> Result<ExtractResult, StageError> {
        self.call(Stage::Extract, period)?;
        let mut result = ExtractResult::default();
        result.tables.insert("transactions".into(), 10);
        Ok(result)
    }
}

#[async_trait]
impl Transformer for ScriptedPipeline {
    async fn transform(&self, period: &Period) -> Result<TransformResult, StageError> {
        self.call(Stage::Transform, period)?;
        let mut result = TransformResult::default();
        result.tables_updated.insert("fact_transaction".into(), 10);
        Ok(result)
    }
}

/// Three attempts per stage, no sleeping, period ceiling of three retries
pub fn fast_config() -> BackfillConfig {
    BackfillConfig {
        retry: RetryPolicy::immediate(3),
        max_period_retries: 3,
    }
}

pub fn checkpoint_path(dir: &Path) -> PathBuf {
    dir.join("checkpoint.json")
}

/// Orchestrator over the checkpoint file in `dir`, reopened from disk
pub fn orchestrator(
    dir: &Path,
    pipeline: &Arc<ScriptedPipeline>,
) -> BackfillOrchestrator<FileCheckpointStore> {
    let store = FileCheckpointStore::open(checkpoint_path(dir)).unwrap();
    let executor = StageExecutor::new(pipeline.clone(), pipeline.clone());
    BackfillOrchestrator::new(store, executor, fast_config())
}

pub fn month(key: &str) -> YearMonth {
    key.parse().unwrap()
}

/// In-memory store whose writes start failing at the `fail_from`-th put
pub struct FailingStore {
    records: BTreeMap<String, CheckpointRecord>,
    puts: usize,
    fail_from: usize,
}

impl FailingStore {
    pub fn new(fail_from: usize) -> Self {
        Self {
            records: BTreeMap::new(),
            puts: 0,
            fail_from,
        }
    }

    /// Puts attempted so far, failed ones included
    pub fn puts(&self) -> usize {
        self.puts
    }
}

impl CheckpointStore for FailingStore {
    fn get(&self, period_key: &str) -> Option<CheckpointRecord> {
        self.records.get(period_key).cloned()
    }

    fn put(&mut self, record: CheckpointRecord) -> Result<(), CheckpointError> {
        self.puts += 1;
        if self.puts >= self.fail_from {
            return Err(CheckpointError::Persistence("disk full".into()));
        }
        self.records
            .insert(record.period_key().to_string(), record);
        Ok(())
    }

    fn reset(&mut self, period_key: &str) -> Result<bool, CheckpointError> {
        Ok(self.records.remove(period_key).is_some())
    }

    fn all(&self) -> Vec<CheckpointRecord> {
        self.records.values().cloned().collect()
    }
}

/// Orchestrator over a store that fails at the `fail_from`-th put
pub fn failing_orchestrator(
    fail_from: usize,
    pipeline: &Arc<ScriptedPipeline>,
) -> BackfillOrchestrator<FailingStore> {
    let executor = StageExecutor::new(pipeline.clone(), pipeline.clone());
    BackfillOrchestrator::new(FailingStore::new(fail_from), executor, fast_config())
}
