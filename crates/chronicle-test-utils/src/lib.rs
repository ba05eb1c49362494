//! Testing utilities for the Chronicle workspace
//!
//! Scripted phases, context providers and ledger fixtures.

#![allow(missing_docs)]

use chronicle_cycle::{ContextProvider, CycleContext, CycleError, Phase, PhaseOutput};
use chronicle_ledger::{Ledger, LedgerConfig};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// The standard four-phase pipeline with fixed item counts
pub const PIPELINE: [(&str, u64); 4] = [
    ("patterns", 3),
    ("correlations", 5),
    ("forecasts", 2),
    ("decisions", 1),
];

/// Deterministic metric items for `name`
pub fn fake_metrics(name: &str, count: u64) -> Vec<Value> {
    (0..count).map(|i| json!({ "phase": name, "item": i })).collect()
}

/// Phase that always returns `count` deterministic items
#[derive(Debug)]
pub struct FakePhase {
    name: String,
    count: u64,
    calls: AtomicUsize,
}

impl FakePhase {
    pub fn new(name: &str, count: u64) -> Self {
        Self {
            name: name.to_string(),
            count,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Phase for FakePhase {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, _ctx: &CycleContext) -> Result<PhaseOutput, CycleError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(PhaseOutput::from_metrics(fake_metrics(&self.name, self.count)))
    }
}

/// Phase that always returns an error
#[derive(Debug)]
pub struct FailingPhase {
    name: String,
    message: String,
}

impl FailingPhase {
    pub fn new(name: &str, message: &str) -> Self {
        Self {
            name: name.to_string(),
            message: message.to_string(),
        }
    }
}

#[async_trait::async_trait]
impl Phase for FailingPhase {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, _ctx: &CycleContext) -> Result<PhaseOutput, CycleError> {
        Err(CycleError::phase(&self.name, &self.message))
    }
}

/// Phase that panics
#[derive(Debug)]
pub struct PanickingPhase {
    name: String,
}

impl PanickingPhase {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

#[async_trait::async_trait]
impl Phase for PanickingPhase {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, _ctx: &CycleContext) -> Result<PhaseOutput, CycleError> {
        panic!("{} exploded", self.name);
    }
}

/// Phase that sleeps before returning one item
#[derive(Debug)]
pub struct SlowPhase {
    name: String,
    delay: Duration,
}

impl SlowPhase {
    pub fn new(name: &str, delay: Duration) -> Self {
        Self {
            name: name.to_string(),
            delay,
        }
    }
}

#[async_trait::async_trait]
impl Phase for SlowPhase {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, _ctx: &CycleContext) -> Result<PhaseOutput, CycleError> {
        tokio::time::sleep(self.delay).await;
        Ok(PhaseOutput::from_metrics(fake_metrics(&self.name, 1)))
    }
}

/// Context returning the same records until replaced
#[derive(Debug, Default)]
pub struct StaticContext {
    records: Mutex<Vec<Value>>,
}

impl StaticContext {
    pub fn new(records: Vec<Value>) -> Self {
        Self {
            records: Mutex::new(records),
        }
    }

    pub fn replace(&self, records: Vec<Value>) {
        *self.records.lock() = records;
    }
}

#[async_trait::async_trait]
impl ContextProvider for StaticContext {
    async fn collect(&self) -> Result<Vec<Value>, CycleError> {
        Ok(self.records.lock().clone())
    }
}

/// Context whose records change on every collection
#[derive(Debug, Default)]
pub struct CountingContext {
    ticks: AtomicUsize,
}

impl CountingContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ticks(&self) -> usize {
        self.ticks.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl ContextProvider for CountingContext {
    async fn collect(&self) -> Result<Vec<Value>, CycleError> {
        let tick = self.ticks.fetch_add(1, Ordering::SeqCst);
        Ok(vec![json!({ "tick": tick })])
    }
}

/// Context that never produces records
#[derive(Debug, Default)]
pub struct FailingContext;

#[async_trait::async_trait]
impl ContextProvider for FailingContext {
    async fn collect(&self) -> Result<Vec<Value>, CycleError> {
        Err(CycleError::Context("history unavailable".to_string()))
    }
}

/// Fresh ledger in a temporary directory
pub async fn temp_ledger() -> (TempDir, Arc<Ledger>) {
    let dir = tempfile::tempdir().unwrap();
    let ledger = open_ledger(dir.path()).await;
    (dir, ledger)
}

pub async fn open_ledger(dir: &Path) -> Arc<Ledger> {
    Arc::new(Ledger::open(dir, LedgerConfig::default()).await.unwrap())
}

/// [`PIPELINE`] as shared phases
pub fn fake_pipeline() -> Vec<Arc<FakePhase>> {
    PIPELINE
        .iter()
        .map(|(name, count)| Arc::new(FakePhase::new(name, *count)))
        .collect()
}
