//! The phase contract
//!
//! A phase is one named analysis step. The scheduler knows nothing about
//! what a phase computes; it only hashes the metrics a phase returns.

use crate::error::CycleError;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;

/// Inputs shared by every phase of one cycle
#[derive(Debug, Clone)]
pub struct CycleContext {
    /// Id this cycle will be stored under
    pub cycle_id: u64,
    /// Workspace being analysed
    pub workspace: PathBuf,
    /// Records collected by the context provider
    pub inputs: Arc<Vec<Value>>,
    /// Hex BLAKE3 signature of `inputs`
    pub signature: String,
}

/// What a phase produced
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PhaseOutput {
    /// Items hashed into the phase digest, in order
    pub metrics: Vec<Value>,
    /// Number of items produced
    pub count: u64,
}

impl PhaseOutput {
    /// Output whose count is the number of metric items
    #[must_use]
    pub fn from_metrics(metrics: Vec<Value>) -> Self {
        let count = metrics.len() as u64;
        Self { metrics, count }
    }

    /// Output with an explicit count
    #[inline]
    #[must_use]
    pub fn new(metrics: Vec<Value>, count: u64) -> Self {
        Self { metrics, count }
    }
}

/// One pluggable analysis step
///
/// Phases are registered once at scheduler construction and run strictly
/// in registration order.
#[async_trait::async_trait]
pub trait Phase: Send + Sync {
    /// Stable name; the key of this phase in every cycle summary
    fn name(&self) -> &str;

    /// Run against the current cycle context
    async fn execute(&self, ctx: &CycleContext) -> Result<PhaseOutput, CycleError>;
}
