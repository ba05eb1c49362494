//! Chronicle Cycle
//!
//! Periodic, idempotent execution of a fixed pipeline of analysis phases,
//! with every cycle recorded in a [`chronicle_ledger::Ledger`].
//!
//! # Core Concepts
//!
//! - [`Phase`]: one named analysis step returning metric items
//! - [`ContextProvider`]: collects the inputs a cycle runs over
//! - [`CycleScheduler`]: timer, watchdog, single-flight guard and
//!   input-signature skip around the pipeline
//! - [`CommandPhase`]: a phase backed by a shell command on an
//!   [`chronicle_exec::ExecPool`]
//! - [`FeedbackLoop`]: periodic recalibration of the effectiveness baseline
//!
//! # Example
//!
//! ```rust,ignore
//! use chronicle_cycle::{CycleScheduler, HistoryLogProvider, SchedulerConfig};
//!
//! let context = Arc::new(HistoryLogProvider::open("state/history.jsonl").await?);
//! let scheduler = CycleScheduler::builder(ledger, context)
//!     .phase(patterns)
//!     .phase(correlations)
//!     .config(SchedulerConfig::default())
//!     .build()?;
//!
//! scheduler.start(Duration::from_secs(300)).await;
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod command_phase;
mod config;
mod context;
mod error;
mod feedback;
mod phase;
mod scheduler;

pub use command_phase::CommandPhase;
pub use config::{FeedbackConfig, SchedulerConfig};
pub use context::{input_signature, ContextProvider, HistoryLogProvider};
pub use error::CycleError;
pub use feedback::{
    pattern_stability, CalibrationRecord, Effectiveness, FeedbackLoop, OutcomeSource,
};
pub use phase::{CycleContext, Phase, PhaseOutput};
pub use scheduler::{
    CycleOutcome, CycleReport, CycleScheduler, PhaseReport, SchedulerBuilder, SchedulerStatus,
};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
