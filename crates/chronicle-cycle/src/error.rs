//! Cycle error types

use chronicle_exec::ExecError;
use chronicle_journal::JournalError;
use chronicle_ledger::LedgerError;

/// Errors raised by phases, context providers and the scheduler
#[derive(Debug, thiserror::Error)]
pub enum CycleError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Journal(#[from] JournalError),

    #[error(transparent)]
    Exec(#[from] ExecError),

    /// The cycle context could not be collected
    #[error("context unavailable: {0}")]
    Context(String),

    /// A phase reported failure
    #[error("phase `{phase}` failed: {message}")]
    Phase { phase: String, message: String },

    /// Two phases share one name
    #[error("duplicate phase name `{0}`")]
    DuplicatePhase(String),

    /// The scheduler was built without phases
    #[error("no phases configured")]
    NoPhases,
}

impl CycleError {
    /// Failure of a named phase
    #[inline]
    pub fn phase(phase: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Phase {
            phase: phase.into(),
            message: message.into(),
        }
    }
}
