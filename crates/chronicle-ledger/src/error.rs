//! Ledger error types

use crate::hash::HashError;
use crate::record::EntryKind;
use chronicle_journal::JournalError;

/// Errors that can occur when writing to or reading from a ledger
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// Underlying journal failure (durability errors land here)
    #[error(transparent)]
    Journal(#[from] JournalError),

    /// Hash or proof decoding failure
    #[error(transparent)]
    Hash(#[from] HashError),

    /// Entry data rejected by the configured validator
    #[error("{kind} entry rejected: {}", problems.join("; "))]
    Validation {
        kind: EntryKind,
        problems: Vec<String>,
    },

    /// Cycle id is not exactly one past the last persisted cycle
    #[error("cycle out of order: expected {expected}, got {found}")]
    CycleOutOfOrder { expected: u64, found: u64 },

    /// JSON Schema failed to compile
    #[error("invalid schema: {0}")]
    Schema(String),

    /// No entry at the requested position
    #[error("no entry at index {0}")]
    EntryNotFound(usize),
}
