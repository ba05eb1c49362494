//! Chronicle Ledger
//!
//! Tamper-evident, append-only record of analysis output built on
//! [`chronicle_journal`].
//!
//! # Core Concepts
//!
//! - [`ContentHash`]: 32-byte SHA-256 over canonical JSON (sorted keys)
//! - [`LedgerEntry`]: immutable, hashed record of one analysis result
//! - [`CycleSummary`]: per-cycle phase digests linked by Merkle roots
//! - [`Ledger`]: owns the entry and cycle streams and the chain tip
//! - [`VerifyReport`]: structured integrity findings, never auto-repaired
//!
//! Every summary's `prevMerkleRoot` equals the previous summary's
//! `merkleRoot`; the first one links to [`GENESIS`].
//!
//! # Example
//!
//! ```rust,ignore
//! use chronicle_ledger::{hash_batch, EntryKind, Ledger, LedgerConfig, PartialCycle, PhaseDigest};
//!
//! let ledger = Ledger::open("state/ledger", LedgerConfig::default()).await?;
//! ledger.append(EntryKind::Pattern, json!({"files": ["a.rs", "b.rs"]})).await?;
//!
//! let cycle = PartialCycle::new(ledger.next_cycle_id().await)
//!     .with_phase("patterns", PhaseDigest::new(hash_batch(&metrics), 3));
//! let summary = ledger.append_cycle(cycle).await?;
//! ledger.flush().await?;
//!
//! assert!(ledger.verify_chain(true).await?.valid);
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod error;
mod hash;
mod ledger;
mod record;
mod validation;
mod verify;

/// Merkle roots and inclusion proofs
pub mod merkle;

pub use error::LedgerError;
pub use hash::{
    canonical_json, hash_batch, hash_serializable, hash_value, ContentHash, HashError, GENESIS,
};
pub use ledger::{Ledger, LedgerConfig};
pub use merkle::{compute_root, empty_root, EntryProof};
pub use record::{
    CycleSummary, EntryId, EntryKind, LedgerEntry, MerkleSnapshot, PartialCycle, PhaseDigest,
};
pub use validation::{EntryValidator, RequiredFields, SchemaValidator};
pub use verify::{verify_cycles, verify_entries, Discrepancy, VerifyReport};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
