//! Persisted record shapes
//!
//! [`LedgerEntry`] lines go to the entry stream and [`CycleSummary`] lines
//! to the cycle stream. Field names on disk are part of the external
//! format and must not change.

use crate::hash::{hash_value, ContentHash};
use crate::merkle::EntryProof;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;
use ulid::Ulid;

/// Category of a ledger entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Pattern,
    Correlation,
    Forecast,
    Decision,
}

impl EntryKind {
    /// Every kind, in declaration order
    pub const ALL: [Self; 4] = [
        Self::Pattern,
        Self::Correlation,
        Self::Forecast,
        Self::Decision,
    ];

    /// Wire name
    #[inline]
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pattern => "pattern",
            Self::Correlation => "correlation",
            Self::Forecast => "forecast",
            Self::Decision => "decision",
        }
    }
}

impl Display for EntryKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntryKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("unknown entry kind: {s}"))
    }
}

/// Unique, time-sortable entry identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryId(Ulid);

impl EntryId {
    /// Generate a fresh id
    #[inline]
    #[must_use]
    pub fn generate() -> Self {
        Self(Ulid::new())
    }
}

impl Display for EntryId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

/// Immutable record in the entry stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: EntryId,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
    /// Canonical hash of `data`
    pub hash: ContentHash,
}

impl LedgerEntry {
    /// Wrap `data` with a fresh id, the current time and its content hash
    #[must_use]
    pub fn new(kind: EntryKind, data: Value) -> Self {
        let hash = hash_value(&data);
        Self {
            id: EntryId::generate(),
            kind,
            data,
            timestamp: Utc::now(),
            hash,
        }
    }

    /// Hash recomputed from `data`
    #[inline]
    #[must_use]
    pub fn recompute_hash(&self) -> ContentHash {
        hash_value(&self.data)
    }

    /// Whether the stored hash still matches `data`
    #[inline]
    #[must_use]
    pub fn is_intact(&self) -> bool {
        self.recompute_hash() == self.hash
    }
}

/// Outcome of one phase within a cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseDigest {
    /// Hash of the phase's metrics batch
    pub hash: ContentHash,
    /// Number of items the phase produced
    pub count: u64,
    /// Failure message when the phase did not complete
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PhaseDigest {
    #[inline]
    #[must_use]
    pub fn new(hash: ContentHash, count: u64) -> Self {
        Self {
            hash,
            count,
            error: None,
        }
    }

    /// Digest for a failed phase
    #[inline]
    #[must_use]
    pub fn failed(hash: ContentHash, error: impl Into<String>) -> Self {
        Self {
            hash,
            count: 0,
            error: Some(error.into()),
        }
    }

    #[inline]
    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }
}

/// Caller-supplied part of a cycle summary
///
/// The ledger fills in both Merkle roots on append.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialCycle {
    pub cycle_id: u64,
    pub timestamp: DateTime<Utc>,
    /// Phase digests in execution order
    pub phases: IndexMap<String, PhaseDigest>,
}

impl PartialCycle {
    /// Start a cycle with no phases
    #[must_use]
    pub fn new(cycle_id: u64) -> Self {
        Self {
            cycle_id,
            timestamp: Utc::now(),
            phases: IndexMap::new(),
        }
    }

    /// With one more phase digest
    #[inline]
    #[must_use]
    pub fn with_phase(mut self, name: impl Into<String>, digest: PhaseDigest) -> Self {
        self.phases.insert(name.into(), digest);
        self
    }

    /// Phase hashes in execution order
    #[must_use]
    pub fn phase_hashes(&self) -> Vec<ContentHash> {
        self.phases.values().map(|d| d.hash).collect()
    }
}

/// Persisted summary of one executed cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleSummary {
    pub cycle_id: u64,
    pub timestamp: DateTime<Utc>,
    pub phases: IndexMap<String, PhaseDigest>,
    pub merkle_root: ContentHash,
    pub prev_merkle_root: ContentHash,
}

impl CycleSummary {
    /// Phase hashes in stored order
    #[must_use]
    pub fn phase_hashes(&self) -> Vec<ContentHash> {
        self.phases.values().map(|d| d.hash).collect()
    }

    /// Total items produced across phases
    #[must_use]
    pub fn total_count(&self) -> u64 {
        self.phases.values().map(|d| d.count).sum()
    }

    /// Names of phases that failed
    pub fn failed_phases(&self) -> impl Iterator<Item = &str> {
        self.phases
            .iter()
            .filter(|(_, d)| d.is_failed())
            .map(|(name, _)| name.as_str())
    }
}

/// Point-in-time summary of the entry stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MerkleSnapshot {
    /// Root of the entry inclusion tree
    pub root: ContentHash,
    pub entry_count: usize,
    pub timestamp: DateTime<Utc>,
}

impl MerkleSnapshot {
    /// Check that `entry` is covered by this snapshot
    ///
    /// False when the proof was built for a different entry count, for a
    /// different entry, or when the entry's own hash is stale.
    #[must_use]
    pub fn verify_inclusion(&self, entry: &LedgerEntry, proof: &EntryProof) -> bool {
        if proof.total_leaves != self.entry_count || !entry.is_intact() {
            return false;
        }
        proof.verify(&self.root, &entry.hash).unwrap_or(false)
    }
}
