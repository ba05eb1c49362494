//! Integrity verification
//!
//! Verification never repairs anything and never fails on a finding; every
//! problem becomes a [`Discrepancy`] in the returned [`VerifyReport`].

use crate::hash::{ContentHash, GENESIS};
use crate::merkle::compute_root;
use crate::record::{CycleSummary, EntryId, LedgerEntry};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One integrity finding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Discrepancy {
    /// Stored entry hash does not match its data
    EntryHashMismatch {
        index: usize,
        id: EntryId,
        expected: ContentHash,
        found: ContentHash,
    },
    /// Stored cycle root does not match its phase hashes
    MerkleRootMismatch {
        cycle_id: u64,
        expected: ContentHash,
        found: ContentHash,
    },
    /// `prevMerkleRoot` does not match the previous cycle's root
    ChainBreak {
        cycle_id: u64,
        prev_cycle_id: u64,
        expected: ContentHash,
        found: ContentHash,
    },
    /// First cycle does not link to the genesis sentinel
    GenesisMismatch { cycle_id: u64, found: ContentHash },
    /// Cycle ids skip or repeat
    CycleGap { expected: u64, found: u64 },
}

impl Discrepancy {
    /// Cycle ids this finding refers to
    #[must_use]
    pub fn cycle_ids(&self) -> Vec<u64> {
        match self {
            Self::EntryHashMismatch { .. } => Vec::new(),
            Self::MerkleRootMismatch { cycle_id, .. } | Self::GenesisMismatch { cycle_id, .. } => {
                vec![*cycle_id]
            }
            Self::ChainBreak {
                cycle_id,
                prev_cycle_id,
                ..
            } => vec![*prev_cycle_id, *cycle_id],
            Self::CycleGap { found, .. } => vec![*found],
        }
    }
}

impl fmt::Display for Discrepancy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EntryHashMismatch {
                index,
                id,
                expected,
                found,
            } => write!(
                f,
                "entry #{index} ({id}): hash {} does not match data ({})",
                found.short(),
                expected.short()
            ),
            Self::MerkleRootMismatch {
                cycle_id,
                expected,
                found,
            } => write!(
                f,
                "cycle {cycle_id}: merkle root {} does not match phases ({})",
                found.short(),
                expected.short()
            ),
            Self::ChainBreak {
                cycle_id,
                prev_cycle_id,
                expected,
                found,
            } => write!(
                f,
                "cycle {cycle_id}: prev root {} does not match cycle {prev_cycle_id} root {}",
                found.short(),
                expected.short()
            ),
            Self::GenesisMismatch { cycle_id, found } => write!(
                f,
                "cycle {cycle_id}: first cycle links to {} instead of genesis",
                found.short()
            ),
            Self::CycleGap { expected, found } => {
                write!(f, "cycle id gap: expected {expected}, found {found}")
            }
        }
    }
}

/// Result of a verification pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyReport {
    pub valid: bool,
    pub entries_checked: usize,
    pub cycles_checked: usize,
    pub discrepancies: Vec<Discrepancy>,
}

impl VerifyReport {
    /// Empty, valid report
    #[must_use]
    pub fn new() -> Self {
        Self {
            valid: true,
            ..Self::default()
        }
    }

    fn record(&mut self, discrepancy: Discrepancy) {
        self.valid = false;
        self.discrepancies.push(discrepancy);
    }

    /// Fold another report into this one
    pub fn merge(&mut self, other: Self) {
        self.valid &= other.valid;
        self.entries_checked += other.entries_checked;
        self.cycles_checked += other.cycles_checked;
        self.discrepancies.extend(other.discrepancies);
    }
}

/// Recompute every entry hash
///
/// With `deep == false` the pass stops at the first finding.
#[must_use]
pub fn verify_entries(entries: &[LedgerEntry], deep: bool) -> VerifyReport {
    let mut report = VerifyReport::new();
    for (index, entry) in entries.iter().enumerate() {
        report.entries_checked += 1;
        let expected = entry.recompute_hash();
        if expected != entry.hash {
            report.record(Discrepancy::EntryHashMismatch {
                index,
                id: entry.id,
                expected,
                found: entry.hash,
            });
            if !deep {
                break;
            }
        }
    }
    report
}

/// Recompute every cycle root and check every chain link
///
/// With `deep == false` the pass stops at the first cycle that produced a
/// finding.
#[must_use]
pub fn verify_cycles(cycles: &[CycleSummary], deep: bool) -> VerifyReport {
    let mut report = VerifyReport::new();
    let mut previous: Option<&CycleSummary> = None;

    for cycle in cycles {
        report.cycles_checked += 1;
        let before = report.discrepancies.len();

        let expected_root = compute_root(&cycle.phase_hashes());
        if expected_root != cycle.merkle_root {
            report.record(Discrepancy::MerkleRootMismatch {
                cycle_id: cycle.cycle_id,
                expected: expected_root,
                found: cycle.merkle_root,
            });
        }

        match previous {
            None => {
                if cycle.prev_merkle_root != GENESIS {
                    report.record(Discrepancy::GenesisMismatch {
                        cycle_id: cycle.cycle_id,
                        found: cycle.prev_merkle_root,
                    });
                }
                if cycle.cycle_id != 1 {
                    report.record(Discrepancy::CycleGap {
                        expected: 1,
                        found: cycle.cycle_id,
                    });
                }
            }
            Some(prev) => {
                if cycle.prev_merkle_root != prev.merkle_root {
                    report.record(Discrepancy::ChainBreak {
                        cycle_id: cycle.cycle_id,
                        prev_cycle_id: prev.cycle_id,
                        expected: prev.merkle_root,
                        found: cycle.prev_merkle_root,
                    });
                }
                if cycle.cycle_id != prev.cycle_id + 1 {
                    report.record(Discrepancy::CycleGap {
                        expected: prev.cycle_id + 1,
                        found: cycle.cycle_id,
                    });
                }
            }
        }

        previous = Some(cycle);
        if !deep && report.discrepancies.len() > before {
            break;
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{EntryKind, PhaseDigest};
    use chrono::Utc;
    use serde_json::json;

    fn chain(n: u64) -> Vec<CycleSummary> {
        let mut prev = GENESIS;
        (1..=n)
            .map(|cycle_id| {
                let digest = PhaseDigest::new(ContentHash::compute(&cycle_id.to_be_bytes()), 1);
                let phases = [("patterns".to_string(), digest)].into_iter().collect();
                let mut summary = CycleSummary {
                    cycle_id,
                    timestamp: Utc::now(),
                    phases,
                    merkle_root: GENESIS,
                    prev_merkle_root: prev,
                };
                summary.merkle_root = compute_root(&summary.phase_hashes());
                prev = summary.merkle_root;
                summary
            })
            .collect()
    }

    #[test]
    fn intact_chain_is_valid() {
        let report = verify_cycles(&chain(5), true);
        assert!(report.valid);
        assert_eq!(report.cycles_checked, 5);
        assert!(report.discrepancies.is_empty());
    }

    #[test]
    fn empty_ledger_is_valid() {
        assert!(verify_cycles(&[], true).valid);
        assert!(verify_entries(&[], true).valid);
    }

    #[test]
    fn broken_genesis_is_reported() {
        let mut cycles = chain(2);
        cycles[0].prev_merkle_root = ContentHash::compute(b"forged");
        let report = verify_cycles(&cycles, true);
        assert_eq!(report.discrepancies.len(), 1);
        assert!(matches!(
            report.discrepancies[0],
            Discrepancy::GenesisMismatch { cycle_id: 1, .. }
        ));
    }

    #[test]
    fn gap_is_reported() {
        let mut cycles = chain(3);
        cycles.remove(1);
        let report = verify_cycles(&cycles, true);
        assert!(report
            .discrepancies
            .contains(&Discrepancy::CycleGap { expected: 2, found: 3 }));
        assert!(report
            .discrepancies
            .iter()
            .any(|d| matches!(d, Discrepancy::ChainBreak { cycle_id: 3, prev_cycle_id: 1, .. })));
    }

    #[test]
    fn shallow_pass_stops_early() {
        let mut cycles = chain(4);
        cycles[1].merkle_root = GENESIS;
        cycles[3].prev_merkle_root = GENESIS;

        let shallow = verify_cycles(&cycles, false);
        assert!(!shallow.valid);
        assert_eq!(shallow.cycles_checked, 2);

        let deep = verify_cycles(&cycles, true);
        assert_eq!(deep.cycles_checked, 4);
        assert_eq!(deep.discrepancies.len(), 3);
    }

    #[test]
    fn tampered_entries_are_all_reported_when_deep() {
        let mut entries: Vec<LedgerEntry> = (0..4)
            .map(|n| LedgerEntry::new(EntryKind::Pattern, json!({ "n": n })))
            .collect();
        entries[1].data = json!({"n": 100});
        entries[3].data = json!({"n": 300});

        let deep = verify_entries(&entries, true);
        assert_eq!(deep.entries_checked, 4);
        assert_eq!(deep.discrepancies.len(), 2);

        let shallow = verify_entries(&entries, false);
        assert_eq!(shallow.entries_checked, 2);
        assert_eq!(shallow.discrepancies.len(), 1);
    }

    #[test]
    fn discrepancy_serializes_with_kind_tag() {
        let d = Discrepancy::CycleGap { expected: 2, found: 4 };
        let value = serde_json::to_value(&d).unwrap();
        assert_eq!(value, json!({"kind": "cycle_gap", "expected": 2, "found": 4}));
        assert_eq!(d.cycle_ids(), vec![4]);
    }
}
