//! The hash-chained ledger
//!
//! Owns two journals in one directory: the entry stream and the cycle
//! stream. The ledger alone decides `prevMerkleRoot` and `merkleRoot` for
//! every cycle it stores.

use crate::error::LedgerError;
use crate::hash::{ContentHash, GENESIS};
use crate::merkle::{compute_root, EntryProof, EntryTree};
use crate::record::{CycleSummary, EntryId, EntryKind, LedgerEntry, MerkleSnapshot, PartialCycle};
use crate::validation::{EntryValidator, RequiredFields};
use crate::verify::{verify_cycles, verify_entries, VerifyReport};
use chrono::Utc;
use chronicle_journal::{LogWriter, WriterConfig};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// File names and journal thresholds for a [`Ledger`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Applied to both streams; timestamp injection is always disabled
    pub writer: WriterConfig,
    /// Entry stream file name inside the ledger directory
    pub entries_file: String,
    /// Cycle summary stream file name inside the ledger directory
    pub cycles_file: String,
}

impl LedgerConfig {
    /// Default file names and thresholds
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With journal thresholds
    #[inline]
    #[must_use]
    pub fn with_writer(mut self, writer: WriterConfig) -> Self {
        self.writer = writer;
        self
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            writer: WriterConfig::default(),
            entries_file: "entries.jsonl".to_string(),
            cycles_file: "cycles.jsonl".to_string(),
        }
    }
}

/// Append-only store of entries and Merkle-linked cycle summaries
pub struct Ledger {
    dir: PathBuf,
    entries: LogWriter,
    cycles: LogWriter,
    validator: Arc<dyn EntryValidator>,
    head: Mutex<Option<LedgerEntry>>,
    /// Last persisted cycle; held across the append so tips never race
    chain: tokio::sync::Mutex<Option<CycleSummary>>,
}

impl std::fmt::Debug for Ledger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ledger")
            .field("dir", &self.dir)
            .field("validator", &self.validator)
            .finish_non_exhaustive()
    }
}

impl Ledger {
    /// Open or create a ledger with the minimal validator
    ///
    /// # Errors
    /// Returns error if either journal cannot be opened or read
    pub async fn open(dir: impl AsRef<Path>, config: LedgerConfig) -> Result<Self, LedgerError> {
        Self::open_with_validator(dir, config, Arc::new(RequiredFields::new())).await
    }

    /// Open or create a ledger with an explicit validation strategy
    ///
    /// # Errors
    /// Returns error if either journal cannot be opened or read
    pub async fn open_with_validator(
        dir: impl AsRef<Path>,
        config: LedgerConfig,
        validator: Arc<dyn EntryValidator>,
    ) -> Result<Self, LedgerError> {
        let dir = dir.as_ref().to_path_buf();
        let writer_config = config.writer.with_timestamp_injection(false);

        let entries = LogWriter::open(dir.join(&config.entries_file), writer_config.clone()).await?;
        let cycles = LogWriter::open(dir.join(&config.cycles_file), writer_config).await?;

        let last_cycle = cycles.read_all_as::<CycleSummary>().await?.pop();
        let head = entries.read_all_as::<LedgerEntry>().await?.pop();

        info!(
            dir = %dir.display(),
            last_cycle = last_cycle.as_ref().map(|c| c.cycle_id),
            "Ledger opened"
        );

        Ok(Self {
            dir,
            entries,
            cycles,
            validator,
            head: Mutex::new(head),
            chain: tokio::sync::Mutex::new(last_cycle),
        })
    }

    /// Directory holding the ledger's streams
    #[inline]
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the cycle stream
    #[inline]
    #[must_use]
    pub fn cycles_path(&self) -> &Path {
        self.cycles.path()
    }

    /// Path of the entry stream
    #[inline]
    #[must_use]
    pub fn entries_path(&self) -> &Path {
        self.entries.path()
    }

    /// Validate, hash and append one entry
    ///
    /// # Errors
    /// Returns [`LedgerError::Validation`] if the data is rejected (nothing is
    /// written), or a journal error if the write fails
    pub async fn append(&self, kind: EntryKind, data: Value) -> Result<EntryId, LedgerError> {
        self.validator.validate(kind, &data)?;

        let entry = LedgerEntry::new(kind, data);
        let flush_due = self.entries.enqueue(&entry).await?;
        let id = entry.id;
        debug!(%id, %kind, hash = %entry.hash.short(), "Entry appended");
        *self.head.lock() = Some(entry);
        if flush_due {
            self.entries.flush(false).await?;
        }
        Ok(id)
    }

    /// Most recently written entry
    ///
    /// # Errors
    /// Returns error if the cache is empty and the stream cannot be read
    pub async fn head(&self) -> Result<Option<LedgerEntry>, LedgerError> {
        if let Some(entry) = self.head.lock().clone() {
            return Ok(Some(entry));
        }
        Ok(self.entries.read_all_as::<LedgerEntry>().await?.pop())
    }

    /// Complete and persist a cycle summary
    ///
    /// Fills `prevMerkleRoot` from the last stored cycle (or [`GENESIS`]) and
    /// `merkleRoot` from the phase hashes in order.
    ///
    /// # Errors
    /// Returns [`LedgerError::CycleOutOfOrder`] unless `cycle_id` is exactly
    /// one past the last stored cycle, or a journal error if the write fails.
    /// A write error leaves the summary buffered and the chain advanced; the
    /// next successful flush persists it.
    pub async fn append_cycle(&self, partial: PartialCycle) -> Result<CycleSummary, LedgerError> {
        let mut tip = self.chain.lock().await;

        let expected = tip.as_ref().map_or(1, |c| c.cycle_id + 1);
        if partial.cycle_id != expected {
            return Err(LedgerError::CycleOutOfOrder {
                expected,
                found: partial.cycle_id,
            });
        }

        let prev_merkle_root = tip.as_ref().map_or(GENESIS, |c| c.merkle_root);
        let merkle_root = compute_root(&partial.phase_hashes());
        let summary = CycleSummary {
            cycle_id: partial.cycle_id,
            timestamp: partial.timestamp,
            phases: partial.phases,
            merkle_root,
            prev_merkle_root,
        };

        // A buffered summary is already part of the chain
        let flush_due = self.cycles.enqueue(&summary).await?;
        *tip = Some(summary.clone());
        debug!(
            cycle_id = summary.cycle_id,
            root = %merkle_root.short(),
            prev = %prev_merkle_root.short(),
            "Cycle appended"
        );
        if flush_due {
            self.cycles.flush(false).await?;
        }
        Ok(summary)
    }

    /// Durably commit both streams
    ///
    /// Both flushes are attempted even if the first fails.
    ///
    /// # Errors
    /// Returns the first journal error encountered
    pub async fn flush(&self) -> Result<(), LedgerError> {
        let entries = self.entries.flush(true).await;
        let cycles = self.cycles.flush(true).await;
        entries?;
        cycles?;
        Ok(())
    }

    /// Last stored cycle
    pub async fn last_cycle(&self) -> Option<CycleSummary> {
        self.chain.lock().await.clone()
    }

    /// Root the next cycle will link to
    pub async fn last_merkle_root(&self) -> ContentHash {
        self.chain
            .lock()
            .await
            .as_ref()
            .map_or(GENESIS, |c| c.merkle_root)
    }

    /// Id the next cycle must carry
    pub async fn next_cycle_id(&self) -> u64 {
        self.chain.lock().await.as_ref().map_or(1, |c| c.cycle_id + 1)
    }

    /// Every stored cycle, oldest first
    ///
    /// # Errors
    /// Returns error if the cycle stream cannot be read
    pub async fn cycles(&self) -> Result<Vec<CycleSummary>, LedgerError> {
        Ok(self.cycles.read_all_as().await?)
    }

    /// The `n` most recent cycles, oldest first
    ///
    /// # Errors
    /// Returns error if the cycle stream cannot be read
    pub async fn recent_cycles(&self, n: usize) -> Result<Vec<CycleSummary>, LedgerError> {
        let mut cycles = self.cycles().await?;
        let skip = cycles.len().saturating_sub(n);
        cycles.drain(..skip);
        Ok(cycles)
    }

    /// Every stored entry, oldest first
    ///
    /// # Errors
    /// Returns error if the entry stream cannot be read
    pub async fn entries(&self) -> Result<Vec<LedgerEntry>, LedgerError> {
        Ok(self.entries.read_all_as().await?)
    }

    /// Merkle snapshot over all entry hashes in append order
    ///
    /// # Errors
    /// Returns error if the entry stream cannot be read
    pub async fn snapshot(&self) -> Result<MerkleSnapshot, LedgerError> {
        let hashes: Vec<ContentHash> = self.entries().await?.iter().map(|e| e.hash).collect();
        let tree = EntryTree::from_leaves(&hashes);
        Ok(MerkleSnapshot {
            root: tree.root(),
            entry_count: tree.leaf_count(),
            timestamp: Utc::now(),
        })
    }

    /// Entry at `index` with an inclusion proof against the current snapshot
    ///
    /// # Errors
    /// Returns [`LedgerError::EntryNotFound`] if `index` is out of range
    pub async fn prove_entry(&self, index: usize) -> Result<(LedgerEntry, EntryProof), LedgerError> {
        let entries = self.entries().await?;
        let hashes: Vec<ContentHash> = entries.iter().map(|e| e.hash).collect();
        let tree = EntryTree::from_leaves(&hashes);
        let proof = tree.prove(index).ok_or(LedgerError::EntryNotFound(index))?;
        let entry = entries
            .into_iter()
            .nth(index)
            .ok_or(LedgerError::EntryNotFound(index))?;
        Ok((entry, proof))
    }

    /// Full verification of entries and the cycle chain
    ///
    /// # Errors
    /// Returns error only if a stream cannot be read; findings are reported
    pub async fn verify(&self) -> Result<VerifyReport, LedgerError> {
        self.verify_with(true).await
    }

    /// Verification of entries and the cycle chain
    ///
    /// With `deep == false` each stream stops at its first finding.
    ///
    /// # Errors
    /// Returns error only if a stream cannot be read
    pub async fn verify_with(&self, deep: bool) -> Result<VerifyReport, LedgerError> {
        let mut report = verify_entries(&self.entries().await?, deep);
        if deep || report.valid {
            report.merge(self.verify_chain(deep).await?);
        }
        Ok(report)
    }

    /// Verification of the cycle chain only
    ///
    /// # Errors
    /// Returns error only if the cycle stream cannot be read
    pub async fn verify_chain(&self, deep: bool) -> Result<VerifyReport, LedgerError> {
        let report = verify_cycles(&self.cycles().await?, deep);
        if !report.valid {
            info!(
                findings = report.discrepancies.len(),
                cycles_checked = report.cycles_checked,
                "Chain verification found discrepancies"
            );
        }
        Ok(report)
    }

    /// Wait for background compression of rotated segments
    pub async fn drain_background(&self) {
        self.entries.drain_background().await;
        self.cycles.drain_background().await;
    }
}
