//! Merkle roots and inclusion proofs
//!
//! Two shapes of tree live here:
//!
//! - [`compute_root`] is the cycle tree: adjacent pairs are hashed level by
//!   level, an odd level duplicates its last node. It summarizes the phase
//!   hashes of one cycle.
//! - [`EntryTree`] wraps `rs_merkle` over entry hashes for snapshots and
//!   spot verification with [`EntryProof`].

use crate::hash::{ContentHash, HashError};
use rs_merkle::{Hasher, MerkleProof, MerkleTree};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Root of an empty tree: SHA-256 of the empty string
#[inline]
#[must_use]
pub fn empty_root() -> ContentHash {
    ContentHash::compute(&[])
}

/// Hash of two child nodes
#[inline]
#[must_use]
pub fn hash_pair(left: &ContentHash, right: &ContentHash) -> ContentHash {
    let mut hasher = Sha256::new();
    hasher.update(left.as_bytes());
    hasher.update(right.as_bytes());
    ContentHash::new(hasher.finalize().into())
}

/// Merkle root over an ordered list of hashes
///
/// A single hash is returned unchanged; an empty list yields
/// [`empty_root`].
#[must_use]
pub fn compute_root(hashes: &[ContentHash]) -> ContentHash {
    if hashes.is_empty() {
        return empty_root();
    }

    let mut level: Vec<ContentHash> = hashes.to_vec();
    while level.len() > 1 {
        if level.len() % 2 == 1 {
            if let Some(&last) = level.last() {
                level.push(last);
            }
        }
        level = level
            .chunks_exact(2)
            .map(|pair| hash_pair(&pair[0], &pair[1]))
            .collect();
    }
    level[0]
}

/// SHA-256 hasher adapter for rs_merkle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sha256Hasher;

impl Hasher for Sha256Hasher {
    type Hash = [u8; 32];

    #[inline]
    fn hash(data: &[u8]) -> Self::Hash {
        Sha256::digest(data).into()
    }
}

/// Tree over ledger entry hashes in append order
pub struct EntryTree {
    inner: MerkleTree<Sha256Hasher>,
    leaf_count: usize,
}

impl std::fmt::Debug for EntryTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntryTree")
            .field("leaf_count", &self.leaf_count)
            .field("root", &self.root())
            .finish()
    }
}

impl EntryTree {
    /// Build from leaf hashes
    #[must_use]
    pub fn from_leaves(leaves: &[ContentHash]) -> Self {
        let raw: Vec<[u8; 32]> = leaves.iter().map(|h| *h.as_bytes()).collect();
        Self {
            inner: MerkleTree::from_leaves(&raw),
            leaf_count: leaves.len(),
        }
    }

    /// Root hash, [`empty_root`] for an empty tree
    #[inline]
    #[must_use]
    pub fn root(&self) -> ContentHash {
        self.inner.root().map_or_else(empty_root, ContentHash::new)
    }

    /// Number of leaves
    #[inline]
    #[must_use]
    pub fn leaf_count(&self) -> usize {
        self.leaf_count
    }

    /// Inclusion proof for one leaf, `None` when out of range
    #[must_use]
    pub fn prove(&self, leaf_index: usize) -> Option<EntryProof> {
        if leaf_index >= self.leaf_count {
            return None;
        }
        let proof = self.inner.proof(&[leaf_index]);
        Some(EntryProof {
            leaf_index,
            total_leaves: self.leaf_count,
            proof: hex::encode(proof.to_bytes()),
        })
    }
}

/// Serializable inclusion proof for one entry hash
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryProof {
    /// Position of the entry in append order
    pub leaf_index: usize,
    /// Entries covered by the root the proof was built against
    pub total_leaves: usize,
    /// Sibling hashes, hex encoded
    pub proof: String,
}

impl EntryProof {
    /// Check that `leaf` sits at `leaf_index` under `root`
    ///
    /// # Errors
    /// Returns error if the proof bytes are malformed
    pub fn verify(&self, root: &ContentHash, leaf: &ContentHash) -> Result<bool, HashError> {
        let bytes = hex::decode(&self.proof)?;
        let proof = MerkleProof::<Sha256Hasher>::from_bytes(&bytes)
            .map_err(|e| HashError::InvalidProof(e.to_string()))?;
        Ok(proof.verify(
            *root.as_bytes(),
            &[self.leaf_index],
            &[*leaf.as_bytes()],
            self.total_leaves,
        ))
    }
}
