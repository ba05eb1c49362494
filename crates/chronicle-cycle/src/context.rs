//! Cycle context providers and the input signature

use crate::error::CycleError;
use chronicle_journal::{LogWriter, WriterConfig};
use chronicle_ledger::canonical_json;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;

/// Produces the input records of a cycle
///
/// Two cycles with identical inputs are considered the same work.
#[async_trait::async_trait]
pub trait ContextProvider: Send + Sync {
    /// Collect the current inputs
    async fn collect(&self) -> Result<Vec<Value>, CycleError>;
}

/// Hex BLAKE3 over the canonical JSON of the inputs
///
/// Independent of object key order; sensitive to record order.
#[must_use]
pub fn input_signature(inputs: &[Value]) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(b"[");
    for (i, record) in inputs.iter().enumerate() {
        if i > 0 {
            hasher.update(b",");
        }
        hasher.update(canonical_json(record).as_bytes());
    }
    hasher.update(b"]");
    hasher.finalize().to_hex().to_string()
}

/// Reads the tail of a workspace history journal
#[derive(Debug, Clone)]
pub struct HistoryLogProvider {
    journal: Arc<LogWriter>,
    limit: Option<usize>,
}

impl HistoryLogProvider {
    /// Use an already open journal
    #[must_use]
    pub fn new(journal: Arc<LogWriter>) -> Self {
        Self {
            journal,
            limit: None,
        }
    }

    /// Open the journal at `path`
    ///
    /// # Errors
    /// Returns error if the journal cannot be opened
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, CycleError> {
        let journal = LogWriter::open(path.as_ref(), WriterConfig::default()).await?;
        Ok(Self::new(Arc::new(journal)))
    }

    /// Only the most recent `limit` records
    #[inline]
    #[must_use]
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    #[inline]
    #[must_use]
    pub fn journal(&self) -> &Arc<LogWriter> {
        &self.journal
    }
}

#[async_trait::async_trait]
impl ContextProvider for HistoryLogProvider {
    async fn collect(&self) -> Result<Vec<Value>, CycleError> {
        let mut records = self.journal.read_all().await?;
        if let Some(limit) = self.limit {
            let skip = records.len().saturating_sub(limit);
            records.drain(..skip);
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn signature_ignores_key_order() {
        let a = vec![serde_json::from_str::<Value>(r#"{"x":1,"y":2}"#).unwrap()];
        let b = vec![serde_json::from_str::<Value>(r#"{"y":2,"x":1}"#).unwrap()];
        assert_eq!(input_signature(&a), input_signature(&b));
        assert_eq!(input_signature(&a).len(), 64);
    }

    #[test]
    fn signature_tracks_new_records() {
        let before = vec![json!({"commit": "a1"})];
        let after = vec![json!({"commit": "a1"}), json!({"commit": "b2"})];
        assert_ne!(input_signature(&before), input_signature(&after));
        assert_ne!(input_signature(&[]), input_signature(&before));
    }

    #[tokio::test]
    async fn history_provider_returns_tail() {
        let dir = tempfile::tempdir().unwrap();
        let provider = HistoryLogProvider::open(dir.path().join("history.jsonl"))
            .await
            .unwrap()
            .with_limit(2);

        for n in 0..5 {
            provider.journal().append(&json!({ "n": n })).await.unwrap();
        }

        let records = provider.collect().await.unwrap();
        let ns: Vec<u64> = records.iter().map(|r| r["n"].as_u64().unwrap()).collect();
        assert_eq!(ns, vec![3, 4]);
    }
}
