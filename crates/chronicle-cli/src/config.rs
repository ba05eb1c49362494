//! `chronicle.toml`
//!
//! Every field is optional. A minimal file only lists phases:
//!
//! ```toml
//! workspace = "."
//!
//! [[phases]]
//! name = "patterns"
//! command = "./analyzers/patterns.sh"
//! timeout_ms = 60000
//! ```

use anyhow::{Context, Result};
use chronicle_cycle::{FeedbackConfig, SchedulerConfig};
use chronicle_exec::{ExecRequest, PoolConfig};
use chronicle_journal::WriterConfig;
use chronicle_ledger::LedgerConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// File looked up in the working directory when `--config` is absent
pub(crate) const DEFAULT_CONFIG_FILE: &str = "chronicle.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct ChronicleConfig {
    /// Workspace the phases analyse
    pub(crate) workspace: PathBuf,
    /// Ledger directory; relative paths resolve against `workspace`
    pub(crate) ledger_dir: PathBuf,
    /// History journal read by the context provider
    pub(crate) history: PathBuf,
    /// Most recent history records per cycle
    pub(crate) history_limit: Option<usize>,
    pub(crate) writer: WriterConfig,
    pub(crate) pool: PoolConfig,
    pub(crate) scheduler: SchedulerConfig,
    /// Recalibration; disabled when absent
    pub(crate) feedback: Option<FeedbackConfig>,
    pub(crate) phases: Vec<PhaseSpec>,
}

impl Default for ChronicleConfig {
    fn default() -> Self {
        Self {
            workspace: PathBuf::from("."),
            ledger_dir: PathBuf::from(".chronicle/ledger"),
            history: PathBuf::from(".chronicle/history.jsonl"),
            history_limit: None,
            writer: WriterConfig::default(),
            pool: PoolConfig::default(),
            scheduler: SchedulerConfig::default(),
            feedback: None,
            phases: Vec::new(),
        }
    }
}

/// One command-backed phase
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct PhaseSpec {
    pub(crate) name: String,
    pub(crate) command: String,
    #[serde(default)]
    pub(crate) timeout_ms: Option<u64>,
    #[serde(default)]
    pub(crate) env: BTreeMap<String, String>,
}

impl PhaseSpec {
    pub(crate) fn request(&self) -> ExecRequest {
        let request = self
            .env
            .iter()
            .fold(ExecRequest::new(&self.command), |request, (key, value)| {
                request.with_env(key, value)
            });
        match self.timeout_ms {
            Some(ms) => request.with_timeout(Duration::from_millis(ms)),
            None => request,
        }
    }
}

impl ChronicleConfig {
    /// Load `path`, or `chronicle.toml` if present, or defaults
    pub(crate) fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => {
                let fallback = PathBuf::from(DEFAULT_CONFIG_FILE);
                if !fallback.exists() {
                    return Ok(Self::default());
                }
                fallback
            }
        };
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("invalid config {}", path.display()))
    }

    pub(crate) fn parse(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub(crate) fn ledger_path(&self) -> PathBuf {
        self.workspace.join(&self.ledger_dir)
    }

    pub(crate) fn history_path(&self) -> PathBuf {
        self.workspace.join(&self.history)
    }

    pub(crate) fn ledger_config(&self) -> LedgerConfig {
        LedgerConfig::default().with_writer(self.writer.clone())
    }
}
