//! Effectiveness feedback and the adaptive baseline
//!
//! Every Nth executed cycle the pipeline's effectiveness is measured and
//! the forecast-accuracy signal moves the baseline by a weighted update.
//! Each evaluation is appended to a calibration journal so the baseline
//! history can be audited and is restored on restart.

use crate::config::FeedbackConfig;
use crate::error::CycleError;
use chrono::{DateTime, Utc};
use chronicle_journal::{LogWriter, WriterConfig};
use chronicle_ledger::Ledger;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Realized outcomes the pipeline's output is judged against
#[async_trait::async_trait]
pub trait OutcomeSource: Send + Sync {
    /// Share of recent forecasts that came true, in `[0, 1]`
    async fn forecast_accuracy(&self) -> Option<f64>;

    /// Share of recent decision records that were adopted, in `[0, 1]`
    async fn adoption_rate(&self) -> Option<f64>;
}

/// Measured effectiveness at one evaluation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Effectiveness {
    pub forecast_accuracy: Option<f64>,
    pub pattern_stability: Option<f64>,
    pub adoption_rate: Option<f64>,
    pub mean_latency_ms: Option<f64>,
}

/// One line of the calibration journal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationRecord {
    pub cycle_id: u64,
    pub timestamp: DateTime<Utc>,
    pub effectiveness: Effectiveness,
    pub previous: f64,
    pub new: f64,
    pub delta: f64,
}

/// Periodic evaluator owning the baseline
pub struct FeedbackLoop {
    config: FeedbackConfig,
    journal: LogWriter,
    baseline: Mutex<f64>,
    outcomes: Option<Arc<dyn OutcomeSource>>,
}

impl std::fmt::Debug for FeedbackLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedbackLoop")
            .field("config", &self.config)
            .field("baseline", &*self.baseline.lock())
            .field("has_outcome_source", &self.outcomes.is_some())
            .finish()
    }
}

impl FeedbackLoop {
    /// Open the calibration journal in `dir` and restore the last baseline
    ///
    /// # Errors
    /// Returns error if the journal cannot be opened or read
    pub async fn open(dir: impl AsRef<Path>, config: FeedbackConfig) -> Result<Self, CycleError> {
        let journal = LogWriter::open(
            dir.as_ref().join(&config.file),
            WriterConfig::default().with_timestamp_injection(false),
        )
        .await?;
        let baseline = journal
            .read_all_as::<CalibrationRecord>()
            .await?
            .pop()
            .map_or(config.initial_baseline, |record| record.new);

        Ok(Self {
            config,
            journal,
            baseline: Mutex::new(baseline),
            outcomes: None,
        })
    }

    /// With a source of realized outcomes
    #[must_use]
    pub fn with_outcome_source(mut self, outcomes: Arc<dyn OutcomeSource>) -> Self {
        self.outcomes = Some(outcomes);
        self
    }

    #[inline]
    #[must_use]
    pub fn config(&self) -> &FeedbackConfig {
        &self.config
    }

    /// Current baseline
    #[inline]
    #[must_use]
    pub fn baseline(&self) -> f64 {
        *self.baseline.lock()
    }

    /// Whether `cycle_id` is an evaluation point
    #[inline]
    #[must_use]
    pub fn is_due(&self, cycle_id: u64) -> bool {
        cycle_id > 0 && cycle_id % self.config.every_cycles.max(1) == 0
    }

    /// Measure effectiveness, update the baseline and persist the record
    ///
    /// Without an accuracy signal the baseline is kept and a zero delta is
    /// recorded.
    ///
    /// # Errors
    /// Returns error if the ledger cannot be read or the record not written
    pub async fn evaluate(
        &self,
        ledger: &Ledger,
        cycle_id: u64,
        cycle_latencies_ms: &[u64],
    ) -> Result<CalibrationRecord, CycleError> {
        let recent = ledger.recent_cycles(self.config.stability_window).await?;
        let counts: Vec<u64> = recent
            .iter()
            .filter_map(|c| c.phases.get(&self.config.stability_phase))
            .filter(|digest| !digest.is_failed())
            .map(|digest| digest.count)
            .collect();

        let (forecast_accuracy, adoption_rate) = match &self.outcomes {
            Some(source) => (source.forecast_accuracy().await, source.adoption_rate().await),
            None => (None, None),
        };

        let effectiveness = Effectiveness {
            forecast_accuracy: forecast_accuracy.map(|a| a.clamp(0.0, 1.0)),
            pattern_stability: pattern_stability(&counts),
            adoption_rate,
            mean_latency_ms: mean(cycle_latencies_ms),
        };

        let previous = self.baseline();
        let new = effectiveness.forecast_accuracy.map_or(previous, |accuracy| {
            (1.0 - self.config.weight) * previous + self.config.weight * accuracy
        });
        let record = CalibrationRecord {
            cycle_id,
            timestamp: Utc::now(),
            effectiveness,
            previous,
            new,
            delta: new - previous,
        };

        self.journal.append(&record).await?;
        self.journal.flush(true).await?;
        *self.baseline.lock() = new;

        info!(
            cycle_id,
            previous,
            new,
            delta = record.delta,
            "Baseline recalibrated"
        );
        Ok(record)
    }

    /// Every persisted calibration, oldest first
    ///
    /// # Errors
    /// Returns error if the journal cannot be read
    pub async fn history(&self) -> Result<Vec<CalibrationRecord>, CycleError> {
        Ok(self.journal.read_all_as().await?)
    }
}

/// `1 - coefficient of variation` of the counts, clamped to `[0, 1]`
///
/// `None` with fewer than two samples; all-zero counts are fully stable.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn pattern_stability(counts: &[u64]) -> Option<f64> {
    if counts.len() < 2 {
        return None;
    }
    let values: Vec<f64> = counts.iter().map(|&c| c as f64).collect();
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    if mean == 0.0 {
        return Some(1.0);
    }
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    Some((1.0 - variance.sqrt() / mean).clamp(0.0, 1.0))
}

#[allow(clippy::cast_precision_loss)]
fn mean(samples: &[u64]) -> Option<f64> {
    if samples.is_empty() {
        return None;
    }
    Some(samples.iter().map(|&s| s as f64).sum::<f64>() / samples.len() as f64)
}
