//! Scheduler and feedback configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Timing for the cycle and watchdog timers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Cycle period
    pub period_ms: u64,
    /// Delay between `start` and arming the timers
    pub grace_ms: u64,
    /// Lower bound for the watchdog period
    pub watchdog_floor_ms: u64,
    /// Restart when no cycle completed for this many periods
    pub stall_factor: u32,
    /// Executed-cycle durations kept for latency reporting
    pub latency_window: usize,
}

impl SchedulerConfig {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With cycle period
    #[inline]
    #[must_use]
    pub fn with_period(mut self, period: Duration) -> Self {
        self.period_ms = duration_ms(period).max(1);
        self
    }

    /// With stabilization grace period
    #[inline]
    #[must_use]
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace_ms = duration_ms(grace);
        self
    }

    /// With watchdog floor
    #[inline]
    #[must_use]
    pub fn with_watchdog_floor(mut self, floor: Duration) -> Self {
        self.watchdog_floor_ms = duration_ms(floor).max(1);
        self
    }

    #[inline]
    #[must_use]
    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms.max(1))
    }

    #[inline]
    #[must_use]
    pub fn grace(&self) -> Duration {
        Duration::from_millis(self.grace_ms)
    }

    /// Watchdog period for a given cycle period: `max(floor, period)`
    #[inline]
    #[must_use]
    pub fn watchdog_period(&self, period: Duration) -> Duration {
        Duration::from_millis(self.watchdog_floor_ms.max(1)).max(period)
    }

    /// Elapsed time without a completion that counts as a stall
    #[inline]
    #[must_use]
    pub fn stall_threshold(&self, period: Duration) -> Duration {
        period.saturating_mul(self.stall_factor.max(1))
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            period_ms: 5 * 60 * 1_000,
            grace_ms: 2_000,
            watchdog_floor_ms: 60_000,
            stall_factor: 2,
            latency_window: 1_000,
        }
    }
}

/// Adaptive-baseline feedback settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedbackConfig {
    /// Evaluate after every Nth executed cycle
    pub every_cycles: u64,
    /// Weight of the new accuracy signal in the update
    pub weight: f64,
    /// Baseline used when no calibration history exists
    pub initial_baseline: f64,
    /// Phase whose counts feed pattern stability
    pub stability_phase: String,
    /// Recent cycles considered for stability
    pub stability_window: usize,
    /// Calibration journal, relative to the ledger directory
    pub file: String,
}

impl FeedbackConfig {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    #[must_use]
    pub fn with_every_cycles(mut self, every: u64) -> Self {
        self.every_cycles = every.max(1);
        self
    }

    /// With update weight, clamped to `[0, 1]`
    #[inline]
    #[must_use]
    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight.clamp(0.0, 1.0);
        self
    }

    #[inline]
    #[must_use]
    pub fn with_stability_phase(mut self, phase: impl Into<String>) -> Self {
        self.stability_phase = phase.into();
        self
    }
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            every_cycles: 100,
            weight: 0.2,
            initial_baseline: 0.5,
            stability_phase: "patterns".to_string(),
            stability_window: 10,
            file: "calibration.jsonl".to_string(),
        }
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn watchdog_never_runs_faster_than_floor() {
        let config = SchedulerConfig::default();
        assert_eq!(
            config.watchdog_period(Duration::from_secs(5)),
            Duration::from_secs(60)
        );
        assert_eq!(
            config.watchdog_period(Duration::from_secs(300)),
            Duration::from_secs(300)
        );
    }

    #[test]
    fn stall_is_twice_the_period() {
        let config = SchedulerConfig::default();
        assert_eq!(
            config.stall_threshold(Duration::from_secs(10)),
            Duration::from_secs(20)
        );
    }

    #[test]
    fn feedback_weight_is_clamped() {
        assert!((FeedbackConfig::new().with_weight(3.0).weight - 1.0).abs() < f64::EPSILON);
        assert_eq!(FeedbackConfig::new().with_every_cycles(0).every_cycles, 1);
    }
}
