//! Counters and latency distribution

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Snapshot of pool activity
///
/// Percentiles cover successful runs only, in milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    pub total: u64,
    pub successful: u64,
    pub failed: u64,
    pub timed_out: u64,
    /// Requests waiting for a slot
    pub queued: usize,
    /// Commands currently running
    pub in_flight: usize,
    pub p50: Option<u64>,
    pub p90: Option<u64>,
    pub p99: Option<u64>,
    pub max: Option<u64>,
}

/// How a finished job is counted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Completion {
    Success { duration_ms: u64 },
    Failure,
    TimedOut,
}

#[derive(Debug)]
pub(crate) struct Recorder {
    total: u64,
    successful: u64,
    failed: u64,
    timed_out: u64,
    window: usize,
    latencies: VecDeque<u64>,
}

impl Recorder {
    pub(crate) fn new(window: usize) -> Self {
        Self {
            total: 0,
            successful: 0,
            failed: 0,
            timed_out: 0,
            window: window.max(1),
            latencies: VecDeque::new(),
        }
    }

    pub(crate) fn record(&mut self, completion: Completion) {
        self.total += 1;
        match completion {
            Completion::Success { duration_ms } => {
                self.successful += 1;
                if self.latencies.len() == self.window {
                    self.latencies.pop_front();
                }
                self.latencies.push_back(duration_ms);
            }
            Completion::Failure => self.failed += 1,
            Completion::TimedOut => self.timed_out += 1,
        }
    }

    pub(crate) fn snapshot(&self, queued: usize, in_flight: usize) -> PoolStats {
        let mut sorted: Vec<u64> = self.latencies.iter().copied().collect();
        sorted.sort_unstable();
        PoolStats {
            total: self.total,
            successful: self.successful,
            failed: self.failed,
            timed_out: self.timed_out,
            queued,
            in_flight,
            p50: percentile(&sorted, 50),
            p90: percentile(&sorted, 90),
            p99: percentile(&sorted, 99),
            max: sorted.last().copied(),
        }
    }
}

/// Nearest-rank percentile over sorted samples
fn percentile(sorted: &[u64], pct: usize) -> Option<u64> {
    if sorted.is_empty() {
        return None;
    }
    let rank = (pct * sorted.len()).div_ceil(100).max(1);
    sorted.get(rank - 1).copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nearest_rank() {
        let samples: Vec<u64> = (1..=100).collect();
        assert_eq!(percentile(&samples, 50), Some(50));
        assert_eq!(percentile(&samples, 90), Some(90));
        assert_eq!(percentile(&samples, 99), Some(99));
        assert_eq!(percentile(&[7], 99), Some(7));
        assert_eq!(percentile(&[], 50), None);
    }

    #[test]
    fn only_successes_feed_latency() {
        let mut r = Recorder::new(10);
        r.record(Completion::Success { duration_ms: 40 });
        r.record(Completion::Failure);
        r.record(Completion::TimedOut);
        r.record(Completion::Success { duration_ms: 10 });

        let stats = r.snapshot(0, 0);
        assert_eq!(stats.total, 4);
        assert_eq!(stats.successful, 2);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.timed_out, 1);
        assert_eq!(stats.p50, Some(10));
        assert_eq!(stats.max, Some(40));
    }

    #[test]
    fn window_drops_oldest() {
        let mut r = Recorder::new(3);
        for ms in [900, 1, 2, 3] {
            r.record(Completion::Success { duration_ms: ms });
        }
        let stats = r.snapshot(0, 0);
        assert_eq!(stats.max, Some(3));
        assert_eq!(stats.successful, 4);
    }
}
