//! Cycle scheduler
//!
//! Drives the phase pipeline on a fixed period and supervises itself.
//!
//! - A cycle timer fires every period and spawns one cycle attempt. If a
//!   cycle is still running the attempt is dropped, never queued.
//! - A watchdog, running at `max(floor, period)`, restarts both timers when
//!   no attempt has completed for `stall_factor` periods.
//! - An attempt whose input signature equals the last executed one is a
//!   no-op: no phases run, no cycle id is consumed.
//! - Phases run one after another in registration order. A failing or
//!   panicking phase is recorded in its digest and the rest still run.
//! - The ledger is flushed after every executed cycle, successful or not.

use crate::config::SchedulerConfig;
use crate::context::{input_signature, ContextProvider};
use crate::error::CycleError;
use crate::feedback::FeedbackLoop;
use crate::phase::{CycleContext, Phase};
use chronicle_ledger::{hash_batch, ContentHash, Ledger, PartialCycle, PhaseDigest};
use futures::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::{HashSet, VecDeque};
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// How one phase fared within a cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseReport {
    pub name: String,
    pub count: u64,
    pub error: Option<String>,
    pub duration_ms: u64,
}

/// Result of an executed cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleReport {
    pub cycle_id: u64,
    /// Aggregation, append and flush all completed
    pub success: bool,
    pub phases: Vec<PhaseReport>,
    /// Root of the stored summary, if it was appended
    pub merkle_root: Option<ContentHash>,
    pub duration_ms: u64,
    /// Aggregation or persistence failure
    pub error: Option<String>,
}

impl CycleReport {
    /// Names of phases that failed
    pub fn failed_phases(&self) -> impl Iterator<Item = &str> {
        self.phases
            .iter()
            .filter(|p| p.error.is_some())
            .map(|p| p.name.as_str())
    }
}

/// What a cycle attempt did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Phases ran and a summary was (attempted to be) stored
    Executed(CycleReport),
    /// Another cycle was in flight; the attempt was dropped
    SkippedBusy,
    /// Inputs matched the last executed cycle
    SkippedUnchanged,
    /// The context provider failed; nothing ran
    ContextFailed(String),
}

impl CycleOutcome {
    #[inline]
    #[must_use]
    pub fn is_executed(&self) -> bool {
        matches!(self, Self::Executed(_))
    }

    #[inline]
    #[must_use]
    pub fn report(&self) -> Option<&CycleReport> {
        match self {
            Self::Executed(report) => Some(report),
            _ => None,
        }
    }
}

/// Point-in-time scheduler state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerStatus {
    /// Timers are armed
    pub running: bool,
    pub period_ms: Option<u64>,
    pub cycle_in_flight: bool,
    /// Last cycle executed by this scheduler instance
    pub last_cycle_id: Option<u64>,
    pub completed_cycles: u64,
    /// Attempts skipped because inputs were unchanged
    pub skipped_cycles: u64,
    /// Attempts dropped because a cycle was in flight
    pub dropped_ticks: u64,
    pub watchdog_restarts: u64,
    pub baseline: Option<f64>,
}

/// Builder for [`CycleScheduler`]
pub struct SchedulerBuilder {
    ledger: Arc<Ledger>,
    context: Arc<dyn ContextProvider>,
    phases: Vec<Arc<dyn Phase>>,
    workspace: PathBuf,
    config: SchedulerConfig,
    feedback: Option<FeedbackLoop>,
}

impl SchedulerBuilder {
    /// Append a phase; phases run in the order they are added
    #[must_use]
    pub fn phase(mut self, phase: impl Phase + 'static) -> Self {
        self.phases.push(Arc::new(phase));
        self
    }

    /// Append a shared phase
    #[must_use]
    pub fn phase_arc(mut self, phase: Arc<dyn Phase>) -> Self {
        self.phases.push(phase);
        self
    }

    #[must_use]
    pub fn workspace(mut self, workspace: impl Into<PathBuf>) -> Self {
        self.workspace = workspace.into();
        self
    }

    #[must_use]
    pub fn config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn feedback(mut self, feedback: FeedbackLoop) -> Self {
        self.feedback = Some(feedback);
        self
    }

    /// Build the scheduler
    ///
    /// # Errors
    /// Returns [`CycleError::NoPhases`] without phases or
    /// [`CycleError::DuplicatePhase`] if two phases share a name
    pub fn build(self) -> Result<CycleScheduler, CycleError> {
        if self.phases.is_empty() {
            return Err(CycleError::NoPhases);
        }
        let mut seen = HashSet::new();
        for phase in &self.phases {
            if !seen.insert(phase.name().to_string()) {
                return Err(CycleError::DuplicatePhase(phase.name().to_string()));
            }
        }

        Ok(CycleScheduler {
            inner: Arc::new(Inner {
                ledger: self.ledger,
                context: self.context,
                phases: self.phases,
                workspace: self.workspace,
                config: self.config,
                feedback: self.feedback,
                in_flight: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                timers: Mutex::new(None),
                state: Mutex::new(RunState::new()),
            }),
        })
    }
}

struct Timers {
    period: Duration,
    cancel: CancellationToken,
}

struct RunState {
    last_signature: Option<String>,
    /// Completion of the last attempt of any kind; read by the watchdog
    last_completion: Instant,
    last_cycle_id: Option<u64>,
    completed: u64,
    skipped: u64,
    dropped: u64,
    restarts: u64,
    durations_ms: VecDeque<u64>,
}

impl RunState {
    fn new() -> Self {
        Self {
            last_signature: None,
            last_completion: Instant::now(),
            last_cycle_id: None,
            completed: 0,
            skipped: 0,
            dropped: 0,
            restarts: 0,
            durations_ms: VecDeque::new(),
        }
    }
}

struct Inner {
    ledger: Arc<Ledger>,
    context: Arc<dyn ContextProvider>,
    phases: Vec<Arc<dyn Phase>>,
    workspace: PathBuf,
    config: SchedulerConfig,
    feedback: Option<FeedbackLoop>,
    in_flight: AtomicBool,
    /// Bumped by every start and stop; a start that sees a newer value
    /// after its grace period gives up
    generation: AtomicU64,
    timers: Mutex<Option<Timers>>,
    state: Mutex<RunState>,
}

/// Clears the single-flight flag, also when the cycle future is dropped
struct FlightGuard<'a>(&'a AtomicBool);

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Periodic, idempotent, self-supervising runner of the phase pipeline
///
/// Cheap to clone; clones share one scheduler.
#[derive(Clone)]
pub struct CycleScheduler {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for CycleScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let phases: Vec<&str> = self.inner.phases.iter().map(|p| p.name()).collect();
        f.debug_struct("CycleScheduler")
            .field("phases", &phases)
            .field("workspace", &self.inner.workspace)
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl CycleScheduler {
    /// Start building a scheduler over `ledger` fed by `context`
    #[must_use]
    pub fn builder(ledger: Arc<Ledger>, context: Arc<dyn ContextProvider>) -> SchedulerBuilder {
        SchedulerBuilder {
            ledger,
            context,
            phases: Vec::new(),
            workspace: PathBuf::from("."),
            config: SchedulerConfig::default(),
            feedback: None,
        }
    }

    #[inline]
    #[must_use]
    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.inner.ledger
    }

    /// (Re)start both timers
    ///
    /// Stops any armed timers, waits the grace period, then arms the cycle
    /// timer at `period` and the watchdog at `max(floor, period)`. A
    /// `stop` or newer `start` during the grace period wins.
    pub async fn start(&self, period: Duration) {
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.disarm();

        let grace = self.inner.config.grace();
        if !grace.is_zero() {
            tokio::time::sleep(grace).await;
        }
        if self.inner.generation.load(Ordering::SeqCst) != generation {
            debug!("Start superseded during grace period");
            return;
        }
        self.arm(period.max(Duration::from_millis(1)));
    }

    /// Start with the configured period
    pub async fn start_default(&self) {
        self.start(self.inner.config.period()).await;
    }

    /// Clear both timers; an in-flight cycle is left to finish
    pub fn stop(&self) {
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        if self.disarm() {
            info!("Scheduler stopped");
        }
    }

    /// Stop, wait for an in-flight cycle, then flush the ledger
    ///
    /// # Errors
    /// Returns error if the final flush fails
    pub async fn shutdown(&self) -> Result<(), CycleError> {
        self.stop();
        while self.inner.in_flight.load(Ordering::Acquire) {
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        self.inner.ledger.flush().await?;
        self.inner.ledger.drain_background().await;
        Ok(())
    }

    /// Run one cycle now, subject to the same single-flight guard
    pub async fn trigger(&self) -> CycleOutcome {
        self.run_cycle().await
    }

    /// Current counters and timer state
    #[must_use]
    pub fn status(&self) -> SchedulerStatus {
        let period_ms = self
            .inner
            .timers
            .lock()
            .as_ref()
            .map(|t| duration_ms(t.period));
        let state = self.inner.state.lock();
        SchedulerStatus {
            running: period_ms.is_some(),
            period_ms,
            cycle_in_flight: self.inner.in_flight.load(Ordering::Acquire),
            last_cycle_id: state.last_cycle_id,
            completed_cycles: state.completed,
            skipped_cycles: state.skipped,
            dropped_ticks: state.dropped,
            watchdog_restarts: state.restarts,
            baseline: self.inner.feedback.as_ref().map(FeedbackLoop::baseline),
        }
    }

    /// One cycle attempt
    pub async fn run_cycle(&self) -> CycleOutcome {
        if self
            .inner
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Cycle in flight, dropping tick");
            self.inner.state.lock().dropped += 1;
            return CycleOutcome::SkippedBusy;
        }
        let _flight = FlightGuard(&self.inner.in_flight);

        let outcome = self.attempt().await;
        self.inner.state.lock().last_completion = Instant::now();
        outcome
    }

    async fn attempt(&self) -> CycleOutcome {
        let started = Instant::now();

        let inputs = match self.inner.context.collect().await {
            Ok(inputs) => inputs,
            Err(e) => {
                warn!(error = %e, "Cycle context unavailable");
                return CycleOutcome::ContextFailed(e.to_string());
            }
        };

        let signature = input_signature(&inputs);
        {
            let mut state = self.inner.state.lock();
            if state.last_signature.as_deref() == Some(signature.as_str()) {
                state.skipped += 1;
                drop(state);
                metrics::counter!("chronicle_cycles_skipped_total").increment(1);
                info!(signature = %&signature[..16], "Inputs unchanged, cycle is a no-op");
                return CycleOutcome::SkippedUnchanged;
            }
        }

        let cycle_id = self.inner.ledger.next_cycle_id().await;
        let ctx = CycleContext {
            cycle_id,
            workspace: self.inner.workspace.clone(),
            inputs: Arc::new(inputs),
            signature: signature.clone(),
        };
        debug!(cycle_id, inputs = ctx.inputs.len(), "Cycle started");

        let mut partial = PartialCycle::new(cycle_id);
        let mut phases = Vec::with_capacity(self.inner.phases.len());
        for phase in &self.inner.phases {
            let (digest, report) = run_phase(phase.as_ref(), &ctx).await;
            partial = partial.with_phase(phase.name(), digest);
            phases.push(report);
        }

        let appended = self.inner.ledger.append_cycle(partial).await;
        let flushed = self.inner.ledger.flush().await;
        let duration_ms = duration_ms(started.elapsed());

        let (success, merkle_root, error) = match (appended, flushed) {
            (Ok(summary), Ok(())) => (true, Some(summary.merkle_root), None),
            (Ok(summary), Err(e)) => (false, Some(summary.merkle_root), Some(e.to_string())),
            (Err(e), _) => (false, None, Some(e.to_string())),
        };

        let report = CycleReport {
            cycle_id,
            success,
            phases,
            merkle_root,
            duration_ms,
            error,
        };

        metrics::counter!("chronicle_cycles_total").increment(1);
        if success {
            let latencies = {
                let mut state = self.inner.state.lock();
                state.last_signature = Some(signature);
                state.last_cycle_id = Some(cycle_id);
                state.completed += 1;
                if state.durations_ms.len() >= self.inner.config.latency_window.max(1) {
                    state.durations_ms.pop_front();
                }
                state.durations_ms.push_back(duration_ms);
                state.durations_ms.iter().copied().collect::<Vec<_>>()
            };
            info!(
                cycle_id,
                duration_ms,
                root = %merkle_root.map(|r| r.short()).unwrap_or_default(),
                failed_phases = report.failed_phases().count(),
                "Cycle completed"
            );
            self.maybe_recalibrate(cycle_id, &latencies).await;
        } else {
            error!(
                cycle_id,
                duration_ms,
                error = report.error.as_deref().unwrap_or_default(),
                "Cycle could not be recorded"
            );
        }

        CycleOutcome::Executed(report)
    }

    async fn maybe_recalibrate(&self, cycle_id: u64, latencies: &[u64]) {
        let Some(feedback) = &self.inner.feedback else {
            return;
        };
        if !feedback.is_due(cycle_id) {
            return;
        }
        if let Err(e) = feedback
            .evaluate(&self.inner.ledger, cycle_id, latencies)
            .await
        {
            warn!(cycle_id, error = %e, "Feedback evaluation failed");
        }
    }

    /// Cancel armed timers; true if any were armed
    fn disarm(&self) -> bool {
        match self.inner.timers.lock().take() {
            Some(timers) => {
                timers.cancel.cancel();
                true
            }
            None => false,
        }
    }

    fn arm(&self, period: Duration) {
        let cancel = CancellationToken::new();
        if let Some(previous) = self.inner.timers.lock().replace(Timers {
            period,
            cancel: cancel.clone(),
        }) {
            previous.cancel.cancel();
        }
        self.inner.state.lock().last_completion = Instant::now();

        let watchdog_every = self.inner.config.watchdog_period(period);
        tokio::spawn(self.clone().cycle_timer(period, cancel.clone()));
        tokio::spawn(self.clone().watchdog(period, watchdog_every, cancel));

        info!(
            period_ms = duration_ms(period),
            watchdog_ms = duration_ms(watchdog_every),
            "Scheduler armed"
        );
    }

    async fn cycle_timer(self, period: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let scheduler = self.clone();
                    tokio::spawn(async move {
                        scheduler.run_cycle().await;
                    });
                }
            }
        }
    }

    async fn watchdog(self, period: Duration, every: Duration, cancel: CancellationToken) {
        let threshold = self.inner.config.stall_threshold(period);
        let mut ticker = tokio::time::interval_at(Instant::now() + every, every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let stalled_for = self.inner.state.lock().last_completion.elapsed();
                    if stalled_for > threshold {
                        self.inner.state.lock().restarts += 1;
                        metrics::counter!("chronicle_watchdog_restarts_total").increment(1);
                        warn!(
                            stalled_ms = duration_ms(stalled_for),
                            threshold_ms = duration_ms(threshold),
                            "No cycle completed in time, restarting scheduler"
                        );
                        self.start(period).await;
                        break;
                    }
                }
            }
        }
    }
}

async fn run_phase(phase: &dyn Phase, ctx: &CycleContext) -> (PhaseDigest, PhaseReport) {
    let started = Instant::now();
    let result = AssertUnwindSafe(phase.execute(ctx)).catch_unwind().await;
    let elapsed = duration_ms(started.elapsed());

    let failure = |message: String| {
        warn!(cycle_id = ctx.cycle_id, phase = phase.name(), error = %message, "Phase failed");
        (
            PhaseDigest::failed(hash_batch(&[]), message.clone()),
            PhaseReport {
                name: phase.name().to_string(),
                count: 0,
                error: Some(message),
                duration_ms: elapsed,
            },
        )
    };

    match result {
        Ok(Ok(output)) => {
            debug!(
                cycle_id = ctx.cycle_id,
                phase = phase.name(),
                count = output.count,
                duration_ms = elapsed,
                "Phase finished"
            );
            (
                PhaseDigest::new(hash_batch(&output.metrics), output.count),
                PhaseReport {
                    name: phase.name().to_string(),
                    count: output.count,
                    error: None,
                    duration_ms: elapsed,
                },
            )
        }
        Ok(Err(e)) => failure(e.to_string()),
        Err(panic) => failure(format!("panicked: {}", panic_message(panic.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
