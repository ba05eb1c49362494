//! Bounded command pool
//!
//! At most `size` commands run at once; further requests wait on a fair
//! semaphore and are served in arrival order.

use crate::error::ExecError;
use crate::stats::{Completion, PoolStats, Recorder};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tokio::sync::Semaphore;
use tracing::{debug, warn};
use uuid::Uuid;

/// Pool sizing and defaults
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Maximum concurrently running commands
    pub size: usize,
    /// Timeout for requests that do not set one
    pub default_timeout_ms: u64,
    /// Successful runs kept for percentiles
    pub latency_window: usize,
}

impl PoolConfig {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With concurrency bound (at least 1)
    #[inline]
    #[must_use]
    pub fn with_size(mut self, size: usize) -> Self {
        self.size = size.max(1);
        self
    }

    /// With default per-command timeout
    #[inline]
    #[must_use]
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    #[inline]
    #[must_use]
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            size: 2,
            default_timeout_ms: 30_000,
            latency_window: 10_000,
        }
    }
}

/// One command to run through the shell
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecRequest {
    /// Shell command line
    pub command: String,
    /// Working directory, inherited when `None`
    pub cwd: Option<PathBuf>,
    /// Overrides the pool default
    pub timeout: Option<Duration>,
    /// Extra environment variables
    pub env: Vec<(String, String)>,
}

impl ExecRequest {
    #[must_use]
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            cwd: None,
            timeout: None,
            env: Vec::new(),
        }
    }

    #[inline]
    #[must_use]
    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    #[inline]
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[inline]
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

/// Result of one command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutcome {
    pub job_id: Uuid,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
    /// The command hit its timeout; output is empty
    pub timed_out: bool,
    /// `None` when timed out or killed by a signal
    pub exit_code: Option<i32>,
}

impl ExecOutcome {
    /// Finished in time with exit code 0
    #[inline]
    #[must_use]
    pub fn succeeded(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }
}

/// Decrements a gauge when dropped, including on cancellation
struct GaugeGuard<'a>(&'a AtomicUsize);

impl<'a> GaugeGuard<'a> {
    fn enter(gauge: &'a AtomicUsize) -> Self {
        gauge.fetch_add(1, Ordering::SeqCst);
        Self(gauge)
    }
}

impl Drop for GaugeGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Bounded-concurrency runner for external commands
#[derive(Debug)]
pub struct ExecPool {
    config: PoolConfig,
    permits: Arc<Semaphore>,
    recorder: Mutex<Recorder>,
    queued: AtomicUsize,
    in_flight: AtomicUsize,
}

impl ExecPool {
    /// Create new pool
    #[must_use]
    pub fn new(config: PoolConfig) -> Self {
        let size = config.size.max(1);
        Self {
            permits: Arc::new(Semaphore::new(size)),
            recorder: Mutex::new(Recorder::new(config.latency_window)),
            queued: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            config,
        }
    }

    #[inline]
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Run one command, waiting for a free slot first
    ///
    /// No retries. A timeout kills the command (its whole process group on
    /// unix) and yields an outcome with `timed_out` set.
    ///
    /// # Errors
    /// Returns [`ExecError::Spawn`] if the shell cannot be started,
    /// [`ExecError::Wait`] if its output cannot be collected, or
    /// [`ExecError::Closed`] if the pool was closed
    pub async fn run(&self, request: ExecRequest) -> Result<ExecOutcome, ExecError> {
        let job_id = Uuid::new_v4();

        let permit = {
            let _queued = GaugeGuard::enter(&self.queued);
            debug!(%job_id, command = %request.command, "Waiting for execution slot");
            self.permits.acquire().await.map_err(|_| ExecError::Closed)?
        };

        let result = {
            let _running = GaugeGuard::enter(&self.in_flight);
            self.execute(job_id, &request).await
        };
        drop(permit);

        let completion = match &result {
            Ok(outcome) if outcome.timed_out => Completion::TimedOut,
            Ok(outcome) if outcome.succeeded() => Completion::Success {
                duration_ms: outcome.duration_ms,
            },
            Ok(_) | Err(_) => Completion::Failure,
        };
        self.recorder.lock().record(completion);
        publish(completion);

        result
    }

    async fn execute(&self, job_id: Uuid, request: &ExecRequest) -> Result<ExecOutcome, ExecError> {
        let timeout = request
            .timeout
            .unwrap_or_else(|| self.config.default_timeout());

        let mut std_cmd = shell_command(&request.command);
        if let Some(cwd) = &request.cwd {
            std_cmd.current_dir(cwd);
        }
        std_cmd
            .envs(request.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            std_cmd.process_group(0);
        }
        let mut cmd = Command::from(std_cmd);
        cmd.kill_on_drop(true);

        let started = Instant::now();
        let child = cmd
            .spawn()
            .map_err(|e| ExecError::spawn(&request.command, e))?;
        let pid = child.id();

        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => {
                let outcome = ExecOutcome {
                    job_id,
                    stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                    duration_ms: elapsed_ms(started),
                    timed_out: false,
                    exit_code: output.status.code(),
                };
                debug!(
                    %job_id,
                    exit_code = ?outcome.exit_code,
                    duration_ms = outcome.duration_ms,
                    "Command finished"
                );
                Ok(outcome)
            }
            Ok(Err(e)) => Err(ExecError::wait(&request.command, e)),
            Err(_) => {
                // The child itself is killed on drop; the group takes its descendants.
                terminate_group(pid);
                warn!(
                    %job_id,
                    command = %request.command,
                    timeout_ms = timeout.as_millis(),
                    "Command timed out"
                );
                Ok(ExecOutcome {
                    job_id,
                    stdout: String::new(),
                    stderr: String::new(),
                    duration_ms: elapsed_ms(started),
                    timed_out: true,
                    exit_code: None,
                })
            }
        }
    }

    /// Current counters and latency percentiles
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        self.recorder.lock().snapshot(
            self.queued.load(Ordering::SeqCst),
            self.in_flight.load(Ordering::SeqCst),
        )
    }

    /// Reject queued and future requests
    pub fn close(&self) {
        self.permits.close();
    }
}

fn shell_command(command: &str) -> std::process::Command {
    #[cfg(windows)]
    {
        let mut cmd = std::process::Command::new("cmd");
        cmd.arg("/C").arg(command);
        cmd
    }
    #[cfg(not(windows))]
    {
        let mut cmd = std::process::Command::new("sh");
        cmd.arg("-c").arg(command);
        cmd
    }
}

#[cfg(unix)]
fn terminate_group(pid: Option<u32>) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Some(pid) = pid.and_then(|p| i32::try_from(p).ok()) else {
        return;
    };
    if let Err(e) = killpg(Pid::from_raw(pid), Signal::SIGKILL) {
        debug!(pid, error = %e, "Process group already gone");
    }
}

#[cfg(not(unix))]
fn terminate_group(_pid: Option<u32>) {}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

fn publish(completion: Completion) {
    metrics::counter!("chronicle_exec_total").increment(1);
    match completion {
        Completion::Success { duration_ms } => {
            metrics::counter!("chronicle_exec_successful").increment(1);
            #[allow(clippy::cast_precision_loss)]
            metrics::histogram!("chronicle_exec_latency_ms").record(duration_ms as f64);
        }
        Completion::Failure => metrics::counter!("chronicle_exec_failed").increment(1),
        Completion::TimedOut => metrics::counter!("chronicle_exec_timed_out").increment(1),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn captures_stdout_and_exit_code() {
        let pool = ExecPool::new(PoolConfig::default());
        let outcome = pool
            .run(ExecRequest::new("printf 'hello'; echo oops >&2; exit 3"))
            .await
            .unwrap();
        assert_eq!(outcome.stdout, "hello");
        assert_eq!(outcome.stderr.trim(), "oops");
        assert_eq!(outcome.exit_code, Some(3));
        assert!(!outcome.succeeded());

        let stats = pool.stats();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.p50, None);
    }

    #[tokio::test]
    async fn env_and_cwd_are_applied() {
        let dir = tempfile::tempdir().unwrap();
        let pool = ExecPool::new(PoolConfig::default());
        let outcome = pool
            .run(
                ExecRequest::new("echo \"$CHRONICLE_TEST_VALUE\"; pwd")
                    .with_env("CHRONICLE_TEST_VALUE", "42")
                    .with_cwd(dir.path()),
            )
            .await
            .unwrap();
        let mut lines = outcome.stdout.lines();
        assert_eq!(lines.next(), Some("42"));
        let cwd = std::path::PathBuf::from(lines.next().unwrap());
        assert_eq!(
            cwd.canonicalize().unwrap(),
            dir.path().canonicalize().unwrap()
        );
    }

    #[tokio::test]
    async fn missing_working_directory_is_a_spawn_error() {
        let pool = ExecPool::new(PoolConfig::default());
        let err = pool
            .run(ExecRequest::new("true").with_cwd("/nonexistent/chronicle/dir"))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::Spawn { .. }));
        assert_eq!(pool.stats().failed, 1);
    }

    #[tokio::test]
    async fn closed_pool_rejects_requests() {
        let pool = ExecPool::new(PoolConfig::default());
        pool.close();
        let err = pool.run(ExecRequest::new("true")).await.unwrap_err();
        assert!(matches!(err, ExecError::Closed));
    }
}
