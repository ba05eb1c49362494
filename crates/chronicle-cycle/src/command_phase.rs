//! Phase backed by an external command

use crate::error::CycleError;
use crate::phase::{CycleContext, Phase, PhaseOutput};
use chronicle_exec::{ExecPool, ExecRequest};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

/// Runs a command through the [`ExecPool`] and reads JSON lines from its
/// stdout
///
/// The command runs in the workspace unless its request sets a directory
/// and receives `CHRONICLE_CYCLE_ID`, `CHRONICLE_WORKSPACE` and
/// `CHRONICLE_INPUT_SIGNATURE`. Lines that are not JSON are skipped.
#[derive(Debug, Clone)]
pub struct CommandPhase {
    name: String,
    request: ExecRequest,
    pool: Arc<ExecPool>,
}

impl CommandPhase {
    #[must_use]
    pub fn new(name: impl Into<String>, request: ExecRequest, pool: Arc<ExecPool>) -> Self {
        Self {
            name: name.into(),
            request,
            pool,
        }
    }

    #[inline]
    #[must_use]
    pub fn request(&self) -> &ExecRequest {
        &self.request
    }
}

#[async_trait::async_trait]
impl Phase for CommandPhase {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, ctx: &CycleContext) -> Result<PhaseOutput, CycleError> {
        let mut request = self
            .request
            .clone()
            .with_env("CHRONICLE_CYCLE_ID", ctx.cycle_id.to_string())
            .with_env("CHRONICLE_WORKSPACE", ctx.workspace.display().to_string())
            .with_env("CHRONICLE_INPUT_SIGNATURE", ctx.signature.as_str());
        if request.cwd.is_none() {
            request.cwd = Some(ctx.workspace.clone());
        }

        let outcome = self.pool.run(request).await?;
        if outcome.timed_out {
            return Err(CycleError::phase(
                &self.name,
                format!("timed out after {}ms", outcome.duration_ms),
            ));
        }
        if !outcome.succeeded() {
            let code = outcome
                .exit_code
                .map_or_else(|| "signal".to_string(), |c| c.to_string());
            return Err(CycleError::phase(
                &self.name,
                format!("exit {code}: {}", outcome.stderr.trim()),
            ));
        }

        let metrics = parse_json_lines(&self.name, &outcome.stdout);
        debug!(
            phase = %self.name,
            count = metrics.len(),
            duration_ms = outcome.duration_ms,
            "Command phase finished"
        );
        Ok(PhaseOutput::from_metrics(metrics))
    }
}

fn parse_json_lines(phase: &str, stdout: &str) -> Vec<Value> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| match serde_json::from_str(line) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(phase, error = %e, "Skipping non-JSON output line");
                None
            }
        })
        .collect()
}
