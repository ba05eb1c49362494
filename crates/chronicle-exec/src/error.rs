//! Execution pool errors
//!
//! A timeout or a non-zero exit is an outcome, not an error.

/// Errors that prevent a command from producing an outcome
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    /// The shell could not be started
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// Waiting on the child or reading its output failed
    #[error("failed to collect output of `{command}`: {source}")]
    Wait {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The pool was shut down while the request was queued
    #[error("execution pool is closed")]
    Closed,
}

impl ExecError {
    #[inline]
    pub(crate) fn spawn(command: &str, source: std::io::Error) -> Self {
        Self::Spawn {
            command: command.to_string(),
            source,
        }
    }

    #[inline]
    pub(crate) fn wait(command: &str, source: std::io::Error) -> Self {
        Self::Wait {
            command: command.to_string(),
            source,
        }
    }
}
