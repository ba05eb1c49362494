//! Chronicle Exec
//!
//! Bounded-concurrency runner for external commands.
//!
//! # Core Concepts
//!
//! - [`ExecPool`]: fixed number of slots, FIFO queue for the rest
//! - [`ExecRequest`]: command line, working directory, timeout, environment
//! - [`ExecOutcome`]: captured output, duration and the `timed_out` state
//! - [`PoolStats`]: counters plus p50/p90/p99/max over successful runs
//!
//! # Example
//!
//! ```rust,ignore
//! use chronicle_exec::{ExecPool, ExecRequest, PoolConfig};
//!
//! let pool = ExecPool::new(PoolConfig::default().with_size(2));
//! let outcome = pool
//!     .run(ExecRequest::new("git log --oneline -n 50").with_timeout(Duration::from_secs(5)))
//!     .await?;
//! if outcome.timed_out {
//!     // output is empty, duration is roughly the timeout
//! }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod error;
mod pool;
mod stats;

pub use error::ExecError;
pub use pool::{ExecOutcome, ExecPool, ExecRequest, PoolConfig};
pub use stats::PoolStats;

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
