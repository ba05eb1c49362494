//! Chronicle Journal
//!
//! Buffered, rotating, append-only line storage. One JSON record per line.
//!
//! # Core Concepts
//!
//! - [`LogWriter`]: owns one target file for the lifetime of the process
//! - [`WriterConfig`]: buffering, rotation and compression thresholds
//! - [`ArchiveFile`]: a rotated segment, plain or compressed
//!
//! Append order equals on-disk order. Existing content is never rewritten;
//! rotation renames the active file to `<stem>-<epochMillis><ext>` and a
//! background task compresses it to `<stem>-<epochMillis><ext>.zip`.
//!
//! # Example
//!
//! ```rust,ignore
//! use chronicle_journal::{LogWriter, WriterConfig};
//!
//! let writer = LogWriter::open("state/history.jsonl", WriterConfig::default()).await?;
//! writer.append(&serde_json::json!({"event": "commit"})).await?;
//! writer.flush(true).await?;
//! let records = writer.read_all().await?;
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod config;
mod error;
mod rotation;
mod writer;

pub use config::WriterConfig;
pub use error::JournalError;
pub use rotation::{ArchiveFile, ArchiveFormat, COMPRESSED_EXTENSION};
pub use writer::{LogWriter, WriterStats, CAPTURED_AT_FIELD};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
