//! Error types for the journal

use std::path::{Path, PathBuf};

/// Errors raised by [`LogWriter`](crate::LogWriter)
///
/// I/O failures always surface to the caller of `append`/`flush`; a
/// journal that silently drops writes defeats its purpose.
#[derive(Debug, thiserror::Error)]
pub enum JournalError {
    /// IO error on a journal file
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Record could not be serialized
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Compressed archive could not be read or written
    #[error("archive error on {path}: {source}")]
    Archive {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },

    /// Path has no usable file name
    #[error("invalid journal path: {0}")]
    InvalidPath(PathBuf),
}

impl JournalError {
    /// Create IO error for path
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Create archive error for path
    pub fn archive(path: impl AsRef<Path>, source: zip::result::ZipError) -> Self {
        Self::Archive {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}
