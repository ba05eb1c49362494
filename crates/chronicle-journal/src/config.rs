//! Writer configuration

use serde::{Deserialize, Serialize};

const MIB: u64 = 1024 * 1024;

/// Buffering and rotation thresholds for a [`LogWriter`](crate::LogWriter)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WriterConfig {
    /// Buffered lines that trigger an automatic flush
    pub flush_threshold_lines: usize,
    /// Hard cap on buffered lines
    pub max_buffer_lines: usize,
    /// Hard cap on buffered bytes
    pub max_buffer_bytes: usize,
    /// Rotate once the active file reaches this many MiB
    pub rotate_max_mb: u64,
    /// Rotate once the active file reaches this many lines
    pub rotate_max_lines: u64,
    /// Compress rotated files in the background
    pub compress_rotated: bool,
    /// Add a `captured_at` field to object records that lack one
    pub inject_timestamp: bool,
}

impl WriterConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With automatic flush threshold
    #[inline]
    #[must_use]
    pub fn with_flush_threshold(mut self, lines: usize) -> Self {
        self.flush_threshold_lines = lines.max(1);
        self
    }

    /// With rotation line limit
    #[inline]
    #[must_use]
    pub fn with_rotate_max_lines(mut self, lines: u64) -> Self {
        self.rotate_max_lines = lines;
        self
    }

    /// With rotation size limit in MiB
    #[inline]
    #[must_use]
    pub fn with_rotate_max_mb(mut self, mb: u64) -> Self {
        self.rotate_max_mb = mb;
        self
    }

    /// Enable or disable background compression of rotated files
    #[inline]
    #[must_use]
    pub fn with_compression(mut self, enabled: bool) -> Self {
        self.compress_rotated = enabled;
        self
    }

    /// Enable or disable `captured_at` injection
    #[inline]
    #[must_use]
    pub fn with_timestamp_injection(mut self, enabled: bool) -> Self {
        self.inject_timestamp = enabled;
        self
    }

    /// Rotation size limit in bytes
    #[inline]
    #[must_use]
    pub fn rotate_max_bytes(&self) -> u64 {
        self.rotate_max_mb.saturating_mul(MIB)
    }

    /// Buffered line count that forces a flush
    #[inline]
    #[must_use]
    pub(crate) fn effective_flush_lines(&self) -> usize {
        self.flush_threshold_lines.min(self.max_buffer_lines).max(1)
    }
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            flush_threshold_lines: 50,
            max_buffer_lines: 1_000,
            max_buffer_bytes: 1024 * 1024,
            rotate_max_mb: 50,
            rotate_max_lines: 100_000,
            compress_rotated: true,
            inject_timestamp: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = WriterConfig::default();
        assert_eq!(config.effective_flush_lines(), 50);
        assert_eq!(config.rotate_max_bytes(), 50 * MIB);
        assert!(config.compress_rotated);
    }

    #[test]
    fn flush_threshold_never_exceeds_cap() {
        let mut config = WriterConfig::default().with_flush_threshold(5_000);
        config.max_buffer_lines = 200;
        assert_eq!(config.effective_flush_lines(), 200);

        let zero = WriterConfig::default().with_flush_threshold(0);
        assert_eq!(zero.effective_flush_lines(), 1);
    }

    #[test]
    fn partial_config_fills_defaults() {
        let config: WriterConfig = serde_json::from_str(r#"{"rotate_max_lines": 10}"#).unwrap();
        assert_eq!(config.rotate_max_lines, 10);
        assert_eq!(config.flush_threshold_lines, 50);
    }
}
