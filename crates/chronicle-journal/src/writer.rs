//! The append-only writer
//!
//! Appends are buffered in memory and written in batches. A flush first
//! checks the rotation thresholds against the active file, then appends
//! the batch; with `force_durable` it also waits for `sync_data`.

use crate::config::WriterConfig;
use crate::error::JournalError;
use crate::rotation::{compress_segment, compressed_sibling, ArchiveFile, SegmentNaming};
use chrono::{SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::fs::OpenOptions;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Field injected into object records when timestamp capture is enabled
pub const CAPTURED_AT_FIELD: &str = "captured_at";

const CONFLICT_MARKERS: [&str; 4] = ["<<<<<<<", "=======", ">>>>>>>", "|||||||"];

/// Point-in-time counters for a writer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriterStats {
    /// Lines in the active file
    pub lines: u64,
    /// Bytes in the active file
    pub bytes: u64,
    /// Entries waiting in the buffer
    pub buffered: usize,
    /// Rotations performed by this writer
    pub rotations: u64,
}

#[derive(Debug, Default)]
struct WriterState {
    buffer: Vec<String>,
    buffered_bytes: usize,
    file_lines: u64,
    file_bytes: u64,
    /// Written since the last `sync_data`
    unsynced: bool,
    /// Active file ends without a newline (torn write before a crash)
    torn_tail: bool,
    rotations: u64,
    last_rotated_at: u64,
}

/// Buffered, rotating, append-only journal over one file
///
/// Created once per target file. All methods take `&self`; internal state
/// is serialized by an async mutex so append order equals on-disk order.
#[derive(Debug)]
pub struct LogWriter {
    path: PathBuf,
    naming: SegmentNaming,
    config: WriterConfig,
    state: Mutex<WriterState>,
    background: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

impl LogWriter {
    /// Open (or create) a journal at `path`
    ///
    /// Creates the parent directory and counts existing lines and bytes so
    /// rotation thresholds hold across restarts.
    ///
    /// # Errors
    /// Returns error if the directory cannot be created or the existing
    /// file cannot be read
    pub async fn open(
        path: impl Into<PathBuf>,
        config: WriterConfig,
    ) -> Result<Self, JournalError> {
        let path = path.into();
        let naming = SegmentNaming::new(&path)?;
        tokio::fs::create_dir_all(naming.dir())
            .await
            .map_err(|e| JournalError::io(naming.dir(), e))?;

        let existing = count_existing(&path).await?;
        if existing.torn_tail {
            tracing::warn!(
                path = %path.display(),
                bytes = existing.bytes,
                "journal ends with a partial line; next batch starts on a new line"
            );
        }
        tracing::debug!(
            path = %path.display(),
            lines = existing.lines,
            bytes = existing.bytes,
            "journal opened"
        );

        Ok(Self {
            path,
            naming,
            config,
            state: Mutex::new(WriterState {
                file_lines: existing.lines,
                file_bytes: existing.bytes,
                torn_tail: existing.torn_tail,
                ..WriterState::default()
            }),
            background: parking_lot::Mutex::new(Vec::new()),
        })
    }

    /// Active file path
    #[inline]
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writer configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &WriterConfig {
        &self.config
    }

    /// Buffer one record, flushing (non-durably) if a threshold is reached
    ///
    /// The record stays buffered even when the automatic flush fails, so a
    /// later flush writes it.
    ///
    /// # Errors
    /// Returns error if the record cannot be serialized or an automatic
    /// flush fails
    pub async fn append<T>(&self, entry: &T) -> Result<(), JournalError>
    where
        T: Serialize + ?Sized,
    {
        if self.enqueue(entry).await? {
            self.flush(false).await?;
        }
        Ok(())
    }

    /// Buffer one record without touching the file
    ///
    /// Returns whether the buffer reached the line threshold or byte cap.
    /// Callers that track what has been accepted can update their own
    /// state before flushing.
    ///
    /// # Errors
    /// Returns error only if the record cannot be serialized; nothing is
    /// buffered then
    pub async fn enqueue<T>(&self, entry: &T) -> Result<bool, JournalError>
    where
        T: Serialize + ?Sized,
    {
        let mut value = serde_json::to_value(entry)?;
        if self.config.inject_timestamp {
            if let Value::Object(map) = &mut value {
                if !map.contains_key(CAPTURED_AT_FIELD) {
                    map.insert(
                        CAPTURED_AT_FIELD.to_string(),
                        Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)),
                    );
                }
            }
        }
        let line = serde_json::to_string(&value)?;

        let mut state = self.state.lock().await;
        state.buffered_bytes += line.len() + 1;
        state.buffer.push(line);

        Ok(state.buffer.len() >= self.config.effective_flush_lines()
            || state.buffered_bytes >= self.config.max_buffer_bytes)
    }

    /// Write buffered entries to disk
    ///
    /// Rotation thresholds are checked before the batch is written, so a
    /// batch always lands whole in one file. With `force_durable` this
    /// returns only after the data reached stable storage.
    ///
    /// # Errors
    /// Returns error on any IO failure; buffered entries are kept so a
    /// later flush can retry
    pub async fn flush(&self, force_durable: bool) -> Result<(), JournalError> {
        let mut state = self.state.lock().await;
        self.flush_locked(&mut state, force_durable).await
    }

    async fn flush_locked(
        &self,
        state: &mut WriterState,
        force_durable: bool,
    ) -> Result<(), JournalError> {
        if state.buffer.is_empty() {
            if force_durable && state.unsynced {
                self.sync_active().await?;
                state.unsynced = false;
            }
            return Ok(());
        }

        if self.rotation_due(state) {
            self.rotate_locked(state).await?;
        }

        let mut payload = String::with_capacity(state.buffered_bytes + 1);
        if state.torn_tail {
            payload.push('\n');
        }
        for line in &state.buffer {
            payload.push_str(line);
            payload.push('\n');
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| JournalError::io(&self.path, e))?;
        file.write_all(payload.as_bytes())
            .await
            .map_err(|e| JournalError::io(&self.path, e))?;
        file.flush()
            .await
            .map_err(|e| JournalError::io(&self.path, e))?;

        if force_durable {
            file.sync_data()
                .await
                .map_err(|e| JournalError::io(&self.path, e))?;
            state.unsynced = false;
        } else {
            state.unsynced = true;
        }

        let written = state.buffer.len() as u64;
        state.file_lines += written + u64::from(state.torn_tail);
        state.torn_tail = false;
        state.file_bytes += payload.len() as u64;
        state.buffer.clear();
        state.buffered_bytes = 0;

        tracing::debug!(
            path = %self.path.display(),
            lines = written,
            durable = force_durable,
            "journal flushed"
        );
        Ok(())
    }

    fn rotation_due(&self, state: &WriterState) -> bool {
        state.file_lines > 0
            && (state.file_lines >= self.config.rotate_max_lines
                || state.file_bytes >= self.config.rotate_max_bytes())
    }

    async fn sync_active(&self) -> Result<(), JournalError> {
        let file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| JournalError::io(&self.path, e))?;
        file.sync_data()
            .await
            .map_err(|e| JournalError::io(&self.path, e))
    }

    /// Rename the active file and start a fresh one
    async fn rotate_locked(&self, state: &mut WriterState) -> Result<(), JournalError> {
        if state.unsynced {
            self.sync_active().await?;
            state.unsynced = false;
        }

        let mut rotated_at = epoch_millis().max(state.last_rotated_at + 1);
        let mut target = self.naming.rotated_path(rotated_at);
        while self.segment_exists(&target).await? {
            rotated_at += 1;
            target = self.naming.rotated_path(rotated_at);
        }

        tokio::fs::rename(&self.path, &target)
            .await
            .map_err(|e| JournalError::io(&target, e))?;

        tracing::info!(
            path = %self.path.display(),
            archived = %target.display(),
            lines = state.file_lines,
            bytes = state.file_bytes,
            "journal rotated"
        );

        state.file_lines = 0;
        state.file_bytes = 0;
        state.torn_tail = false;
        state.rotations += 1;
        state.last_rotated_at = rotated_at;

        if self.config.compress_rotated {
            self.spawn_compression(target);
        }
        Ok(())
    }

    async fn segment_exists(&self, plain: &Path) -> Result<bool, JournalError> {
        let compressed = compressed_sibling(plain);
        for candidate in [plain, compressed.as_path()] {
            if tokio::fs::try_exists(candidate)
                .await
                .map_err(|e| JournalError::io(candidate, e))?
            {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Fire-and-forget compression; failures are logged, never returned
    fn spawn_compression(&self, segment: PathBuf) {
        let handle = tokio::task::spawn_blocking(move || match compress_segment(&segment) {
            Ok(archive) => {
                tracing::debug!(archive = %archive.display(), "rotated segment compressed");
            }
            Err(e) => {
                tracing::warn!(segment = %segment.display(), error = %e, "compression failed");
            }
        });

        let mut background = self.background.lock();
        background.retain(|h| !h.is_finished());
        background.push(handle);
    }

    /// Wait for outstanding background compression
    pub async fn drain_background(&self) {
        let handles: Vec<_> = std::mem::take(&mut *self.background.lock());
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "compression task aborted");
            }
        }
    }

    /// Rotated segments of this journal, oldest first
    ///
    /// # Errors
    /// Returns error if the directory cannot be listed
    pub async fn archives(&self) -> Result<Vec<ArchiveFile>, JournalError> {
        let naming = self.naming.clone();
        tokio::task::spawn_blocking(move || naming.list_archives())
            .await
            .map_err(|e| JournalError::io(self.naming.dir(), std::io::Error::other(e)))?
    }

    /// Every record in the journal, oldest first
    ///
    /// Reads rotated segments, then the active file, then entries still in
    /// the buffer. Lines that fail to parse (torn writes, merge-conflict
    /// markers) are skipped with a warning.
    ///
    /// # Errors
    /// Returns error only if a file cannot be read at all
    pub async fn read_all(&self) -> Result<Vec<Value>, JournalError> {
        self.read_all_as().await
    }

    /// Every record that deserializes as `T`, oldest first
    ///
    /// Each line is decoded straight into `T`, so map ordering inside a
    /// record is preserved. Lines of a different shape are skipped with a
    /// warning, like corrupted ones.
    ///
    /// # Errors
    /// Same as [`read_all`](Self::read_all)
    pub async fn read_all_as<T: DeserializeOwned>(&self) -> Result<Vec<T>, JournalError> {
        let state = self.state.lock().await;

        let archives = self.archives().await?;
        let mut records = Vec::new();
        for archive in archives {
            let text = tokio::task::spawn_blocking(move || archive.read_text())
                .await
                .map_err(|e| JournalError::io(&self.path, std::io::Error::other(e)))??;
            parse_lines(&text, &self.path, &mut records);
        }

        match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => parse_lines(&text, &self.path, &mut records),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(JournalError::io(&self.path, e)),
        }

        for line in &state.buffer {
            parse_lines(line, &self.path, &mut records);
        }
        Ok(records)
    }

    /// Current counters
    pub async fn stats(&self) -> WriterStats {
        let state = self.state.lock().await;
        WriterStats {
            lines: state.file_lines,
            bytes: state.file_bytes,
            buffered: state.buffer.len(),
            rotations: state.rotations,
        }
    }
}

fn parse_lines<T: DeserializeOwned>(text: &str, path: &Path, out: &mut Vec<T>) {
    for (idx, line) in text.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if CONFLICT_MARKERS.iter().any(|m| trimmed.starts_with(m)) {
            tracing::warn!(path = %path.display(), line = idx + 1, "skipping merge-conflict marker");
            continue;
        }
        match serde_json::from_str(trimmed) {
            Ok(value) => out.push(value),
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    line = idx + 1,
                    error = %e,
                    "skipping unparseable journal line"
                );
            }
        }
    }
}

struct ExistingFile {
    lines: u64,
    bytes: u64,
    torn_tail: bool,
}

async fn count_existing(path: &Path) -> Result<ExistingFile, JournalError> {
    let mut existing = ExistingFile {
        lines: 0,
        bytes: 0,
        torn_tail: false,
    };
    let mut file = match tokio::fs::File::open(path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(existing),
        Err(e) => return Err(JournalError::io(path, e)),
    };

    let mut last = None;
    let mut chunk = vec![0u8; 64 * 1024];
    loop {
        let read = file
            .read(&mut chunk)
            .await
            .map_err(|e| JournalError::io(path, e))?;
        if read == 0 {
            break;
        }
        existing.bytes += read as u64;
        existing.lines += chunk[..read].iter().filter(|&&b| b == b'\n').count() as u64;
        last = chunk[..read].last().copied();
    }
    existing.torn_tail = last.is_some_and(|b| b != b'\n');
    Ok(existing)
}

fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}
