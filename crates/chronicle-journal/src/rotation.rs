//! Rotated segment naming, discovery and compression
//!
//! Segment names are `<stem>-<epochMillis><ext>`; compressed segments add
//! `.zip`. Everything in here that touches `std::fs` is blocking and is
//! run through `spawn_blocking` by the writer.

use crate::error::JournalError;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// Extension appended to compressed segments
pub const COMPRESSED_EXTENSION: &str = "zip";

/// Storage format of a rotated segment
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ArchiveFormat {
    /// Renamed, not yet compressed
    Plain,
    /// Single-entry zip archive
    Compressed,
}

/// A rotated journal segment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveFile {
    /// Location on disk
    pub path: PathBuf,
    /// Epoch millis embedded in the file name
    pub rotated_at_ms: u64,
    /// Plain or compressed
    pub format: ArchiveFormat,
}

impl ArchiveFile {
    /// Read the full text of the segment (blocking)
    ///
    /// # Errors
    /// Returns error if the file or the archive cannot be read
    pub fn read_text(&self) -> Result<String, JournalError> {
        match self.format {
            ArchiveFormat::Plain => match fs::read_to_string(&self.path) {
                Ok(text) => Ok(text),
                // Compression finished between listing and reading.
                Err(e) if e.kind() == io::ErrorKind::NotFound => Self {
                    path: compressed_sibling(&self.path),
                    rotated_at_ms: self.rotated_at_ms,
                    format: ArchiveFormat::Compressed,
                }
                .read_text(),
                Err(e) => Err(JournalError::io(&self.path, e)),
            },
            ArchiveFormat::Compressed => {
                let file = File::open(&self.path).map_err(|e| JournalError::io(&self.path, e))?;
                let mut archive =
                    ZipArchive::new(file).map_err(|e| JournalError::archive(&self.path, e))?;
                let mut entry = archive
                    .by_index(0)
                    .map_err(|e| JournalError::archive(&self.path, e))?;
                let mut text = String::new();
                entry
                    .read_to_string(&mut text)
                    .map_err(|e| JournalError::io(&self.path, e))?;
                Ok(text)
            }
        }
    }
}

/// Splits a journal path into the pieces used for segment names
#[derive(Debug, Clone)]
pub(crate) struct SegmentNaming {
    dir: PathBuf,
    stem: String,
    /// Includes the leading dot, empty when the file has no extension
    ext: String,
}

impl SegmentNaming {
    pub(crate) fn new(path: &Path) -> Result<Self, JournalError> {
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| JournalError::InvalidPath(path.to_path_buf()))?
            .to_string();
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| format!(".{e}"))
            .unwrap_or_default();
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        Ok(Self { dir, stem, ext })
    }

    pub(crate) fn dir(&self) -> &Path {
        &self.dir
    }

    /// `<dir>/<stem>-<ms><ext>`
    pub(crate) fn rotated_path(&self, rotated_at_ms: u64) -> PathBuf {
        self.dir
            .join(format!("{}-{}{}", self.stem, rotated_at_ms, self.ext))
    }

    /// Recognise a segment file name belonging to this journal
    pub(crate) fn parse(&self, file_name: &str) -> Option<(u64, ArchiveFormat)> {
        let rest = file_name.strip_prefix(&self.stem)?.strip_prefix('-')?;
        let compressed_suffix = format!(".{COMPRESSED_EXTENSION}");
        let (body, format) = match rest.strip_suffix(compressed_suffix.as_str()) {
            Some(body) => (body, ArchiveFormat::Compressed),
            None => (rest, ArchiveFormat::Plain),
        };
        let digits = body.strip_suffix(self.ext.as_str())?;
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        digits.parse().ok().map(|ms| (ms, format))
    }

    /// List rotated segments, oldest first (blocking)
    ///
    /// When compression was interrupted both forms may exist; the plain
    /// file is authoritative because it is only removed after the archive
    /// is complete.
    pub(crate) fn list_archives(&self) -> Result<Vec<ArchiveFile>, JournalError> {
        let read_dir = match fs::read_dir(&self.dir) {
            Ok(read_dir) => read_dir,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(JournalError::io(&self.dir, e)),
        };

        let mut archives: Vec<ArchiveFile> = Vec::new();
        for dir_entry in read_dir {
            let dir_entry = dir_entry.map_err(|e| JournalError::io(&self.dir, e))?;
            let name = dir_entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some((rotated_at_ms, format)) = self.parse(name) {
                archives.push(ArchiveFile {
                    path: dir_entry.path(),
                    rotated_at_ms,
                    format,
                });
            }
        }

        archives.sort_by_key(|a| (a.rotated_at_ms, a.format));
        archives.dedup_by_key(|a| a.rotated_at_ms);
        Ok(archives)
    }
}

/// `<file>.zip` next to a plain segment
pub(crate) fn compressed_sibling(plain: &Path) -> PathBuf {
    let mut name = plain.as_os_str().to_os_string();
    name.push(".");
    name.push(COMPRESSED_EXTENSION);
    PathBuf::from(name)
}

/// Compress a rotated segment in place (blocking)
///
/// Writes `<file>.zip.tmp`, syncs it, renames it to `<file>.zip` and only
/// then removes the plain segment.
///
/// # Errors
/// Returns error on any IO or archive failure; the plain file is left
/// untouched in that case.
pub(crate) fn compress_segment(path: &Path) -> Result<PathBuf, JournalError> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| JournalError::InvalidPath(path.to_path_buf()))?
        .to_string();
    let target = compressed_sibling(path);
    let staging = path.with_file_name(format!("{file_name}.{COMPRESSED_EXTENSION}.tmp"));

    let mut source = File::open(path).map_err(|e| JournalError::io(path, e))?;
    let out = File::create(&staging).map_err(|e| JournalError::io(&staging, e))?;

    let mut zip = ZipWriter::new(out);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    zip.start_file(file_name.as_str(), options)
        .map_err(|e| JournalError::archive(&staging, e))?;
    io::copy(&mut source, &mut zip).map_err(|e| JournalError::io(&staging, e))?;
    let out = zip.finish().map_err(|e| JournalError::archive(&staging, e))?;
    out.sync_all().map_err(|e| JournalError::io(&staging, e))?;
    drop(out);

    fs::rename(&staging, &target).map_err(|e| JournalError::io(&target, e))?;
    fs::remove_file(path).map_err(|e| JournalError::io(path, e))?;
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn naming() -> SegmentNaming {
        SegmentNaming::new(Path::new("/var/ledger/entries.jsonl")).unwrap()
    }

    #[test]
    fn rotated_name_embeds_millis() {
        let path = naming().rotated_path(1_700_000_000_000);
        assert_eq!(
            path,
            PathBuf::from("/var/ledger/entries-1700000000000.jsonl")
        );
    }

    #[test]
    fn parse_recognises_both_formats() {
        let n = naming();
        assert_eq!(
            n.parse("entries-42.jsonl"),
            Some((42, ArchiveFormat::Plain))
        );
        assert_eq!(
            n.parse("entries-42.jsonl.zip"),
            Some((42, ArchiveFormat::Compressed))
        );
    }

    #[test]
    fn parse_rejects_foreign_names() {
        let n = naming();
        assert_eq!(n.parse("entries.jsonl"), None);
        assert_eq!(n.parse("entries-abc.jsonl"), None);
        assert_eq!(n.parse("cycles-42.jsonl"), None);
        assert_eq!(n.parse("entries-42.jsonl.zip.tmp"), None);
        assert_eq!(n.parse("entries-.jsonl"), None);
    }

    #[test]
    fn extensionless_journal() {
        let n = SegmentNaming::new(Path::new("history")).unwrap();
        assert_eq!(n.rotated_path(7), PathBuf::from("./history-7"));
        assert_eq!(n.parse("history-7"), Some((7, ArchiveFormat::Plain)));
        assert_eq!(n.parse("history-7.zip"), Some((7, ArchiveFormat::Compressed)));
    }

    #[test]
    fn compress_then_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let plain = dir.path().join("log-5.jsonl");
        {
            let mut f = File::create(&plain).unwrap();
            writeln!(f, r#"{{"a":1}}"#).unwrap();
            writeln!(f, r#"{{"a":2}}"#).unwrap();
        }

        let target = compress_segment(&plain).unwrap();
        assert!(!plain.exists());
        assert!(target.exists());

        let archive = ArchiveFile {
            path: target,
            rotated_at_ms: 5,
            format: ArchiveFormat::Compressed,
        };
        let text = archive.read_text().unwrap();
        assert_eq!(text.lines().count(), 2);
        assert!(text.starts_with(r#"{"a":1}"#));
    }

    #[test]
    fn list_prefers_plain_when_both_exist() {
        let dir = tempfile::tempdir().unwrap();
        let n = SegmentNaming::new(&dir.path().join("log.jsonl")).unwrap();
        File::create(dir.path().join("log-2.jsonl")).unwrap();
        File::create(dir.path().join("log-2.jsonl.zip")).unwrap();
        File::create(dir.path().join("log-1.jsonl.zip")).unwrap();
        File::create(dir.path().join("log.jsonl")).unwrap();

        let archives = n.list_archives().unwrap();
        assert_eq!(archives.len(), 2);
        assert_eq!(archives[0].rotated_at_ms, 1);
        assert_eq!(archives[1].rotated_at_ms, 2);
        assert_eq!(archives[1].format, ArchiveFormat::Plain);
    }
}
