//! Journal behaviour over real files: round-trip, rotation, compression,
//! recovery from corrupted lines and restart.

use chronicle_journal::{ArchiveFormat, JournalError, LogWriter, WriterConfig};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::io::Write;

fn plain_config() -> WriterConfig {
    WriterConfig::default()
        .with_timestamp_injection(false)
        .with_compression(false)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Observation {
    file: String,
    churn: u32,
    tags: Vec<String>,
}

#[tokio::test]
async fn round_trip_preserves_values_and_order() {
    let dir = tempfile::tempdir().unwrap();
    let writer = LogWriter::open(dir.path().join("obs.jsonl"), plain_config())
        .await
        .unwrap();

    let observations: Vec<Observation> = (0..120)
        .map(|i| Observation {
            file: format!("src/mod_{i}.rs"),
            churn: i * 3,
            tags: vec!["hot".to_string(); (i % 3) as usize],
        })
        .collect();

    for obs in &observations {
        writer.append(obs).await.unwrap();
    }
    writer.flush(true).await.unwrap();

    let read: Vec<Observation> = writer.read_all_as().await.unwrap();
    assert_eq!(read, observations);
}

#[tokio::test]
async fn one_line_past_the_cap_rotates_exactly_once() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("entries.jsonl");
    let writer = LogWriter::open(&path, plain_config().with_rotate_max_lines(10_000))
        .await
        .unwrap();

    for i in 0..10_001u32 {
        writer.append(&json!({ "seq": i })).await.unwrap();
    }
    writer.flush(true).await.unwrap();

    let stats = writer.stats().await;
    assert_eq!(stats.rotations, 1);
    assert_eq!(stats.lines, 1);

    let archives = writer.archives().await.unwrap();
    assert_eq!(archives.len(), 1);
    assert_eq!(archives[0].format, ArchiveFormat::Plain);

    let archived = std::fs::read_to_string(&archives[0].path).unwrap();
    assert_eq!(archived.lines().count(), 10_000);
    assert!(archived.lines().next().unwrap().contains("\"seq\":0"));

    let active = std::fs::read_to_string(&path).unwrap();
    assert_eq!(active.lines().collect::<Vec<_>>(), vec![r#"{"seq":10000}"#]);

    let all = writer.read_all().await.unwrap();
    assert_eq!(all.len(), 10_001);
    assert_eq!(all[10_000], json!({ "seq": 10_000 }));
}

#[tokio::test]
async fn rotated_segments_are_compressed_in_background() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cycles.jsonl");
    let config = plain_config()
        .with_compression(true)
        .with_rotate_max_lines(10)
        .with_flush_threshold(5);
    let writer = LogWriter::open(&path, config).await.unwrap();

    for i in 0..25u32 {
        writer.append(&json!({ "seq": i })).await.unwrap();
    }
    writer.flush(false).await.unwrap();
    writer.drain_background().await;

    let archives = writer.archives().await.unwrap();
    assert_eq!(archives.len(), 2);
    assert!(archives
        .iter()
        .all(|a| a.format == ArchiveFormat::Compressed));
    assert!(archives[0].rotated_at_ms < archives[1].rotated_at_ms);

    let seqs: Vec<u64> = writer
        .read_all()
        .await
        .unwrap()
        .iter()
        .map(|v| v["seq"].as_u64().unwrap())
        .collect();
    assert_eq!(seqs, (0..25).collect::<Vec<_>>());
}

#[tokio::test]
async fn corrupted_lines_are_skipped_not_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("history.jsonl");
    {
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, r#"{{"ok":1}}"#).unwrap();
        writeln!(f, "<<<<<<< ours").unwrap();
        writeln!(f, r#"{{"ok":2"#).unwrap();
        writeln!(f, ">>>>>>> theirs").unwrap();
        writeln!(f, r#"{{"ok":3}}"#).unwrap();
    }

    let writer = LogWriter::open(&path, plain_config()).await.unwrap();
    let records = writer.read_all().await.unwrap();
    assert_eq!(records, vec![json!({"ok": 1}), json!({"ok": 3})]);
}

#[tokio::test]
async fn reopen_keeps_rotation_thresholds() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("entries.jsonl");
    let config = plain_config().with_rotate_max_lines(4).with_flush_threshold(1);

    {
        let writer = LogWriter::open(&path, config.clone()).await.unwrap();
        for i in 0..3u32 {
            writer.append(&json!({ "seq": i })).await.unwrap();
        }
        writer.flush(true).await.unwrap();
    }

    let writer = LogWriter::open(&path, config).await.unwrap();
    assert_eq!(writer.stats().await.lines, 3);

    writer.append(&json!({ "seq": 3 })).await.unwrap();
    writer.append(&json!({ "seq": 4 })).await.unwrap();
    writer.flush(true).await.unwrap();

    assert_eq!(writer.stats().await.rotations, 1);
    assert_eq!(writer.read_all().await.unwrap().len(), 5);
}

#[tokio::test]
async fn flush_failure_propagates_and_keeps_buffer() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("blocked.jsonl");
    let writer = LogWriter::open(&path, plain_config().with_flush_threshold(100))
        .await
        .unwrap();

    // A directory where the file should be makes every open fail.
    std::fs::create_dir(&path).unwrap();
    writer.append(&json!({"n": 1})).await.unwrap();

    let err = writer.flush(true).await.unwrap_err();
    assert!(matches!(err, JournalError::Io { .. }));
    assert_eq!(writer.stats().await.buffered, 1);

    std::fs::remove_dir(&path).unwrap();
    writer.flush(true).await.unwrap();
    assert_eq!(writer.stats().await.lines, 1);
}

#[tokio::test]
async fn torn_tail_does_not_swallow_the_next_record() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("torn.jsonl");
    std::fs::write(&path, "{\"a\":1}\n{\"b\":").unwrap();

    let writer = LogWriter::open(&path, plain_config()).await.unwrap();
    writer.append(&json!({"c": 3})).await.unwrap();
    writer.flush(true).await.unwrap();

    assert_eq!(
        writer.read_all().await.unwrap(),
        vec![json!({"a": 1}), json!({"c": 3})]
    );
    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.ends_with("{\"b\":\n{\"c\":3}\n"));
    assert_eq!(writer.stats().await.lines, 3);

    // the repaired file needs no second separator
    drop(writer);
    let writer = LogWriter::open(&path, plain_config()).await.unwrap();
    writer.append(&json!({"d": 4})).await.unwrap();
    writer.flush(true).await.unwrap();
    assert_eq!(writer.read_all().await.unwrap().len(), 3);
    assert!(!std::fs::read_to_string(&path).unwrap().contains("\n\n"));
}

#[tokio::test]
async fn enqueue_buffers_without_writing() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("queued.jsonl");
    let writer = LogWriter::open(&path, plain_config().with_flush_threshold(2))
        .await
        .unwrap();

    assert!(!writer.enqueue(&json!({"n": 1})).await.unwrap());
    assert!(writer.enqueue(&json!({"n": 2})).await.unwrap());
    assert_eq!(writer.stats().await.buffered, 2);
    assert!(!path.exists());

    writer.flush(false).await.unwrap();
    assert_eq!(writer.stats().await.lines, 2);
}
