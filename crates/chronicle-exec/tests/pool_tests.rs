//! Pool bound, timeout and statistics against real subprocesses.
#![cfg(unix)]

use chronicle_exec::{ExecPool, ExecRequest, PoolConfig};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrency_is_bounded_by_pool_size() {
    let pool = Arc::new(ExecPool::new(PoolConfig::default().with_size(2)));
    let started = Instant::now();

    let handles: Vec<_> = (0..5)
        .map(|_| {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.run(ExecRequest::new("sleep 0.3")).await })
        })
        .collect();
    for handle in handles {
        assert!(handle.await.unwrap().unwrap().succeeded());
    }
    let elapsed = started.elapsed();

    // ceil(5 / 2) = 3 waves of 300ms, never 5 sequential runs and never 1 wave
    assert!(elapsed >= Duration::from_millis(850), "{elapsed:?}");
    assert!(elapsed < Duration::from_millis(1450), "{elapsed:?}");

    let stats = pool.stats();
    assert_eq!(stats.total, 5);
    assert_eq!(stats.successful, 5);
    assert_eq!(stats.queued, 0);
    assert_eq!(stats.in_flight, 0);
    assert!(stats.p50.unwrap() >= 250);
    assert!(stats.max.unwrap() >= stats.p50.unwrap());
}

#[tokio::test]
async fn timeout_reports_timeout_duration_not_runtime() {
    let pool = ExecPool::new(PoolConfig::default());
    let started = Instant::now();

    let outcome = pool
        .run(ExecRequest::new("echo early; sleep 5").with_timeout(Duration::from_millis(200)))
        .await
        .unwrap();

    assert!(outcome.timed_out);
    assert!(outcome.stdout.is_empty());
    assert_eq!(outcome.exit_code, None);
    assert!(outcome.duration_ms >= 200 && outcome.duration_ms < 1_500);
    assert!(started.elapsed() < Duration::from_secs(3));

    let stats = pool.stats();
    assert_eq!(stats.timed_out, 1);
    assert_eq!(stats.successful, 0);
    assert_eq!(stats.p99, None);
}

#[tokio::test]
async fn timeout_kills_descendants() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("survivor");
    let pool = ExecPool::new(PoolConfig::default());

    let command = format!("(sleep 1; touch '{}') & wait", marker.display());
    let outcome = pool
        .run(ExecRequest::new(command).with_timeout(Duration::from_millis(100)))
        .await
        .unwrap();
    assert!(outcome.timed_out);

    tokio::time::sleep(Duration::from_millis(1_500)).await;
    assert!(!marker.exists());
}

#[tokio::test]
async fn default_timeout_comes_from_config() {
    let pool = ExecPool::new(
        PoolConfig::default().with_default_timeout(Duration::from_millis(150)),
    );
    let outcome = pool.run(ExecRequest::new("sleep 3")).await.unwrap();
    assert!(outcome.timed_out);
}

#[tokio::test]
async fn stdout_is_returned_verbatim() {
    let pool = ExecPool::new(PoolConfig::default());
    let outcome = pool
        .run(ExecRequest::new(r#"printf '{"a":1}\n{"a":2}\n'"#))
        .await
        .unwrap();
    assert!(outcome.succeeded());
    let values: Vec<serde_json::Value> = outcome
        .stdout
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(values.len(), 2);
}
