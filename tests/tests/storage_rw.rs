//! Storage engine round-trips through the public `Storage` surface.

use std::sync::Arc;
use std::time::Duration;

use broker_core::Error;
use storage::{IsomorphicStorage, Storage, StorageConfig};

fn storage_on(dir: &std::path::Path) -> Arc<IsomorphicStorage> {
    Arc::new(IsomorphicStorage::new(StorageConfig {
        commit_dir: dir.to_path_buf(),
        flush_interval_ms: 60,
        on_flush_error: Default::default(),
    }))
}

fn line_count(path: &std::path::Path) -> usize {
    std::fs::read_to_string(path)
        .map(|content| content.lines().count())
        .unwrap_or(0)
}

#[tokio::test]
async fn test_write_flush_read_and_close() {
    let dir = tempfile::tempdir().unwrap();
    let storage = storage_on(dir.path());

    storage.new_topic("rainbow", 2).await.unwrap();

    storage.write("rainbow", 2, "Its first message".into());
    storage.write("rainbow", 1, "Its second message".into());
    storage.write("rainbow", 2, "Its third message".into());
    storage.write("rainbow", 1, "Its four message".into());
    storage.write("rainbow", 2, "Its five message".into());

    tokio::time::sleep(Duration::from_millis(200)).await;

    let messages = storage.read("rainbow", 2, 1, 3).await.unwrap();
    assert_eq!(messages.len(), 3);
    assert_eq!(messages[0], "Its first message");

    let messages = storage.read("rainbow", 1, 1, 1).await.unwrap();
    assert_eq!(messages, vec!["Its second message".to_string()]);

    // Writes sitting in the pending buffers are persisted by the final
    // flush on close.
    storage.write("rainbow", 2, "Another first message".into());
    storage.write("rainbow", 2, "Another second message".into());
    storage.write("rainbow", 1, "Another third message".into());
    storage.write("rainbow", 1, "Another four message".into());
    storage.write("rainbow", 1, "Another five message".into());

    storage.close().await.unwrap();

    assert_eq!(line_count(&dir.path().join("rainbow/1.log")), 5);
    assert_eq!(line_count(&dir.path().join("rainbow/2.log")), 5);
}

#[tokio::test]
async fn test_full_range_read_returns_everything_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let storage = storage_on(dir.path());

    storage.new_topic("rainbow", 1).await.unwrap();
    for i in 1..=20 {
        storage.write("rainbow", 1, format!("msg_{i}"));
    }

    tokio::time::sleep(Duration::from_millis(200)).await;

    let all = storage.read("rainbow", 1, 1, 10_000).await.unwrap();
    assert_eq!(all.len(), 20);
    assert_eq!(all[0], "msg_1");
    assert_eq!(all[19], "msg_20");

    // Bounded batch semantics: [from, to] inclusive.
    let batch = storage.read("rainbow", 1, 6, 10).await.unwrap();
    assert_eq!(
        batch,
        (6..=10).map(|i| format!("msg_{i}")).collect::<Vec<_>>()
    );

    storage.close().await.unwrap();
}

#[tokio::test]
async fn test_messages_invisible_until_flushed() {
    let dir = tempfile::tempdir().unwrap();
    let storage = Arc::new(IsomorphicStorage::new(StorageConfig {
        commit_dir: dir.path().to_path_buf(),
        // Effectively never ticks within the test window.
        flush_interval_ms: 60_000,
        on_flush_error: Default::default(),
    }));

    storage.new_topic("rainbow", 1).await.unwrap();

    // Give the flush loop's initial tick a chance to pass before writing.
    tokio::time::sleep(Duration::from_millis(50)).await;
    storage.write("rainbow", 1, "not yet".into());
    tokio::time::sleep(Duration::from_millis(100)).await;

    let visible = storage.read("rainbow", 1, 1, 100).await.unwrap();
    assert!(visible.is_empty());

    storage.close().await.unwrap();
}

#[tokio::test]
async fn test_create_and_delete_topic() {
    let dir = tempfile::tempdir().unwrap();
    let storage = storage_on(dir.path());

    storage.new_topic("rainbow_temporary", 2).await.unwrap();
    assert!(storage.has_topic("rainbow_temporary"));

    storage.delete_topic("rainbow_temporary").unwrap();
    assert!(!storage.has_topic("rainbow_temporary"));

    // Reads on a deleted topic fail, but its files are retained.
    let err = storage.read("rainbow_temporary", 1, 1, 10).await.unwrap_err();
    assert!(matches!(err, Error::TopicNotFound(_)));
    assert!(dir.path().join("rainbow_temporary/1.log").exists());

    storage.close().await.unwrap();
}
