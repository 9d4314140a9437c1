use std::time::Duration;

use bytes::Bytes;
use tempfile::TempDir;
use tokio::sync::watch;

use super::ValueCache;
use crate::kv::Value;

fn value(
    payload: &'static [u8],
    version: i64,
    revision: i64,
) -> Value {
    Value::new(Bytes::from_static(payload), version, revision)
}

async fn wait_for_file(path: &std::path::Path) {
    for _ in 0..100 {
        if tokio::fs::metadata(path).await.is_ok() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("cache file {} never appeared", path.display());
}

#[tokio::test]
async fn test_merge_keeps_newest() {
    let (_tx, rx) = watch::channel(false);
    let cache = ValueCache::open(None, 0o755, rx).await;

    cache.merge_if_newer("k", &value(b"v1", 1, 10));
    cache.merge_if_newer("k", &value(b"v2", 2, 11));
    assert_eq!(cache.get("k").unwrap().revision(), 11);

    // An older observation must not clobber the newer entry.
    cache.merge_if_newer("k", &value(b"v0", 1, 9));
    assert_eq!(cache.get("k").unwrap().revision(), 11);

    // Same revision from a second source is not strictly newer.
    cache.merge_if_newer("k", &value(b"dup", 3, 11));
    assert_eq!(cache.get("k").unwrap().payload().as_ref(), b"v2");
}

#[tokio::test]
async fn test_delete_removes_entry() {
    let (_tx, rx) = watch::channel(false);
    let cache = ValueCache::open(None, 0o755, rx).await;

    cache.merge_if_newer("k", &value(b"v1", 1, 10));
    cache.delete("k");
    assert!(cache.get("k").is_none());

    // Deleting an absent key is a no-op.
    cache.delete("k");
    assert!(cache.get("k").is_none());
}

#[tokio::test]
async fn test_persists_and_reloads() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("sub").join("cache.json");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let cache = ValueCache::open(Some(path.clone()), 0o755, shutdown_rx).await;

    cache.merge_if_newer("/svc/a", &value(b"alpha", 1, 5));
    cache.merge_if_newer("/svc/b", &value(b"beta", 2, 6));
    wait_for_file(&path).await;

    // Let the coalesced write settle, then stop the persister.
    tokio::time::sleep(Duration::from_millis(50)).await;
    shutdown_tx.send(true).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let (_tx, rx) = watch::channel(false);
    let reloaded = ValueCache::open(Some(path), 0o755, rx).await;

    let a = reloaded.get("/svc/a").unwrap();
    assert_eq!(a.payload().as_ref(), b"alpha");
    assert_eq!(a.version(), 1);
    assert_eq!(a.revision(), 5);
    assert_eq!(reloaded.get("/svc/b").unwrap().revision(), 6);
}

#[tokio::test]
async fn test_missing_file_starts_empty() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("never-written.json");

    let (_tx, rx) = watch::channel(false);
    let cache = ValueCache::open(Some(path.clone()), 0o755, rx).await;
    assert!(cache.get("anything").is_none());

    // The parent directory exists afterwards so the first write can land.
    assert!(dir.path().exists());
}

#[tokio::test]
async fn test_corrupt_file_starts_empty() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("cache.json");
    tokio::fs::write(&path, b"{ not json").await.unwrap();

    let (_tx, rx) = watch::channel(false);
    let cache = ValueCache::open(Some(path), 0o755, rx).await;
    assert!(cache.get("anything").is_none());
}

#[tokio::test]
async fn test_final_flush_on_shutdown() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("cache.json");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let cache = ValueCache::open(Some(path.clone()), 0o755, shutdown_rx).await;

    cache.merge_if_newer("k", &value(b"v", 1, 1));
    shutdown_tx.send(true).unwrap();

    wait_for_file(&path).await;
    let raw = tokio::fs::read(&path).await.unwrap();
    let parsed: serde_json::Value = serde_json::from_slice(&raw).unwrap();
    assert!(parsed["values"]["k"].is_object());
}
