use std::collections::HashMap;
use std::time::Duration;

use bytes::Bytes;
use tokio::time::timeout;

use super::watchable::PrefixSnapshot;
use super::watchable::Watchable;
use crate::errors::Error;
use crate::kv::Value;

fn value(
    payload: &'static [u8],
    version: i64,
    revision: i64,
) -> Value {
    Value::new(Bytes::from_static(payload), version, revision)
}

#[tokio::test]
async fn test_subscriber_sees_current_value_first() {
    let watchable: Watchable<Value> = Watchable::new();
    watchable.update(Some(value(b"v1", 1, 10)));

    let (initial, mut sub) = watchable.subscribe().unwrap();
    assert_eq!(initial.unwrap().revision(), 10);

    // The initial snapshot is not re-delivered through the stream.
    watchable.update(Some(value(b"v2", 2, 11)));
    let next = sub.next().await.unwrap().unwrap();
    assert_eq!(next.revision(), 11);
}

#[tokio::test]
async fn test_update_requires_strictly_newer() {
    let watchable: Watchable<Value> = Watchable::new();

    assert!(watchable.update(Some(value(b"v1", 1, 10))));
    assert!(!watchable.update(Some(value(b"stale", 1, 9))));
    assert!(!watchable.update(Some(value(b"dup", 2, 10))));
    assert_eq!(watchable.current().unwrap().payload().as_ref(), b"v1");
}

#[tokio::test]
async fn test_tombstone_overrides_and_recreation_wins() {
    let watchable: Watchable<Value> = Watchable::new();
    let (_, mut sub) = watchable.subscribe().unwrap();

    watchable.update(Some(value(b"v1", 1, 10)));
    assert!(sub.next().await.unwrap().is_some());

    // Deletion propagates regardless of ordering rules.
    assert!(watchable.update(None));
    assert!(sub.next().await.unwrap().is_none());

    // Recreation restarts the version counter but advances the revision.
    assert!(watchable.update(Some(value(b"v2", 1, 11))));
    assert_eq!(sub.next().await.unwrap().unwrap().revision(), 11);

    // Double tombstone is a no-op.
    watchable.update(None);
    assert!(!watchable.update(None));
}

#[tokio::test]
async fn test_slow_subscriber_observes_latest_only() {
    let watchable: Watchable<Value> = Watchable::new();
    let (_, mut sub) = watchable.subscribe().unwrap();

    for i in 1..=5 {
        watchable.update(Some(value(b"x", i, 10 + i)));
    }

    // Only the newest snapshot is waiting; intermediates were dropped.
    let seen = sub.next().await.unwrap().unwrap();
    assert_eq!(seen.revision(), 15);

    let starved = timeout(Duration::from_millis(50), sub.next()).await;
    assert!(starved.is_err(), "no further delivery expected");
}

#[tokio::test]
async fn test_subscriber_count_tracks_handles() {
    let watchable: Watchable<Value> = Watchable::new();
    assert_eq!(watchable.num_subscribers(), 0);

    let (_, sub_a) = watchable.subscribe().unwrap();
    let (_, sub_b) = watchable.subscribe().unwrap();
    assert_eq!(watchable.num_subscribers(), 2);

    sub_a.close();
    assert_eq!(watchable.num_subscribers(), 1);
    drop(sub_b);
    assert_eq!(watchable.num_subscribers(), 0);
}

#[tokio::test]
async fn test_close_rejects_new_subscribers_and_updates() {
    let watchable: Watchable<Value> = Watchable::new();
    watchable.update(Some(value(b"v1", 1, 10)));
    watchable.close();

    assert!(matches!(watchable.subscribe(), Err(Error::WatchClosed)));
    assert!(!watchable.update(Some(value(b"v2", 2, 11))));
}

#[tokio::test]
async fn test_prefix_snapshot_replacement_rules() {
    let watchable: Watchable<PrefixSnapshot> = Watchable::new();

    let mut first = HashMap::new();
    first.insert("/a/1".to_string(), value(b"x", 1, 10));
    assert!(watchable.update(Some(first.clone())));

    // Same content again: nothing newer, no delivery.
    assert!(!watchable.update(Some(first.clone())));

    // Added key fires even though the existing entry is unchanged.
    let mut second = first.clone();
    second.insert("/a/2".to_string(), value(b"y", 1, 11));
    assert!(watchable.update(Some(second.clone())));

    // Removed key shrinks the map and fires.
    let mut third = second.clone();
    third.remove("/a/1");
    assert!(watchable.update(Some(third.clone())));

    // Replaced key at the same size fires via the newer entry.
    let mut fourth = third.clone();
    fourth.insert("/a/2".to_string(), value(b"y2", 2, 12));
    assert!(watchable.update(Some(fourth)));
}
