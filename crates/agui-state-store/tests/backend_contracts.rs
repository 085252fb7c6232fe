//! Contract tests for the StorageBackend trait.
//!
//! These tests exercise the behavioral contract through `MemoryBackend`:
//! TTL visibility, prefix listing, capacity-driven eviction and the
//! self-test. Any conforming implementation must pass them.

use std::sync::Arc;
use std::time::Duration;

use agui_state_store::{MemoryBackend, MemoryBackendConfig, StorageBackend};

fn backend() -> MemoryBackend {
    MemoryBackend::default()
}

fn bounded(max_size_bytes: usize) -> MemoryBackend {
    MemoryBackend::new(MemoryBackendConfig::default().with_max_size_bytes(max_size_bytes))
}

// ===========================================================================
// Basic operations
// ===========================================================================

#[tokio::test]
async fn set_get_delete_round_trip() {
    let store = backend();
    store.set("key", b"value".to_vec(), None).await.unwrap();

    assert_eq!(store.get("key").await.unwrap(), Some(b"value".to_vec()));
    assert!(store.exists("key").await.unwrap());

    assert!(store.delete("key").await.unwrap());
    assert_eq!(store.get("key").await.unwrap(), None);
    assert!(!store.exists("key").await.unwrap());
}

#[tokio::test]
async fn delete_missing_returns_false() {
    let store = backend();
    assert!(!store.delete("never-set").await.unwrap());
}

#[tokio::test]
async fn preserves_binary_data() {
    let store = backend();
    let data: Vec<u8> = (0u8..=255).collect();
    store.set("bin", data.clone(), None).await.unwrap();

    assert_eq!(store.get("bin").await.unwrap(), Some(data));
}

#[tokio::test]
async fn list_keys_filters_by_prefix_in_order() {
    let store = backend();
    for key in ["prefix1:key2", "prefix2:key1", "prefix1:key1", "other"] {
        store.set(key, b"v".to_vec(), None).await.unwrap();
    }

    let all = store.list_keys("").await.unwrap();
    assert_eq!(all, vec!["other", "prefix1:key1", "prefix1:key2", "prefix2:key1"]);

    let prefixed = store.list_keys("prefix1:").await.unwrap();
    assert_eq!(prefixed, vec!["prefix1:key1", "prefix1:key2"]);
}

// ===========================================================================
// TTL
// ===========================================================================

#[tokio::test(start_paused = true)]
async fn ttl_entry_expires_lazily() {
    let store = backend();
    store
        .set("ttl", b"value".to_vec(), Some(Duration::from_secs(1)))
        .await
        .unwrap();

    tokio::time::advance(Duration::from_millis(500)).await;
    assert!(store.exists("ttl").await.unwrap());
    assert_eq!(store.get("ttl").await.unwrap(), Some(b"value".to_vec()));

    tokio::time::advance(Duration::from_millis(1000)).await;
    assert_eq!(store.get("ttl").await.unwrap(), None);
    assert!(!store.exists("ttl").await.unwrap());
    assert_eq!(store.stats().await.unwrap().expired_count, 1);
}

#[tokio::test(start_paused = true)]
async fn expired_entries_are_invisible_to_every_read_path() {
    let store = backend();
    store
        .set("a:short", b"1".to_vec(), Some(Duration::from_secs(1)))
        .await
        .unwrap();
    store.set("a:long", b"2".to_vec(), None).await.unwrap();

    tokio::time::advance(Duration::from_secs(2)).await;

    assert_eq!(store.list_keys("a:").await.unwrap(), vec!["a:long"]);
    assert!(!store.delete("a:short").await.unwrap());
    assert_eq!(store.stats().await.unwrap().total_keys, 1);
}

#[tokio::test(start_paused = true)]
async fn default_ttl_applies_when_omitted() {
    let store = MemoryBackend::new(
        MemoryBackendConfig::default().with_default_ttl(Some(Duration::from_secs(10))),
    );
    store.set("k", b"v".to_vec(), None).await.unwrap();

    tokio::time::advance(Duration::from_secs(9)).await;
    assert!(store.exists("k").await.unwrap());
    tokio::time::advance(Duration::from_secs(2)).await;
    assert!(!store.exists("k").await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn purge_expired_reports_count() {
    let store = backend();
    for i in 0..3 {
        store
            .set(&format!("k{i}"), b"v".to_vec(), Some(Duration::from_secs(1)))
            .await
            .unwrap();
    }
    store.set("keep", b"v".to_vec(), None).await.unwrap();

    tokio::time::advance(Duration::from_secs(2)).await;
    assert_eq!(store.purge_expired().await.unwrap(), 3);
    assert_eq!(store.stats().await.unwrap().total_keys, 1);
}

// ===========================================================================
// Capacity and eviction
// ===========================================================================

#[tokio::test]
async fn second_write_evicts_least_recently_accessed() {
    let store = bounded(10);
    store.set("key1", vec![b'x'; 8], None).await.unwrap();
    store.set("key2", vec![b'y'; 8], None).await.unwrap();

    assert!(!store.exists("key1").await.unwrap());
    assert!(store.exists("key2").await.unwrap());

    let stats = store.stats().await.unwrap();
    assert_eq!(stats.eviction_count, 1);
    assert!(stats.total_size_bytes <= stats.max_size_bytes);
}

#[tokio::test]
async fn reads_refresh_recency() {
    let store = bounded(30);
    store.set("a", vec![0; 10], None).await.unwrap();
    store.set("b", vec![0; 10], None).await.unwrap();
    store.set("c", vec![0; 10], None).await.unwrap();

    // Touch "a" so "b" becomes the oldest.
    store.get("a").await.unwrap();
    store.set("d", vec![0; 10], None).await.unwrap();

    assert!(store.exists("a").await.unwrap());
    assert!(!store.exists("b").await.unwrap());
    assert!(store.exists("c").await.unwrap());
    assert!(store.exists("d").await.unwrap());
}

#[tokio::test]
async fn eviction_stops_once_value_fits() {
    let store = bounded(40);
    for key in ["a", "b", "c", "d"] {
        store.set(key, vec![0; 10], None).await.unwrap();
    }
    store.set("e", vec![0; 15], None).await.unwrap();

    let keys = store.list_keys("").await.unwrap();
    assert_eq!(keys, vec!["c", "d", "e"]);
    assert_eq!(store.stats().await.unwrap().eviction_count, 2);
}

#[tokio::test(start_paused = true)]
async fn expired_entries_are_purged_before_evicting_live_ones() {
    let store = bounded(20);
    store.set("live", vec![0; 10], None).await.unwrap();
    store
        .set("stale", vec![0; 10], Some(Duration::from_secs(1)))
        .await
        .unwrap();

    tokio::time::advance(Duration::from_secs(2)).await;
    store.set("new", vec![0; 10], None).await.unwrap();

    assert!(store.exists("live").await.unwrap());
    let stats = store.stats().await.unwrap();
    assert_eq!(stats.eviction_count, 0);
    assert_eq!(stats.expired_count, 1);
}

#[tokio::test]
async fn total_size_never_exceeds_capacity() {
    let store = bounded(100);
    for i in 0..50usize {
        store
            .set(&format!("k{i}"), vec![0; 7 + i % 13], None)
            .await
            .unwrap();
        let stats = store.stats().await.unwrap();
        assert!(stats.total_size_bytes <= 100, "iteration {i}");
    }
}

// ===========================================================================
// Health, cleanup, concurrency
// ===========================================================================

#[tokio::test]
async fn health_check_round_trips_and_leaves_no_trace() {
    let store = backend();
    assert!(store.health_check().await);
    assert!(store.health_check().await);
    assert!(store.list_keys("").await.unwrap().is_empty());
}

#[tokio::test]
async fn cleanup_releases_everything() {
    let store = backend();
    store.set("a", b"1".to_vec(), None).await.unwrap();
    store.set("b", b"2".to_vec(), None).await.unwrap();
    store.cleanup().await.unwrap();

    let stats = store.stats().await.unwrap();
    assert_eq!(stats.total_keys, 0);
    assert_eq!(stats.total_size_bytes, 0);
    assert!(store.health_check().await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_writers_do_not_interfere() {
    let store = Arc::new(backend());
    let mut tasks = Vec::new();
    for i in 0..100 {
        let store = Arc::clone(&store);
        tasks.push(tokio::spawn(async move {
            let key = format!("concurrent:{i}");
            store
                .set(&key, format!("value_{i}").into_bytes(), None)
                .await
                .unwrap();
            store.get(&key).await.unwrap()
        }));
    }

    for (i, task) in tasks.into_iter().enumerate() {
        assert_eq!(task.await.unwrap(), Some(format!("value_{i}").into_bytes()));
    }
    assert_eq!(store.stats().await.unwrap().total_keys, 100);
}

// ===========================================================================
// Snapshots
// ===========================================================================

#[tokio::test(start_paused = true)]
async fn export_then_import_restores_live_entries() {
    let store = backend();
    store.set("a", b"alpha".to_vec(), None).await.unwrap();
    store
        .set("b", b"beta".to_vec(), Some(Duration::from_secs(10)))
        .await
        .unwrap();
    store
        .set("gone", b"x".to_vec(), Some(Duration::from_secs(1)))
        .await
        .unwrap();
    tokio::time::advance(Duration::from_secs(2)).await;

    let snapshot = store.export_data().unwrap();
    assert_eq!(snapshot.entries.len(), 2);

    store.cleanup().await.unwrap();
    assert_eq!(store.import_data(snapshot).unwrap(), 2);

    assert_eq!(store.get("a").await.unwrap(), Some(b"alpha".to_vec()));
    assert_eq!(store.get("b").await.unwrap(), Some(b"beta".to_vec()));

    // "b" kept its remaining 8 seconds.
    tokio::time::advance(Duration::from_secs(9)).await;
    assert!(!store.exists("b").await.unwrap());
}

#[tokio::test]
async fn import_rejects_oversized_snapshot() {
    let source = backend();
    source.set("big", vec![0; 64], None).await.unwrap();
    let snapshot = source.export_data().unwrap();

    let target = bounded(32);
    target.set("keep", b"v".to_vec(), None).await.unwrap();
    let err = target.import_data(snapshot).unwrap_err();

    assert_eq!(err.code(), "CAPACITY_EXCEEDED");
    assert!(target.exists("keep").await.unwrap());
}
