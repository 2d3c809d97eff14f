//! Tiered cache behaviour over a real L2 directory
//!
//! 1. Tier consistency: L1 hit, forced L1 eviction, L2 hit
//! 2. Persistence of L2 across cache instances
//! 3. Namespace-scoped clear and clear preview
//! 4. Disk usage reporting
//! 5. Concurrent readers during clear

use bytes::Bytes;
use folio_core::CacheConfig;
use folio_storage::TieredCache;
use std::sync::Arc;
use tempfile::TempDir;

fn config(l1_capacity: usize) -> CacheConfig {
    CacheConfig {
        l1_capacity,
        ..CacheConfig::default()
    }
}

#[tokio::test]
async fn test_tier_consistency_l1_eviction_then_l2_hit() {
    let dir = TempDir::new().unwrap();
    let cache = TieredCache::open(&config(1), dir.path()).await.unwrap();

    cache.set("words", "k1", Bytes::from("v1"), None).await;
    assert_eq!(cache.get("words", "k1").await, Some(Bytes::from("v1")));

    // Capacity 1: writing k2 pushes k1 out of L1.
    cache.set("words", "k2", Bytes::from("v2"), None).await;
    assert_eq!(cache.get("words", "k1").await, Some(Bytes::from("v1")));

    let stats = cache.stats("words").await;
    assert_eq!(stats.l1_hits, 1, "first read served from L1");
    assert_eq!(stats.l2_hits, 1, "read after eviction served from L2");
    assert_eq!(stats.hits, 2);
    assert_eq!(stats.misses, 0);
    assert!(stats.l1_evictions >= 1);
    assert_eq!(stats.item_count, 2);
    assert_eq!(stats.l1_item_count, 1);
}

#[tokio::test]
async fn test_l2_persists_across_instances() {
    let dir = TempDir::new().unwrap();
    {
        let cache = TieredCache::open(&config(8), dir.path()).await.unwrap();
        cache.set("corpora", "en", Bytes::from("vocab"), None).await;
    }

    let reopened = TieredCache::open(&config(8), dir.path()).await.unwrap();
    let report = reopened.reload().await.unwrap();
    assert_eq!(report.l2_items, 1);
    assert_eq!(report.namespaces, vec!["corpora".to_string()]);

    assert_eq!(
        reopened.get("corpora", "en").await,
        Some(Bytes::from("vocab"))
    );
    assert_eq!(reopened.stats("corpora").await.l2_hits, 1);
}

#[tokio::test]
async fn test_clear_is_scoped_to_namespace() {
    let dir = TempDir::new().unwrap();
    let cache = TieredCache::open(&config(8), dir.path()).await.unwrap();
    cache.set("words", "a", Bytes::from("1"), None).await;
    cache.set("words", "b", Bytes::from("2"), None).await;
    cache.set("books", "c", Bytes::from("3"), None).await;

    let preview = cache.clear_preview(Some("words")).await.unwrap();
    assert!(preview.dry_run);
    assert_eq!(preview.total_l2_items(), 2);
    assert_eq!(preview.total_l1_items(), 2);
    // Preview mutates nothing.
    assert_eq!(cache.get("words", "a").await, Some(Bytes::from("1")));

    let report = cache.clear(Some("words")).await.unwrap();
    assert!(!report.dry_run);
    assert_eq!(report.total_l2_items(), preview.total_l2_items());
    assert_eq!(report.total_bytes(), preview.total_bytes());

    assert_eq!(cache.get("words", "a").await, None);
    assert_eq!(cache.get("words", "b").await, None);
    assert_eq!(cache.get("books", "c").await, Some(Bytes::from("3")));
}

#[tokio::test]
async fn test_clear_all_covers_namespaces_only_on_disk() {
    let dir = TempDir::new().unwrap();
    {
        let cache = TieredCache::open(&config(8), dir.path()).await.unwrap();
        cache.set("stale", "k", Bytes::from("old"), None).await;
    }

    // Fresh instance has never touched "stale" in memory.
    let cache = TieredCache::open(&config(8), dir.path()).await.unwrap();
    let report = cache.clear(None).await.unwrap();
    assert_eq!(report.total_l2_items(), 1);
    assert_eq!(cache.get("stale", "k").await, None);
}

#[tokio::test]
async fn test_disk_usage_reports_bytes_and_l2_counters() {
    let dir = TempDir::new().unwrap();
    let cache = TieredCache::open(&config(8), dir.path()).await.unwrap();
    cache
        .set("words", "a", Bytes::from(vec![7u8; 512]), None)
        .await;
    cache.set("books", "b", Bytes::from(vec![9u8; 64]), None).await;
    assert_eq!(cache.get("words", "missing").await, None);

    let usage = cache.disk_usage(None).await.unwrap();
    assert_eq!(usage.total_items, 2);
    assert_eq!(usage.namespaces.len(), 2);

    let words = usage
        .namespaces
        .iter()
        .find(|ns| ns.namespace == "words")
        .unwrap();
    // Envelope header adds a few bytes on top of the value.
    assert!(words.bytes > 512);
    assert_eq!(words.l2_misses, 1);

    let scoped = cache.disk_usage(Some("books")).await.unwrap();
    assert_eq!(scoped.namespaces.len(), 1);
    assert_eq!(scoped.total_items, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_readers_never_see_half_cleared_namespace() {
    let dir = TempDir::new().unwrap();
    let cache = Arc::new(TieredCache::open(&config(2), dir.path()).await.unwrap());
    for i in 0..8 {
        cache
            .set("words", &format!("k{i}"), Bytes::from(format!("v{i}")), None)
            .await;
    }

    let clearer = {
        let cache = Arc::clone(&cache);
        tokio::spawn(async move { cache.clear(Some("words")).await.unwrap() })
    };
    let mut readers = Vec::new();
    for i in 0..8 {
        let cache = Arc::clone(&cache);
        readers.push(tokio::spawn(async move {
            cache
                .get("words", &format!("k{i}"))
                .await
                .map(|value| value == Bytes::from(format!("v{i}")))
        }));
    }

    for reader in readers {
        // Either the value from before the clear or nothing; never a wrong value.
        if let Some(matched) = reader.await.unwrap() {
            assert!(matched);
        }
    }
    clearer.await.unwrap();
    for i in 0..8 {
        assert_eq!(cache.get("words", &format!("k{i}")).await, None);
    }
}
