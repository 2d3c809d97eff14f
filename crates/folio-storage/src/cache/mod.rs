//! Two-tier namespace-scoped cache
//!
//! L1 is a bounded in-memory LRU per namespace with optional TTL. L2 is a
//! persistent object-store directory with its own age and size eviction.
//! Lookups go L1 then L2, promoting L2 hits into L1. Each namespace owns an
//! async `RwLock`: lookups and writes take it shared, `clear` takes it
//! exclusively so no reader observes one tier cleared and the other stale.

mod l1;
mod l2;
mod stats;

pub use stats::{
    CacheStats, ClearReport, DiskUsage, L2EvictionReport, NamespaceClear, NamespaceDiskUsage,
    ReloadReport,
};

use bytes::Bytes;
use chrono::Utc;
use folio_core::metrics::{CACHE_DEGRADED, CACHE_L2_BYTES, CACHE_OPERATIONS};
use folio_core::{CacheConfig, CoreError, CoreResult};
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::object_store::{LocalObjectStore, ObjectStore};
use l1::{L1Lookup, L1Tier};
use l2::{L2Lookup, L2Tier};
use stats::CacheCounters;

struct NamespaceShard {
    lock: tokio::sync::RwLock<()>,
    l1: L1Tier,
    counters: CacheCounters,
}

/// In-process L1 over a persistent L2, partitioned by namespace.
pub struct TieredCache {
    shards: RwLock<HashMap<String, Arc<NamespaceShard>>>,
    l2: L2Tier,
    l1_capacity: NonZeroUsize,
    l1_default_ttl: Option<Duration>,
    l2_max_age: Duration,
    l2_max_bytes: u64,
}

impl TieredCache {
    /// Opens a cache whose L2 lives in `dir` on the local filesystem.
    pub async fn open(config: &CacheConfig, dir: impl AsRef<Path>) -> CoreResult<Self> {
        let store = LocalObjectStore::new(dir).await?;
        Self::with_store(config, Arc::new(store))
    }

    /// Builds a cache over an arbitrary L2 object store.
    pub fn with_store(config: &CacheConfig, store: Arc<dyn ObjectStore>) -> CoreResult<Self> {
        let l1_capacity = NonZeroUsize::new(config.l1_capacity)
            .ok_or_else(|| CoreError::invalid_resource("cache.l1_capacity must be > 0"))?;
        Ok(Self {
            shards: RwLock::new(HashMap::new()),
            l2: L2Tier::new(store),
            l1_capacity,
            l1_default_ttl: config.l1_ttl(),
            l2_max_age: config.l2_max_age(),
            l2_max_bytes: config.l2_max_bytes,
        })
    }

    fn shard(&self, namespace: &str) -> Arc<NamespaceShard> {
        if let Some(shard) = self.shards.read().get(namespace) {
            return Arc::clone(shard);
        }
        let mut shards = self.shards.write();
        Arc::clone(shards.entry(namespace.to_string()).or_insert_with(|| {
            Arc::new(NamespaceShard {
                lock: tokio::sync::RwLock::new(()),
                l1: L1Tier::new(self.l1_capacity, self.l1_default_ttl),
                counters: CacheCounters::default(),
            })
        }))
    }

    /// Namespaces known in memory or persisted in L2.
    async fn known_namespaces(&self) -> CoreResult<BTreeSet<String>> {
        let mut namespaces: BTreeSet<String> = self.shards.read().keys().cloned().collect();
        namespaces.extend(self.l2.namespaces().await?);
        Ok(namespaces)
    }

    async fn target_namespaces(&self, namespace: Option<&str>) -> CoreResult<Vec<String>> {
        match namespace {
            Some(namespace) => Ok(vec![namespace.to_string()]),
            None => Ok(self.known_namespaces().await?.into_iter().collect()),
        }
    }

    fn record_l1_insert(shard: &NamespaceShard, key: &str, value: Bytes, ttl: Option<Duration>) {
        if shard.l1.insert(key, value, ttl) {
            CacheCounters::incr(&shard.counters.l1_evictions);
        }
    }

    fn degraded(operation: &'static str, namespace: &str, key: &str, err: &CoreError) {
        CACHE_DEGRADED.with_label_values(&[operation]).inc();
        warn!(
            namespace,
            key,
            error = %err,
            "L2 cache tier degraded during {operation}; falling through"
        );
    }

    /// Looks up `key`, consulting L1 then L2. L2 failures are logged and
    /// reported as a miss.
    pub async fn get(&self, namespace: &str, key: &str) -> Option<Bytes> {
        let shard = self.shard(namespace);
        let _guard = shard.lock.read().await;

        if let Some(value) = Self::lookup_l1(&shard, namespace, key) {
            return Some(value);
        }

        match self.l2.get(namespace, key, false).await {
            Ok(lookup) => Self::finish_l2_lookup(&shard, namespace, key, lookup),
            Err(err) => {
                Self::degraded("get", namespace, key, &err);
                Self::record_miss(&shard, namespace);
                None
            }
        }
    }

    /// Like [`get`](Self::get) for entries written with
    /// [`set_durable`](Self::set_durable), but L2 errors are returned.
    pub async fn get_durable(&self, namespace: &str, key: &str) -> CoreResult<Option<Bytes>> {
        let shard = self.shard(namespace);
        let _guard = shard.lock.read().await;

        if let Some(value) = Self::lookup_l1(&shard, namespace, key) {
            return Ok(Some(value));
        }
        let lookup = self.l2.get(namespace, key, true).await?;
        Ok(Self::finish_l2_lookup(&shard, namespace, key, lookup))
    }

    /// Reads a durable entry straight from L2, bypassing L1 and statistics.
    /// Used to verify a write actually reached persistent storage.
    pub async fn load_persisted(&self, namespace: &str, key: &str) -> CoreResult<Option<Bytes>> {
        match self.l2.get(namespace, key, true).await? {
            L2Lookup::Hit { value, .. } => Ok(Some(value)),
            L2Lookup::Expired | L2Lookup::Miss => Ok(None),
        }
    }

    fn lookup_l1(shard: &NamespaceShard, namespace: &str, key: &str) -> Option<Bytes> {
        match shard.l1.get(key) {
            L1Lookup::Hit(value) => {
                CacheCounters::incr(&shard.counters.l1_hits);
                CACHE_OPERATIONS
                    .with_label_values(&[namespace, "l1", "hit"])
                    .inc();
                Some(value)
            }
            L1Lookup::Expired => {
                CacheCounters::incr(&shard.counters.l1_evictions);
                None
            }
            L1Lookup::Miss => None,
        }
    }

    fn finish_l2_lookup(
        shard: &NamespaceShard,
        namespace: &str,
        key: &str,
        lookup: L2Lookup,
    ) -> Option<Bytes> {
        match lookup {
            L2Lookup::Hit {
                value,
                remaining_ttl,
            } => {
                CacheCounters::incr(&shard.counters.l2_hits);
                CACHE_OPERATIONS
                    .with_label_values(&[namespace, "l2", "hit"])
                    .inc();
                Self::record_l1_insert(shard, key, value.clone(), remaining_ttl);
                Some(value)
            }
            L2Lookup::Expired => {
                CacheCounters::incr(&shard.counters.l2_evictions);
                CacheCounters::incr(&shard.counters.l2_misses);
                Self::record_miss(shard, namespace);
                None
            }
            L2Lookup::Miss => {
                CacheCounters::incr(&shard.counters.l2_misses);
                Self::record_miss(shard, namespace);
                None
            }
        }
    }

    fn record_miss(shard: &NamespaceShard, namespace: &str) {
        CacheCounters::incr(&shard.counters.misses);
        CACHE_OPERATIONS
            .with_label_values(&[namespace, "all", "miss"])
            .inc();
    }

    /// Writes `value` to both tiers. An L2 failure leaves the entry L1-only.
    pub async fn set(&self, namespace: &str, key: &str, value: Bytes, ttl: Option<Duration>) {
        let shard = self.shard(namespace);
        let _guard = shard.lock.read().await;

        if let Err(err) = self.l2.put(namespace, key, &value, ttl, false).await {
            Self::degraded("set", namespace, key, &err);
        }
        Self::record_l1_insert(&shard, key, value, ttl);
        CacheCounters::incr(&shard.counters.sets);
        CACHE_OPERATIONS
            .with_label_values(&[namespace, "all", "set"])
            .inc();
    }

    /// Persists `value` as a pinned L2 entry, then fills L1. Errors are returned
    /// and leave L1 untouched.
    pub async fn set_durable(&self, namespace: &str, key: &str, value: Bytes) -> CoreResult<()> {
        let shard = self.shard(namespace);
        let _guard = shard.lock.read().await;

        self.l2.put(namespace, key, &value, None, true).await?;
        Self::record_l1_insert(&shard, key, value, None);
        CacheCounters::incr(&shard.counters.sets);
        CACHE_OPERATIONS
            .with_label_values(&[namespace, "all", "set"])
            .inc();
        Ok(())
    }

    /// Removes `key` from both tiers. L2 failures are logged.
    pub async fn delete(&self, namespace: &str, key: &str) {
        let shard = self.shard(namespace);
        let _guard = shard.lock.read().await;

        shard.l1.remove(key);
        if let Err(err) = self.l2.remove(namespace, key, false).await {
            Self::degraded("delete", namespace, key, &err);
        }
        CacheCounters::incr(&shard.counters.deletes);
    }

    /// Removes a durable entry (and any regular copy). L2 errors are returned.
    pub async fn delete_durable(&self, namespace: &str, key: &str) -> CoreResult<()> {
        let shard = self.shard(namespace);
        let _guard = shard.lock.read().await;

        shard.l1.remove(key);
        self.l2.remove(namespace, key, true).await?;
        self.l2.remove(namespace, key, false).await?;
        CacheCounters::incr(&shard.counters.deletes);
        Ok(())
    }

    /// Clears one namespace, or all of them, across both tiers.
    ///
    /// Pinned entries are durable content and survive a clear.
    pub async fn clear(&self, namespace: Option<&str>) -> CoreResult<ClearReport> {
        let mut cleared = Vec::new();
        for namespace in self.target_namespaces(namespace).await? {
            let shard = self.shard(&namespace);
            let _guard = shard.lock.write().await;

            let l1_items = shard.l1.clear();
            let objects = self.l2.list_evictable(&namespace).await?;
            let l2_bytes = objects.iter().map(|o| o.size_bytes).sum();
            for object in &objects {
                self.l2.remove_object(&object.key).await?;
            }
            info!(
                namespace = %namespace,
                l1_items,
                l2_items = objects.len(),
                l2_bytes,
                "cleared cache namespace"
            );
            cleared.push(NamespaceClear {
                namespace,
                l1_items,
                l2_items: objects.len() as u64,
                l2_bytes,
            });
        }
        Ok(ClearReport {
            dry_run: false,
            namespaces: cleared,
        })
    }

    /// Reports what [`clear`](Self::clear) would remove without removing it.
    pub async fn clear_preview(&self, namespace: Option<&str>) -> CoreResult<ClearReport> {
        let mut preview = Vec::new();
        for namespace in self.target_namespaces(namespace).await? {
            let shard = self.shard(&namespace);
            let _guard = shard.lock.read().await;

            let objects = self.l2.list_evictable(&namespace).await?;
            preview.push(NamespaceClear {
                l1_items: shard.l1.len(),
                l2_items: objects.len() as u64,
                l2_bytes: objects.iter().map(|o| o.size_bytes).sum(),
                namespace,
            });
        }
        Ok(ClearReport {
            dry_run: true,
            namespaces: preview,
        })
    }

    /// Counter snapshot for one namespace. `item_count` falls back to the L1
    /// population when L2 cannot be listed.
    pub async fn stats(&self, namespace: &str) -> CacheStats {
        let shard = self.shard(namespace);
        let l1_item_count = shard.l1.len();
        let item_count = match self.l2.list_namespace(namespace).await {
            Ok(objects) => objects.len() as u64,
            Err(err) => {
                Self::degraded("stats", namespace, "", &err);
                l1_item_count
            }
        };
        shard
            .counters
            .snapshot(namespace, item_count, l1_item_count)
    }

    /// L2 bytes and item count per namespace, with the L2 hit and miss counts.
    pub async fn disk_usage(&self, namespace: Option<&str>) -> CoreResult<DiskUsage> {
        let mut namespaces = Vec::new();
        for namespace in self.target_namespaces(namespace).await? {
            let objects = self.l2.list_namespace(&namespace).await?;
            let bytes: u64 = objects.iter().map(|o| o.size_bytes).sum();
            CACHE_L2_BYTES
                .with_label_values(&[&namespace])
                .set(bytes as i64);
            let shard = self.shard(&namespace);
            namespaces.push(NamespaceDiskUsage {
                bytes,
                item_count: objects.len() as u64,
                l2_hits: CacheCounters::load(&shard.counters.l2_hits),
                l2_misses: CacheCounters::load(&shard.counters.l2_misses),
                namespace,
            });
        }
        Ok(DiskUsage {
            total_bytes: namespaces.iter().map(|ns| ns.bytes).sum(),
            total_items: namespaces.iter().map(|ns| ns.item_count).sum(),
            namespaces,
        })
    }

    /// Drops all L1 contents (not counted as evictions) and rescans L2.
    pub async fn reload(&self) -> CoreResult<ReloadReport> {
        let shards: Vec<Arc<NamespaceShard>> = self.shards.read().values().cloned().collect();
        let mut l1_dropped = 0;
        for shard in shards {
            let _guard = shard.lock.write().await;
            l1_dropped += shard.l1.clear();
        }

        let mut per_namespace: BTreeMap<String, u64> = BTreeMap::new();
        let objects = self.l2.list_all().await?;
        for object in &objects {
            if let Some(namespace) = object.key.split('/').next() {
                *per_namespace.entry(namespace.to_string()).or_default() += object.size_bytes;
            }
        }
        for (namespace, bytes) in &per_namespace {
            self.shard(namespace);
            CACHE_L2_BYTES
                .with_label_values(&[namespace])
                .set(*bytes as i64);
        }

        let report = ReloadReport {
            l1_dropped,
            l2_items: objects.len() as u64,
            l2_bytes: per_namespace.values().sum(),
            namespaces: per_namespace.into_keys().collect(),
        };
        info!(
            l1_dropped = report.l1_dropped,
            l2_items = report.l2_items,
            l2_bytes = report.l2_bytes,
            "reloaded tiered cache"
        );
        Ok(report)
    }

    /// L2 eviction pass: drops entries older than the configured maximum age,
    /// then the oldest entries of any namespace over its byte budget.
    pub async fn evict_l2(&self) -> CoreResult<L2EvictionReport> {
        let mut report = L2EvictionReport::default();
        let max_age = chrono::Duration::from_std(self.l2_max_age)
            .unwrap_or_else(|_| chrono::Duration::max_value());
        let cutoff = Utc::now()
            .checked_sub_signed(max_age)
            .unwrap_or(chrono::DateTime::<Utc>::MIN_UTC);

        for namespace in self.known_namespaces().await? {
            let shard = self.shard(&namespace);
            let _guard = shard.lock.read().await;

            let mut objects = self.l2.list_evictable(&namespace).await?;
            objects.sort_by_key(|o| o.last_modified);

            let mut retained = Vec::with_capacity(objects.len());
            for object in objects {
                if object.last_modified <= cutoff {
                    self.l2.remove_object(&object.key).await?;
                    report.expired += 1;
                    report.bytes_freed += object.size_bytes;
                    CacheCounters::incr(&shard.counters.l2_evictions);
                } else {
                    retained.push(object);
                }
            }

            let mut total: u64 = retained.iter().map(|o| o.size_bytes).sum();
            for object in retained {
                if total <= self.l2_max_bytes {
                    break;
                }
                self.l2.remove_object(&object.key).await?;
                total -= object.size_bytes;
                report.over_budget += 1;
                report.bytes_freed += object.size_bytes;
                CacheCounters::incr(&shard.counters.l2_evictions);
            }
            debug!(namespace = %namespace, remaining_bytes = total, "L2 eviction pass");
        }

        if report.evicted() > 0 {
            info!(
                expired = report.expired,
                over_budget = report.over_budget,
                bytes_freed = report.bytes_freed,
                "evicted L2 cache entries"
            );
        }
        Ok(report)
    }
}
