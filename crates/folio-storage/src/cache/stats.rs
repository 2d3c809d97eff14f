use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Lock-free per-namespace counters.
#[derive(Debug, Default)]
pub(crate) struct CacheCounters {
    pub l1_hits: AtomicU64,
    pub l2_hits: AtomicU64,
    pub misses: AtomicU64,
    pub l2_misses: AtomicU64,
    pub l1_evictions: AtomicU64,
    pub l2_evictions: AtomicU64,
    pub sets: AtomicU64,
    pub deletes: AtomicU64,
}

impl CacheCounters {
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn load(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self, namespace: &str, item_count: u64, l1_item_count: u64) -> CacheStats {
        let l1_hits = Self::load(&self.l1_hits);
        let l2_hits = Self::load(&self.l2_hits);
        let l1_evictions = Self::load(&self.l1_evictions);
        let l2_evictions = Self::load(&self.l2_evictions);
        CacheStats {
            namespace: namespace.to_string(),
            hits: l1_hits + l2_hits,
            l1_hits,
            l2_hits,
            misses: Self::load(&self.misses),
            evictions: l1_evictions + l2_evictions,
            l1_evictions,
            l2_evictions,
            sets: Self::load(&self.sets),
            deletes: Self::load(&self.deletes),
            item_count,
            l1_item_count,
        }
    }
}

/// Point-in-time statistics for one namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub namespace: String,
    pub hits: u64,
    pub l1_hits: u64,
    pub l2_hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub l1_evictions: u64,
    pub l2_evictions: u64,
    pub sets: u64,
    pub deletes: u64,
    /// Entries persisted in L2
    pub item_count: u64,
    /// Entries currently resident in L1
    pub l1_item_count: u64,
}

impl CacheStats {
    /// Fraction of lookups served from either tier.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// L2 usage for one namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceDiskUsage {
    pub namespace: String,
    pub bytes: u64,
    pub item_count: u64,
    pub l2_hits: u64,
    pub l2_misses: u64,
}

/// L2 usage across the requested namespaces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskUsage {
    pub total_bytes: u64,
    pub total_items: u64,
    pub namespaces: Vec<NamespaceDiskUsage>,
}

/// What a clear removed (or would remove) in one namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceClear {
    pub namespace: String,
    pub l1_items: u64,
    pub l2_items: u64,
    pub l2_bytes: u64,
}

/// Result of `clear` or `clear_preview`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClearReport {
    pub dry_run: bool,
    pub namespaces: Vec<NamespaceClear>,
}

impl ClearReport {
    pub fn total_l1_items(&self) -> u64 {
        self.namespaces.iter().map(|ns| ns.l1_items).sum()
    }

    pub fn total_l2_items(&self) -> u64 {
        self.namespaces.iter().map(|ns| ns.l2_items).sum()
    }

    pub fn total_bytes(&self) -> u64 {
        self.namespaces.iter().map(|ns| ns.l2_bytes).sum()
    }
}

/// Result of `reload`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReloadReport {
    pub l1_dropped: u64,
    pub l2_items: u64,
    pub l2_bytes: u64,
    pub namespaces: Vec<String>,
}

/// Result of an L2 eviction pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct L2EvictionReport {
    pub expired: u64,
    pub over_budget: u64,
    pub bytes_freed: u64,
}

impl L2EvictionReport {
    pub fn evicted(&self) -> u64 {
        self.expired + self.over_budget
    }
}
