//! Per-resource-key write serialisation
//!
//! Each key maps to an async mutex. The table entry lives only while some
//! guard or waiter holds a reference to it, so idle keys do not accumulate.

use folio_core::ResourceKey;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;

type KeyMutex = Arc<tokio::sync::Mutex<()>>;

/// Table of leased per-key mutexes.
#[derive(Default)]
pub struct KeyLockTable {
    locks: Arc<Mutex<HashMap<ResourceKey, KeyMutex>>>,
}

/// A reference to one table entry, held from the start of `lock` until the
/// guard is released. The last lease to go removes the entry, whether it ever
/// acquired the mutex or was cancelled while waiting.
struct Lease {
    key: ResourceKey,
    mutex: KeyMutex,
    locks: Arc<Mutex<HashMap<ResourceKey, KeyMutex>>>,
}

impl Drop for Lease {
    fn drop(&mut self) {
        let mut locks = self.locks.lock();
        // Two references left: the table's and ours.
        if locks.get(&self.key).is_some_and(|mutex| {
            Arc::ptr_eq(mutex, &self.mutex) && Arc::strong_count(mutex) == 2
        }) {
            locks.remove(&self.key);
        }
    }
}

/// Held while a writer owns a resource key. Released on drop, on every exit
/// path including cancellation.
pub struct KeyLockGuard {
    // Fields drop in order: the mutex is released before the lease is returned.
    _guard: OwnedMutexGuard<()>,
    lease: Lease,
}

impl KeyLockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for exclusive ownership of `key`.
    pub async fn lock(&self, key: &ResourceKey) -> KeyLockGuard {
        let lease = {
            let mut locks = self.locks.lock();
            Lease {
                key: key.clone(),
                mutex: Arc::clone(locks.entry(key.clone()).or_default()),
                locks: Arc::clone(&self.locks),
            }
        };
        let guard = Arc::clone(&lease.mutex).lock_owned().await;
        KeyLockGuard {
            _guard: guard,
            lease,
        }
    }

    /// Number of keys with a live entry.
    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KeyLockGuard {
    pub fn key(&self) -> &ResourceKey {
        &self.lease.key
    }
}
