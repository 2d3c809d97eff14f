use bytes::Bytes;
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
struct L1Entry {
    value: Bytes,
    expires_at: Option<Instant>,
}

pub(crate) enum L1Lookup {
    Hit(Bytes),
    /// Entry was present but past its TTL; it has been removed.
    Expired,
    Miss,
}

/// Bounded in-memory tier for one namespace.
///
/// The mutex is held only for the map operation itself, never across an await.
pub(crate) struct L1Tier {
    entries: Mutex<LruCache<String, L1Entry>>,
    default_ttl: Option<Duration>,
}

impl L1Tier {
    pub fn new(capacity: NonZeroUsize, default_ttl: Option<Duration>) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            default_ttl,
        }
    }

    pub fn get(&self, key: &str) -> L1Lookup {
        let mut entries = self.entries.lock();
        let expired = match entries.get(key) {
            None => return L1Lookup::Miss,
            Some(entry) => entry
                .expires_at
                .map_or(false, |deadline| Instant::now() >= deadline),
        };
        if expired {
            entries.pop(key);
            return L1Lookup::Expired;
        }
        match entries.get(key) {
            Some(entry) => L1Lookup::Hit(entry.value.clone()),
            None => L1Lookup::Miss,
        }
    }

    /// Inserts or replaces `key`. Returns true when another entry was evicted
    /// to make room.
    pub fn insert(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> bool {
        let ttl = ttl.or(self.default_ttl);
        let entry = L1Entry {
            value,
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        };
        match self.entries.lock().push(key.to_string(), entry) {
            Some((evicted_key, _)) => evicted_key != key,
            None => false,
        }
    }

    pub fn remove(&self, key: &str) -> bool {
        self.entries.lock().pop(key).is_some()
    }

    /// Drops every entry, returning how many were resident.
    pub fn clear(&self) -> u64 {
        let mut entries = self.entries.lock();
        let count = entries.len() as u64;
        entries.clear();
        count
    }

    pub fn len(&self) -> u64 {
        self.entries.lock().len() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tier(capacity: usize, ttl: Option<Duration>) -> L1Tier {
        L1Tier::new(NonZeroUsize::new(capacity).unwrap(), ttl)
    }

    #[test]
    fn test_capacity_eviction_is_reported() {
        let l1 = tier(2, None);
        assert!(!l1.insert("a", Bytes::from("1"), None));
        assert!(!l1.insert("b", Bytes::from("2"), None));
        // Touch "a" so "b" becomes least recently used.
        assert!(matches!(l1.get("a"), L1Lookup::Hit(_)));
        assert!(l1.insert("c", Bytes::from("3"), None));

        assert!(matches!(l1.get("b"), L1Lookup::Miss));
        assert!(matches!(l1.get("a"), L1Lookup::Hit(_)));
        assert_eq!(l1.len(), 2);
    }

    #[test]
    fn test_replacing_a_key_is_not_an_eviction() {
        let l1 = tier(1, None);
        assert!(!l1.insert("a", Bytes::from("1"), None));
        assert!(!l1.insert("a", Bytes::from("2"), None));
        match l1.get("a") {
            L1Lookup::Hit(value) => assert_eq!(value, Bytes::from("2")),
            _ => panic!("expected hit"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expiry() {
        let l1 = tier(4, Some(Duration::from_secs(10)));
        l1.insert("a", Bytes::from("1"), None);
        l1.insert("b", Bytes::from("2"), Some(Duration::from_secs(60)));

        tokio::time::advance(Duration::from_secs(11)).await;

        assert!(matches!(l1.get("a"), L1Lookup::Expired));
        assert!(matches!(l1.get("a"), L1Lookup::Miss));
        assert!(matches!(l1.get("b"), L1Lookup::Hit(_)));
    }

    #[test]
    fn test_clear_returns_resident_count() {
        let l1 = tier(8, None);
        l1.insert("a", Bytes::from("1"), None);
        l1.insert("b", Bytes::from("2"), None);
        assert_eq!(l1.clear(), 2);
        assert_eq!(l1.len(), 0);
    }
}
