use bytes::{BufMut, Bytes, BytesMut};
use chrono::Utc;
use folio_core::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use crate::codec::checksum;
use crate::object_store::{ObjectMetadata, ObjectStore};

const ENTRIES_DIR: &str = "entries";
const PINNED_DIR: &str = "pinned";

/// Header written in front of every L2 value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct L2Header {
    key: String,
    inserted_at_ms: i64,
    ttl_ms: Option<u64>,
}

impl L2Header {
    fn remaining_ttl(&self, now_ms: i64) -> Option<Option<Duration>> {
        match self.ttl_ms {
            None => Some(None),
            Some(ttl_ms) => {
                let expires_at = self.inserted_at_ms.saturating_add(ttl_ms as i64);
                if now_ms >= expires_at {
                    None
                } else {
                    Some(Some(Duration::from_millis((expires_at - now_ms) as u64)))
                }
            }
        }
    }
}

pub(crate) enum L2Lookup {
    Hit {
        value: Bytes,
        remaining_ttl: Option<Duration>,
    },
    /// Entry was present but past its TTL; it has been removed.
    Expired,
    Miss,
}

/// Persistent tier: one object per entry under `<namespace>/<entries|pinned>/<sha256(key)>`.
///
/// Pinned entries hold content whose only copy lives in this tier; they are
/// skipped by clear and by age/size eviction.
pub(crate) struct L2Tier {
    store: Arc<dyn ObjectStore>,
}

impl L2Tier {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    fn object_key(namespace: &str, key: &str, pinned: bool) -> String {
        let dir = if pinned { PINNED_DIR } else { ENTRIES_DIR };
        format!("{namespace}/{dir}/{}", checksum(key.as_bytes()))
    }

    fn encode(key: &str, value: &[u8], ttl: Option<Duration>) -> CoreResult<Bytes> {
        let header = L2Header {
            key: key.to_string(),
            inserted_at_ms: Utc::now().timestamp_millis(),
            ttl_ms: ttl.map(|ttl| ttl.as_millis() as u64),
        };
        let header = bincode::serialize(&header)
            .map_err(|e| CoreError::SerializationError(format!("L2 header: {e}")))?;
        let header_len = u32::try_from(header.len())
            .map_err(|_| CoreError::SerializationError("L2 header too large".to_string()))?;

        let mut out = BytesMut::with_capacity(4 + header.len() + value.len());
        out.put_u32_le(header_len);
        out.put_slice(&header);
        out.put_slice(value);
        Ok(out.freeze())
    }

    fn decode(object_key: &str, data: Bytes) -> CoreResult<(L2Header, Bytes)> {
        let malformed = |reason: &str| {
            CoreError::DeserializationError(format!("L2 entry `{object_key}`: {reason}"))
        };
        if data.len() < 4 {
            return Err(malformed("truncated header length"));
        }
        let header_len = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize;
        let value_start = 4usize
            .checked_add(header_len)
            .filter(|end| *end <= data.len())
            .ok_or_else(|| malformed("truncated header"))?;
        let header: L2Header = bincode::deserialize(&data[4..value_start])
            .map_err(|e| malformed(&e.to_string()))?;
        Ok((header, data.slice(value_start..)))
    }

    pub async fn get(&self, namespace: &str, key: &str, pinned: bool) -> CoreResult<L2Lookup> {
        let object_key = Self::object_key(namespace, key, pinned);
        let data = match self.store.get(&object_key).await {
            Ok(data) => data,
            Err(err) if err.is_not_found() => return Ok(L2Lookup::Miss),
            Err(err) => return Err(err),
        };

        let (header, value) = Self::decode(&object_key, data)?;
        if header.key != key {
            // Digest collision: a different key owns this slot.
            return Ok(L2Lookup::Miss);
        }
        match header.remaining_ttl(Utc::now().timestamp_millis()) {
            Some(remaining_ttl) => Ok(L2Lookup::Hit {
                value,
                remaining_ttl,
            }),
            None => {
                self.store.delete(&object_key).await?;
                Ok(L2Lookup::Expired)
            }
        }
    }

    pub async fn put(
        &self,
        namespace: &str,
        key: &str,
        value: &[u8],
        ttl: Option<Duration>,
        pinned: bool,
    ) -> CoreResult<()> {
        let object_key = Self::object_key(namespace, key, pinned);
        let ttl = if pinned { None } else { ttl };
        self.store
            .put(&object_key, Self::encode(key, value, ttl)?)
            .await
    }

    pub async fn remove(&self, namespace: &str, key: &str, pinned: bool) -> CoreResult<()> {
        self.store
            .delete(&Self::object_key(namespace, key, pinned))
            .await
    }

    pub async fn remove_object(&self, object_key: &str) -> CoreResult<()> {
        self.store.delete(object_key).await
    }

    /// Every object in the namespace, pinned included.
    pub async fn list_namespace(&self, namespace: &str) -> CoreResult<Vec<ObjectMetadata>> {
        self.store.list(&format!("{namespace}/")).await
    }

    /// Objects subject to clear and eviction.
    pub async fn list_evictable(&self, namespace: &str) -> CoreResult<Vec<ObjectMetadata>> {
        self.store
            .list(&format!("{namespace}/{ENTRIES_DIR}/"))
            .await
    }

    /// Namespaces that currently have at least one persisted object.
    pub async fn namespaces(&self) -> CoreResult<BTreeSet<String>> {
        Ok(self
            .store
            .list("")
            .await?
            .into_iter()
            .filter_map(|object| object.key.split('/').next().map(str::to_string))
            .collect())
    }

    pub async fn list_all(&self) -> CoreResult<Vec<ObjectMetadata>> {
        self.store.list("").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object_store::MemoryObjectStore;

    fn tier() -> (L2Tier, MemoryObjectStore) {
        let store = MemoryObjectStore::new();
        (L2Tier::new(Arc::new(store.clone())), store)
    }

    #[tokio::test]
    async fn test_envelope_round_trip() {
        let (l2, store) = tier();
        l2.put("corpora", "corpora/en/1.0.0", b"payload", None, false)
            .await
            .unwrap();

        match l2.get("corpora", "corpora/en/1.0.0", false).await.unwrap() {
            L2Lookup::Hit {
                value,
                remaining_ttl,
            } => {
                assert_eq!(value, Bytes::from_static(b"payload"));
                assert!(remaining_ttl.is_none());
            }
            _ => panic!("expected L2 hit"),
        }
        assert_eq!(store.object_count(), 1);
        // Pinned and regular entries do not alias.
        assert!(matches!(
            l2.get("corpora", "corpora/en/1.0.0", true).await.unwrap(),
            L2Lookup::Miss
        ));
    }

    #[tokio::test]
    async fn test_expired_entry_is_removed() {
        let (l2, store) = tier();
        l2.put("ns", "k", b"v", Some(Duration::from_millis(20)), false)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;

        assert!(matches!(
            l2.get("ns", "k", false).await.unwrap(),
            L2Lookup::Expired
        ));
        assert_eq!(store.object_count(), 0);
    }

    #[tokio::test]
    async fn test_truncated_entry_is_an_error() {
        let (l2, store) = tier();
        l2.put("ns", "k", b"value", None, false).await.unwrap();
        let object_key = L2Tier::object_key("ns", "k", false);
        store.tamper(&object_key, Bytes::from_static(&[0xFF, 0xFF, 0x00, 0x00, 1]));

        assert!(l2.get("ns", "k", false).await.is_err());
    }

    #[tokio::test]
    async fn test_namespaces_are_discovered_from_keys() {
        let (l2, _store) = tier();
        l2.put("dictionary", "a", b"1", None, false).await.unwrap();
        l2.put("corpora", "b", b"2", None, true).await.unwrap();

        let namespaces: Vec<String> = l2.namespaces().await.unwrap().into_iter().collect();
        assert_eq!(namespaces, vec!["corpora", "dictionary"]);
        assert_eq!(l2.list_evictable("corpora").await.unwrap().len(), 0);
        assert_eq!(l2.list_namespace("corpora").await.unwrap().len(), 1);
    }
}
