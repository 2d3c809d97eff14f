//! In-memory ObjectStore for testing
//!
//! Simulates a blob store with configurable failures so that write-failure,
//! corruption and degraded-tier paths can be exercised without touching disk.
//!
//! # Examples
//!
//! ```rust
//! use folio_storage::object_store::{InjectedFailure, MemoryObjectStore, ObjectStore};
//! use bytes::Bytes;
//!
//! # async fn example() -> folio_core::CoreResult<()> {
//! let store = MemoryObjectStore::new();
//! store.fail_next("put", InjectedFailure::Error("disk full"));
//!
//! assert!(store.put("ns/key", Bytes::from("data")).await.is_err());
//! assert!(store.put("ns/key", Bytes::from("data")).await.is_ok());
//! assert_eq!(store.failed_calls("put"), 1);
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use folio_core::{CoreError, CoreResult};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::{validate_key, ObjectMetadata, ObjectStore};

/// Outcome injected into the next call of an operation.
#[derive(Debug, Clone)]
pub enum InjectedFailure {
    /// Fail with `CoreError::StorageError`.
    Error(&'static str),

    /// Succeed, but a `put` stores different bytes than it was given.
    CorruptWrite,

    /// Success (no error).
    Ok,
}

/// Call history entry.
#[derive(Debug, Clone)]
pub struct CallHistoryEntry {
    /// Operation type: "put", "get", "exists", "delete", "list", "head".
    pub operation: &'static str,

    /// Object key (prefix for list).
    pub key: String,

    /// Whether operation succeeded.
    pub success: bool,

    /// Timestamp of operation.
    pub timestamp: Instant,
}

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    last_modified: DateTime<Utc>,
}

/// In-memory object store with per-operation failure queues.
#[derive(Clone, Default)]
pub struct MemoryObjectStore {
    objects: Arc<RwLock<BTreeMap<String, StoredObject>>>,
    failures: Arc<RwLock<HashMap<&'static str, VecDeque<InjectedFailure>>>>,
    call_history: Arc<RwLock<Vec<CallHistoryEntry>>>,
    latency: Duration,
}

impl MemoryObjectStore {
    /// Create a store with no injected failures or latency.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store that sleeps for `latency` before every operation.
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency,
            ..Self::default()
        }
    }

    /// Queue an outcome for the next call of `operation`.
    ///
    /// Outcomes are consumed in order. Once the queue is empty, calls succeed.
    pub fn fail_next(&self, operation: &'static str, failure: InjectedFailure) {
        self.failures
            .write()
            .entry(operation)
            .or_default()
            .push_back(failure);
    }

    /// Make every subsequent call of `operation` fail.
    pub fn fail_always(&self, operation: &'static str, error: &'static str) {
        let queue = vec![InjectedFailure::Error(error); 10_000];
        self.failures.write().insert(operation, queue.into());
    }

    /// Drop all queued failures.
    pub fn clear_failures(&self) {
        self.failures.write().clear();
    }

    /// Overwrite stored bytes in place, bypassing failure injection.
    pub fn tamper(&self, key: &str, data: Bytes) {
        if let Some(object) = self.objects.write().get_mut(key) {
            object.data = data;
        }
    }

    /// Remove an object, bypassing failure injection and history.
    pub fn remove_silently(&self, key: &str) {
        self.objects.write().remove(key);
    }

    /// Get call history for assertions.
    pub fn call_history(&self) -> Vec<CallHistoryEntry> {
        self.call_history.read().clone()
    }

    /// Number of failed calls of `operation`.
    pub fn failed_calls(&self, operation: &str) -> usize {
        self.call_history
            .read()
            .iter()
            .filter(|entry| entry.operation == operation && !entry.success)
            .count()
    }

    /// Number of successful calls of `operation`.
    pub fn successful_calls(&self, operation: &str) -> usize {
        self.call_history
            .read()
            .iter()
            .filter(|entry| entry.operation == operation && entry.success)
            .count()
    }

    /// Number of stored objects.
    pub fn object_count(&self) -> usize {
        self.objects.read().len()
    }

    /// Check if key exists in storage, bypassing failure injection.
    pub fn contains_key(&self, key: &str) -> bool {
        self.objects.read().contains_key(key)
    }

    async fn begin(&self, operation: &'static str, key: &str) -> CoreResult<InjectedFailure> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let injected = self
            .failures
            .write()
            .get_mut(operation)
            .and_then(VecDeque::pop_front)
            .unwrap_or(InjectedFailure::Ok);
        if let InjectedFailure::Error(message) = injected {
            self.record_call(operation, key, false);
            return Err(CoreError::StorageError(format!(
                "injected {operation} failure: {message}"
            )));
        }
        Ok(injected)
    }

    fn record_call(&self, operation: &'static str, key: &str, success: bool) {
        self.call_history.write().push(CallHistoryEntry {
            operation,
            key: key.to_string(),
            success,
            timestamp: Instant::now(),
        });
    }

    fn metadata(key: &str, object: &StoredObject) -> ObjectMetadata {
        ObjectMetadata {
            key: key.to_string(),
            size_bytes: object.data.len() as u64,
            last_modified: object.last_modified,
        }
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(&self, key: &str, data: Bytes) -> CoreResult<()> {
        validate_key(key)?;
        let injected = self.begin("put", key).await?;

        let data = match injected {
            InjectedFailure::CorruptWrite => {
                let mut corrupted = data.to_vec();
                match corrupted.first_mut() {
                    Some(byte) => *byte ^= 0xFF,
                    None => corrupted.push(0xFF),
                }
                Bytes::from(corrupted)
            }
            _ => data,
        };

        self.objects.write().insert(
            key.to_string(),
            StoredObject {
                data,
                last_modified: Utc::now(),
            },
        );
        self.record_call("put", key, true);
        Ok(())
    }

    async fn get(&self, key: &str) -> CoreResult<Bytes> {
        self.begin("get", key).await?;

        let found = self.objects.read().get(key).map(|o| o.data.clone());
        self.record_call("get", key, found.is_some());
        found.ok_or_else(|| CoreError::not_found("object", key))
    }

    async fn exists(&self, key: &str) -> CoreResult<bool> {
        self.begin("exists", key).await?;

        let exists = self.objects.read().contains_key(key);
        self.record_call("exists", key, true);
        Ok(exists)
    }

    async fn delete(&self, key: &str) -> CoreResult<()> {
        self.begin("delete", key).await?;

        self.objects.write().remove(key);
        self.record_call("delete", key, true);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> CoreResult<Vec<ObjectMetadata>> {
        self.begin("list", prefix).await?;

        let objects: Vec<ObjectMetadata> = self
            .objects
            .read()
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, object)| Self::metadata(key, object))
            .collect();
        self.record_call("list", prefix, true);
        Ok(objects)
    }

    async fn head(&self, key: &str) -> CoreResult<ObjectMetadata> {
        self.begin("head", key).await?;

        let found = self
            .objects
            .read()
            .get(key)
            .map(|object| Self::metadata(key, object));
        self.record_call("head", key, found.is_some());
        found.ok_or_else(|| CoreError::not_found("object", key))
    }
}
