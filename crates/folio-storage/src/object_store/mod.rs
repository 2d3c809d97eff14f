//! Object store abstraction for external payloads and the L2 cache tier
//!
//! Backends:
//! - Local filesystem (production blob store and L2 directory)
//! - In-memory with failure injection (testing)

mod local;
mod memory;

pub use local::LocalObjectStore;
pub use memory::{CallHistoryEntry, InjectedFailure, MemoryObjectStore};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use folio_core::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};

/// Object metadata returned by list/head operations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectMetadata {
    /// Object key (path)
    pub key: String,
    /// Size in bytes
    pub size_bytes: u64,
    /// Last modification timestamp
    pub last_modified: DateTime<Utc>,
}

/// Object Store trait - flat key/bytes interface
///
/// All implementations must be thread-safe (Send + Sync) and support
/// concurrent operations. Keys are `/`-separated relative paths.
///
/// # Error Handling
///
/// - `CoreError::NotFound` - Object does not exist (get, head; delete is idempotent)
/// - `CoreError::StorageError` - Backend-specific error
/// - `CoreError::IoError` - I/O error (local filesystem only)
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Put object (overwrites if exists)
    async fn put(&self, key: &str, data: Bytes) -> CoreResult<()>;

    /// Get object
    async fn get(&self, key: &str) -> CoreResult<Bytes>;

    /// Check if object exists
    async fn exists(&self, key: &str) -> CoreResult<bool>;

    /// Delete object (idempotent)
    async fn delete(&self, key: &str) -> CoreResult<()>;

    /// List objects whose keys start with `prefix` (empty string lists all)
    async fn list(&self, prefix: &str) -> CoreResult<Vec<ObjectMetadata>>;

    /// Get object metadata without reading the data
    async fn head(&self, key: &str) -> CoreResult<ObjectMetadata>;
}

/// Rejects keys that could escape the store root.
pub(crate) fn validate_key(key: &str) -> CoreResult<()> {
    if key.is_empty() {
        return Err(CoreError::invalid_resource("object key cannot be empty"));
    }
    if key.starts_with('/')
        || key.contains('\\')
        || key.split('/').any(|segment| segment.is_empty() || segment == "." || segment == "..")
    {
        return Err(CoreError::invalid_resource(format!(
            "object key `{key}` is not a relative path"
        )));
    }
    Ok(())
}
