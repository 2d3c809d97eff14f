//! Inline vs external placement of content, and resolution back to values
//!
//! Small payloads live on the record itself. Anything at or above the inline
//! threshold is compressed and written under the per-attempt locator
//! `<namespace>/<resource_id>/<version>/<record id>`, either to the blob store
//! or as a durable entry in the cache's L2 tier. Written bytes are read back and
//! checksum-verified before the caller is allowed to commit metadata.

use bytes::Bytes;
use folio_core::metrics::{CONTENT_CORRUPTIONS, EXTERNAL_BYTES_WRITTEN};
use folio_core::{
    ContentLocation, CoreError, CoreResult, ExternalTarget, SemanticVersion, StorageConfig,
    StorageType, VersionId, VersionedResource,
};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::cache::TieredCache;
use crate::codec::{checksum, ContentCodec};
use crate::object_store::ObjectStore;

/// Where a save's content ended up, plus the guard that removes the external
/// bytes again unless the save commits.
#[must_use = "dropping a Placement removes any external bytes it wrote"]
pub struct Placement {
    pub content_inline: Option<Value>,
    pub content_location: Option<ContentLocation>,
    guard: OrphanGuard,
}

impl Placement {
    pub fn storage_type(&self) -> StorageType {
        self.content_location
            .as_ref()
            .map_or(StorageType::Inline, |location| location.storage_type)
    }

    /// Marks the placement as referenced by committed metadata.
    pub fn commit(self) {
        self.guard.disarm();
    }

    /// Removes the external bytes now instead of on drop.
    pub async fn abandon(self) {
        self.guard.remove_now().await;
    }
}

struct OrphanCleanup {
    blobs: Arc<dyn ObjectStore>,
    cache: Arc<TieredCache>,
    namespace: String,
    locator: String,
    storage_type: StorageType,
}

impl OrphanCleanup {
    async fn run(self) {
        let result = match self.storage_type {
            StorageType::CacheTier => {
                self.cache
                    .delete_durable(&self.namespace, &self.locator)
                    .await
            }
            _ => {
                self.cache.delete(&self.namespace, &self.locator).await;
                self.blobs.delete(&self.locator).await
            }
        };
        match result {
            Ok(()) => debug!(locator = %self.locator, "removed orphaned content"),
            Err(err) => warn!(
                locator = %self.locator,
                error = %err,
                "failed to remove orphaned content"
            ),
        }
    }
}

/// Removes external bytes whose save never committed.
///
/// Armed as soon as a write is attempted. Error paths await `remove_now`; a
/// guard that is merely dropped (timeout or cancellation) spawns the cleanup
/// onto the current tokio runtime. Locators are unique per attempt, so a late
/// cleanup never touches bytes of a later save.
pub struct OrphanGuard {
    cleanup: Option<OrphanCleanup>,
}

impl OrphanGuard {
    fn inert() -> Self {
        Self { cleanup: None }
    }

    pub fn disarm(mut self) {
        self.cleanup = None;
    }

    pub async fn remove_now(mut self) {
        if let Some(cleanup) = self.cleanup.take() {
            cleanup.run().await;
        }
    }
}

impl Drop for OrphanGuard {
    fn drop(&mut self) {
        let Some(cleanup) = self.cleanup.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(cleanup.run());
            }
            Err(_) => warn!(
                locator = %cleanup.locator,
                "no runtime available; orphaned content left in place"
            ),
        }
    }
}

/// Places content for new versions and resolves it for reads.
pub struct ContentResolver {
    codec: ContentCodec,
    blobs: Arc<dyn ObjectStore>,
    cache: Arc<TieredCache>,
    inline_threshold: u64,
    target: ExternalTarget,
}

impl ContentResolver {
    pub fn new(
        config: &StorageConfig,
        blobs: Arc<dyn ObjectStore>,
        cache: Arc<TieredCache>,
    ) -> Self {
        Self {
            codec: ContentCodec::new(config.compression),
            blobs,
            cache,
            inline_threshold: config.inline_threshold,
            target: config.external_target,
        }
    }

    pub fn codec(&self) -> &ContentCodec {
        &self.codec
    }

    pub fn cache(&self) -> &Arc<TieredCache> {
        &self.cache
    }

    /// Decides inline vs external for `content` and, when external, writes and
    /// verifies the bytes.
    ///
    /// `record_id` is the id the committed record will carry.
    ///
    /// # Errors
    ///
    /// Any write or read-back failure aborts the placement; bytes already
    /// written are removed before the error is returned.
    pub async fn place(
        &self,
        namespace: &str,
        resource_id: &str,
        version: &SemanticVersion,
        record_id: VersionId,
        content: Option<&Value>,
    ) -> CoreResult<Placement> {
        let Some(value) = content else {
            return Ok(Placement {
                content_inline: None,
                content_location: None,
                guard: OrphanGuard::inert(),
            });
        };

        let serialized = self.codec.serialize(Some(value))?;
        let size_bytes = serialized.len() as u64;
        if size_bytes < self.inline_threshold {
            return Ok(Placement {
                content_inline: Some(value.clone()),
                content_location: None,
                guard: OrphanGuard::inert(),
            });
        }

        let (stored, compression) = self.codec.compress(&serialized)?;
        let locator = ContentLocation::locator(namespace, resource_id, version, record_id);
        let storage_type = match self.target {
            ExternalTarget::BlobStore => StorageType::ExternalBlob,
            ExternalTarget::CacheTier => StorageType::CacheTier,
        };
        let location = ContentLocation {
            storage_type,
            path: locator.clone(),
            compression,
            size_bytes,
            size_compressed: stored.len() as u64,
            checksum: checksum(&stored),
        };

        let guard = OrphanGuard {
            cleanup: Some(OrphanCleanup {
                blobs: Arc::clone(&self.blobs),
                cache: Arc::clone(&self.cache),
                namespace: namespace.to_string(),
                locator: locator.clone(),
                storage_type,
            }),
        };

        if let Err(err) = self
            .write_verified(namespace, &locator, storage_type, stored.clone(), &location.checksum)
            .await
        {
            guard.remove_now().await;
            return Err(err);
        }

        if storage_type == StorageType::ExternalBlob {
            self.cache.set(namespace, &locator, stored, None).await;
        }
        EXTERNAL_BYTES_WRITTEN
            .with_label_values(&["uncompressed"])
            .inc_by(size_bytes);
        EXTERNAL_BYTES_WRITTEN
            .with_label_values(&["stored"])
            .inc_by(location.size_compressed);
        debug!(
            locator = %locator,
            storage_type = storage_type.as_str(),
            size_bytes,
            size_compressed = location.size_compressed,
            "placed external content"
        );

        Ok(Placement {
            content_inline: None,
            content_location: Some(location),
            guard,
        })
    }

    /// Writes `stored` under `locator` and reads it back against `expected`.
    async fn write_verified(
        &self,
        namespace: &str,
        locator: &str,
        storage_type: StorageType,
        stored: Bytes,
        expected: &str,
    ) -> CoreResult<()> {
        let readback = match storage_type {
            StorageType::CacheTier => {
                self.cache.set_durable(namespace, locator, stored).await?;
                self.cache.load_persisted(namespace, locator).await?
            }
            _ => {
                self.blobs.put(locator, stored).await?;
                match self.blobs.get(locator).await {
                    Ok(bytes) => Some(bytes),
                    Err(err) if err.is_not_found() => None,
                    Err(err) => return Err(err),
                }
            }
        };
        match readback {
            Some(bytes) if checksum(&bytes) == expected => Ok(()),
            Some(_) => Err(self.corruption(storage_type, locator, "read-back checksum mismatch")),
            None => Err(self.corruption(storage_type, locator, "written bytes not found")),
        }
    }

    /// Returns the content of `record`, verifying external bytes.
    ///
    /// # Errors
    ///
    /// Missing, truncated or mismatched external bytes are `ContentCorrupted`.
    pub async fn resolve(&self, record: &VersionedResource) -> CoreResult<Option<Value>> {
        if let Some(value) = &record.content_inline {
            return Ok(Some(value.clone()));
        }
        let Some(location) = &record.content_location else {
            return Ok(None);
        };

        let stored = self.fetch(&record.namespace, location).await?;
        let decompressed =
            self.codec
                .decompress(&stored, location.compression, &location.path)
                .map_err(|err| {
                    CONTENT_CORRUPTIONS
                        .with_label_values(&[location.storage_type.as_str()])
                        .inc();
                    err
                })?;
        if checksum(&decompressed) != record.version_info.data_hash {
            return Err(self.corruption(
                location.storage_type,
                &location.path,
                "content hash does not match version data_hash",
            ));
        }
        self.codec.deserialize(&decompressed, &location.path).map(Some)
    }

    /// Stored bytes for `location` with the checksum verified. A cached copy
    /// that fails the check is dropped and the blob store consulted once.
    async fn fetch(&self, namespace: &str, location: &ContentLocation) -> CoreResult<Bytes> {
        let locator = location.path.as_str();
        match location.storage_type {
            StorageType::CacheTier => {
                let bytes = self
                    .cache
                    .get_durable(namespace, locator)
                    .await?
                    .ok_or_else(|| {
                        self.corruption(StorageType::CacheTier, locator, "missing from cache tier")
                    })?;
                self.verify_checksum(location, bytes)
            }
            StorageType::ExternalBlob => {
                if let Some(cached) = self.cache.get(namespace, locator).await {
                    if checksum(&cached) == location.checksum {
                        return Ok(cached);
                    }
                    warn!(locator, "cached copy failed checksum; refetching from blob store");
                    self.cache.delete(namespace, locator).await;
                }
                let bytes = match self.blobs.get(locator).await {
                    Ok(bytes) => bytes,
                    Err(err) if err.is_not_found() => {
                        return Err(self.corruption(
                            StorageType::ExternalBlob,
                            locator,
                            "missing from blob store",
                        ))
                    }
                    Err(err) => return Err(err),
                };
                let bytes = self.verify_checksum(location, bytes)?;
                self.cache.set(namespace, locator, bytes.clone(), None).await;
                Ok(bytes)
            }
            StorageType::Inline => Err(self.corruption(
                StorageType::Inline,
                locator,
                "inline storage type on an external location",
            )),
        }
    }

    fn verify_checksum(&self, location: &ContentLocation, bytes: Bytes) -> CoreResult<Bytes> {
        if checksum(&bytes) == location.checksum {
            Ok(bytes)
        } else {
            Err(self.corruption(location.storage_type, &location.path, "checksum mismatch"))
        }
    }

    fn corruption(&self, storage_type: StorageType, locator: &str, reason: &str) -> CoreError {
        CONTENT_CORRUPTIONS
            .with_label_values(&[storage_type.as_str()])
            .inc();
        warn!(locator, storage_type = storage_type.as_str(), reason, "content corrupted");
        CoreError::corrupted(locator, reason)
    }

    /// Removes the external bytes of `record` and any cached copy.
    pub async fn discard(&self, record: &VersionedResource) -> CoreResult<()> {
        let Some(location) = &record.content_location else {
            return Ok(());
        };
        match location.storage_type {
            StorageType::CacheTier => {
                self.cache
                    .delete_durable(&record.namespace, &location.path)
                    .await
            }
            _ => {
                self.cache.delete(&record.namespace, &location.path).await;
                self.blobs.delete(&location.path).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object_store::{InjectedFailure, MemoryObjectStore};
    use chrono::Utc;
    use folio_core::{
        CacheConfig, ResourceMetadata, ResourceType, VersionId, VersionInfo,
    };
    use serde_json::json;
    use std::time::Duration;

    struct Fixture {
        resolver: ContentResolver,
        blobs: MemoryObjectStore,
        l2: MemoryObjectStore,
    }

    fn fixture(target: ExternalTarget) -> Fixture {
        let blobs = MemoryObjectStore::new();
        let l2 = MemoryObjectStore::new();
        let cache =
            TieredCache::with_store(&CacheConfig::default(), Arc::new(l2.clone())).unwrap();
        let config = StorageConfig {
            inline_threshold: 64,
            external_target: target,
            ..StorageConfig::default()
        };
        Fixture {
            resolver: ContentResolver::new(&config, Arc::new(blobs.clone()), Arc::new(cache)),
            blobs,
            l2,
        }
    }

    fn large_content() -> Value {
        json!({ "tokens": vec!["lorem ipsum dolor sit amet"; 50] })
    }

    fn record_for(resolver: &ContentResolver, placement: &Placement, content: &Value) -> VersionedResource {
        VersionedResource {
            id: VersionId::new(),
            resource_id: "en".to_string(),
            resource_type: ResourceType::Generic,
            namespace: "corpora".to_string(),
            version_info: VersionInfo {
                version: SemanticVersion::new(1, 0, 0),
                data_hash: resolver.codec().hash(Some(content)).unwrap(),
                is_latest: true,
                supersedes: None,
                superseded_by: None,
                created_at: Utc::now(),
            },
            content_inline: placement.content_inline.clone(),
            content_location: placement.content_location.clone(),
            metadata: ResourceMetadata::generic(),
        }
    }

    #[tokio::test]
    async fn test_small_content_stays_inline() {
        let fx = fixture(ExternalTarget::BlobStore);
        let content = json!({ "w": "run" });
        let placement = fx
            .resolver
            .place(
                "words",
                "run",
                &SemanticVersion::new(1, 0, 0),
                VersionId::new(),
                Some(&content),
            )
            .await
            .unwrap();

        assert_eq!(placement.storage_type(), StorageType::Inline);
        assert_eq!(placement.content_inline, Some(content));
        assert_eq!(fx.blobs.object_count(), 0);
        placement.commit();
    }

    #[tokio::test]
    async fn test_blob_placement_round_trips_through_resolve() {
        let fx = fixture(ExternalTarget::BlobStore);
        let content = large_content();
        let placement = fx
            .resolver
            .place(
                "corpora",
                "en",
                &SemanticVersion::new(1, 0, 0),
                VersionId::new(),
                Some(&content),
            )
            .await
            .unwrap();

        let location = placement.content_location.clone().unwrap();
        assert_eq!(location.storage_type, StorageType::ExternalBlob);
        assert!(location.path.starts_with("corpora/en/1.0.0/"));
        assert!(fx.blobs.contains_key(&location.path));

        let record = record_for(&fx.resolver, &placement, &content);
        placement.commit();
        assert_eq!(fx.resolver.resolve(&record).await.unwrap(), Some(content));
    }

    #[tokio::test]
    async fn test_cache_tier_placement_survives_clear() {
        let fx = fixture(ExternalTarget::CacheTier);
        let content = large_content();
        let placement = fx
            .resolver
            .place(
                "corpora",
                "en",
                &SemanticVersion::new(1, 0, 0),
                VersionId::new(),
                Some(&content),
            )
            .await
            .unwrap();
        assert_eq!(placement.storage_type(), StorageType::CacheTier);
        assert_eq!(fx.blobs.object_count(), 0);
        assert_eq!(fx.l2.object_count(), 1);

        let record = record_for(&fx.resolver, &placement, &content);
        placement.commit();
        fx.resolver.cache().clear(None).await.unwrap();
        assert_eq!(fx.resolver.resolve(&record).await.unwrap(), Some(content));
    }

    #[tokio::test]
    async fn test_dropped_placement_removes_bytes() {
        let fx = fixture(ExternalTarget::BlobStore);
        let placement = fx
            .resolver
            .place(
                "corpora",
                "en",
                &SemanticVersion::new(1, 0, 0),
                VersionId::new(),
                Some(&large_content()),
            )
            .await
            .unwrap();
        assert_eq!(fx.blobs.object_count(), 1);

        drop(placement);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(fx.blobs.object_count(), 0);
    }

    #[tokio::test]
    async fn test_corrupt_write_is_rejected_and_cleaned_up() {
        let fx = fixture(ExternalTarget::BlobStore);
        fx.blobs.fail_next("put", InjectedFailure::CorruptWrite);

        let result = fx
            .resolver
            .place(
                "corpora",
                "en",
                &SemanticVersion::new(1, 0, 0),
                VersionId::new(),
                Some(&large_content()),
            )
            .await;
        assert!(matches!(result, Err(CoreError::ContentCorrupted { .. })));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(fx.blobs.object_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_read_back_cleans_up_before_returning() {
        let fx = fixture(ExternalTarget::BlobStore);
        fx.blobs.fail_next("get", InjectedFailure::Error("connection reset"));

        let result = fx
            .resolver
            .place(
                "corpora",
                "en",
                &SemanticVersion::new(1, 0, 0),
                VersionId::new(),
                Some(&large_content()),
            )
            .await;
        assert!(matches!(result, Err(CoreError::StorageError(_))));
        // No sleep: the bytes are gone by the time the error is returned.
        assert_eq!(fx.blobs.object_count(), 0);
    }

    #[tokio::test]
    async fn test_attempts_at_the_same_version_do_not_share_bytes() {
        let fx = fixture(ExternalTarget::BlobStore);
        let version = SemanticVersion::new(1, 0, 0);
        let content = large_content();

        let abandoned = fx
            .resolver
            .place("corpora", "en", &version, VersionId::new(), Some(&content))
            .await
            .unwrap();
        let kept = fx
            .resolver
            .place("corpora", "en", &version, VersionId::new(), Some(&content))
            .await
            .unwrap();
        let record = record_for(&fx.resolver, &kept, &content);
        kept.commit();
        drop(abandoned);
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(fx.blobs.object_count(), 1);
        fx.resolver.cache().clear(None).await.unwrap();
        assert_eq!(fx.resolver.resolve(&record).await.unwrap(), Some(content));
    }

    #[tokio::test]
    async fn test_missing_blob_is_corruption_not_not_found() {
        let fx = fixture(ExternalTarget::BlobStore);
        let content = large_content();
        let placement = fx
            .resolver
            .place(
                "corpora",
                "en",
                &SemanticVersion::new(1, 0, 0),
                VersionId::new(),
                Some(&content),
            )
            .await
            .unwrap();
        let record = record_for(&fx.resolver, &placement, &content);
        placement.commit();

        fx.resolver.cache().clear(None).await.unwrap();
        fx.blobs
            .remove_silently(&record.content_location.as_ref().unwrap().path);

        let err = fx.resolver.resolve(&record).await.unwrap_err();
        assert!(matches!(err, CoreError::ContentCorrupted { .. }));
    }

    #[tokio::test]
    async fn test_discard_removes_blob_and_cached_copy() {
        let fx = fixture(ExternalTarget::BlobStore);
        let content = large_content();
        let placement = fx
            .resolver
            .place(
                "corpora",
                "en",
                &SemanticVersion::new(1, 0, 0),
                VersionId::new(),
                Some(&content),
            )
            .await
            .unwrap();
        let record = record_for(&fx.resolver, &placement, &content);
        placement.commit();

        fx.resolver.discard(&record).await.unwrap();
        assert_eq!(fx.blobs.object_count(), 0);
        assert_eq!(fx.l2.object_count(), 0);
    }
}
