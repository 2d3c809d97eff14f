//! Version chain management
//!
//! Per resource key: NoHistory -> HasLatest(v) -> HasLatest(v+1) ...
//!
//! A save hashes its content, compares with the current latest (dedup),
//! derives the next version, places the bytes and commits through the
//! repository's compare-and-swap. The per-key lock serialises writers in this
//! process; the compare-and-swap catches anything that bypasses it.

use chrono::Utc;
use folio_core::metrics::{LATEST_SWAP_RETRIES, SAVE_DURATION, SAVE_OPERATIONS};
use folio_core::resource::validate_namespace;
use folio_core::{
    CoreError, CoreResult, ResourceFilter, ResourceKey, ResourceMetadata, ResourceRepository,
    ResourceType, RetryConfig, SemanticVersion, VersionId, VersionInfo, VersionedResource,
};
use folio_storage::ContentResolver;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::locks::{KeyLockGuard, KeyLockTable};

/// Input to a save.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveRequest {
    pub resource_id: String,
    pub resource_type: ResourceType,
    pub namespace: String,
    /// `None` for metadata-only resources.
    #[serde(default)]
    pub content: Option<Value>,
    pub metadata: ResourceMetadata,
    /// Explicit version; must exceed the current latest. Derived when absent.
    #[serde(default)]
    pub version: Option<SemanticVersion>,
}

impl SaveRequest {
    /// Request whose type follows `metadata` and whose namespace defaults to
    /// the resource type name.
    pub fn new(resource_id: impl Into<String>, metadata: ResourceMetadata) -> Self {
        let resource_type = metadata.resource_type();
        Self {
            resource_id: resource_id.into(),
            resource_type,
            namespace: resource_type.as_str().to_string(),
            content: None,
            metadata,
            version: None,
        }
    }

    #[must_use]
    pub fn with_content(mut self, content: Value) -> Self {
        self.content = Some(content);
        self
    }

    #[must_use]
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    #[must_use]
    pub fn with_version(mut self, version: SemanticVersion) -> Self {
        self.version = Some(version);
        self
    }

    pub fn key(&self) -> ResourceKey {
        ResourceKey::new(self.resource_id.clone(), self.resource_type)
    }

    /// Rejects malformed requests before anything is written.
    pub fn validate(&self) -> CoreResult<()> {
        self.key().validate()?;
        validate_namespace(&self.namespace)?;
        if self.metadata.resource_type() != self.resource_type {
            return Err(CoreError::invalid_resource(format!(
                "metadata variant `{}` does not match resource type `{}`",
                self.metadata.resource_type(),
                self.resource_type
            )));
        }
        Ok(())
    }
}

/// What a save did.
#[derive(Debug, Clone, PartialEq)]
pub enum SaveOutcome {
    /// A new version was committed as latest.
    Created(VersionedResource),
    /// Content matched the current latest; nothing was written.
    Deduplicated(VersionedResource),
}

impl SaveOutcome {
    pub fn record(&self) -> &VersionedResource {
        match self {
            Self::Created(record) | Self::Deduplicated(record) => record,
        }
    }

    pub fn into_record(self) -> VersionedResource {
        match self {
            Self::Created(record) | Self::Deduplicated(record) => record,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, Self::Created(_))
    }
}

/// Next version for a key given its current latest and an optional request.
fn next_version(
    key: &ResourceKey,
    previous: Option<&VersionedResource>,
    requested: Option<SemanticVersion>,
) -> CoreResult<SemanticVersion> {
    match (previous, requested) {
        (None, requested) => Ok(requested.unwrap_or(SemanticVersion::INITIAL)),
        (Some(previous), None) => Ok(previous.version().next_patch()),
        (Some(previous), Some(requested)) if requested > previous.version() => Ok(requested),
        (Some(previous), Some(requested)) => Err(CoreError::invalid_resource(format!(
            "version {requested} of `{key}` must be greater than latest {}",
            previous.version()
        ))),
    }
}

/// Sole owner of the `is_latest` / `supersedes` / `superseded_by` fields.
pub struct VersionChainManager {
    repository: Arc<dyn ResourceRepository>,
    resolver: Arc<ContentResolver>,
    locks: KeyLockTable,
    retry: RetryConfig,
}

impl VersionChainManager {
    pub fn new(
        repository: Arc<dyn ResourceRepository>,
        resolver: Arc<ContentResolver>,
        retry: RetryConfig,
    ) -> Self {
        Self {
            repository,
            resolver,
            locks: KeyLockTable::new(),
            retry,
        }
    }

    /// Takes the write lock for `key`. Pruning holds it while deleting.
    pub(crate) async fn lock(&self, key: &ResourceKey) -> KeyLockGuard {
        self.locks.lock(key).await
    }

    /// Saves `request`, deduplicating against the current latest.
    ///
    /// # Errors
    ///
    /// - `InvalidResource` for malformed requests or a non-increasing explicit version
    /// - `VersionConflict` when the compare-and-swap keeps losing past the retry budget
    /// - any placement error (the save then leaves no record behind)
    pub async fn commit(&self, request: &SaveRequest) -> CoreResult<SaveOutcome> {
        request.validate()?;
        let key = request.key();
        let type_label = request.resource_type.as_str();
        let data_hash = self.resolver.codec().hash(request.content.as_ref())?;
        let started = Instant::now();

        let _guard = self.locks.lock(&key).await;

        let mut attempt = 0;
        loop {
            attempt += 1;
            let previous = self.repository.latest(&key).await?;

            if let Some(previous) = &previous {
                if previous.version_info.data_hash == data_hash {
                    debug!(
                        key = %key,
                        version = %previous.version(),
                        "content unchanged; deduplicated"
                    );
                    SAVE_OPERATIONS
                        .with_label_values(&[type_label, "deduplicated"])
                        .inc();
                    return Ok(SaveOutcome::Deduplicated(previous.clone()));
                }
            }

            let version = next_version(&key, previous.as_ref(), request.version)?;
            let id = VersionId::new();
            let placement = self
                .resolver
                .place(
                    &request.namespace,
                    &request.resource_id,
                    &version,
                    id,
                    request.content.as_ref(),
                )
                .await?;

            let expected = previous.as_ref().map(|p| p.id);
            let record = VersionedResource {
                id,
                resource_id: request.resource_id.clone(),
                resource_type: request.resource_type,
                namespace: request.namespace.clone(),
                version_info: VersionInfo {
                    version,
                    data_hash: data_hash.clone(),
                    is_latest: true,
                    supersedes: expected,
                    superseded_by: None,
                    created_at: Utc::now(),
                },
                content_inline: placement.content_inline.clone(),
                content_location: placement.content_location.clone(),
                metadata: request.metadata.clone(),
            };
            let swapped = async {
                record.validate()?;
                self.repository.swap_latest(&key, expected, &record).await
            }
            .await;
            let swapped = match swapped {
                Ok(swapped) => swapped,
                Err(err) => {
                    // Still under the key lock.
                    placement.abandon().await;
                    return Err(err);
                }
            };

            if swapped {
                let storage_type = placement.storage_type();
                placement.commit();
                SAVE_OPERATIONS
                    .with_label_values(&[type_label, "created"])
                    .inc();
                SAVE_DURATION
                    .with_label_values(&[storage_type.as_str()])
                    .observe(started.elapsed().as_secs_f64());
                info!(
                    key = %key,
                    version = %version,
                    storage_type = storage_type.as_str(),
                    attempts = attempt,
                    "committed new version"
                );
                return Ok(SaveOutcome::Created(record));
            }

            placement.abandon().await;
            LATEST_SWAP_RETRIES.with_label_values(&[type_label]).inc();
            if attempt >= self.retry.max_attempts {
                warn!(key = %key, attempts = attempt, "latest swap kept losing; giving up");
                SAVE_OPERATIONS
                    .with_label_values(&[type_label, "conflict"])
                    .inc();
                return Err(CoreError::VersionConflict {
                    key: key.to_string(),
                    attempts: attempt,
                });
            }
            let backoff = self.retry.backoff_for_attempt(attempt);
            debug!(key = %key, attempt, ?backoff, "latest swap lost; retrying");
            tokio::time::sleep(backoff).await;
        }
    }

    /// Current latest record for `key`.
    pub async fn latest(&self, key: &ResourceKey) -> CoreResult<Option<VersionedResource>> {
        key.validate()?;
        self.repository.latest(key).await
    }

    /// A specific version of `key`.
    pub async fn version(
        &self,
        key: &ResourceKey,
        version: &SemanticVersion,
    ) -> CoreResult<Option<VersionedResource>> {
        Ok(self
            .history(key)
            .await?
            .into_iter()
            .find(|record| record.version() == *version))
    }

    /// All versions of `key`, newest first.
    pub async fn history(&self, key: &ResourceKey) -> CoreResult<Vec<VersionedResource>> {
        key.validate()?;
        self.repository.find(&ResourceFilter::for_key(key)).await
    }

    pub(crate) fn repository(&self) -> &Arc<dyn ResourceRepository> {
        &self.repository
    }
}
