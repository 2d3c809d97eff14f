//! Versioned store facade
//!
//! Wires the repository, content resolver, tiered cache and version chain
//! manager together. Constructed explicitly; there is no process-wide store.

use folio_core::metrics::{PRUNED_VERSIONS, SAVE_OPERATIONS};
use folio_core::resource::validate_namespace;
use folio_core::{
    CoreError, CoreResult, FolioConfig, ResourceKey, ResourceRepository, ResourceType,
    SemanticVersion, VersionedResource,
};
use folio_storage::{
    CacheStats, ClearReport, ContentResolver, DiskUsage, L2EvictionReport, LocalObjectStore,
    ObjectStore, ReloadReport, TieredCache,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::chain::{SaveOutcome, SaveRequest, VersionChainManager};
use crate::prune::{age_cutoff, select_for_deletion, PruneReport, PrunedVersion};

/// A record together with its resolved content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedResource {
    pub record: VersionedResource,
    pub content: Option<Value>,
}

/// Entry point for saving, reading and pruning versioned resources.
pub struct VersionedStore {
    chain: VersionChainManager,
    resolver: Arc<ContentResolver>,
    cache: Arc<TieredCache>,
    config: FolioConfig,
}

async fn with_deadline<T>(
    operation: &'static str,
    timeout: Duration,
    future: impl Future<Output = CoreResult<T>>,
) -> CoreResult<T> {
    match tokio::time::timeout(timeout, future).await {
        Ok(result) => result,
        Err(_) => Err(CoreError::Timeout {
            operation,
            elapsed: timeout,
        }),
    }
}

impl VersionedStore {
    /// Opens the store with its blob store and L2 cache under `config.storage.data_dir`.
    pub async fn open(
        config: FolioConfig,
        repository: Arc<dyn ResourceRepository>,
    ) -> CoreResult<Self> {
        let blobs = LocalObjectStore::new(config.storage.blob_dir()).await?;
        let cache_store = LocalObjectStore::new(config.storage.cache_dir()).await?;
        info!(
            data_dir = %config.storage.data_dir.display(),
            external_target = ?config.storage.external_target,
            "opening versioned store"
        );
        Self::with_stores(config, repository, Arc::new(blobs), Arc::new(cache_store))
    }

    /// Builds the store over explicit blob and L2 object stores.
    pub fn with_stores(
        config: FolioConfig,
        repository: Arc<dyn ResourceRepository>,
        blobs: Arc<dyn ObjectStore>,
        cache_store: Arc<dyn ObjectStore>,
    ) -> CoreResult<Self> {
        let cache = Arc::new(TieredCache::with_store(&config.cache, cache_store)?);
        let resolver = Arc::new(ContentResolver::new(
            &config.storage,
            blobs,
            Arc::clone(&cache),
        ));
        let chain = VersionChainManager::new(
            repository,
            Arc::clone(&resolver),
            config.versioning.retry.clone(),
        );
        Ok(Self {
            chain,
            resolver,
            cache,
            config,
        })
    }

    pub fn config(&self) -> &FolioConfig {
        &self.config
    }

    /// Saves a new version, or returns the current latest when its content is
    /// unchanged. Bounded by `versioning.save_timeout_ms`.
    #[tracing::instrument(skip(self, request), fields(resource_id = %request.resource_id, resource_type = %request.resource_type))]
    pub async fn save(&self, request: SaveRequest) -> CoreResult<VersionedResource> {
        self.save_with_timeout(request, self.config.versioning.save_timeout())
            .await
    }

    /// Like [`save`](Self::save), reporting whether a version was created.
    pub async fn save_outcome(&self, request: &SaveRequest) -> CoreResult<SaveOutcome> {
        self.chain.commit(request).await.map_err(|err| {
            if !matches!(err, CoreError::VersionConflict { .. }) {
                SAVE_OPERATIONS
                    .with_label_values(&[request.resource_type.as_str(), "error"])
                    .inc();
            }
            err
        })
    }

    /// [`save`](Self::save) bounded by `timeout`. On expiry nothing becomes latest.
    pub async fn save_with_timeout(
        &self,
        request: SaveRequest,
        timeout: Duration,
    ) -> CoreResult<VersionedResource> {
        let resource_type = request.resource_type;
        let save = async {
            self.save_outcome(&request)
                .await
                .map(SaveOutcome::into_record)
        };
        with_deadline("save", timeout, save)
            .await
            .map_err(|err| {
                if matches!(err, CoreError::Timeout { .. }) {
                    warn!(?timeout, resource_type = %resource_type, "save timed out");
                    SAVE_OPERATIONS
                        .with_label_values(&[resource_type.as_str(), "timeout"])
                        .inc();
                }
                err
            })
    }

    async fn resolved(&self, record: VersionedResource) -> CoreResult<ResolvedResource> {
        let content = self.resolver.resolve(&record).await?;
        Ok(ResolvedResource { record, content })
    }

    /// A specific version with its content.
    #[tracing::instrument(skip(self))]
    pub async fn get_version(
        &self,
        resource_id: &str,
        resource_type: ResourceType,
        version: &SemanticVersion,
    ) -> CoreResult<ResolvedResource> {
        let key = ResourceKey::new(resource_id, resource_type);
        let record = self
            .chain
            .version(&key, version)
            .await?
            .ok_or_else(|| CoreError::not_found("version", format!("{key}@{version}")))?;
        self.resolved(record).await
    }

    /// The latest version with its content.
    #[tracing::instrument(skip(self))]
    pub async fn get_latest_version(
        &self,
        resource_id: &str,
        resource_type: ResourceType,
    ) -> CoreResult<ResolvedResource> {
        let key = ResourceKey::new(resource_id, resource_type);
        let record = self
            .chain
            .latest(&key)
            .await?
            .ok_or_else(|| CoreError::not_found("resource", key.to_string()))?;
        self.resolved(record).await
    }

    /// Every version of a resource, newest first. Content is not resolved.
    pub async fn list_versions(
        &self,
        resource_id: &str,
        resource_type: ResourceType,
    ) -> CoreResult<Vec<VersionedResource>> {
        self.chain
            .history(&ResourceKey::new(resource_id, resource_type))
            .await
    }

    /// Applies retention to every resource key.
    ///
    /// A dry run selects exactly what a real run would delete and mutates nothing.
    #[tracing::instrument(skip(self))]
    pub async fn prune_old_versions(
        &self,
        max_age_days: u32,
        keep_minimum: usize,
        dry_run: bool,
    ) -> CoreResult<PruneReport> {
        let cutoff = age_cutoff(chrono::Utc::now(), max_age_days);
        let mut report = PruneReport::new(dry_run);

        for key in self.chain.repository().list_resource_keys().await? {
            let _guard = self.chain.lock(&key).await;
            let versions = self.chain.history(&key).await?;
            let doomed = select_for_deletion(&versions, cutoff, keep_minimum);

            let mut deleted = Vec::with_capacity(doomed.len());
            for record in doomed {
                if !dry_run {
                    self.delete_version(record).await?;
                }
                deleted.push(PrunedVersion::from(record));
            }
            report.record_key(deleted);
        }

        info!(
            total_deleted = report.total_deleted,
            resources_affected = report.resources_affected,
            dry_run,
            "prune finished"
        );
        Ok(report)
    }

    /// [`prune_old_versions`](Self::prune_old_versions) bounded by `timeout`.
    /// Versions already deleted when the deadline hits stay deleted.
    pub async fn prune_old_versions_with_timeout(
        &self,
        max_age_days: u32,
        keep_minimum: usize,
        dry_run: bool,
        timeout: Duration,
    ) -> CoreResult<PruneReport> {
        with_deadline(
            "prune_old_versions",
            timeout,
            self.prune_old_versions(max_age_days, keep_minimum, dry_run),
        )
        .await
    }

    /// Metadata first, then bytes: a failed byte removal leaves an orphan,
    /// never a record pointing at nothing.
    async fn delete_version(&self, record: &VersionedResource) -> CoreResult<()> {
        self.chain.repository().delete(record.id).await?;
        if let Err(err) = self.resolver.discard(record).await {
            warn!(
                id = %record.id,
                version = %record.version(),
                error = %err,
                "record pruned but content removal failed"
            );
        }
        PRUNED_VERSIONS
            .with_label_values(&[record.resource_type.as_str()])
            .inc();
        Ok(())
    }

    pub async fn cache_stats(&self, namespace: &str) -> CoreResult<CacheStats> {
        validate_namespace(namespace)?;
        Ok(self.cache.stats(namespace).await)
    }

    /// Clears one namespace or all of them; `dry_run` only reports.
    pub async fn clear_cache(
        &self,
        namespace: Option<&str>,
        dry_run: bool,
    ) -> CoreResult<ClearReport> {
        if let Some(namespace) = namespace {
            validate_namespace(namespace)?;
        }
        if dry_run {
            self.cache.clear_preview(namespace).await
        } else {
            self.cache.clear(namespace).await
        }
    }

    pub async fn disk_usage(&self, namespace: Option<&str>) -> CoreResult<DiskUsage> {
        if let Some(namespace) = namespace {
            validate_namespace(namespace)?;
        }
        self.cache.disk_usage(namespace).await
    }

    /// Drops in-memory cache state and rescans the persistent tier.
    pub async fn reload(&self) -> CoreResult<ReloadReport> {
        self.cache.reload().await
    }

    /// Runs the L2 age and size eviction pass.
    pub async fn prune_cache(&self) -> CoreResult<L2EvictionReport> {
        self.cache.evict_l2().await
    }
}
