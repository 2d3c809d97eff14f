use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::CoreResult;
use crate::ids::VersionId;
use crate::resource::{ResourceKey, ResourceType, VersionedResource};

/// Filter for [`ResourceRepository::find`]. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceFilter {
    pub resource_id: Option<String>,
    pub resource_type: Option<ResourceType>,
    pub namespace: Option<String>,
    pub is_latest: Option<bool>,
    /// Only records created strictly before this instant.
    pub created_before: Option<DateTime<Utc>>,
}

impl ResourceFilter {
    /// Filter matching every version of one resource key.
    #[must_use]
    pub fn for_key(key: &ResourceKey) -> Self {
        Self {
            resource_id: Some(key.resource_id.clone()),
            resource_type: Some(key.resource_type),
            ..Self::default()
        }
    }

    /// Returns true when `record` satisfies every set field.
    #[must_use]
    pub fn matches(&self, record: &VersionedResource) -> bool {
        self.resource_id
            .as_ref()
            .map_or(true, |id| *id == record.resource_id)
            && self
                .resource_type
                .map_or(true, |ty| ty == record.resource_type)
            && self
                .namespace
                .as_ref()
                .map_or(true, |ns| *ns == record.namespace)
            && self
                .is_latest
                .map_or(true, |latest| latest == record.version_info.is_latest)
            && self
                .created_before
                .map_or(true, |cutoff| record.version_info.created_at < cutoff)
    }
}

/// Durable metadata store for versioned resource records.
///
/// Implementations must make [`swap_latest`](Self::swap_latest) atomic: it is
/// the single commit point of the latest-flag transition.
#[async_trait]
pub trait ResourceRepository: Send + Sync {
    /// Inserts a new record under its pre-generated id.
    async fn insert(&self, record: &VersionedResource) -> CoreResult<()>;

    /// Fetches a record by id.
    async fn get(&self, id: VersionId) -> CoreResult<Option<VersionedResource>>;

    /// Returns matching records ordered newest first (by version, then creation time).
    async fn find(&self, filter: &ResourceFilter) -> CoreResult<Vec<VersionedResource>>;

    /// Replaces an existing record by id.
    async fn update(&self, record: &VersionedResource) -> CoreResult<()>;

    /// Deletes a record by id.
    async fn delete(&self, id: VersionId) -> CoreResult<()>;

    /// Lists every distinct resource key that has at least one record.
    async fn list_resource_keys(&self) -> CoreResult<Vec<ResourceKey>>;

    /// Returns the record currently flagged latest for `key`.
    async fn latest(&self, key: &ResourceKey) -> CoreResult<Option<VersionedResource>>;

    /// Commits `new_record` as the latest version of `key`.
    ///
    /// Succeeds only if the current latest id equals `expected_latest`
    /// (`None` meaning the key has no latest yet). On success the previous
    /// latest is flipped to `is_latest = false` with `superseded_by` pointing
    /// at the new record, and the new record is inserted, in one atomic step.
    /// Returns `Ok(false)` without changing anything when the expectation fails.
    async fn swap_latest(
        &self,
        key: &ResourceKey,
        expected_latest: Option<VersionId>,
        new_record: &VersionedResource,
    ) -> CoreResult<bool>;
}
