//! In-memory resource repository for tests and embedded use

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use folio_core::{
    CoreError, CoreResult, ResourceFilter, ResourceKey, ResourceRepository, VersionId,
    VersionedResource,
};
use parking_lot::RwLock;

/// Repository keeping every record in a map behind one lock.
///
/// `swap_latest` runs entirely under the write lock, which makes the
/// latest-flag transition atomic.
#[derive(Clone, Default)]
pub struct MemoryResourceRepository {
    records: Arc<RwLock<HashMap<VersionId, VersionedResource>>>,
}

impl MemoryResourceRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records across all keys.
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    fn check_unique_version(
        records: &HashMap<VersionId, VersionedResource>,
        record: &VersionedResource,
    ) -> CoreResult<()> {
        let duplicate = records.values().any(|existing| {
            existing.id != record.id
                && existing.resource_id == record.resource_id
                && existing.resource_type == record.resource_type
                && existing.version_info.version == record.version_info.version
        });
        if duplicate {
            return Err(CoreError::already_exists(
                "version",
                format!("{}@{}", record.key(), record.version_info.version),
            ));
        }
        Ok(())
    }

    fn check_single_latest(
        records: &HashMap<VersionId, VersionedResource>,
        record: &VersionedResource,
    ) -> CoreResult<()> {
        if !record.version_info.is_latest {
            return Ok(());
        }
        let other_latest = records.values().any(|existing| {
            existing.id != record.id
                && existing.version_info.is_latest
                && existing.resource_id == record.resource_id
                && existing.resource_type == record.resource_type
        });
        if other_latest {
            return Err(CoreError::already_exists(
                "latest version",
                record.key().to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl ResourceRepository for MemoryResourceRepository {
    async fn insert(&self, record: &VersionedResource) -> CoreResult<()> {
        record.validate()?;
        let mut records = self.records.write();
        if records.contains_key(&record.id) {
            return Err(CoreError::already_exists("version", record.id.to_string()));
        }
        Self::check_unique_version(&records, record)?;
        Self::check_single_latest(&records, record)?;
        records.insert(record.id, record.clone());
        Ok(())
    }

    async fn get(&self, id: VersionId) -> CoreResult<Option<VersionedResource>> {
        Ok(self.records.read().get(&id).cloned())
    }

    async fn find(&self, filter: &ResourceFilter) -> CoreResult<Vec<VersionedResource>> {
        let mut matches: Vec<VersionedResource> = self
            .records
            .read()
            .values()
            .filter(|record| filter.matches(record))
            .cloned()
            .collect();
        matches.sort_by(VersionedResource::newest_first);
        Ok(matches)
    }

    async fn update(&self, record: &VersionedResource) -> CoreResult<()> {
        record.validate()?;
        let mut records = self.records.write();
        if !records.contains_key(&record.id) {
            return Err(CoreError::not_found("version", record.id.to_string()));
        }
        Self::check_unique_version(&records, record)?;
        Self::check_single_latest(&records, record)?;
        records.insert(record.id, record.clone());
        Ok(())
    }

    async fn delete(&self, id: VersionId) -> CoreResult<()> {
        match self.records.write().remove(&id) {
            Some(_) => Ok(()),
            None => Err(CoreError::not_found("version", id.to_string())),
        }
    }

    async fn list_resource_keys(&self) -> CoreResult<Vec<ResourceKey>> {
        let keys: BTreeSet<ResourceKey> = self
            .records
            .read()
            .values()
            .map(VersionedResource::key)
            .collect();
        Ok(keys.into_iter().collect())
    }

    async fn latest(&self, key: &ResourceKey) -> CoreResult<Option<VersionedResource>> {
        Ok(self
            .records
            .read()
            .values()
            .find(|record| {
                record.version_info.is_latest
                    && record.resource_id == key.resource_id
                    && record.resource_type == key.resource_type
            })
            .cloned())
    }

    async fn swap_latest(
        &self,
        key: &ResourceKey,
        expected_latest: Option<VersionId>,
        new_record: &VersionedResource,
    ) -> CoreResult<bool> {
        new_record.validate()?;
        let mut records = self.records.write();

        let current = records
            .values()
            .find(|record| {
                record.version_info.is_latest
                    && record.resource_id == key.resource_id
                    && record.resource_type == key.resource_type
            })
            .map(|record| record.id);
        if current != expected_latest {
            return Ok(false);
        }
        if records.contains_key(&new_record.id) {
            return Err(CoreError::already_exists(
                "version",
                new_record.id.to_string(),
            ));
        }
        if Self::check_unique_version(&records, new_record).is_err() {
            // Same outcome as losing the race: the caller re-reads and re-derives.
            return Ok(false);
        }

        if let Some(previous) = current.and_then(|id| records.get_mut(&id)) {
            previous.version_info.is_latest = false;
            previous.version_info.superseded_by = Some(new_record.id);
        }
        let mut inserted = new_record.clone();
        inserted.version_info.is_latest = true;
        records.insert(inserted.id, inserted);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use folio_core::{ResourceMetadata, ResourceType, SemanticVersion, VersionInfo};
    use serde_json::json;

    fn record(version: SemanticVersion, supersedes: Option<VersionId>) -> VersionedResource {
        VersionedResource {
            id: VersionId::new(),
            resource_id: "en-core".to_string(),
            resource_type: ResourceType::Corpus,
            namespace: "corpora".to_string(),
            version_info: VersionInfo {
                version,
                data_hash: format!("hash-{version}"),
                is_latest: true,
                supersedes,
                superseded_by: None,
                created_at: Utc::now(),
            },
            content_inline: Some(json!({"words": ["a", "b"]})),
            content_location: None,
            metadata: ResourceMetadata::Corpus {
                language: Some("en".to_string()),
                vocabulary_size: 2,
            },
        }
    }

    #[tokio::test]
    async fn swap_latest_rejects_stale_expectation() {
        let repo = MemoryResourceRepository::new();
        let first = record(SemanticVersion::INITIAL, None);
        let key = first.key();

        assert!(repo.swap_latest(&key, None, &first).await.unwrap());
        // A second writer that still believes there is no latest loses.
        let rival = record(SemanticVersion::new(1, 0, 1), None);
        assert!(!repo.swap_latest(&key, None, &rival).await.unwrap());

        let second = record(SemanticVersion::new(1, 0, 1), Some(first.id));
        assert!(repo.swap_latest(&key, Some(first.id), &second).await.unwrap());

        let previous = repo.get(first.id).await.unwrap().unwrap();
        assert!(!previous.version_info.is_latest);
        assert_eq!(previous.version_info.superseded_by, Some(second.id));
        assert_eq!(repo.latest(&key).await.unwrap().unwrap().id, second.id);
        assert_eq!(repo.len(), 2);
    }

    #[tokio::test]
    async fn find_orders_newest_first() {
        let repo = MemoryResourceRepository::new();
        let mut previous: Option<VersionId> = None;
        for patch in [0, 1, 2, 10] {
            let rec = record(SemanticVersion::new(1, 0, patch), previous);
            assert!(repo
                .swap_latest(&rec.key(), previous, &rec)
                .await
                .unwrap());
            previous = Some(rec.id);
        }

        let key = ResourceKey::new("en-core", ResourceType::Corpus);
        let versions: Vec<String> = repo
            .find(&ResourceFilter::for_key(&key))
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.version_info.version.to_string())
            .collect();
        assert_eq!(versions, vec!["1.0.10", "1.0.2", "1.0.1", "1.0.0"]);
    }

    #[tokio::test]
    async fn insert_rejects_second_latest() {
        let repo = MemoryResourceRepository::new();
        repo.insert(&record(SemanticVersion::INITIAL, None))
            .await
            .unwrap();
        let err = repo
            .insert(&record(SemanticVersion::new(1, 0, 1), None))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::AlreadyExists { .. }));
    }

    #[tokio::test]
    async fn delete_missing_is_not_found() {
        let repo = MemoryResourceRepository::new();
        assert!(repo.delete(VersionId::new()).await.unwrap_err().is_not_found());
    }
}
