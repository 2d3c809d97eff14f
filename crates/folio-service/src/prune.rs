//! Retention of old versions
//!
//! For each key (versions sorted newest first) the anchors are the latest,
//! the newest `keep_minimum` versions and every version younger than the age
//! cutoff. Retention then follows `supersedes` links: a version that any
//! retained version names as its delta base is retained too, transitively.
//! Everything else is deleted.

use chrono::{DateTime, Duration, Utc};
use folio_core::{ResourceType, SemanticVersion, VersionId, VersionedResource};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// One version removed (or, in a dry run, selected for removal).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrunedVersion {
    pub id: VersionId,
    pub resource_id: String,
    pub resource_type: ResourceType,
    pub namespace: String,
    pub version: SemanticVersion,
    pub created_at: DateTime<Utc>,
}

impl From<&VersionedResource> for PrunedVersion {
    fn from(record: &VersionedResource) -> Self {
        Self {
            id: record.id,
            resource_id: record.resource_id.clone(),
            resource_type: record.resource_type,
            namespace: record.namespace.clone(),
            version: record.version(),
            created_at: record.version_info.created_at,
        }
    }
}

/// Outcome of `prune_old_versions`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PruneReport {
    pub total_deleted: usize,
    pub resources_affected: usize,
    pub dry_run: bool,
    pub deleted: Vec<PrunedVersion>,
}

impl PruneReport {
    pub(crate) fn new(dry_run: bool) -> Self {
        Self {
            dry_run,
            ..Self::default()
        }
    }

    pub(crate) fn record_key(&mut self, deleted: Vec<PrunedVersion>) {
        if deleted.is_empty() {
            return;
        }
        self.resources_affected += 1;
        self.total_deleted += deleted.len();
        self.deleted.extend(deleted);
    }
}

/// Oldest creation time that still counts as recent for `max_age_days`.
pub(crate) fn age_cutoff(now: DateTime<Utc>, max_age_days: u32) -> DateTime<Utc> {
    now.checked_sub_signed(Duration::days(i64::from(max_age_days)))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Versions of a single key that retention would delete.
///
/// `versions` must be sorted newest first.
pub(crate) fn select_for_deletion<'a>(
    versions: &'a [VersionedResource],
    cutoff: DateTime<Utc>,
    keep_minimum: usize,
) -> Vec<&'a VersionedResource> {
    let is_anchor = |index: usize, record: &VersionedResource| {
        index < keep_minimum || record.is_latest() || record.version_info.created_at >= cutoff
    };

    let by_id: HashMap<VersionId, &VersionedResource> =
        versions.iter().map(|record| (record.id, record)).collect();

    let mut pending: Vec<&VersionedResource> = versions
        .iter()
        .enumerate()
        .filter(|(index, record)| is_anchor(*index, record))
        .map(|(_, record)| record)
        .collect();
    let mut retained: HashSet<VersionId> = pending.iter().map(|record| record.id).collect();

    while let Some(record) = pending.pop() {
        let Some(base) = record.version_info.supersedes else {
            continue;
        };
        if !retained.insert(base) {
            continue;
        }
        if let Some(&base_record) = by_id.get(&base) {
            pending.push(base_record);
        }
    }

    versions
        .iter()
        .filter(|record| !retained.contains(&record.id))
        .collect()
}
