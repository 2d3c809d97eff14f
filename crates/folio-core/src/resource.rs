//! Versioned resource records and their content descriptors.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CoreError, CoreResult};
use crate::ids::VersionId;
use crate::version::SemanticVersion;

/// Kind of resource stored. Together with `resource_id` forms the resource key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    Corpus,
    DictionaryEntry,
    LiteratureEntry,
    SearchIndex,
    Generic,
}

impl ResourceType {
    /// Returns the canonical snake_case string stored in SQLite and used in URLs.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Corpus => "corpus",
            Self::DictionaryEntry => "dictionary_entry",
            Self::LiteratureEntry => "literature_entry",
            Self::SearchIndex => "search_index",
            Self::Generic => "generic",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "corpus" => Ok(Self::Corpus),
            "dictionary_entry" => Ok(Self::DictionaryEntry),
            "literature_entry" => Ok(Self::LiteratureEntry),
            "search_index" => Ok(Self::SearchIndex),
            "generic" => Ok(Self::Generic),
            other => Err(CoreError::invalid_resource(format!(
                "unknown resource type `{other}`"
            ))),
        }
    }
}

/// Identity of a logical item with version history.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceKey {
    pub resource_id: String,
    pub resource_type: ResourceType,
}

impl ResourceKey {
    /// Maximum accepted length of a resource id, in bytes.
    pub const MAX_ID_LEN: usize = 512;

    #[must_use]
    pub fn new(resource_id: impl Into<String>, resource_type: ResourceType) -> Self {
        Self {
            resource_id: resource_id.into(),
            resource_type,
        }
    }

    /// Validates that the id can be embedded in a content locator.
    ///
    /// # Errors
    ///
    /// Returns `InvalidResource` for empty, oversized, path-like or control-character ids.
    pub fn validate(&self) -> CoreResult<()> {
        let id = &self.resource_id;
        if id.trim().is_empty() {
            return Err(CoreError::invalid_resource("resource_id cannot be empty"));
        }
        if id.len() > Self::MAX_ID_LEN {
            return Err(CoreError::invalid_resource(format!(
                "resource_id exceeds {} bytes",
                Self::MAX_ID_LEN
            )));
        }
        if id.contains('/') || id.contains('\\') || id == "." || id == ".." {
            return Err(CoreError::invalid_resource(format!(
                "resource_id `{id}` must not contain path separators"
            )));
        }
        if id.chars().any(char::is_control) {
            return Err(CoreError::invalid_resource(
                "resource_id must not contain control characters",
            ));
        }
        Ok(())
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.resource_type, self.resource_id)
    }
}

/// Validates a namespace: 1-64 chars of `[a-z0-9_-]`.
///
/// # Errors
///
/// Returns `InvalidResource` when the namespace is empty or contains other characters.
pub fn validate_namespace(namespace: &str) -> CoreResult<()> {
    const MAX_NAMESPACE_LEN: usize = 64;

    if namespace.is_empty() || namespace.len() > MAX_NAMESPACE_LEN {
        return Err(CoreError::invalid_resource(format!(
            "namespace must be 1-{MAX_NAMESPACE_LEN} characters"
        )));
    }
    let valid = namespace
        .bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_' || b == b'-');
    if !valid {
        return Err(CoreError::invalid_resource(format!(
            "namespace `{namespace}` may only contain [a-z0-9_-]"
        )));
    }
    Ok(())
}

/// Kind of search index stored under [`ResourceType::SearchIndex`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexKind {
    Trie,
    Fuzzy,
    Semantic,
}

/// Small type-specific metadata carried next to the content.
///
/// The variant must agree with the record's [`ResourceType`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResourceMetadata {
    Corpus {
        language: Option<String>,
        vocabulary_size: u64,
    },
    DictionaryEntry {
        word: String,
        language: Option<String>,
        provider: String,
    },
    LiteratureEntry {
        title: String,
        author: Option<String>,
        work_id: Option<String>,
    },
    SearchIndex {
        index_kind: IndexKind,
        corpus_id: Option<String>,
        item_count: u64,
    },
    Generic {
        #[serde(default)]
        fields: BTreeMap<String, String>,
    },
}

impl ResourceMetadata {
    /// Resource type this metadata variant belongs to.
    #[must_use]
    pub const fn resource_type(&self) -> ResourceType {
        match self {
            Self::Corpus { .. } => ResourceType::Corpus,
            Self::DictionaryEntry { .. } => ResourceType::DictionaryEntry,
            Self::LiteratureEntry { .. } => ResourceType::LiteratureEntry,
            Self::SearchIndex { .. } => ResourceType::SearchIndex,
            Self::Generic { .. } => ResourceType::Generic,
        }
    }

    /// Empty generic metadata.
    #[must_use]
    pub fn generic() -> Self {
        Self::Generic {
            fields: BTreeMap::new(),
        }
    }
}

/// Version chain bookkeeping for one record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionInfo {
    pub version: SemanticVersion,
    /// SHA-256 hex digest of the canonical serialized content.
    pub data_hash: String,
    pub is_latest: bool,
    pub supersedes: Option<VersionId>,
    pub superseded_by: Option<VersionId>,
    pub created_at: DateTime<Utc>,
}

/// Where the bytes of an external payload live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageType {
    Inline,
    CacheTier,
    ExternalBlob,
}

impl StorageType {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Inline => "inline",
            Self::CacheTier => "cache_tier",
            Self::ExternalBlob => "external_blob",
        }
    }
}

/// Compression applied to stored external bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CompressionType {
    #[default]
    None,
    Gzip,
}

/// Descriptor stored in metadata in place of an externally stored payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentLocation {
    pub storage_type: StorageType,
    /// Locator of the form `<namespace>/<resource_id>/<version>/<record id>`.
    pub path: String,
    pub compression: CompressionType,
    /// Uncompressed serialized size.
    pub size_bytes: u64,
    /// Size of the stored (possibly compressed) bytes.
    pub size_compressed: u64,
    /// SHA-256 hex digest of the stored bytes.
    pub checksum: String,
}

impl ContentLocation {
    /// Locator for the external bytes of one save attempt.
    ///
    /// The record id keeps two attempts at the same version (a retry after a
    /// failure, or a writer that lost the compare-and-swap) from sharing bytes.
    #[must_use]
    pub fn locator(
        namespace: &str,
        resource_id: &str,
        version: &SemanticVersion,
        record_id: VersionId,
    ) -> String {
        format!("{namespace}/{resource_id}/{version}/{record_id}")
    }
}

/// The persisted unit: one version of one resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionedResource {
    pub id: VersionId,
    pub resource_id: String,
    pub resource_type: ResourceType,
    pub namespace: String,
    pub version_info: VersionInfo,
    pub content_inline: Option<Value>,
    pub content_location: Option<ContentLocation>,
    pub metadata: ResourceMetadata,
}

impl VersionedResource {
    #[must_use]
    pub fn key(&self) -> ResourceKey {
        ResourceKey::new(self.resource_id.clone(), self.resource_type)
    }

    #[must_use]
    pub fn version(&self) -> SemanticVersion {
        self.version_info.version
    }

    #[must_use]
    pub fn is_latest(&self) -> bool {
        self.version_info.is_latest
    }

    /// Ordering that puts the newest version first: by version, then creation time.
    #[must_use]
    pub fn newest_first(a: &Self, b: &Self) -> std::cmp::Ordering {
        b.version_info
            .version
            .cmp(&a.version_info.version)
            .then_with(|| b.version_info.created_at.cmp(&a.version_info.created_at))
    }

    /// Checks the structural invariants of a record before it is persisted.
    ///
    /// # Errors
    ///
    /// Returns `InvalidResource` when the key, namespace or metadata variant is
    /// malformed, or when both inline content and a location are present.
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
        if self.content_inline.is_some() && self.content_location.is_some() {
            return Err(CoreError::invalid_resource(
                "content_inline and content_location are mutually exclusive",
            ));
        }
        if let Some(location) = &self.content_location {
            if location.storage_type == StorageType::Inline || location.path.is_empty() {
                return Err(CoreError::invalid_resource(
                    "external content location requires a non-inline storage type and a path",
                ));
            }
        }
        Ok(())
    }
}
