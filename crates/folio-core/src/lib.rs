//! Core domain types and traits for the Folio versioned content store.

pub mod config;
pub mod error;
pub mod ids;
pub mod metrics;
pub mod resource;
pub mod traits;
pub mod version;

pub use config::{
    CacheConfig, CompressionConfig, ExternalTarget, FolioConfig, RetentionConfig, RetryConfig,
    StorageConfig, VersioningConfig,
};
pub use error::{CoreError, CoreResult};
pub use ids::VersionId;
pub use resource::{
    CompressionType, ContentLocation, IndexKind, ResourceKey, ResourceMetadata, ResourceType,
    StorageType, VersionInfo, VersionedResource,
};
pub use traits::{ResourceFilter, ResourceRepository};
pub use version::SemanticVersion;
