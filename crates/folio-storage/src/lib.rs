//! Content storage layer for Folio
//!
//! - `codec`: canonical serialization, hashing and gzip compression
//! - `location`: inline vs external placement and verified resolution
//! - `cache`: namespace-scoped two-tier cache (in-memory LRU over disk)
//! - `object_store`: flat key/bytes backends (local filesystem, in-memory)

pub mod cache;
pub mod codec;
pub mod location;
pub mod object_store;

pub use cache::{CacheStats, ClearReport, DiskUsage, L2EvictionReport, ReloadReport, TieredCache};
pub use codec::ContentCodec;
pub use location::{ContentResolver, OrphanGuard, Placement};
pub use object_store::{LocalObjectStore, MemoryObjectStore, ObjectMetadata, ObjectStore};
