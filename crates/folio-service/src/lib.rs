//! Service layer for Folio.
//! Version chain management, retention and the store facade shared by the
//! HTTP adapter and embedders.

mod chain;
mod config;
mod locks;
pub mod logging;
pub mod metrics;
mod prune;
mod store;

pub use chain::{SaveOutcome, SaveRequest, VersionChainManager};
pub use config::{Config, ConfigError, DatabaseConfig, LogFormat, LoggingConfig, ServerConfig};
pub use locks::{KeyLockGuard, KeyLockTable};
pub use prune::{PruneReport, PrunedVersion};
pub use store::{ResolvedResource, VersionedStore};
