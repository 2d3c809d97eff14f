//! Configuration management for Folio
//!
//! Store tuning is layered from several sources:
//! - Hardcoded defaults
//! - A config file (TOML, YAML or JSON, detected by extension)
//! - Environment variable overrides
//!
//! and validated before use.

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure for the versioned store
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct FolioConfig {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub versioning: VersioningConfig,

    #[serde(default)]
    pub retention: RetentionConfig,
}

impl FolioConfig {
    /// Load configuration from multiple sources with precedence:
    /// 1. Environment variables (highest priority)
    /// 2. Config file specified by FOLIO_CONFIG env var
    /// 3. ./config/folio.{toml,yaml,json}
    /// 4. Hardcoded defaults (lowest priority)
    pub fn load() -> Result<Self, ConfigError> {
        let mut builder = Self::set_defaults(Config::builder())?;

        if let Ok(config_path) = std::env::var("FOLIO_CONFIG") {
            builder = builder.add_source(File::with_name(&config_path).required(false));
        }

        builder = builder
            .add_source(File::with_name("./config/folio").required(false))
            // Example: FOLIO__CACHE__L1_CAPACITY=4096
            .add_source(
                Environment::with_prefix("FOLIO")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            );

        let config: FolioConfig = builder.build()?.try_deserialize()?;
        config.validate()?;

        Ok(config)
    }

    /// Set default values for all configuration options
    fn set_defaults(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<config::ConfigBuilder<config::builder::DefaultState>, ConfigError> {
        builder
            // Storage
            .set_default("storage.data_dir", "./data")?
            .set_default("storage.inline_threshold", 1_000_000_i64)?
            .set_default("storage.external_target", "blob_store")?
            .set_default("storage.compression.enabled", true)?
            .set_default("storage.compression.level", 6)?
            .set_default("storage.compression.min_savings_bytes", 64)?
            // Cache
            .set_default("cache.l1_capacity", 1024)?
            .set_default("cache.l2_max_age_secs", 7 * 24 * 3600)?
            .set_default("cache.l2_max_bytes", 1_073_741_824_i64)?
            // Versioning
            .set_default("versioning.retry.max_attempts", 5)?
            .set_default("versioning.retry.initial_backoff_ms", 10)?
            .set_default("versioning.retry.max_backoff_ms", 200)?
            .set_default("versioning.retry.backoff_multiplier", 2.0)?
            .set_default("versioning.save_timeout_ms", 30_000)?
            // Retention
            .set_default("retention.max_age_days", 30)?
            .set_default("retention.keep_minimum", 3)?
            .set_default("retention.prune_timeout_ms", 600_000)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.storage.inline_threshold == 0 {
            return Err(ConfigError::Message(
                "storage.inline_threshold must be > 0".to_string(),
            ));
        }

        if self.storage.compression.level > 9 {
            return Err(ConfigError::Message(
                "storage.compression.level must be between 0 and 9".to_string(),
            ));
        }

        if self.cache.l1_capacity == 0 {
            return Err(ConfigError::Message(
                "cache.l1_capacity must be > 0".to_string(),
            ));
        }

        if self.versioning.retry.max_attempts == 0 {
            return Err(ConfigError::Message(
                "versioning.retry.max_attempts must be > 0".to_string(),
            ));
        }

        if self.versioning.save_timeout_ms == 0 || self.retention.prune_timeout_ms == 0 {
            return Err(ConfigError::Message(
                "versioning.save_timeout_ms and retention.prune_timeout_ms must be > 0".to_string(),
            ));
        }

        if self.versioning.retry.max_backoff_ms < self.versioning.retry.initial_backoff_ms {
            return Err(ConfigError::Message(
                "versioning.retry.max_backoff_ms must be >= initial_backoff_ms".to_string(),
            ));
        }

        Ok(())
    }

    /// Load configuration from a specific file path
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config: FolioConfig = Self::set_defaults(Config::builder())?
            .add_source(File::from(path.as_ref()))
            .build()?
            .try_deserialize()?;
        config.validate()?;

        Ok(config)
    }

    /// Configuration rooted at `data_dir`, otherwise defaults. Used by tests and embedders.
    #[must_use]
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        let mut config = Self::default();
        config.storage.data_dir = data_dir.into();
        config
    }
}

/// Where external (above-threshold) payloads are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExternalTarget {
    /// Object store under `data_dir/blobs`.
    #[default]
    BlobStore,
    /// The tiered cache's persistent L2 tier.
    CacheTier,
}

/// Content placement configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Root directory for blobs and the L2 cache
    pub data_dir: PathBuf,

    /// Serialized payloads of this many bytes or more are stored externally
    pub inline_threshold: u64,

    /// Target for external payloads
    #[serde(default)]
    pub external_target: ExternalTarget,

    #[serde(default)]
    pub compression: CompressionConfig,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            inline_threshold: 1_000_000,
            external_target: ExternalTarget::BlobStore,
            compression: CompressionConfig::default(),
        }
    }
}

impl StorageConfig {
    /// Directory backing the blob store
    pub fn blob_dir(&self) -> PathBuf {
        self.data_dir.join("blobs")
    }

    /// Directory backing the L2 cache tier
    pub fn cache_dir(&self) -> PathBuf {
        self.data_dir.join("cache")
    }
}

/// Compression configuration for external payloads
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct CompressionConfig {
    /// Enable gzip for external payloads
    pub enabled: bool,

    /// Gzip level (0-9, default: 6)
    pub level: u32,

    /// Compressed form is kept only when it saves at least this many bytes
    pub min_savings_bytes: u64,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            level: 6,
            min_savings_bytes: 64,
        }
    }
}

/// Tiered cache configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    /// Maximum L1 entries per namespace
    pub l1_capacity: usize,

    /// Default TTL for L1 entries (none: entries live until evicted)
    #[serde(default)]
    pub l1_ttl_secs: Option<u64>,

    /// L2 entries older than this are removed by the L2 eviction pass
    pub l2_max_age_secs: u64,

    /// Per-namespace L2 byte budget
    pub l2_max_bytes: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            l1_capacity: 1024,
            l1_ttl_secs: None,
            l2_max_age_secs: 7 * 24 * 3600,
            l2_max_bytes: 1_073_741_824,
        }
    }
}

impl CacheConfig {
    pub fn l1_ttl(&self) -> Option<Duration> {
        self.l1_ttl_secs.map(Duration::from_secs)
    }

    pub fn l2_max_age(&self) -> Duration {
        Duration::from_secs(self.l2_max_age_secs)
    }
}

/// Version chain configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VersioningConfig {
    /// Retry policy for lost latest-flag swaps
    #[serde(default)]
    pub retry: RetryConfig,

    /// Deadline applied by `save` when the caller gives none
    pub save_timeout_ms: u64,
}

impl Default for VersioningConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            save_timeout_ms: 30_000,
        }
    }
}

impl VersioningConfig {
    pub fn save_timeout(&self) -> Duration {
        Duration::from_millis(self.save_timeout_ms)
    }
}

/// Retry configuration for operations
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryConfig {
    /// Maximum number of attempts
    pub max_attempts: u32,

    /// Initial backoff delay in milliseconds
    pub initial_backoff_ms: u64,

    /// Maximum backoff delay in milliseconds
    pub max_backoff_ms: u64,

    /// Backoff multiplier for exponential backoff
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 10,
            max_backoff_ms: 200,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Calculate backoff delay for a given retry attempt
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let delay_ms = (self.initial_backoff_ms as f64
            * self.backoff_multiplier.powi(attempt as i32))
        .min(self.max_backoff_ms as f64);
        Duration::from_millis(delay_ms as u64)
    }
}

/// Default retention applied by scheduled pruning
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetentionConfig {
    /// Versions younger than this are always retained
    pub max_age_days: u32,

    /// Newest versions per resource retained regardless of age
    pub keep_minimum: usize,

    /// Deadline for one prune pass over every resource key
    #[serde(default = "default_prune_timeout_ms")]
    pub prune_timeout_ms: u64,
}

fn default_prune_timeout_ms() -> u64 {
    600_000
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            max_age_days: 30,
            keep_minimum: 3,
            prune_timeout_ms: default_prune_timeout_ms(),
        }
    }
}

impl RetentionConfig {
    pub fn prune_timeout(&self) -> Duration {
        Duration::from_millis(self.prune_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_configuration() {
        let config = FolioConfig::default();

        assert_eq!(config.storage.inline_threshold, 1_000_000);
        assert_eq!(config.storage.external_target, ExternalTarget::BlobStore);
        assert_eq!(config.storage.compression.min_savings_bytes, 64);
        assert_eq!(config.cache.l1_capacity, 1024);
        assert!(config.cache.l1_ttl().is_none());
        assert_eq!(config.versioning.retry.max_attempts, 5);
        assert_eq!(config.retention.keep_minimum, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_deadlines_are_rejected() {
        let mut config = FolioConfig::default();
        config.retention.prune_timeout_ms = 0;
        assert!(config.validate().is_err());

        let mut config = FolioConfig::default();
        config.versioning.save_timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_retry_config_backoff() {
        let retry = RetryConfig::default();

        assert_eq!(retry.backoff_for_attempt(0).as_millis(), 10);
        assert_eq!(retry.backoff_for_attempt(1).as_millis(), 20);
        assert_eq!(retry.backoff_for_attempt(2).as_millis(), 40);

        // Max backoff cap
        assert_eq!(retry.backoff_for_attempt(10).as_millis(), 200);
    }

    #[test]
    fn test_validation_rejects_zero_capacity() {
        let mut config = FolioConfig::default();
        config.cache.l1_capacity = 0;
        assert!(config.validate().is_err());

        let mut config = FolioConfig::default();
        config.storage.inline_threshold = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("folio.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "[storage]\ninline_threshold = 2048\nexternal_target = \"cache_tier\"\n\n[cache]\nl1_capacity = 8\nl1_ttl_secs = 60"
        )
        .unwrap();

        let config = FolioConfig::from_file(&path).unwrap();
        assert_eq!(config.storage.inline_threshold, 2048);
        assert_eq!(config.storage.external_target, ExternalTarget::CacheTier);
        assert_eq!(config.cache.l1_capacity, 8);
        assert_eq!(config.cache.l1_ttl(), Some(Duration::from_secs(60)));
        // Untouched sections keep their defaults
        assert_eq!(config.retention.max_age_days, 30);
        assert_eq!(config.retention.prune_timeout(), Duration::from_secs(600));
    }

    #[test]
    fn test_data_dir_layout() {
        let config = FolioConfig::with_data_dir("/var/lib/folio");
        assert_eq!(
            config.storage.blob_dir(),
            PathBuf::from("/var/lib/folio/blobs")
        );
        assert_eq!(
            config.storage.cache_dir(),
            PathBuf::from("/var/lib/folio/cache")
        );
    }
}
