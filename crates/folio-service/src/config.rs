//! Process settings for the Folio REST server
//!
//! `folio.toml` (when present) is read first and `FOLIO_*` environment
//! variables are applied on top. Store tuning lives in
//! [`folio_core::FolioConfig`], not here.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// File consulted by [`Config::load`] in the working directory.
pub const CONFIG_FILE: &str = "folio.toml";

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub rest_port: u16,
    /// Deadline for a single HTTP request, in seconds.
    pub timeout_seconds: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            rest_port: 8080,
            timeout_seconds: 30,
        }
    }
}

impl ServerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// sqlx connection URL of the metadata database.
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "sqlite://folio.db".to_string(),
        }
    }
}

/// Output format of the tracing subscriber.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    #[default]
    Pretty,
}

impl FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "json" => Ok(Self::Json),
            "pretty" => Ok(Self::Pretty),
            other => Err(ConfigError::ValidationError(format!(
                "unknown log format `{other}` (expected json or pretty)"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Level applied to the Folio crates unless `RUST_LOG` is set.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

/// Overwrites `target` with the parsed value of `var`, if set.
fn env_override<T>(var: &str, target: &mut T) -> Result<(), ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let Ok(raw) = std::env::var(var) else {
        return Ok(());
    };
    *target = raw
        .parse()
        .map_err(|e| ConfigError::ValidationError(format!("{var}={raw:?}: {e}")))?;
    Ok(())
}

impl Config {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref().to_path_buf();
        let contents = std::fs::read_to_string(&path).map_err(|source| ConfigError::IoError {
            path: path.clone(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::TomlError { path, source })
    }

    /// [`CONFIG_FILE`] or defaults, then `FOLIO_HOST`, `FOLIO_REST_PORT`,
    /// `FOLIO_REQUEST_TIMEOUT_SECS`, `FOLIO_DB_PATH`, `FOLIO_LOG_LEVEL` and
    /// `FOLIO_LOG_FORMAT`.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = if Path::new(CONFIG_FILE).exists() {
            Self::from_file(CONFIG_FILE)?
        } else {
            Self::default()
        };
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// # Errors
    ///
    /// A variable that is set but does not parse is a `ValidationError`.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        env_override("FOLIO_HOST", &mut self.server.host)?;
        env_override("FOLIO_REST_PORT", &mut self.server.rest_port)?;
        env_override("FOLIO_REQUEST_TIMEOUT_SECS", &mut self.server.timeout_seconds)?;
        env_override("FOLIO_DB_PATH", &mut self.database.path)?;
        env_override("FOLIO_LOG_LEVEL", &mut self.logging.level)?;
        env_override("FOLIO_LOG_FORMAT", &mut self.logging.format)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |message: &str| -> Result<(), ConfigError> {
            Err(ConfigError::ValidationError(message.to_string()))
        };

        if self.server.rest_port == 0 {
            return invalid("server.rest_port must be non-zero");
        }
        if self.server.timeout_seconds == 0 {
            return invalid("server.timeout_seconds must be > 0");
        }
        if !self.database.path.starts_with("sqlite:") {
            return invalid("database.path must be a sqlite: URL");
        }
        if !LOG_LEVELS.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "logging.level `{}` is not one of {}",
                self.logging.level,
                LOG_LEVELS.join(", ")
            )));
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {path:?}: {source}")]
    IoError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid TOML in {path:?}: {source}")]
    TomlError {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.rest_port, 8080);
        assert_eq!(config.server.request_timeout(), Duration::from_secs(30));
        assert_eq!(config.database.path, "sqlite://folio.db");
        assert_eq!(config.logging.format, LogFormat::Pretty);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("folio.toml");
        std::fs::write(
            &path,
            r#"
[server]
rest_port = 9000
timeout_seconds = 5

[logging]
format = "json"
"#,
        )
        .unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.server.rest_port, 9000);
        assert_eq!(config.server.request_timeout(), Duration::from_secs(5));
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_invalid_toml_is_reported_with_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "[server\nrest_port = ").unwrap();

        let err = Config::from_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::TomlError { .. }));
    }

    #[test]
    fn test_unknown_log_format_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("folio.toml");
        std::fs::write(&path, "[logging]\nformat = \"xml\"\n").unwrap();
        assert!(matches!(
            Config::from_file(&path),
            Err(ConfigError::TomlError { .. })
        ));

        assert_eq!("json".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_validation() {
        let mut config = Config::default();
        config.server.rest_port = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.server.timeout_seconds = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.database.path = "postgres://localhost/folio".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.logging.level = "loud".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("logging.level `loud`"));
    }

    #[test]
    fn test_env_override_parses_or_fails() {
        let mut port = 8080_u16;
        std::env::set_var("FOLIO_TEST_PORT_OK", "9090");
        env_override("FOLIO_TEST_PORT_OK", &mut port).unwrap();
        assert_eq!(port, 9090);

        std::env::set_var("FOLIO_TEST_PORT_BAD", "ninety");
        let err = env_override("FOLIO_TEST_PORT_BAD", &mut port).unwrap_err();
        assert!(err.to_string().contains("FOLIO_TEST_PORT_BAD"));
        assert_eq!(port, 9090);

        env_override("FOLIO_TEST_PORT_UNSET", &mut port).unwrap();
        assert_eq!(port, 9090);
    }
}
