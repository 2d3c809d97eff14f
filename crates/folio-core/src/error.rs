use std::time::Duration;

use thiserror::Error;

/// Canonical error type for content store operations.
///
/// `NotFound` and `ContentCorrupted` are deliberately separate variants: a
/// record that is absent and a record whose bytes cannot be trusted call for
/// different handling by callers.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Resource, version or object was not found.
    #[error("{entity} `{id}` was not found")]
    NotFound {
        /// Entity type name (e.g. `"resource"`).
        entity: &'static str,
        /// Identifier of the missing entity.
        id: String,
    },

    /// Entity already exists and cannot be created again.
    #[error("{entity} `{id}` already exists")]
    AlreadyExists {
        /// Entity type name (e.g. `"version"`).
        entity: &'static str,
        /// Identifier that conflicts.
        id: String,
    },

    /// Stored content failed checksum, hash or decompression checks.
    #[error("content corrupted at `{locator}`: {reason}")]
    ContentCorrupted {
        /// Locator (or record id for inline content) of the corrupt payload.
        locator: String,
        /// Human-readable description of the failed check.
        reason: String,
    },

    /// Latest-flag transition lost the race more times than the retry budget allows.
    #[error("version conflict on `{key}` after {attempts} attempts")]
    VersionConflict {
        /// Resource key (`resource_type/resource_id`).
        key: String,
        /// Number of attempts made before giving up.
        attempts: u32,
    },

    /// Malformed resource key, type, namespace or version. Rejected before any write.
    #[error("invalid resource: {0}")]
    InvalidResource(String),

    /// Caller-supplied deadline elapsed.
    #[error("{operation} timed out after {elapsed:?}")]
    Timeout {
        /// Operation name (e.g. `"save"`).
        operation: &'static str,
        /// Deadline that elapsed.
        elapsed: Duration,
    },

    /// Unexpected internal error occurred.
    #[error("internal error: {message}")]
    Internal {
        /// Human-readable details for debugging purposes.
        message: String,
    },

    /// I/O error occurred during file operations.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Serialization error occurred.
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// Deserialization error occurred.
    #[error("deserialization error: {0}")]
    DeserializationError(String),

    /// Storage backend error.
    #[error("storage error: {0}")]
    StorageError(String),
}

impl CoreError {
    /// Creates a `NotFound` variant.
    #[must_use]
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Creates an `AlreadyExists` variant.
    #[must_use]
    pub fn already_exists(entity: &'static str, id: impl Into<String>) -> Self {
        Self::AlreadyExists {
            entity,
            id: id.into(),
        }
    }

    /// Creates a `ContentCorrupted` variant.
    #[must_use]
    pub fn corrupted(locator: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ContentCorrupted {
            locator: locator.into(),
            reason: reason.into(),
        }
    }

    /// Creates an `InvalidResource` variant.
    #[must_use]
    pub fn invalid_resource(message: impl Into<String>) -> Self {
        Self::InvalidResource(message.into())
    }

    /// Creates an `Internal` variant.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true for `NotFound`.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns true for errors a caller may reasonably retry.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::VersionConflict { .. } | Self::Timeout { .. } | Self::StorageError(_)
        )
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_eof() || err.is_syntax() {
            Self::DeserializationError(err.to_string())
        } else {
            Self::SerializationError(err.to_string())
        }
    }
}

/// Convenient result alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_and_corrupted_render_differently() {
        let missing = CoreError::not_found("version", "dictionary_entry/run@1.0.0");
        let corrupt = CoreError::corrupted("words/run/1.0.0", "checksum mismatch");

        assert!(missing.is_not_found());
        assert!(!corrupt.is_not_found());
        assert_eq!(
            missing.to_string(),
            "version `dictionary_entry/run@1.0.0` was not found"
        );
        assert!(corrupt.to_string().contains("checksum mismatch"));
    }

    #[test]
    fn retryable_classification() {
        let conflict = CoreError::VersionConflict {
            key: "corpus/en".to_string(),
            attempts: 5,
        };
        assert!(conflict.is_retryable());
        assert!(!CoreError::invalid_resource("empty resource_id").is_retryable());
        assert!(!CoreError::corrupted("x", "y").is_retryable());
    }
}
