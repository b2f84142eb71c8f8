//! Error types for STRATA operations

use thiserror::Error;

/// Raw backend errors from the relational or key-value store.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Connection to {backend} failed: {reason}")]
    Connection { backend: String, reason: String },

    #[error("Query against {backend} failed: {reason}")]
    Query { backend: String, reason: String },

    #[error("Invalid identifier: {name}")]
    InvalidIdentifier { name: String },

    #[error("In-process guard poisoned: {guard}")]
    Poisoned { guard: String },
}

/// Distributed lock errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LockError {
    #[error("Lock acquisition failed for {key}: {reason}")]
    AcquireFailed { key: String, reason: String },

    #[error("Lock release failed for {key}: {reason}")]
    ReleaseFailed { key: String, reason: String },
}

/// Table provisioning errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MigrationError {
    #[error("Existence check failed for table {table}: {reason}")]
    ExistenceCheck { table: String, reason: String },

    #[error("Create failed for table {table}: {reason}")]
    CreateFailed { table: String, reason: String },
}

/// Query cache errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Serialization failed: {reason}")]
    Serialize { reason: String },

    #[error("Deserialization failed for {key}: {reason}")]
    Deserialize { key: String, reason: String },

    #[error("Cache backend {operation} failed: {reason}")]
    Backend { operation: String, reason: String },

    #[error("Invalid cache key: {reason}")]
    InvalidKey { reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all STRATA errors.
#[derive(Debug, Clone, Error)]
pub enum StrataError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Unsupported sharding pattern: {pattern:?}")]
    UnsupportedShardingPattern { pattern: String },

    #[error("Lock error: {0}")]
    Lock(#[from] LockError),

    #[error("Migration error: {0}")]
    Migration(#[from] MigrationError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl StrataError {
    /// Shorthand for a missing required configuration field.
    pub fn missing(field: impl Into<String>) -> Self {
        StrataError::Config(ConfigError::MissingRequired {
            field: field.into(),
        })
    }

    /// Shorthand for an invalid configuration value.
    pub fn invalid(
        field: impl Into<String>,
        value: impl ToString,
        reason: impl Into<String>,
    ) -> Self {
        StrataError::Config(ConfigError::InvalidValue {
            field: field.into(),
            value: value.to_string(),
            reason: reason.into(),
        })
    }

    /// Whether this error came from setup rather than from a backend at runtime.
    pub fn is_fatal_setup(&self) -> bool {
        matches!(
            self,
            StrataError::Config(_) | StrataError::UnsupportedShardingPattern { .. }
        )
    }
}

/// Result type alias for STRATA operations.
pub type StrataResult<T> = Result<T, StrataError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_display_query() {
        let err = StoreError::Query {
            backend: "postgres".to_string(),
            reason: "relation does not exist".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("postgres"));
        assert!(msg.contains("relation does not exist"));
    }

    #[test]
    fn test_unsupported_pattern_display() {
        let err = StrataError::UnsupportedShardingPattern {
            pattern: "%Y-%W".to_string(),
        };
        assert!(format!("{}", err).contains("%Y-%W"));
    }

    #[test]
    fn test_migration_error_converts() {
        let err: StrataError = MigrationError::CreateFailed {
            table: "events_20240305".to_string(),
            reason: "permission denied".to_string(),
        }
        .into();
        assert!(matches!(err, StrataError::Migration(_)));
        assert!(format!("{}", err).contains("events_20240305"));
    }

    #[test]
    fn test_config_shorthands() {
        let err = StrataError::missing("name");
        assert!(err.is_fatal_setup());
        assert!(format!("{}", err).contains("name"));

        let err = StrataError::invalid("scan_batch_size", 0, "must be positive");
        let msg = format!("{}", err);
        assert!(msg.contains("scan_batch_size"));
        assert!(msg.contains("must be positive"));
    }

    #[test]
    fn test_runtime_errors_are_not_setup_errors() {
        let err: StrataError = LockError::AcquireFailed {
            key: "strata:timesharding:events".to_string(),
            reason: "connection refused".to_string(),
        }
        .into();
        assert!(!err.is_fatal_setup());

        let err: StrataError = CacheError::Backend {
            operation: "scan".to_string(),
            reason: "timeout".to_string(),
        }
        .into();
        assert!(!err.is_fatal_setup());
    }
}
