//! Error taxonomy for the alerting core.
//!
//! Only malformed configuration, persistence failures and detected store
//! contention are errors. Routine rejections, duplicates and unmet thresholds
//! are ordinary typed outcomes.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for alerting operations
pub type AlertResult<T> = Result<T, AlertError>;

/// Invalid or missing policy configuration. Fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid config value for `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("config {path} does not set required `{field}`")]
    Missing { path: PathBuf, field: &'static str },

    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid environment override {var}={value}")]
    Env { var: String, value: String },
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// Failure in the dedup store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A panic while holding the store lock left it unusable. Processing
    /// stops rather than risk double-emitting.
    #[error("alert store lock poisoned")]
    LockPoisoned,

    #[error("snapshot io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("snapshot serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("unsupported snapshot schema version {found} (expected {expected})")]
    SchemaVersion { found: u32, expected: u32 },
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Umbrella error for the pipeline facade.
#[derive(Debug, Error)]
pub enum AlertError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),
}
