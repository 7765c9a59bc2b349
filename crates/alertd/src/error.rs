//! Daemon error taxonomy.

use std::path::PathBuf;

use alerting::{ConfigError, StoreError};
use thiserror::Error;

/// Errors raised by the polling daemon. Core outcomes (rejections,
/// suppressions) never appear here.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("event source {path}: {source}")]
    Source {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("output file {path}: {source}")]
    Output {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("sink `{sink}` failed: {reason}")]
    Sink { sink: &'static str, reason: String },

    #[error("webhook request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DaemonError {
    pub(crate) fn source_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Source {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn output_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Output {
            path: path.into(),
            source,
        }
    }
}

/// Result type alias for daemon operations
pub type DaemonResult<T> = Result<T, DaemonError>;
