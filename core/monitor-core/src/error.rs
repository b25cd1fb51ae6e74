//! Error types for monitor-core operations.

use std::path::PathBuf;

/// All errors that can occur in monitor-core operations.
#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    // ─────────────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Home directory not found")]
    HomeDirNotFound,

    #[error("Configuration file malformed: {path}: {details}")]
    ConfigMalformed { path: PathBuf, details: String },

    // ─────────────────────────────────────────────────────────────────────
    // Persistence Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {context}: {source}")]
    Json {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    // ─────────────────────────────────────────────────────────────────────
    // Write Queue Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Write queue is closed")]
    WriteQueueClosed,

    #[error("Queued write rejected: {0}")]
    WriteRejected(String),
}

impl MonitorError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        MonitorError::Io {
            context: context.into(),
            source,
        }
    }

    pub fn json(context: impl Into<String>, source: serde_json::Error) -> Self {
        MonitorError::Json {
            context: context.into(),
            source,
        }
    }
}

/// Convenience type alias for Results using MonitorError.
pub type Result<T> = std::result::Result<T, MonitorError>;

impl From<MonitorError> for String {
    fn from(err: MonitorError) -> String {
        err.to_string()
    }
}
