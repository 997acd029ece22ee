//! Error types for launcher-core operations.
//!
//! Most failure paths in this crate degrade to an empty result or a logged
//! warning. The variants below cover the few cases a caller has to act on.

use std::path::PathBuf;

/// All errors surfaced by launcher-core.
#[derive(Debug, thiserror::Error)]
pub enum LauncherError {
    // ─────────────────────────────────────────────────────────────────────
    // Session Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("A download session is already running")]
    AlreadyRunning,

    #[error("Repair requested with an empty file list")]
    RepairListEmpty,

    #[error("IPC transport error: {0}")]
    Transport(String),

    #[error("Failed to build verification pool: {0}")]
    ThreadPool(String),

    // ─────────────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Configuration write failed: {path}: {source}")]
    ConfigWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ─────────────────────────────────────────────────────────────────────
    // I/O Errors
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
}

/// Convenience type alias for Results using LauncherError.
pub type Result<T> = std::result::Result<T, LauncherError>;

impl LauncherError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        LauncherError::Io {
            context: context.into(),
            source,
        }
    }

    pub fn json(context: impl Into<String>, source: serde_json::Error) -> Self {
        LauncherError::Json {
            context: context.into(),
            source,
        }
    }
}

impl From<LauncherError> for String {
    fn from(err: LauncherError) -> String {
        err.to_string()
    }
}
