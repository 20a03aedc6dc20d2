//! Artifact store error type.

use thiserror::Error;

/// Errors surfaced by [`crate::ArtifactStore`] operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Worker id already exists; the store never silently overwrites.
    #[error("conflict: worker '{0}' already exists")]
    Conflict(String),

    /// Worker directory or file is absent.
    #[error("not found: {0}")]
    NotFound(String),

    /// Stored owner differs from the requesting owner.
    #[error("permission denied: worker '{0}' belongs to another owner")]
    PermissionDenied(String),

    /// Relative path escapes the worker directory after normalisation.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// Regex or glob supplied to search could not be compiled.
    #[error("invalid pattern: {0}")]
    InvalidPattern(String),

    /// Underlying filesystem or serialisation failure.
    #[error("storage: {0}")]
    Storage(String),
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Storage(e.to_string())
    }
}
