//! Error types for LayerFlow core.

use std::io;
use thiserror::Error;

use crate::types::{ImportId, ResourceId};

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors raised by the registry model and its helpers.
#[derive(Debug, Error)]
pub enum CoreError {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Resource not found in the registry.
    #[error("resource not found: {0}")]
    ResourceNotFound(ResourceId),

    /// Upload record not found in the registry.
    #[error("upload record not found: {0}")]
    UploadNotFound(ImportId),

    /// The registry backend failed to persist or read a record.
    #[error("registry storage error: {message}")]
    Storage {
        /// Description of the failure.
        message: String,
    },

    /// A resource has no resolvable spatial reference and no bounding polygon
    /// to guess one from.
    #[error("invalid projection: layer {name} is missing CRS")]
    InvalidProjection {
        /// Resource name.
        name: String,
    },

    /// Settings could not be parsed.
    #[error("invalid settings: {0}")]
    Settings(#[from] serde_json::Error),
}

impl CoreError {
    /// Creates a storage error.
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Returns true if the error refers to a record that does not exist (yet).
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            CoreError::ResourceNotFound(_) | CoreError::UploadNotFound(_)
        )
    }

    /// Returns true if the error is a configuration problem that retrying cannot fix.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            CoreError::InvalidProjection { .. } | CoreError::Settings(_)
        )
    }
}
