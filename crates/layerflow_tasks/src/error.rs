//! Error types for the task layer.

use layerflow_core::{CoreError, ResourceId};
use std::io;
use thiserror::Error;

use crate::services::ServiceStep;

/// Result type for task operations.
pub type TaskResult<T> = Result<T, TaskError>;

/// Result type for catalog client calls.
pub type CatalogResult<T> = Result<T, CatalogError>;

/// Result type for external service calls.
pub type ServiceResult<T> = Result<T, ServiceError>;

/// Result type for lock backend calls.
pub type LockResult<T> = Result<T, LockError>;

/// Errors raised by the remote catalog client.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CatalogError {
    /// The requested entity is not (yet) visible in the catalog.
    #[error("catalog {kind} not found: {name}")]
    NotFound {
        /// Entity kind (resource, layer, style, store).
        kind: &'static str,
        /// Name used for the lookup.
        name: String,
    },

    /// The catalog could not be reached.
    #[error("catalog unavailable: {0}")]
    Unavailable(String),

    /// The entity is still referenced and cannot be deleted.
    #[error("catalog {kind} {name} is in use: {reason}")]
    InUse {
        /// Entity kind.
        kind: &'static str,
        /// Entity name.
        name: String,
        /// What still references it.
        reason: String,
    },

    /// The catalog refused the request.
    #[error("catalog rejected request: {0}")]
    Rejected(String),
}

impl CatalogError {
    /// Creates a not-found error.
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            name: name.into(),
        }
    }

    /// Returns true if the entity does not exist in the catalog.
    pub fn is_not_found(&self) -> bool {
        matches!(self, CatalogError::NotFound { .. })
    }

    /// Returns true if the error can be retried.
    ///
    /// Not-found counts as retryable: catalog provisioning may lag local writes.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CatalogError::NotFound { .. } | CatalogError::Unavailable(_)
        )
    }
}

/// Errors raised by external service collaborators.
#[derive(Error, Debug)]
pub enum ServiceError {
    /// A service call failed.
    #[error("{step} failed: {message}")]
    Failed {
        /// The failing step.
        step: ServiceStep,
        /// Error message.
        message: String,
    },

    /// The caller may not perform the operation.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl ServiceError {
    /// Creates a failed-step error.
    pub fn failed(step: ServiceStep, message: impl Into<String>) -> Self {
        Self::Failed {
            step,
            message: message.into(),
        }
    }

    /// Returns true if the error can be retried.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ServiceError::PermissionDenied(_))
    }
}

/// Errors raised by the lock backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LockError {
    /// The backend could not be reached.
    #[error("lock backend unavailable: {0}")]
    Unavailable(String),
}

/// Errors that can occur while running a task.
#[derive(Error, Debug)]
pub enum TaskError {
    /// Local registry error.
    #[error("registry error: {0}")]
    Core(#[from] CoreError),

    /// Remote catalog error.
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    /// External service error.
    #[error(transparent)]
    Service(#[from] ServiceError),

    /// Lock backend error.
    #[error(transparent)]
    Lock(#[from] LockError),

    /// The resource a task refers to is not visible in the registry yet.
    #[error("resource {0} does not exist yet")]
    MissingEntity(ResourceId),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The task was still queued when its expiration elapsed.
    #[error("task {task} expired before it could run")]
    Expired {
        /// Task name.
        task: &'static str,
    },

    /// The task could not be enqueued.
    #[error("dispatch failed: {0}")]
    Dispatch(String),

    /// The task payload was malformed.
    #[error("invalid task payload: {0}")]
    InvalidPayload(#[from] serde_json::Error),
}

impl TaskError {
    /// Returns true if the executor should retry the task.
    pub fn is_retryable(&self) -> bool {
        match self {
            TaskError::Core(e) => !e.is_configuration(),
            TaskError::Catalog(e) => e.is_retryable(),
            TaskError::Service(e) => e.is_retryable(),
            TaskError::Lock(_) => true,
            TaskError::MissingEntity(_) => true,
            TaskError::Io(_) => true,
            TaskError::Dispatch(_) => true,
            TaskError::Expired { .. } => false,
            TaskError::InvalidPayload(_) => false,
        }
    }

    /// Returns true for errors that need operator attention rather than retries.
    pub fn is_configuration(&self) -> bool {
        matches!(self, TaskError::Core(e) if e.is_configuration())
    }
}
