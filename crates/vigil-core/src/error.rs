// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for vigil-core.
//!
//! Every job outcome is reported through [`CoreError`]. The variants follow
//! the failure classes of job processing: validation happens before a job
//! exists, not-found and constraint errors fail a single job, persistence
//! errors roll back database and tree together, and integrity errors break
//! the whole repository.

use thiserror::Error;
use uuid::Uuid;

use crate::tree::TreeError;

/// Result type using CoreError
pub type Result<T> = std::result::Result<T, CoreError>;

/// Core errors that can occur while routing and processing jobs.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum CoreError {
    /// Request shape is invalid; no job was created.
    #[error("Validation error for '{field}': {message}")]
    Validation {
        /// The field that failed validation.
        field: String,
        /// The validation error message.
        message: String,
    },

    /// A referenced object, parent or configuration does not exist.
    #[error("{entity} '{id}' not found")]
    NotFound {
        /// Kind of entity that was looked up.
        entity: String,
        /// Identifier that was looked up.
        id: String,
    },

    /// The tree rejected the mutation.
    #[error("Constraint violation: {message}")]
    Constraint {
        /// Tree error or Error-queue detail.
        message: String,
    },

    /// Database operation failed.
    #[error("Database error during '{operation}': {details}")]
    Persistence {
        /// The operation that failed.
        operation: String,
        /// Error details.
        details: String,
    },

    /// Persisted state is inconsistent with the tree.
    #[error("Integrity error: {reason}")]
    Integrity {
        /// What was found to be inconsistent.
        reason: String,
    },

    /// The repository is broken and refuses jobs until rebuilt.
    #[error("Repository '{repository_id}' is broken")]
    RepositoryBroken {
        /// The broken repository.
        repository_id: Uuid,
    },

    /// The repository worker was stopped.
    #[error("Repository worker '{repository_id}' is stopped")]
    WorkerStopped {
        /// The stopped repository.
        repository_id: Uuid,
    },

    /// No worker is registered for the repository.
    #[error("No worker for repository '{repository_id}'")]
    WorkerUnavailable {
        /// The repository that has no worker.
        repository_id: Uuid,
    },
}

impl CoreError {
    /// Get the error code string for this error type.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Constraint { .. } => "CONSTRAINT_ERROR",
            Self::Persistence { .. } => "DATABASE_ERROR",
            Self::Integrity { .. } => "INTEGRITY_ERROR",
            Self::RepositoryBroken { .. } => "REPOSITORY_BROKEN",
            Self::WorkerStopped { .. } => "WORKER_STOPPED",
            Self::WorkerUnavailable { .. } => "WORKER_UNAVAILABLE",
        }
    }

    /// Conditions an API layer reports as "service unavailable".
    pub fn is_service_unavailable(&self) -> bool {
        matches!(
            self,
            Self::RepositoryBroken { .. } | Self::WorkerStopped { .. } | Self::WorkerUnavailable { .. }
        )
    }

    /// Shorthand for a [`CoreError::NotFound`].
    pub fn not_found(entity: impl Into<String>, id: impl ToString) -> Self {
        Self::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    /// Shorthand for a [`CoreError::Persistence`] with an operation name.
    pub fn persistence(operation: impl Into<String>, details: impl ToString) -> Self {
        Self::Persistence {
            operation: operation.into(),
            details: details.to_string(),
        }
    }
}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        CoreError::Persistence {
            operation: "query".to_string(),
            details: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::Persistence {
            operation: "json".to_string(),
            details: err.to_string(),
        }
    }
}

impl From<TreeError> for CoreError {
    fn from(err: TreeError) -> Self {
        match err {
            TreeError::NotFound(r) => CoreError::not_found(r.object_type.as_str(), r.object_id),
            TreeError::ParentNotFound(r) => {
                CoreError::not_found(format!("parent {}", r.object_type), r.object_id)
            }
            TreeError::PropertyNotFound(id) => CoreError::not_found("property", id),
            TreeError::CheckConfigNotFound(id) => CoreError::not_found("check_config", id),
            TreeError::ProtocolViolation(_) | TreeError::QueueOverflow { .. } => {
                CoreError::Integrity {
                    reason: err.to_string(),
                }
            }
            other => CoreError::Constraint {
                message: other.to_string(),
            },
        }
    }
}
