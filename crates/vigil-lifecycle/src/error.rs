// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for vigil-lifecycle.

use thiserror::Error;
use uuid::Uuid;

/// Lifecycle errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Configuration loading failed.
    #[error("Configuration error: {0}")]
    Config(#[from] vigil_core::config::ConfigError),

    /// Core persistence operation failed.
    #[error("Core error: {0}")]
    Core(#[from] vigil_core::CoreError),

    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Notification delivery failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// A monitoring system answered a notification with a failure status.
    #[error("Monitoring system '{system}' rejected notification with status {status}")]
    Rejected {
        /// Monitoring system name.
        system: String,
        /// HTTP status code.
        status: u16,
    },

    /// Something a deployment document needs does not exist.
    #[error("{entity} '{id}' missing for configuration {configuration_id}")]
    Incomplete {
        /// Configuration being built.
        configuration_id: Uuid,
        /// Kind of record that was looked up.
        entity: &'static str,
        /// Identifier that was looked up.
        id: String,
    },

    /// Configuration not found.
    #[error("Configuration not found: {0}")]
    ConfigurationNotFound(Uuid),

    /// A feedback transition is not allowed from the current status.
    #[error("Configuration {configuration_id} cannot move from {from} to {to}")]
    InvalidTransition {
        /// Configuration id.
        configuration_id: Uuid,
        /// Current status.
        from: vigil_core::model::ConfigurationStatus,
        /// Requested status.
        to: vigil_core::model::ConfigurationStatus,
    },

    /// Other error.
    #[error("{0}")]
    Other(String),
}

/// Result type using lifecycle Error.
pub type Result<T> = std::result::Result<T, Error>;
