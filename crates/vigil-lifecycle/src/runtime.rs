// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embeddable runtime for vigil-lifecycle.
//!
//! [`LifecycleRuntime`] spawns the deployment worker and the lifecycle
//! manager inside an existing tokio application.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use vigil_core::persistence::PostgresPersistence;
//! use vigil_lifecycle::runtime::LifecycleRuntime;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let pool = sqlx::PgPool::connect("postgres://...").await?;
//!     let persistence = Arc::new(PostgresPersistence::new(pool));
//!
//!     let runtime = LifecycleRuntime::builder()
//!         .persistence(persistence)
//!         .build()?
//!         .start()
//!         .await?;
//!
//!     // ... run your application ...
//!
//!     runtime.shutdown().await?;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{error, info};

use vigil_core::persistence::Persistence;

use crate::config::LifecycleConfig;
use crate::deployment_worker::{DeploymentWorker, DeploymentWorkerConfig};
use crate::feedback::Feedback;
use crate::lifecycle_manager::LifecycleManager;
use crate::notifier::{HttpNotifier, Notifier};

/// Builder for creating a [`LifecycleRuntime`].
#[derive(Default)]
pub struct LifecycleRuntimeBuilder {
    persistence: Option<Arc<dyn Persistence>>,
    notifier: Option<Arc<dyn Notifier>>,
    config: LifecycleConfig,
}

impl LifecycleRuntimeBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the persistence layer (required).
    pub fn persistence(mut self, persistence: Arc<dyn Persistence>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    /// Set the notifier used for pokes.
    ///
    /// Default: [`HttpNotifier`] with the configured poke timeout
    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Set intervals, thresholds and poke settings.
    ///
    /// Default: [`LifecycleConfig::default()`]
    pub fn config(mut self, config: LifecycleConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the runtime configuration.
    ///
    /// Returns an error if required fields are missing.
    pub fn build(self) -> Result<LifecycleRuntimeConfig> {
        let persistence = self
            .persistence
            .ok_or_else(|| anyhow::anyhow!("persistence is required"))?;
        let notifier = self
            .notifier
            .unwrap_or_else(|| Arc::new(HttpNotifier::new(self.config.poke_timeout)));

        Ok(LifecycleRuntimeConfig {
            persistence,
            notifier,
            config: self.config,
        })
    }
}

/// Configuration for a [`LifecycleRuntime`].
pub struct LifecycleRuntimeConfig {
    persistence: Arc<dyn Persistence>,
    notifier: Arc<dyn Notifier>,
    config: LifecycleConfig,
}

impl LifecycleRuntimeConfig {
    /// Start the runtime, spawning the background workers.
    pub async fn start(self) -> Result<LifecycleRuntime> {
        let deployment_worker = DeploymentWorker::new(
            self.persistence.clone(),
            DeploymentWorkerConfig {
                poll_interval: self.config.deployment_poll_interval,
                batch_size: self.config.deployment_batch_size,
            },
        );
        let deployment_shutdown = deployment_worker.shutdown_handle();
        let deployment_handle = tokio::spawn(async move {
            deployment_worker.run().await;
        });

        let manager = LifecycleManager::new(
            self.persistence.clone(),
            self.notifier,
            self.config.clone(),
        );
        let manager_shutdown = manager.shutdown_handle();
        let manager_handle = tokio::spawn(async move {
            manager.run().await;
        });

        info!(
            tick_secs = self.config.tick_interval.as_secs(),
            deployment_poll_secs = self.config.deployment_poll_interval.as_secs(),
            "LifecycleRuntime started"
        );

        Ok(LifecycleRuntime {
            deployment_handle,
            manager_handle,
            deployment_shutdown,
            manager_shutdown,
            feedback: Arc::new(Feedback::new(self.persistence)),
        })
    }
}

/// A running lifecycle side that can be embedded in an application.
///
/// The runtime manages:
/// - Deployment worker building and ordering new configurations
/// - Lifecycle manager unblocking, cleaning up and poking
///
/// Call [`shutdown`](Self::shutdown) for graceful termination.
pub struct LifecycleRuntime {
    deployment_handle: JoinHandle<()>,
    manager_handle: JoinHandle<()>,
    deployment_shutdown: Arc<Notify>,
    manager_shutdown: Arc<Notify>,
    feedback: Arc<Feedback>,
}

impl LifecycleRuntime {
    /// Create a new builder for configuring the runtime.
    pub fn builder() -> LifecycleRuntimeBuilder {
        LifecycleRuntimeBuilder::new()
    }

    /// Handler for monitoring system status reports.
    pub fn feedback(&self) -> &Arc<Feedback> {
        &self.feedback
    }

    /// Gracefully shut down the runtime.
    pub async fn shutdown(self) -> Result<()> {
        info!("LifecycleRuntime shutting down...");

        self.deployment_shutdown.notify_one();
        self.manager_shutdown.notify_one();

        if let Err(e) = self.deployment_handle.await {
            error!("Deployment worker task panicked: {}", e);
        }
        if let Err(e) = self.manager_handle.await {
            error!("Lifecycle manager task panicked: {}", e);
        }

        info!("LifecycleRuntime shutdown complete");
        Ok(())
    }

    /// Check if the runtime is still running.
    pub fn is_running(&self) -> bool {
        !self.deployment_handle.is_finished() && !self.manager_handle.is_finished()
    }
}
