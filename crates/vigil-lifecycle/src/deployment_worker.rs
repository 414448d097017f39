// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Background worker feeding new configurations through the builder and
//! the orderer.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{debug, error, info};

use vigil_core::persistence::Persistence;

use crate::builder::DeploymentDetailBuilder;
use crate::error::Result;
use crate::orderer::DeploymentOrderer;

/// Configuration for the deployment worker.
#[derive(Debug, Clone)]
pub struct DeploymentWorkerConfig {
    /// How often to look for new configurations.
    pub poll_interval: Duration,
    /// Configurations handled per step and poll.
    pub batch_size: i64,
}

impl Default for DeploymentWorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            batch_size: 100,
        }
    }
}

/// Builds documents for `awaiting_computation` configurations, then orders
/// `computed` ones.
pub struct DeploymentWorker {
    builder: DeploymentDetailBuilder,
    orderer: DeploymentOrderer,
    config: DeploymentWorkerConfig,
    shutdown: Arc<Notify>,
}

impl DeploymentWorker {
    /// Create a new deployment worker.
    pub fn new(persistence: Arc<dyn Persistence>, config: DeploymentWorkerConfig) -> Self {
        Self {
            builder: DeploymentDetailBuilder::new(persistence.clone()),
            orderer: DeploymentOrderer::new(persistence),
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Get a handle that can be used to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Run the poll loop until shutdown is signalled.
    pub async fn run(&self) {
        info!(
            poll_interval_secs = self.config.poll_interval.as_secs(),
            batch_size = self.config.batch_size,
            "Deployment worker started"
        );

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.notified() => {
                    info!("Deployment worker received shutdown signal");
                    break;
                }

                _ = tokio::time::sleep(self.config.poll_interval) => {
                    if let Err(e) = self.run_once().await {
                        error!(error = %e, "Deployment pass failed");
                    }
                }
            }
        }

        info!("Deployment worker stopped");
    }

    /// One build pass followed by one ordering pass.
    ///
    /// Returns `(computed, ordered)`.
    pub async fn run_once(&self) -> Result<(usize, usize)> {
        let computed = self.builder.run_batch(self.config.batch_size).await?;
        let ordered = self.orderer.run_batch(self.config.batch_size).await?;
        if computed > 0 || ordered > 0 {
            debug!(computed, ordered, "Deployment pass finished");
        }
        Ok((computed, ordered))
    }
}
