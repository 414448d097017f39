// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Notifications ("pokes") telling monitoring systems a deployment is ready.
//!
//! Delivery is at least once; receivers deduplicate by check instance id.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Notification body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Poke {
    /// Check instance id.
    pub uuid: Uuid,
    /// Callback path the monitoring system fetches the deployment from.
    pub path: String,
}

/// Where a monitoring system receives notifications.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NotifyTarget {
    /// Monitoring system name.
    pub monitoring_system: String,
    /// Callback URI.
    pub callback_uri: String,
}

/// Delivers pokes.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver one poke. `Ok` means the receiver acknowledged it.
    async fn notify(&self, target: &NotifyTarget, poke: &Poke) -> Result<()>;
}

/// Posts pokes as JSON over HTTP.
pub struct HttpNotifier {
    client: reqwest::Client,
}

impl HttpNotifier {
    /// Create a notifier with a per-request timeout.
    pub fn new(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client }
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn notify(&self, target: &NotifyTarget, poke: &Poke) -> Result<()> {
        let response = self
            .client
            .post(&target.callback_uri)
            .json(poke)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Error::Rejected {
                system: target.monitoring_system.clone(),
                status: response.status().as_u16(),
            });
        }
        debug!(
            monitoring_system = %target.monitoring_system,
            instance_id = %poke.uuid,
            "Poke delivered"
        );
        Ok(())
    }
}

/// In-process notifier recording every delivery.
#[derive(Clone, Default)]
pub struct RecordingNotifier {
    delivered: Arc<Mutex<Vec<(String, Poke)>>>,
    failing: Arc<Mutex<HashSet<String>>>,
}

impl RecordingNotifier {
    /// Create a notifier that accepts every poke.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject pokes to `monitoring_system` until [`recover`](Self::recover).
    pub async fn fail_system(&self, monitoring_system: &str) {
        self.failing
            .lock()
            .await
            .insert(monitoring_system.to_string());
    }

    /// Accept pokes to `monitoring_system` again.
    pub async fn recover(&self, monitoring_system: &str) {
        self.failing.lock().await.remove(monitoring_system);
    }

    /// Delivered pokes as `(monitoring_system, poke)`, in delivery order.
    pub async fn delivered(&self) -> Vec<(String, Poke)> {
        self.delivered.lock().await.clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, target: &NotifyTarget, poke: &Poke) -> Result<()> {
        if self.failing.lock().await.contains(&target.monitoring_system) {
            return Err(Error::Rejected {
                system: target.monitoring_system.clone(),
                status: 503,
            });
        }
        self.delivered
            .lock()
            .await
            .push((target.monitoring_system.clone(), poke.clone()));
        Ok(())
    }
}
