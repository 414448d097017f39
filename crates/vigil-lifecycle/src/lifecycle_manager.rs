// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Background worker advancing configurations nobody else moves.
//!
//! Each tick runs, in order:
//! 1. Ghost cleanup: purge `awaiting_deletion` rows, failed rollouts and
//!    deprovisioned rows past retention, and unconsumed rollouts past
//!    retention
//! 2. Discard blocked configurations whose instance was deleted
//! 3. Unblock configurations whose blocking configuration is gone
//! 4. Force stale in-progress configurations to `awaiting_deprovision`
//! 5. Retire configurations of deleted instances
//! 6. Poke monitoring systems about ready deployments
//!
//! The manager only touches committed rows through compare-and-set
//! updates, so it runs alongside any number of repository workers. A
//! failing step or configuration is logged and retried next tick.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use vigil_core::model::ConfigurationStatus;
use vigil_core::persistence::{ConfigurationRecord, Persistence};

use crate::config::LifecycleConfig;
use crate::details::DeploymentDetails;
use crate::error::{Error, Result};
use crate::notifier::{Notifier, NotifyTarget, Poke};

/// Rows examined per status and step.
const SCAN_LIMIT: i64 = 10_000;

/// What one tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Rows deleted by ghost cleanup.
    pub purged: u64,
    /// Blocked configurations of deleted instances discarded.
    pub discarded: usize,
    /// Blocked configurations released.
    pub unblocked: usize,
    /// Stale in-progress configurations forced to deprovision.
    pub deadlocks: usize,
    /// Configurations of deleted instances retired.
    pub retired: usize,
    /// Pokes acknowledged.
    pub poked: usize,
}

/// Periodic lifecycle manager.
pub struct LifecycleManager {
    persistence: Arc<dyn Persistence>,
    notifier: Arc<dyn Notifier>,
    config: LifecycleConfig,
    shutdown: Arc<Notify>,
}

impl LifecycleManager {
    /// Create a new lifecycle manager.
    pub fn new(
        persistence: Arc<dyn Persistence>,
        notifier: Arc<dyn Notifier>,
        config: LifecycleConfig,
    ) -> Self {
        Self {
            persistence,
            notifier,
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Get a handle that can be used to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Run ticks until shutdown is signalled.
    pub async fn run(&self) {
        info!(
            tick_secs = self.config.tick_interval.as_secs(),
            deadlock_threshold_secs = self.config.deadlock_threshold.as_secs(),
            retention_secs = self.config.retention.as_secs(),
            poke_batch_size = self.config.poke_batch_size,
            "Lifecycle manager started"
        );

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.notified() => {
                    info!("Lifecycle manager received shutdown signal");
                    break;
                }

                _ = tokio::time::sleep(self.config.tick_interval) => {
                    let report = self.tick().await;
                    if report != TickReport::default() {
                        info!(
                            purged = report.purged,
                            discarded = report.discarded,
                            unblocked = report.unblocked,
                            deadlocks = report.deadlocks,
                            retired = report.retired,
                            poked = report.poked,
                            "Lifecycle tick finished"
                        );
                    }
                }
            }
        }

        info!("Lifecycle manager stopped");
    }

    /// Run every step once.
    pub async fn tick(&self) -> TickReport {
        let mut report = TickReport::default();

        match self.cleanup_ghosts().await {
            Ok(n) => report.purged = n,
            Err(e) => error!(error = %e, "Ghost cleanup failed"),
        }
        match self.discard_deleted_blocked().await {
            Ok(n) => report.discarded = n,
            Err(e) => error!(error = %e, "Discarding deleted blocked configurations failed"),
        }
        match self.unblock().await {
            Ok(n) => report.unblocked = n,
            Err(e) => error!(error = %e, "Unblocking configurations failed"),
        }
        match self.resolve_deadlocks().await {
            Ok(n) => report.deadlocks = n,
            Err(e) => error!(error = %e, "Deadlock resolution failed"),
        }
        match self.retire_deleted().await {
            Ok(n) => report.retired = n,
            Err(e) => error!(error = %e, "Retiring deleted configurations failed"),
        }
        match self.poke().await {
            Ok(n) => report.poked = n,
            Err(e) => error!(error = %e, "Poking monitoring systems failed"),
        }

        report
    }

    fn cutoff(&self, age: Duration) -> Result<chrono::DateTime<Utc>> {
        let age = chrono::Duration::from_std(age)
            .map_err(|e| Error::Other(format!("Invalid duration: {}", e)))?;
        Ok(Utc::now() - age)
    }

    async fn cleanup_ghosts(&self) -> Result<u64> {
        use ConfigurationStatus::*;

        let retention = self.cutoff(self.config.retention)?;
        let mut purged = self
            .persistence
            .purge_configurations(&[AwaitingDeletion], Utc::now())
            .await?;
        purged += self
            .persistence
            .purge_configurations(&[RolloutFailed, Deprovisioned], retention)
            .await?;

        let unconsumed = self
            .persistence
            .list_configurations(AwaitingRollout, SCAN_LIMIT)
            .await?
            .into_iter()
            .filter(|c| c.update_available && c.status_updated_at < retention);
        for ghost in unconsumed {
            if let Err(e) = self
                .persistence
                .delete_configuration(ghost.configuration_id)
                .await
            {
                warn!(configuration_id = %ghost.configuration_id, error = %e, "Failed to delete ghost configuration");
                continue;
            }
            purged += 1;
        }

        if purged > 0 {
            debug!(purged, "Ghost configurations purged");
        }
        Ok(purged)
    }

    async fn discard_deleted_blocked(&self) -> Result<usize> {
        let blocked = self.scan(ConfigurationStatus::Blocked).await?;
        let mut discarded = 0;
        for configuration in blocked.iter().filter(|c| c.instance_deleted) {
            if self
                .move_to(
                    configuration,
                    ConfigurationStatus::AwaitingDeletion,
                    Some(false),
                )
                .await
            {
                discarded += 1;
            }
        }
        Ok(discarded)
    }

    async fn unblock(&self) -> Result<usize> {
        let blocked = self.scan(ConfigurationStatus::Blocked).await?;
        let mut released = 0;
        for configuration in blocked {
            match self.release_if_ready(&configuration).await {
                Ok(true) => released += 1,
                Ok(false) => {}
                Err(e) => error!(
                    configuration_id = %configuration.configuration_id,
                    error = %e,
                    "Failed to unblock configuration"
                ),
            }
        }
        Ok(released)
    }

    async fn release_if_ready(&self, configuration: &ConfigurationRecord) -> Result<bool> {
        let id = configuration.configuration_id;
        let ready = match self.persistence.get_dependency(id).await? {
            None => true,
            Some(dependency) => {
                match self
                    .persistence
                    .get_configuration(dependency.blocking_id)
                    .await?
                {
                    None => true,
                    Some(blocking) => {
                        blocking.status == dependency.release_status
                            || blocking.status == ConfigurationStatus::AwaitingDeletion
                    }
                }
            }
        };
        if !ready {
            return Ok(false);
        }
        let released = self.persistence.release_blocked(id).await?;
        if released {
            info!(configuration_id = %id, "Configuration unblocked");
        }
        Ok(released)
    }

    async fn resolve_deadlocks(&self) -> Result<usize> {
        use ConfigurationStatus::*;

        let stale_before = self.cutoff(self.config.deadlock_threshold)?;
        let mut resolved = 0;
        for status in [RolloutInProgress, DeprovisionInProgress] {
            let stale = self.scan(status).await?;
            for configuration in stale.iter().filter(|c| c.status_updated_at < stale_before) {
                warn!(
                    configuration_id = %configuration.configuration_id,
                    status = %configuration.status,
                    since = %configuration.status_updated_at,
                    "Configuration stuck, forcing deprovision"
                );
                if self.move_to(configuration, AwaitingDeprovision, None).await {
                    resolved += 1;
                }
            }
        }
        Ok(resolved)
    }

    async fn retire_deleted(&self) -> Result<usize> {
        use ConfigurationStatus::*;

        let mut retired = 0;
        for (status, to) in [
            (Active, AwaitingDeprovision),
            (Computed, AwaitingDeletion),
            (AwaitingRollout, AwaitingDeletion),
        ] {
            let rows = self.scan(status).await?;
            for configuration in rows.iter().filter(|c| c.instance_deleted) {
                let update = (to == AwaitingDeletion).then_some(false);
                if self.move_to(configuration, to, update).await {
                    retired += 1;
                }
            }
        }
        Ok(retired)
    }

    async fn poke(&self) -> Result<usize> {
        let ready: Vec<ConfigurationRecord> = self
            .scan(ConfigurationStatus::AwaitingRollout)
            .await?
            .into_iter()
            .filter(|c| c.update_available)
            .collect();
        if ready.is_empty() {
            return Ok(0);
        }

        let mut capabilities = HashMap::new();
        let mut by_system: HashMap<NotifyTarget, Vec<(Uuid, Poke)>> = HashMap::new();
        for configuration in &ready {
            match self.target_of(configuration, &mut capabilities).await {
                Ok(Some((target, instance_id))) => {
                    by_system.entry(target).or_default().push((
                        configuration.configuration_id,
                        Poke {
                            uuid: instance_id,
                            path: self.config.poke_path.clone(),
                        },
                    ));
                }
                Ok(None) => {}
                Err(e) => warn!(
                    configuration_id = %configuration.configuration_id,
                    error = %e,
                    "Cannot resolve poke target"
                ),
            }
        }

        let mut delivered = 0;
        for (target, pokes) in &by_system {
            for batch in pokes.chunks(self.config.poke_batch_size) {
                let results = join_all(
                    batch
                        .iter()
                        .map(|(_, poke)| self.notifier.notify(target, poke)),
                )
                .await;
                for ((configuration_id, poke), result) in batch.iter().zip(results) {
                    match result {
                        Ok(()) => {
                            if let Err(e) = self
                                .persistence
                                .clear_update_available(*configuration_id)
                                .await
                            {
                                warn!(configuration_id = %configuration_id, error = %e, "Failed to clear update flag");
                                continue;
                            }
                            delivered += 1;
                        }
                        Err(e) => warn!(
                            monitoring_system = %target.monitoring_system,
                            instance_id = %poke.uuid,
                            error = %e,
                            "Poke failed, retrying next tick"
                        ),
                    }
                }
            }
        }
        Ok(delivered)
    }

    /// Monitoring system and check instance a configuration is announced to.
    async fn target_of(
        &self,
        configuration: &ConfigurationRecord,
        capabilities: &mut HashMap<Uuid, Option<NotifyTarget>>,
    ) -> Result<Option<(NotifyTarget, Uuid)>> {
        let Some(document) = &configuration.details else {
            warn!(configuration_id = %configuration.configuration_id, "Ready configuration has no details");
            return Ok(None);
        };
        let details: DeploymentDetails = serde_json::from_value(document.clone())?;
        let capability_id = details.capability.capability_id;

        if !capabilities.contains_key(&capability_id) {
            let target = self
                .persistence
                .get_capability(capability_id)
                .await?
                .map(|c| NotifyTarget {
                    monitoring_system: c.monitoring_system,
                    callback_uri: c.callback_uri,
                });
            capabilities.insert(capability_id, target);
        }
        let target = capabilities.get(&capability_id).cloned().flatten();
        if target.is_none() {
            warn!(capability_id = %capability_id, "Capability vanished, cannot poke");
        }
        Ok(target.map(|t| (t, details.instance.instance_id)))
    }

    async fn scan(&self, status: ConfigurationStatus) -> Result<Vec<ConfigurationRecord>> {
        Ok(self
            .persistence
            .list_configurations(status, SCAN_LIMIT)
            .await?)
    }

    /// Compare-and-set from the configuration's listed status; returns
    /// whether it moved.
    async fn move_to(
        &self,
        configuration: &ConfigurationRecord,
        to: ConfigurationStatus,
        update_available: Option<bool>,
    ) -> bool {
        match self
            .persistence
            .transition_configuration(
                configuration.configuration_id,
                configuration.status,
                to,
                update_available,
            )
            .await
        {
            Ok(moved) => {
                if moved {
                    debug!(
                        configuration_id = %configuration.configuration_id,
                        from = %configuration.status,
                        to = %to,
                        "Configuration moved"
                    );
                }
                moved
            }
            Err(e) => {
                error!(
                    configuration_id = %configuration.configuration_id,
                    error = %e,
                    "Failed to move configuration"
                );
                false
            }
        }
    }
}
