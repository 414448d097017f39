// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Status reports from monitoring systems.
//!
//! Monitoring systems pick up a poked configuration and report progress
//! back. Every report is checked against the transition table and applied
//! as a compare-and-set, so a stale or duplicated report fails instead of
//! overwriting a newer status.

use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use vigil_core::model::ConfigurationStatus;
use vigil_core::persistence::Persistence;

use crate::error::{Error, Result};

/// Applies monitoring system reports.
pub struct Feedback {
    persistence: Arc<dyn Persistence>,
}

impl Feedback {
    /// Create a feedback handler over `persistence`.
    pub fn new(persistence: Arc<dyn Persistence>) -> Self {
        Self { persistence }
    }

    /// `awaiting_rollout` → `rollout_in_progress`.
    pub async fn start_rollout(&self, configuration_id: Uuid) -> Result<()> {
        self.advance(
            configuration_id,
            ConfigurationStatus::RolloutInProgress,
            Some(false),
        )
        .await
    }

    /// `rollout_in_progress` → `active`.
    pub async fn finish_rollout(&self, configuration_id: Uuid) -> Result<()> {
        self.advance(configuration_id, ConfigurationStatus::Active, None)
            .await
    }

    /// `rollout_in_progress` → `rollout_failed`.
    pub async fn fail_rollout(&self, configuration_id: Uuid) -> Result<()> {
        self.advance(configuration_id, ConfigurationStatus::RolloutFailed, None)
            .await
    }

    /// `awaiting_deprovision` → `deprovision_in_progress`.
    pub async fn start_deprovision(&self, configuration_id: Uuid) -> Result<()> {
        self.advance(
            configuration_id,
            ConfigurationStatus::DeprovisionInProgress,
            None,
        )
        .await
    }

    /// `deprovision_in_progress` → `deprovisioned`.
    pub async fn finish_deprovision(&self, configuration_id: Uuid) -> Result<()> {
        self.advance(configuration_id, ConfigurationStatus::Deprovisioned, None)
            .await
    }

    /// `deprovision_in_progress` → `deprovision_failed`.
    pub async fn fail_deprovision(&self, configuration_id: Uuid) -> Result<()> {
        self.advance(
            configuration_id,
            ConfigurationStatus::DeprovisionFailed,
            None,
        )
        .await
    }

    /// `rollout_failed` → `awaiting_rollout`, or `deprovision_failed` →
    /// `awaiting_deprovision`.
    pub async fn retry(&self, configuration_id: Uuid) -> Result<()> {
        let current = self.current(configuration_id).await?;
        match current {
            ConfigurationStatus::RolloutFailed => {
                self.advance(
                    configuration_id,
                    ConfigurationStatus::AwaitingRollout,
                    Some(true),
                )
                .await
            }
            ConfigurationStatus::DeprovisionFailed => {
                self.advance(
                    configuration_id,
                    ConfigurationStatus::AwaitingDeprovision,
                    None,
                )
                .await
            }
            from => Err(Error::InvalidTransition {
                configuration_id,
                from,
                to: from,
            }),
        }
    }

    async fn current(&self, configuration_id: Uuid) -> Result<ConfigurationStatus> {
        Ok(self
            .persistence
            .get_configuration(configuration_id)
            .await?
            .ok_or(Error::ConfigurationNotFound(configuration_id))?
            .status)
    }

    async fn advance(
        &self,
        configuration_id: Uuid,
        to: ConfigurationStatus,
        update_available: Option<bool>,
    ) -> Result<()> {
        let from = self.current(configuration_id).await?;
        if !from.can_transition_to(to) {
            return Err(Error::InvalidTransition {
                configuration_id,
                from,
                to,
            });
        }
        let moved = self
            .persistence
            .transition_configuration(configuration_id, from, to, update_available)
            .await?;
        if !moved {
            // Lost a race; report what it is now.
            let now = self.current(configuration_id).await?;
            return Err(Error::InvalidTransition {
                configuration_id,
                from: now,
                to,
            });
        }
        info!(configuration_id = %configuration_id, from = %from, to = %to, "Monitoring feedback applied");
        Ok(())
    }
}
