// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Decides rollout eligibility of `computed` configurations.
//!
//! | Prior configuration | Documents | Decision |
//! |---------------------|-----------|----------|
//! | none | - | roll out |
//! | not retiring | equal | discard the new one |
//! | never shipped | differ | supersede the prior |
//! | blocked | differ | supersede the prior, take over its wait |
//! | shipped | differ | block behind the prior |
//! | retiring | any | block behind the prior |
//!
//! Each decision is applied in one transaction; a failure leaves the
//! configuration `computed` for the next pass.

use std::sync::Arc;

use tracing::{debug, error, info};

use vigil_core::model::ConfigurationStatus;
use vigil_core::persistence::{ConfigurationRecord, OrderingDecision, Persistence};

use crate::details::same_deployment;
use crate::error::Result;

/// Orders computed configurations against their predecessors.
pub struct DeploymentOrderer {
    persistence: Arc<dyn Persistence>,
}

impl DeploymentOrderer {
    /// Create an orderer over `persistence`.
    pub fn new(persistence: Arc<dyn Persistence>) -> Self {
        Self { persistence }
    }

    /// Order up to `limit` configurations; returns how many were applied.
    pub async fn run_batch(&self, limit: i64) -> Result<usize> {
        let computed = self
            .persistence
            .list_configurations(ConfigurationStatus::Computed, limit)
            .await?;
        let mut applied = 0;
        for configuration in computed {
            match self.order(&configuration).await {
                Ok(Some(_)) => applied += 1,
                Ok(None) => {}
                Err(e) => error!(
                    configuration_id = %configuration.configuration_id,
                    error = %e,
                    "Failed to order configuration, retrying next pass"
                ),
            }
        }
        Ok(applied)
    }

    /// Decide and apply. Returns `None` if the configuration was no longer
    /// `computed` when the decision was applied.
    pub async fn order(
        &self,
        configuration: &ConfigurationRecord,
    ) -> Result<Option<OrderingDecision>> {
        let decision = self.decide(configuration).await?;
        let applied = self
            .persistence
            .apply_ordering(configuration.configuration_id, decision)
            .await?;
        if !applied {
            debug!(configuration_id = %configuration.configuration_id, "Configuration no longer computed");
            return Ok(None);
        }
        match decision {
            OrderingDecision::Block { blocking, .. } => info!(
                configuration_id = %configuration.configuration_id,
                blocking_id = %blocking,
                "Configuration blocked behind deployed predecessor"
            ),
            _ => debug!(
                configuration_id = %configuration.configuration_id,
                decision = ?decision,
                "Configuration ordered"
            ),
        }
        Ok(Some(decision))
    }

    /// Compare against the prior configuration of the same instance.
    pub async fn decide(&self, configuration: &ConfigurationRecord) -> Result<OrderingDecision> {
        let Some(prior) = self
            .persistence
            .prior_configuration(configuration)
            .await?
        else {
            return Ok(OrderingDecision::Rollout);
        };

        // A retiring prior is about to vanish; an equal document must still ship.
        let unchanged = !prior.status.is_retiring()
            && match (&prior.details, &configuration.details) {
                (Some(old), Some(new)) => same_deployment(old, new),
                _ => false,
            };
        if unchanged {
            return Ok(OrderingDecision::Discard);
        }

        if prior.status == ConfigurationStatus::Blocked {
            return Ok(
                match self.persistence.get_dependency(prior.configuration_id).await? {
                    Some(dependency) => OrderingDecision::Block {
                        prior: prior.configuration_id,
                        blocking: dependency.blocking_id,
                    },
                    None => OrderingDecision::Supersede {
                        prior: prior.configuration_id,
                    },
                },
            );
        }
        if prior.status.is_unshipped() {
            return Ok(OrderingDecision::Supersede {
                prior: prior.configuration_id,
            });
        }
        Ok(OrderingDecision::Block {
            prior: prior.configuration_id,
            blocking: prior.configuration_id,
        })
    }
}
