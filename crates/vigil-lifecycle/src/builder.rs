// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Builds deployment documents for `awaiting_computation` configurations.
//!
//! A document must be complete before it is shipped. When anything it is
//! assembled from cannot be found, the owning repository is marked broken
//! and its worker refuses jobs until rebuilt.

use std::sync::Arc;

use tracing::{debug, error, warn};
use uuid::Uuid;

use vigil_core::model::{ConfigurationStatus, PropertyValue};
use vigil_core::persistence::{ConfigurationRecord, Persistence};

use crate::details::{DeploymentDetails, DetailSources};
use crate::error::{Error, Result};

/// What happened to one configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildOutcome {
    /// Document stored, configuration `computed`.
    Computed,
    /// The instance was deleted; configuration dropped.
    Dropped,
    /// Another writer moved the configuration first.
    Skipped,
}

/// Assembles and stores deployment documents.
pub struct DeploymentDetailBuilder {
    persistence: Arc<dyn Persistence>,
}

fn missing(configuration_id: Uuid, entity: &'static str, id: impl ToString) -> Error {
    Error::Incomplete {
        configuration_id,
        entity,
        id: id.to_string(),
    }
}

impl DeploymentDetailBuilder {
    /// Create a builder over `persistence`.
    pub fn new(persistence: Arc<dyn Persistence>) -> Self {
        Self { persistence }
    }

    /// Build documents for up to `limit` configurations; returns how many
    /// reached `computed`.
    ///
    /// Per-configuration failures are logged and do not stop the batch.
    pub async fn run_batch(&self, limit: i64) -> Result<usize> {
        let pending = self
            .persistence
            .list_configurations(ConfigurationStatus::AwaitingComputation, limit)
            .await?;
        let mut computed = 0;
        for configuration in pending {
            match self.build(&configuration).await {
                Ok(BuildOutcome::Computed) => computed += 1,
                Ok(_) => {}
                Err(e) => error!(
                    configuration_id = %configuration.configuration_id,
                    error = %e,
                    "Failed to build deployment details"
                ),
            }
        }
        Ok(computed)
    }

    /// Build and store the document of one configuration.
    pub async fn build(&self, configuration: &ConfigurationRecord) -> Result<BuildOutcome> {
        let configuration_id = configuration.configuration_id;
        if configuration.instance_deleted {
            let moved = self
                .persistence
                .transition_configuration(
                    configuration_id,
                    ConfigurationStatus::AwaitingComputation,
                    ConfigurationStatus::AwaitingDeletion,
                    Some(false),
                )
                .await?;
            debug!(configuration_id = %configuration_id, "Instance deleted, dropping configuration");
            return Ok(if moved {
                BuildOutcome::Dropped
            } else {
                BuildOutcome::Skipped
            });
        }

        let details = match self.assemble(configuration).await {
            Ok(details) => details,
            Err(e @ Error::Incomplete { .. }) => {
                self.break_repository(configuration.repository_id, &e).await;
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        let document = serde_json::to_value(&details)?;
        let stored = self
            .persistence
            .store_deployment_details(configuration_id, &document)
            .await?;
        if !stored {
            debug!(configuration_id = %configuration_id, "Configuration no longer awaiting computation");
            return Ok(BuildOutcome::Skipped);
        }
        debug!(
            configuration_id = %configuration_id,
            version = configuration.version,
            "Deployment details computed"
        );
        Ok(BuildOutcome::Computed)
    }

    async fn assemble(&self, configuration: &ConfigurationRecord) -> Result<DeploymentDetails> {
        let id = configuration.configuration_id;
        let p = self.persistence.as_ref();

        let instance = p
            .get_check_instance(configuration.check_instance_id)
            .await?
            .ok_or_else(|| missing(id, "check instance", configuration.check_instance_id))?
            .instance;
        let check = p
            .get_check(instance.check_id)
            .await?
            .ok_or_else(|| missing(id, "check", instance.check_id))?;
        let config = p
            .get_check_config(instance.config_id)
            .await?
            .ok_or_else(|| missing(id, "check configuration", instance.config_id))?;
        let capability = p
            .get_capability(config.capability_id)
            .await?
            .ok_or_else(|| missing(id, "capability", config.capability_id))?;
        let object = p
            .get_object(instance.object)
            .await?
            .ok_or_else(|| missing(id, "object", instance.object))?;
        let repository = p
            .get_repository(configuration.repository_id)
            .await?
            .ok_or_else(|| missing(id, "repository", configuration.repository_id))?;
        let properties = p.load_object_properties(instance.object).await?;

        if let Some(service) = &instance.service {
            let bound = properties.iter().any(|prop| {
                matches!(&prop.value, PropertyValue::Service { name, .. } if name == service)
            });
            if !bound {
                return Err(missing(id, "service", service));
            }
        }

        Ok(DeploymentDetails::assemble(DetailSources {
            configuration_id: id,
            version: configuration.version,
            instance: &instance,
            check: &check,
            config: &config,
            capability: &capability,
            object: &object,
            team_id: repository.team_id,
            properties: &properties,
        }))
    }

    async fn break_repository(&self, repository_id: Uuid, err: &Error) {
        error!(repository = %repository_id, error = %err, "Incomplete deployment details, marking repository broken");
        if let Err(e) = self
            .persistence
            .mark_repository_broken(repository_id, &err.to_string())
            .await
        {
            warn!(repository = %repository_id, error = %e, "Failed to persist broken flag");
        }
    }
}
