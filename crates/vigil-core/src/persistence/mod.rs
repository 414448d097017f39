// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Persistence interfaces and backends for vigil.
//!
//! The [`Persistence`] trait covers both sides of the system: repository
//! workers load trees and write job results through it, the deployment
//! pipeline and lifecycle manager read and advance check instance
//! configurations through it. Workers write inside a
//! [`PersistenceTransaction`] so a job is all or nothing.

pub mod memory;
pub mod postgres;

pub use self::memory::MemoryPersistence;
pub use self::postgres::PostgresPersistence;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CoreError;
use crate::model::{
    Check, CheckConfig, CheckInstance, ConfigurationStatus, Job, JobStatus, ObjectRef,
    ObjectType, Property, PropertyKind, RebuildLevel,
};
use crate::tree::{Action, ObjectSnapshot};

/// Repository record from the persistence layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryRecord {
    /// Repository id.
    pub repository_id: Uuid,
    /// Repository name.
    pub name: String,
    /// Owning team.
    pub team_id: Uuid,
    /// Whether the repository refuses jobs until rebuilt.
    pub broken: bool,
    /// Why the repository was marked broken.
    pub broken_reason: Option<String>,
}

/// Job record from the persistence layer.
#[derive(Debug, Clone, PartialEq)]
pub struct JobRecord {
    /// Job id.
    pub job_id: Uuid,
    /// Repository the job was routed to.
    pub repository_id: Uuid,
    /// Requesting user.
    pub user: String,
    /// Request section.
    pub request_type: String,
    /// Action name.
    pub action: String,
    /// Current status.
    pub status: JobStatus,
    /// Recorded error of a failed job.
    pub error: Option<String>,
    /// Serialized typed action.
    pub payload: serde_json::Value,
    /// When the job was accepted.
    pub queued_at: DateTime<Utc>,
    /// When the job reached a final status.
    pub finished_at: Option<DateTime<Utc>>,
}

/// Check instance with its persisted bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckInstanceRecord {
    /// The instance.
    pub instance: CheckInstance,
    /// Owning repository.
    pub repository_id: Uuid,
    /// Flagged deleted by the tree.
    pub deleted: bool,
}

/// Monitoring capability catalog entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityRecord {
    /// Capability id.
    pub capability_id: Uuid,
    /// Monitoring system name.
    pub monitoring_system: String,
    /// Base URI notifications for this system go to.
    pub callback_uri: String,
    /// Metric path.
    pub metric: String,
    /// Metric unit.
    pub unit: String,
    /// Metric description.
    pub description: String,
    /// View the capability reads properties from.
    pub view: String,
}

/// One deployable configuration of a check instance.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigurationRecord {
    /// Configuration id.
    pub configuration_id: Uuid,
    /// Check instance.
    pub check_instance_id: Uuid,
    /// Owning repository.
    pub repository_id: Uuid,
    /// Version of the instance this configuration was created for.
    pub version: u64,
    /// Lifecycle status.
    pub status: ConfigurationStatus,
    /// Status the configuration is expected to reach next.
    pub next_status: Option<ConfigurationStatus>,
    /// Whether a monitoring system still needs to be notified.
    pub update_available: bool,
    /// Deployment document once computed.
    pub details: Option<serde_json::Value>,
    /// When the configuration was created.
    pub created_at: DateTime<Utc>,
    /// When the status last changed.
    pub status_updated_at: DateTime<Utc>,
    /// Whether the owning instance was flagged deleted.
    pub instance_deleted: bool,
}

/// "`blocked` waits for `blocking` to reach `release_status`".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyRecord {
    /// Waiting configuration.
    pub blocked_id: Uuid,
    /// Configuration being waited on.
    pub blocking_id: Uuid,
    /// Status that releases the wait.
    pub release_status: ConfigurationStatus,
    /// When the dependency was recorded.
    pub created_at: DateTime<Utc>,
}

/// Outcome of ordering one computed configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderingDecision {
    /// No prior configuration: ready to roll out.
    Rollout,
    /// Identical to the prior configuration: dropped.
    Discard,
    /// The prior configuration never shipped: it is dropped, this one rolls out.
    Supersede {
        /// Prior configuration.
        prior: Uuid,
    },
    /// A shipped configuration is still deployed: this one waits for its
    /// deprovision. When `prior` is itself blocked it is dropped and its
    /// wait is taken over.
    Block {
        /// Prior configuration.
        prior: Uuid,
        /// Shipped configuration to wait for; equals `prior` unless the
        /// prior was blocked.
        blocking: Uuid,
    },
}

/// Transactional write access used for one job.
#[async_trait]
pub trait PersistenceTransaction: Send {
    /// Persist one tree Action.
    async fn apply(&mut self, action: &Action) -> Result<(), CoreError>;

    /// Store (or overwrite) a check configuration.
    async fn save_check_config(&mut self, config: &CheckConfig) -> Result<(), CoreError>;

    /// Flag a check configuration deleted.
    async fn delete_check_config(&mut self, config_id: Uuid) -> Result<(), CoreError>;

    /// Make every write visible.
    async fn commit(self: Box<Self>) -> Result<(), CoreError>;

    /// Discard every write.
    async fn rollback(self: Box<Self>) -> Result<(), CoreError>;
}

/// Persistence trait shared by workers and the lifecycle side.
#[allow(missing_docs)]
#[async_trait]
pub trait Persistence: Send + Sync {
    // Jobs
    async fn insert_job(&self, job: &Job) -> Result<(), CoreError>;

    async fn update_job_status(
        &self,
        job_id: Uuid,
        status: JobStatus,
        error: Option<&str>,
    ) -> Result<(), CoreError>;

    async fn get_job(&self, job_id: Uuid) -> Result<Option<JobRecord>, CoreError>;

    // Repositories
    async fn list_repositories(&self) -> Result<Vec<RepositoryRecord>, CoreError>;

    async fn get_repository(
        &self,
        repository_id: Uuid,
    ) -> Result<Option<RepositoryRecord>, CoreError>;

    async fn mark_repository_broken(
        &self,
        repository_id: Uuid,
        reason: &str,
    ) -> Result<(), CoreError>;

    async fn clear_repository_broken(&self, repository_id: Uuid) -> Result<(), CoreError>;

    async fn is_repository_broken(&self, repository_id: Uuid) -> Result<bool, CoreError> {
        Ok(self
            .get_repository(repository_id)
            .await?
            .is_some_and(|r| r.broken))
    }

    // Tree load
    async fn load_objects(
        &self,
        repository_id: Uuid,
        object_type: ObjectType,
    ) -> Result<Vec<ObjectSnapshot>, CoreError>;

    /// Properties of `kind` attached to objects of `object_type`.
    async fn load_properties(
        &self,
        repository_id: Uuid,
        object_type: ObjectType,
        kind: PropertyKind,
    ) -> Result<Vec<Property>, CoreError>;

    async fn load_check_configs(&self, repository_id: Uuid)
    -> Result<Vec<CheckConfig>, CoreError>;

    async fn load_checks(&self, repository_id: Uuid) -> Result<Vec<Check>, CoreError>;

    async fn load_check_instances(
        &self,
        repository_id: Uuid,
    ) -> Result<Vec<CheckInstance>, CoreError>;

    /// Drop derived state ahead of a rebuild.
    async fn reset_for_rebuild(
        &self,
        repository_id: Uuid,
        level: RebuildLevel,
    ) -> Result<(), CoreError>;

    async fn begin(&self) -> Result<Box<dyn PersistenceTransaction>, CoreError>;

    // Deployment side
    async fn list_configurations(
        &self,
        status: ConfigurationStatus,
        limit: i64,
    ) -> Result<Vec<ConfigurationRecord>, CoreError>;

    async fn get_configuration(
        &self,
        configuration_id: Uuid,
    ) -> Result<Option<ConfigurationRecord>, CoreError>;

    async fn get_check_instance(
        &self,
        instance_id: Uuid,
    ) -> Result<Option<CheckInstanceRecord>, CoreError>;

    async fn get_check(&self, check_id: Uuid) -> Result<Option<Check>, CoreError>;

    async fn get_check_config(&self, config_id: Uuid) -> Result<Option<CheckConfig>, CoreError>;

    async fn get_object(&self, object: ObjectRef) -> Result<Option<ObjectSnapshot>, CoreError>;

    async fn load_object_properties(&self, object: ObjectRef)
    -> Result<Vec<Property>, CoreError>;

    async fn get_capability(
        &self,
        capability_id: Uuid,
    ) -> Result<Option<CapabilityRecord>, CoreError>;

    /// Store the deployment document and move `awaiting_computation` to
    /// `computed`. Returns false if the configuration was not awaiting
    /// computation any more.
    async fn store_deployment_details(
        &self,
        configuration_id: Uuid,
        details: &serde_json::Value,
    ) -> Result<bool, CoreError>;

    /// Newest other live configuration of the same instance with a lower
    /// version, ignoring `deprovisioned` and `awaiting_deletion` rows.
    async fn prior_configuration(
        &self,
        configuration: &ConfigurationRecord,
    ) -> Result<Option<ConfigurationRecord>, CoreError>;

    async fn get_dependency(&self, blocked_id: Uuid)
    -> Result<Option<DependencyRecord>, CoreError>;

    /// Apply an ordering decision to a `computed` configuration in one
    /// transaction. Returns false if the configuration was no longer
    /// `computed`.
    async fn apply_ordering(
        &self,
        configuration_id: Uuid,
        decision: OrderingDecision,
    ) -> Result<bool, CoreError>;

    /// Compare-and-set status change. Clears `next_status`; sets
    /// `update_available` when given.
    async fn transition_configuration(
        &self,
        configuration_id: Uuid,
        from: ConfigurationStatus,
        to: ConfigurationStatus,
        update_available: Option<bool>,
    ) -> Result<bool, CoreError>;

    /// Move a `blocked` configuration to `awaiting_rollout` and drop its
    /// dependency in one transaction.
    async fn release_blocked(&self, configuration_id: Uuid) -> Result<bool, CoreError>;

    async fn delete_configuration(&self, configuration_id: Uuid) -> Result<(), CoreError>;

    /// Delete configurations in `statuses` whose status is older than
    /// `older_than`. Returns the number of deleted rows.
    async fn purge_configurations(
        &self,
        statuses: &[ConfigurationStatus],
        older_than: DateTime<Utc>,
    ) -> Result<u64, CoreError>;

    async fn clear_update_available(&self, configuration_id: Uuid) -> Result<bool, CoreError>;

    // Catalog
    async fn upsert_capability(&self, capability: &CapabilityRecord) -> Result<(), CoreError>;
}
