// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-process persistence backend.
//!
//! Keeps every table in memory behind one async mutex. Transactions buffer
//! their writes and apply them under the lock on commit, so a rolled back
//! job leaves nothing behind. Faults can be injected to exercise failure
//! paths of workers and the lifecycle side.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{
    CapabilityRecord, CheckInstanceRecord, ConfigurationRecord, DependencyRecord, JobRecord,
    OrderingDecision, Persistence, PersistenceTransaction, RepositoryRecord,
};
use crate::error::CoreError;
use crate::model::{
    Check, CheckConfig, CheckInstance, ConfigurationStatus, Job, JobStatus, ObjectAttributes,
    ObjectRef, ObjectState, ObjectType, Property, PropertyKind, RebuildLevel,
};
use crate::tree::{Action, ActionKind, ObjectSnapshot};

/// Injected failures.
#[derive(Debug, Clone, Default)]
pub struct Faults {
    /// Fail `apply` for actions of this kind.
    pub fail_action: Option<ActionKind>,
    /// Fail every transaction commit.
    pub fail_commit: bool,
    /// Fail `apply_ordering`.
    pub fail_ordering: bool,
}

#[derive(Debug, Default)]
struct Store {
    repositories: HashMap<Uuid, RepositoryRecord>,
    jobs: HashMap<Uuid, JobRecord>,
    objects: HashMap<Uuid, (ObjectSnapshot, bool)>,
    memberships: HashSet<(Uuid, Uuid)>,
    properties: HashMap<Uuid, (Uuid, Property)>,
    configs: HashMap<Uuid, (CheckConfig, bool)>,
    checks: HashMap<Uuid, (Uuid, Check)>,
    instances: HashMap<Uuid, CheckInstanceRecord>,
    configurations: HashMap<Uuid, ConfigurationRecord>,
    dependencies: HashMap<Uuid, DependencyRecord>,
    capabilities: HashMap<Uuid, CapabilityRecord>,
}

enum Write {
    Action(Action),
    SaveConfig(CheckConfig),
    DeleteConfig(Uuid),
}

impl Store {
    fn repository_of(&self, object_id: Uuid) -> Option<Uuid> {
        self.objects.get(&object_id).map(|(s, _)| s.repository_id)
    }

    fn new_configuration(&mut self, instance: &CheckInstance, repository_id: Uuid) {
        let now = Utc::now();
        self.configurations.insert(
            instance.configuration_id,
            ConfigurationRecord {
                configuration_id: instance.configuration_id,
                check_instance_id: instance.instance_id,
                repository_id,
                version: instance.version,
                status: ConfigurationStatus::AwaitingComputation,
                next_status: None,
                update_available: false,
                details: None,
                created_at: now,
                status_updated_at: now,
                instance_deleted: false,
            },
        );
    }

    fn write(&mut self, write: Write) {
        match write {
            Write::SaveConfig(config) => {
                self.configs.insert(config.config_id, (config, false));
            }
            Write::DeleteConfig(id) => {
                if let Some(entry) = self.configs.get_mut(&id) {
                    entry.1 = true;
                }
            }
            Write::Action(action) => self.apply(action),
        }
    }

    fn apply(&mut self, action: Action) {
        match action {
            Action::Create(s) | Action::NodeAssignment(s) => {
                if let ObjectAttributes::Repository { team_id } = &s.attributes {
                    self.repositories.insert(
                        s.object.object_id,
                        RepositoryRecord {
                            repository_id: s.object.object_id,
                            name: s.name.clone(),
                            team_id: *team_id,
                            broken: false,
                            broken_reason: None,
                        },
                    );
                }
                self.objects.insert(s.object.object_id, (s, false));
            }
            Action::Update(s) => {
                self.objects.insert(s.object.object_id, (s, false));
            }
            Action::Delete(mut s) => {
                s.state = ObjectState::Deleted;
                self.objects.insert(s.object.object_id, (s, true));
            }
            Action::MemberNew { parent, member } => {
                self.memberships.insert((parent.object_id, member.object_id));
            }
            Action::MemberRemoved { parent, member } => {
                self.memberships.remove(&(parent.object_id, member.object_id));
            }
            Action::PropertyNew(p) => {
                let repo = self.repository_of(p.object.object_id).unwrap_or_default();
                self.properties.insert(p.instance_id, (repo, p));
            }
            Action::PropertyDelete(p) => {
                self.properties.remove(&p.instance_id);
            }
            Action::CheckNew(c) => {
                let repo = self.repository_of(c.object.object_id).unwrap_or_default();
                self.checks.insert(c.check_id, (repo, c));
            }
            Action::CheckRemoved(c) => {
                self.checks.remove(&c.check_id);
            }
            Action::CheckInstanceCreate(i) | Action::CheckInstanceUpdate(i) => {
                let repo = self.repository_of(i.object.object_id).unwrap_or_default();
                self.new_configuration(&i, repo);
                self.instances.insert(
                    i.instance_id,
                    CheckInstanceRecord {
                        instance: i,
                        repository_id: repo,
                        deleted: false,
                    },
                );
            }
            Action::CheckInstanceDelete(i) => {
                if let Some(rec) = self.instances.get_mut(&i.instance_id) {
                    rec.deleted = true;
                }
            }
        }
    }

    fn with_instance_flag(&self, mut rec: ConfigurationRecord) -> ConfigurationRecord {
        rec.instance_deleted = self
            .instances
            .get(&rec.check_instance_id)
            .is_none_or(|i| i.deleted);
        rec
    }

    fn set_status(
        &mut self,
        configuration_id: Uuid,
        to: ConfigurationStatus,
        update_available: Option<bool>,
    ) {
        if let Some(rec) = self.configurations.get_mut(&configuration_id) {
            rec.status = to;
            rec.next_status = None;
            rec.status_updated_at = Utc::now();
            if let Some(flag) = update_available {
                rec.update_available = flag;
            }
        }
    }
}

/// In-memory persistence backend.
#[derive(Clone, Default)]
pub struct MemoryPersistence {
    store: Arc<Mutex<Store>>,
    faults: Arc<Mutex<Faults>>,
}

impl MemoryPersistence {
    /// Create an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the injected faults.
    pub async fn set_faults(&self, faults: Faults) {
        *self.faults.lock().await = faults;
    }

    /// Insert a configuration row directly.
    pub async fn insert_configuration(&self, record: ConfigurationRecord) {
        let mut store = self.store.lock().await;
        store.configurations.insert(record.configuration_id, record);
    }

    /// Insert a check instance row directly.
    pub async fn insert_check_instance(&self, record: CheckInstanceRecord) {
        let mut store = self.store.lock().await;
        store.instances.insert(record.instance.instance_id, record);
    }

    /// Flag a check instance deleted.
    pub async fn flag_instance_deleted(&self, instance_id: Uuid) {
        if let Some(rec) = self.store.lock().await.instances.get_mut(&instance_id) {
            rec.deleted = true;
        }
    }

    /// Set the last status change timestamp of a configuration.
    pub async fn backdate_configuration(&self, configuration_id: Uuid, at: DateTime<Utc>) {
        if let Some(rec) = self
            .store
            .lock()
            .await
            .configurations
            .get_mut(&configuration_id)
        {
            rec.status_updated_at = at;
        }
    }

    /// Every configuration of a check instance, oldest version first.
    pub async fn configurations_of(&self, instance_id: Uuid) -> Vec<ConfigurationRecord> {
        let store = self.store.lock().await;
        let mut out: Vec<_> = store
            .configurations
            .values()
            .filter(|c| c.check_instance_id == instance_id)
            .cloned()
            .map(|c| store.with_instance_flag(c))
            .collect();
        out.sort_by_key(|c| c.version);
        out
    }

    /// Every stored dependency.
    pub async fn dependencies(&self) -> Vec<DependencyRecord> {
        self.store
            .lock()
            .await
            .dependencies
            .values()
            .cloned()
            .collect()
    }

    /// Live check instances of a repository.
    pub async fn live_instances(&self, repository_id: Uuid) -> Vec<CheckInstance> {
        self.load_check_instances(repository_id)
            .await
            .unwrap_or_default()
    }

    /// Number of stored property instances of a repository.
    pub async fn property_count(&self, repository_id: Uuid) -> usize {
        self.store
            .lock()
            .await
            .properties
            .values()
            .filter(|(repo, _)| *repo == repository_id)
            .count()
    }

    /// Memberships stored as `(parent, member)`.
    pub async fn memberships(&self) -> HashSet<(Uuid, Uuid)> {
        self.store.lock().await.memberships.clone()
    }
}

/// Buffered writes of one job.
pub struct MemoryTransaction {
    store: Arc<Mutex<Store>>,
    faults: Faults,
    writes: Vec<Write>,
}

#[async_trait]
impl PersistenceTransaction for MemoryTransaction {
    async fn apply(&mut self, action: &Action) -> Result<(), CoreError> {
        if self.faults.fail_action == Some(action.kind()) {
            return Err(CoreError::persistence(
                action.kind().as_str(),
                "injected failure",
            ));
        }
        self.writes.push(Write::Action(action.clone()));
        Ok(())
    }

    async fn save_check_config(&mut self, config: &CheckConfig) -> Result<(), CoreError> {
        self.writes.push(Write::SaveConfig(config.clone()));
        Ok(())
    }

    async fn delete_check_config(&mut self, config_id: Uuid) -> Result<(), CoreError> {
        self.writes.push(Write::DeleteConfig(config_id));
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), CoreError> {
        if self.faults.fail_commit {
            return Err(CoreError::persistence("commit", "injected failure"));
        }
        let mut store = self.store.lock().await;
        for write in self.writes {
            store.write(write);
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), CoreError> {
        Ok(())
    }
}

#[async_trait]
impl Persistence for MemoryPersistence {
    async fn insert_job(&self, job: &Job) -> Result<(), CoreError> {
        let payload = serde_json::to_value(&job.action)?;
        let mut store = self.store.lock().await;
        store.jobs.insert(
            job.job_id,
            JobRecord {
                job_id: job.job_id,
                repository_id: job.repository_id,
                user: job.user.clone(),
                request_type: job.request_type.clone(),
                action: job.action.name().to_string(),
                status: JobStatus::Queued,
                error: None,
                payload,
                queued_at: job.queued_at,
                finished_at: None,
            },
        );
        Ok(())
    }

    async fn update_job_status(
        &self,
        job_id: Uuid,
        status: JobStatus,
        error: Option<&str>,
    ) -> Result<(), CoreError> {
        let mut store = self.store.lock().await;
        let job = store
            .jobs
            .get_mut(&job_id)
            .ok_or_else(|| CoreError::not_found("job", job_id))?;
        job.status = status;
        job.error = error.map(str::to_string);
        if matches!(status, JobStatus::Success | JobStatus::Failed) {
            job.finished_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn get_job(&self, job_id: Uuid) -> Result<Option<JobRecord>, CoreError> {
        Ok(self.store.lock().await.jobs.get(&job_id).cloned())
    }

    async fn list_repositories(&self) -> Result<Vec<RepositoryRecord>, CoreError> {
        let mut repos: Vec<_> = self
            .store
            .lock()
            .await
            .repositories
            .values()
            .cloned()
            .collect();
        repos.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(repos)
    }

    async fn get_repository(
        &self,
        repository_id: Uuid,
    ) -> Result<Option<RepositoryRecord>, CoreError> {
        Ok(self
            .store
            .lock()
            .await
            .repositories
            .get(&repository_id)
            .cloned())
    }

    async fn mark_repository_broken(
        &self,
        repository_id: Uuid,
        reason: &str,
    ) -> Result<(), CoreError> {
        let mut store = self.store.lock().await;
        let repo = store
            .repositories
            .get_mut(&repository_id)
            .ok_or_else(|| CoreError::not_found("repository", repository_id))?;
        repo.broken = true;
        repo.broken_reason = Some(reason.to_string());
        Ok(())
    }

    async fn clear_repository_broken(&self, repository_id: Uuid) -> Result<(), CoreError> {
        if let Some(repo) = self
            .store
            .lock()
            .await
            .repositories
            .get_mut(&repository_id)
        {
            repo.broken = false;
            repo.broken_reason = None;
        }
        Ok(())
    }

    async fn load_objects(
        &self,
        repository_id: Uuid,
        object_type: ObjectType,
    ) -> Result<Vec<ObjectSnapshot>, CoreError> {
        let store = self.store.lock().await;
        let mut out: Vec<_> = store
            .objects
            .values()
            .filter(|(s, deleted)| {
                !deleted && s.repository_id == repository_id && s.object.object_type == object_type
            })
            .map(|(s, _)| s.clone())
            .collect();
        out.sort_by_key(|s| s.object.object_id);
        Ok(out)
    }

    async fn load_properties(
        &self,
        repository_id: Uuid,
        object_type: ObjectType,
        kind: PropertyKind,
    ) -> Result<Vec<Property>, CoreError> {
        let store = self.store.lock().await;
        let mut out: Vec<_> = store
            .properties
            .values()
            .filter(|(repo, p)| {
                *repo == repository_id
                    && p.object.object_type == object_type
                    && p.value.kind() == kind
            })
            .map(|(_, p)| p.clone())
            .collect();
        out.sort_by_key(|p| p.instance_id);
        Ok(out)
    }

    async fn load_check_configs(
        &self,
        repository_id: Uuid,
    ) -> Result<Vec<CheckConfig>, CoreError> {
        let store = self.store.lock().await;
        let mut out: Vec<_> = store
            .configs
            .values()
            .filter(|(c, deleted)| !deleted && c.repository_id == repository_id)
            .map(|(c, _)| c.clone())
            .collect();
        out.sort_by_key(|c| c.config_id);
        Ok(out)
    }

    async fn load_checks(&self, repository_id: Uuid) -> Result<Vec<Check>, CoreError> {
        let store = self.store.lock().await;
        let mut out: Vec<_> = store
            .checks
            .values()
            .filter(|(repo, _)| *repo == repository_id)
            .map(|(_, c)| c.clone())
            .collect();
        out.sort_by_key(|c| c.check_id);
        Ok(out)
    }

    async fn load_check_instances(
        &self,
        repository_id: Uuid,
    ) -> Result<Vec<CheckInstance>, CoreError> {
        let store = self.store.lock().await;
        let mut out: Vec<_> = store
            .instances
            .values()
            .filter(|r| !r.deleted && r.repository_id == repository_id)
            .map(|r| r.instance.clone())
            .collect();
        out.sort_by_key(|i| i.instance_id);
        Ok(out)
    }

    async fn reset_for_rebuild(
        &self,
        repository_id: Uuid,
        level: RebuildLevel,
    ) -> Result<(), CoreError> {
        let mut store = self.store.lock().await;
        if level == RebuildLevel::Checks {
            store.checks.retain(|_, (repo, _)| *repo != repository_id);
        }
        for rec in store.instances.values_mut() {
            if rec.repository_id == repository_id {
                rec.deleted = true;
            }
        }
        Ok(())
    }

    async fn begin(&self) -> Result<Box<dyn PersistenceTransaction>, CoreError> {
        Ok(Box::new(MemoryTransaction {
            store: self.store.clone(),
            faults: self.faults.lock().await.clone(),
            writes: Vec::new(),
        }))
    }

    async fn list_configurations(
        &self,
        status: ConfigurationStatus,
        limit: i64,
    ) -> Result<Vec<ConfigurationRecord>, CoreError> {
        let store = self.store.lock().await;
        let mut out: Vec<_> = store
            .configurations
            .values()
            .filter(|c| c.status == status)
            .cloned()
            .map(|c| store.with_instance_flag(c))
            .collect();
        out.sort_by_key(|c| (c.created_at, c.version));
        out.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(out)
    }

    async fn get_configuration(
        &self,
        configuration_id: Uuid,
    ) -> Result<Option<ConfigurationRecord>, CoreError> {
        let store = self.store.lock().await;
        Ok(store
            .configurations
            .get(&configuration_id)
            .cloned()
            .map(|c| store.with_instance_flag(c)))
    }

    async fn get_check_instance(
        &self,
        instance_id: Uuid,
    ) -> Result<Option<CheckInstanceRecord>, CoreError> {
        Ok(self.store.lock().await.instances.get(&instance_id).cloned())
    }

    async fn get_check(&self, check_id: Uuid) -> Result<Option<Check>, CoreError> {
        Ok(self
            .store
            .lock()
            .await
            .checks
            .get(&check_id)
            .map(|(_, c)| c.clone()))
    }

    async fn get_check_config(&self, config_id: Uuid) -> Result<Option<CheckConfig>, CoreError> {
        Ok(self
            .store
            .lock()
            .await
            .configs
            .get(&config_id)
            .map(|(c, _)| c.clone()))
    }

    async fn get_object(&self, object: ObjectRef) -> Result<Option<ObjectSnapshot>, CoreError> {
        Ok(self
            .store
            .lock()
            .await
            .objects
            .get(&object.object_id)
            .filter(|(s, _)| s.object.object_type == object.object_type)
            .map(|(s, _)| s.clone()))
    }

    async fn load_object_properties(
        &self,
        object: ObjectRef,
    ) -> Result<Vec<Property>, CoreError> {
        let store = self.store.lock().await;
        let mut out: Vec<_> = store
            .properties
            .values()
            .filter(|(_, p)| p.object == object)
            .map(|(_, p)| p.clone())
            .collect();
        out.sort_by_key(|p| p.instance_id);
        Ok(out)
    }

    async fn get_capability(
        &self,
        capability_id: Uuid,
    ) -> Result<Option<CapabilityRecord>, CoreError> {
        Ok(self
            .store
            .lock()
            .await
            .capabilities
            .get(&capability_id)
            .cloned())
    }

    async fn store_deployment_details(
        &self,
        configuration_id: Uuid,
        details: &serde_json::Value,
    ) -> Result<bool, CoreError> {
        let mut store = self.store.lock().await;
        match store.configurations.get_mut(&configuration_id) {
            Some(rec) if rec.status == ConfigurationStatus::AwaitingComputation => {
                rec.details = Some(details.clone());
                rec.status = ConfigurationStatus::Computed;
                rec.status_updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn prior_configuration(
        &self,
        configuration: &ConfigurationRecord,
    ) -> Result<Option<ConfigurationRecord>, CoreError> {
        let store = self.store.lock().await;
        Ok(store
            .configurations
            .values()
            .filter(|c| {
                c.check_instance_id == configuration.check_instance_id
                    && c.configuration_id != configuration.configuration_id
                    && c.version < configuration.version
                    && !c.status.is_terminal()
            })
            .max_by_key(|c| c.version)
            .cloned()
            .map(|c| store.with_instance_flag(c)))
    }

    async fn get_dependency(
        &self,
        blocked_id: Uuid,
    ) -> Result<Option<DependencyRecord>, CoreError> {
        Ok(self
            .store
            .lock()
            .await
            .dependencies
            .get(&blocked_id)
            .cloned())
    }

    async fn apply_ordering(
        &self,
        configuration_id: Uuid,
        decision: OrderingDecision,
    ) -> Result<bool, CoreError> {
        if self.faults.lock().await.fail_ordering {
            return Err(CoreError::persistence("apply_ordering", "injected failure"));
        }
        let mut store = self.store.lock().await;
        let computed = store
            .configurations
            .get(&configuration_id)
            .is_some_and(|c| c.status == ConfigurationStatus::Computed);
        if !computed {
            return Ok(false);
        }
        use ConfigurationStatus::*;
        match decision {
            OrderingDecision::Rollout => {
                store.set_status(configuration_id, AwaitingRollout, Some(true));
            }
            OrderingDecision::Discard => {
                store.set_status(configuration_id, AwaitingDeletion, Some(false));
            }
            OrderingDecision::Supersede { prior } => {
                store.set_status(prior, AwaitingDeletion, Some(false));
                store.set_status(configuration_id, AwaitingRollout, Some(true));
            }
            OrderingDecision::Block { prior, blocking } => {
                if prior != blocking {
                    store.set_status(prior, AwaitingDeletion, Some(false));
                    store.dependencies.remove(&prior);
                }
                store.set_status(configuration_id, Blocked, Some(false));
                store.dependencies.insert(
                    configuration_id,
                    DependencyRecord {
                        blocked_id: configuration_id,
                        blocking_id: blocking,
                        release_status: Deprovisioned,
                        created_at: Utc::now(),
                    },
                );
                let blocking_status = store.configurations.get(&blocking).map(|c| c.status);
                if matches!(
                    blocking_status,
                    Some(Active | RolloutInProgress | RolloutFailed)
                ) {
                    store.set_status(blocking, AwaitingDeprovision, None);
                }
            }
        }
        Ok(true)
    }

    async fn transition_configuration(
        &self,
        configuration_id: Uuid,
        from: ConfigurationStatus,
        to: ConfigurationStatus,
        update_available: Option<bool>,
    ) -> Result<bool, CoreError> {
        let mut store = self.store.lock().await;
        let current = store.configurations.get(&configuration_id).map(|c| c.status);
        if current != Some(from) {
            return Ok(false);
        }
        store.set_status(configuration_id, to, update_available);
        Ok(true)
    }

    async fn release_blocked(&self, configuration_id: Uuid) -> Result<bool, CoreError> {
        let mut store = self.store.lock().await;
        match store.configurations.get_mut(&configuration_id) {
            Some(rec) if rec.status == ConfigurationStatus::Blocked => {
                rec.status = ConfigurationStatus::AwaitingRollout;
                rec.next_status = Some(ConfigurationStatus::RolloutInProgress);
                rec.update_available = true;
                rec.status_updated_at = Utc::now();
            }
            _ => return Ok(false),
        }
        store.dependencies.remove(&configuration_id);
        Ok(true)
    }

    async fn delete_configuration(&self, configuration_id: Uuid) -> Result<(), CoreError> {
        let mut store = self.store.lock().await;
        store.configurations.remove(&configuration_id);
        store
            .dependencies
            .retain(|_, d| d.blocked_id != configuration_id && d.blocking_id != configuration_id);
        Ok(())
    }

    async fn purge_configurations(
        &self,
        statuses: &[ConfigurationStatus],
        older_than: DateTime<Utc>,
    ) -> Result<u64, CoreError> {
        let mut store = self.store.lock().await;
        let doomed: Vec<Uuid> = store
            .configurations
            .values()
            .filter(|c| statuses.contains(&c.status) && c.status_updated_at < older_than)
            .map(|c| c.configuration_id)
            .collect();
        for id in &doomed {
            store.configurations.remove(id);
            store
                .dependencies
                .retain(|_, d| d.blocked_id != *id && d.blocking_id != *id);
        }
        Ok(doomed.len() as u64)
    }

    async fn clear_update_available(&self, configuration_id: Uuid) -> Result<bool, CoreError> {
        let mut store = self.store.lock().await;
        match store.configurations.get_mut(&configuration_id) {
            Some(rec) if rec.update_available => {
                rec.update_available = false;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn upsert_capability(&self, capability: &CapabilityRecord) -> Result<(), CoreError> {
        self.store
            .lock()
            .await
            .capabilities
            .insert(capability.capability_id, capability.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo_snapshot(id: Uuid) -> ObjectSnapshot {
        ObjectSnapshot {
            object: ObjectRef::new(ObjectType::Repository, id),
            repository_id: id,
            name: "infra".into(),
            parent: None,
            state: ObjectState::Standalone,
            attributes: ObjectAttributes::Repository {
                team_id: Uuid::new_v4(),
            },
        }
    }

    #[tokio::test]
    async fn test_rollback_discards_writes() {
        let db = MemoryPersistence::new();
        let repo = Uuid::new_v4();
        let mut tx = db.begin().await.unwrap();
        tx.apply(&Action::Create(repo_snapshot(repo))).await.unwrap();
        tx.rollback().await.unwrap();
        assert!(db.get_repository(repo).await.unwrap().is_none());

        let mut tx = db.begin().await.unwrap();
        tx.apply(&Action::Create(repo_snapshot(repo))).await.unwrap();
        tx.commit().await.unwrap();
        assert!(db.get_repository(repo).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_injected_action_failure() {
        let db = MemoryPersistence::new();
        db.set_faults(Faults {
            fail_action: Some(ActionKind::Create),
            ..Default::default()
        })
        .await;
        let mut tx = db.begin().await.unwrap();
        let err = tx
            .apply(&Action::Create(repo_snapshot(Uuid::new_v4())))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "DATABASE_ERROR");
    }

    #[tokio::test]
    async fn test_broken_flag() {
        let db = MemoryPersistence::new();
        let repo = Uuid::new_v4();
        let mut tx = db.begin().await.unwrap();
        tx.apply(&Action::Create(repo_snapshot(repo))).await.unwrap();
        tx.commit().await.unwrap();

        db.mark_repository_broken(repo, "leftover actions").await.unwrap();
        assert!(db.is_repository_broken(repo).await.unwrap());
        db.clear_repository_broken(repo).await.unwrap();
        assert!(!db.is_repository_broken(repo).await.unwrap());
    }
}
