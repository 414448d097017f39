// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for vigil-lifecycle integration tests.
//!
//! A [`Harness`] runs repository workers, the deployment worker, the
//! lifecycle manager and feedback against one in-memory store, with a
//! [`RecordingNotifier`] standing in for monitoring systems.

#![allow(dead_code)]

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use vigil_core::Supervisor;
use vigil_core::config::WorkerConfig;
use vigil_core::model::{
    CheckConfig, ConfigurationStatus, Constraint, Job, JobAction, ObjectRef, ObjectType,
    PropertySpec, PropertyValue, Threshold, ThresholdPredicate,
};
use vigil_core::persistence::{
    CapabilityRecord, ConfigurationRecord, MemoryPersistence, Persistence,
};
use vigil_lifecycle::config::LifecycleConfig;
use vigil_lifecycle::deployment_worker::{DeploymentWorker, DeploymentWorkerConfig};
use vigil_lifecycle::feedback::Feedback;
use vigil_lifecycle::lifecycle_manager::LifecycleManager;
use vigil_lifecycle::notifier::RecordingNotifier;

pub const MONITORING_SYSTEM: &str = "prometheus";

/// Everything wired to one in-memory store.
pub struct Harness {
    pub persistence: Arc<MemoryPersistence>,
    pub supervisor: Supervisor,
    pub deployments: DeploymentWorker,
    pub manager: LifecycleManager,
    pub notifier: RecordingNotifier,
    pub feedback: Feedback,
    pub capability: CapabilityRecord,
}

/// A node with one check on it.
pub struct Monitored {
    pub repo: Uuid,
    pub bucket: ObjectRef,
    pub node: ObjectRef,
    pub config: CheckConfig,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_config(LifecycleConfig::default()).await
    }

    pub async fn with_config(config: LifecycleConfig) -> Self {
        let persistence = Arc::new(MemoryPersistence::new());
        let capability = CapabilityRecord {
            capability_id: Uuid::new_v4(),
            monitoring_system: MONITORING_SYSTEM.to_string(),
            callback_uri: "http://prometheus.invalid/poke".to_string(),
            metric: "disk.usage".to_string(),
            unit: "%".to_string(),
            description: "Disk usage".to_string(),
            view: "external".to_string(),
        };
        persistence.upsert_capability(&capability).await.unwrap();

        let notifier = RecordingNotifier::new();
        Self {
            supervisor: Supervisor::new(persistence.clone(), WorkerConfig::default()),
            deployments: DeploymentWorker::new(
                persistence.clone(),
                DeploymentWorkerConfig::default(),
            ),
            manager: LifecycleManager::new(
                persistence.clone(),
                Arc::new(notifier.clone()),
                config,
            ),
            feedback: Feedback::new(persistence.clone()),
            notifier,
            persistence,
            capability,
        }
    }

    /// Submit `action` and assert it committed.
    pub async fn ok(&self, repo: Uuid, action: JobAction) {
        let name = action.name();
        let result = match self.supervisor.submit(job(repo, action)).await {
            Ok(result) => result,
            Err(e) => panic!("submit refused: {}", e),
        };
        assert!(result.success, "{} failed: {:?}", name, result.error);
    }

    /// Repository, bucket carrying `dc=<dc>` with `view`, and a node
    /// below it with a disk check matching any `dc`.
    pub async fn monitored_node(&self, dc: &str, view: &str) -> Monitored {
        let repo = Uuid::new_v4();
        self.ok(
            repo,
            JobAction::CreateRepository {
                repository_id: repo,
                name: "infra".to_string(),
                team_id: Uuid::new_v4(),
            },
        )
        .await;
        let bucket_id = Uuid::new_v4();
        self.ok(
            repo,
            JobAction::CreateBucket {
                bucket_id,
                name: "live".to_string(),
                environment: "live".to_string(),
            },
        )
        .await;
        let node_id = Uuid::new_v4();
        self.ok(
            repo,
            JobAction::AssignNode {
                node_id,
                bucket_id,
                name: "db-01".to_string(),
                asset_id: 4711,
                server_id: Uuid::new_v4(),
                online: true,
            },
        )
        .await;
        let bucket = ObjectRef::new(ObjectType::Bucket, bucket_id);
        let node = ObjectRef::new(ObjectType::Node, node_id);
        self.set_dc(repo, bucket, dc, view).await;
        let config = disk_check(repo, node, self.capability.capability_id);
        self.ok(repo, JobAction::AddCheck(Box::new(config.clone())))
            .await;
        Monitored {
            repo,
            bucket,
            node,
            config,
        }
    }

    /// Attach `dc=<value>` with `view`; returns the property instance id.
    pub async fn set_dc(&self, repo: Uuid, object: ObjectRef, value: &str, view: &str) -> Uuid {
        let id = Uuid::new_v4();
        self.ok(
            repo,
            JobAction::SetProperty {
                object,
                property: PropertySpec {
                    instance_id: Some(id),
                    inheritance: true,
                    children_only: false,
                    view: view.to_string(),
                    value: PropertyValue::System {
                        key: "dc".to_string(),
                        value: value.to_string(),
                    },
                },
            },
        )
        .await;
        id
    }

    /// Shadow the bucket's `dc` on the node, giving the instance a new
    /// configuration.
    pub async fn override_dc(&self, m: &Monitored, value: &str, view: &str) -> Uuid {
        self.set_dc(m.repo, m.node, value, view).await
    }

    /// The single live check instance of the repository.
    pub async fn instance_id(&self, repo: Uuid) -> Uuid {
        let instances = self.persistence.live_instances(repo).await;
        assert_eq!(instances.len(), 1, "expected exactly one instance");
        instances[0].instance_id
    }

    /// Configurations of the repository's instance, oldest first.
    pub async fn configurations(&self, repo: Uuid) -> Vec<ConfigurationRecord> {
        let instance = self.instance_id(repo).await;
        self.persistence.configurations_of(instance).await
    }

    pub async fn status(&self, configuration_id: Uuid) -> Option<ConfigurationStatus> {
        self.persistence
            .get_configuration(configuration_id)
            .await
            .unwrap()
            .map(|c| c.status)
    }

    /// Drive a configuration from `awaiting_rollout` to `active`.
    pub async fn activate(&self, configuration_id: Uuid) {
        self.feedback.start_rollout(configuration_id).await.unwrap();
        self.feedback.finish_rollout(configuration_id).await.unwrap();
    }
}

pub fn job(repo: Uuid, action: JobAction) -> Job {
    Job {
        job_id: Uuid::new_v4(),
        repository_id: repo,
        user: "ops".to_string(),
        request_type: "test".to_string(),
        action,
        queued_at: Utc::now(),
        rebuild: false,
    }
}

pub fn disk_check(repo: Uuid, object: ObjectRef, capability_id: Uuid) -> CheckConfig {
    CheckConfig {
        config_id: Uuid::new_v4(),
        name: "disk usage".to_string(),
        repository_id: repo,
        bucket_id: None,
        object,
        capability_id,
        interval: 60,
        inheritance: true,
        children_only: false,
        thresholds: vec![Threshold {
            predicate: ThresholdPredicate::Greater,
            value: 90,
            level: "critical".to_string(),
        }],
        constraints: vec![Constraint::System {
            name: "dc".to_string(),
            value: "@defined".to_string(),
        }],
        is_active: true,
        is_enabled: true,
    }
}
