// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for vigil-core integration tests.
//!
//! Provides job builders and a [`TestContext`] wiring a supervisor to either
//! the in-memory backend or a PostgreSQL database from `TEST_DATABASE_URL`.

#![allow(dead_code)]

use std::sync::Arc;

use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use vigil_core::config::WorkerConfig;
use vigil_core::model::{
    CheckConfig, Constraint, Job, JobAction, JobResult, ObjectRef, ObjectType, PropertySpec,
    PropertyValue, Threshold, ThresholdPredicate,
};
use vigil_core::persistence::{MemoryPersistence, Persistence, PostgresPersistence};
use vigil_core::Supervisor;

const SCHEMA: &str = include_str!("../../migrations/schema.sql");

/// Skip the test when no database is configured.
#[macro_export]
macro_rules! skip_if_no_db {
    () => {
        if std::env::var("TEST_DATABASE_URL").is_err() {
            eprintln!("Skipping test: TEST_DATABASE_URL not set");
            return;
        }
    };
}

/// A supervisor over one persistence backend.
pub struct TestContext<P: Persistence + 'static> {
    pub persistence: Arc<P>,
    pub supervisor: Supervisor,
}

impl TestContext<MemoryPersistence> {
    /// Context backed by the in-memory store.
    pub fn memory() -> Self {
        let persistence = Arc::new(MemoryPersistence::new());
        let supervisor = Supervisor::new(persistence.clone(), WorkerConfig::default());
        Self {
            persistence,
            supervisor,
        }
    }
}

impl TestContext<PostgresPersistence> {
    /// Context backed by the database at `TEST_DATABASE_URL`.
    ///
    /// Applies the schema before returning.
    pub async fn postgres() -> Option<Self> {
        let database_url = std::env::var("TEST_DATABASE_URL").ok()?;
        let pool = PgPool::connect(&database_url).await.ok()?;
        sqlx::raw_sql(SCHEMA).execute(&pool).await.ok()?;
        let persistence = Arc::new(PostgresPersistence::new(pool));
        let supervisor = Supervisor::new(persistence.clone(), WorkerConfig::default());
        Some(Self {
            persistence,
            supervisor,
        })
    }
}

impl<P: Persistence + 'static> TestContext<P> {
    /// Submit `action` for `repo` and return the result.
    pub async fn run(&self, repo: Uuid, action: JobAction) -> JobResult {
        match self.supervisor.submit(job(repo, action)).await {
            Ok(result) => result,
            Err(e) => panic!("submit refused: {}", e),
        }
    }

    /// Submit `action` and assert it committed.
    pub async fn ok(&self, repo: Uuid, action: JobAction) {
        let name = action.name();
        let result = self.run(repo, action).await;
        assert!(result.success, "{} failed: {:?}", name, result.error);
    }

    /// Create a repository with one bucket; returns `(repository, bucket)`.
    pub async fn seed(&self) -> (Uuid, Uuid) {
        let repo = Uuid::new_v4();
        self.ok(repo, create_repository(repo)).await;
        let bucket = Uuid::new_v4();
        self.ok(repo, create_bucket(bucket)).await;
        (repo, bucket)
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

pub fn create_repository(repo: Uuid) -> JobAction {
    JobAction::CreateRepository {
        repository_id: repo,
        name: "infra".to_string(),
        team_id: Uuid::new_v4(),
    }
}

pub fn create_bucket(bucket: Uuid) -> JobAction {
    JobAction::CreateBucket {
        bucket_id: bucket,
        name: "live".to_string(),
        environment: "live".to_string(),
    }
}

pub fn create_group(group: Uuid, bucket: Uuid) -> JobAction {
    JobAction::CreateGroup {
        group_id: group,
        bucket_id: bucket,
        name: format!("group-{}", &group.to_string()[..8]),
    }
}

pub fn assign_node(node: Uuid, bucket: Uuid, asset_id: u64) -> JobAction {
    JobAction::AssignNode {
        node_id: node,
        bucket_id: bucket,
        name: format!("node-{}", asset_id),
        asset_id,
        server_id: Uuid::new_v4(),
        online: true,
    }
}

pub fn add_member(parent: ObjectRef, member: ObjectRef) -> JobAction {
    JobAction::AddMember { parent, member }
}

pub fn system_property(key: &str, value: &str, inheritance: bool) -> PropertySpec {
    PropertySpec {
        instance_id: None,
        inheritance,
        children_only: false,
        view: "any".to_string(),
        value: PropertyValue::System {
            key: key.to_string(),
            value: value.to_string(),
        },
    }
}

pub fn set_property(object: ObjectRef, property: PropertySpec) -> JobAction {
    JobAction::SetProperty { object, property }
}

/// Check configuration with one `system` constraint and one threshold.
pub fn check_config(repo: Uuid, object: ObjectRef, key: &str, value: &str) -> CheckConfig {
    CheckConfig {
        config_id: Uuid::new_v4(),
        name: "disk usage".to_string(),
        repository_id: repo,
        bucket_id: None,
        object,
        capability_id: Uuid::new_v4(),
        interval: 60,
        inheritance: true,
        children_only: false,
        thresholds: vec![Threshold {
            predicate: ThresholdPredicate::Greater,
            value: 90,
            level: "critical".to_string(),
        }],
        constraints: vec![Constraint::System {
            name: key.to_string(),
            value: value.to_string(),
        }],
        is_active: true,
        is_enabled: true,
    }
}

pub fn add_check(config: CheckConfig) -> JobAction {
    JobAction::AddCheck(Box::new(config))
}

pub fn node(id: Uuid) -> ObjectRef {
    ObjectRef::new(ObjectType::Node, id)
}

pub fn bucket(id: Uuid) -> ObjectRef {
    ObjectRef::new(ObjectType::Bucket, id)
}

pub fn group(id: Uuid) -> ObjectRef {
    ObjectRef::new(ObjectType::Group, id)
}
