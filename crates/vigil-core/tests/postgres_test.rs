// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Worker pipeline against PostgreSQL.
//!
//! Requires `TEST_DATABASE_URL`; skipped otherwise.

mod common;

use common::*;
use uuid::Uuid;

use vigil_core::model::{ConfigurationStatus, JobStatus, ObjectType};
use vigil_core::persistence::{OrderingDecision, Persistence};

#[tokio::test]
async fn test_repository_round_trip() {
    skip_if_no_db!();
    let Some(ctx) = TestContext::postgres().await else {
        eprintln!("Skipping test: failed to create test context");
        return;
    };

    let (repo, b1) = ctx.seed().await;
    let n1 = Uuid::new_v4();
    ctx.ok(repo, assign_node(n1, b1, 11)).await;
    ctx.ok(repo, set_property(bucket(b1), system_property("dc", "fra", true)))
        .await;

    let record = ctx.persistence.get_repository(repo).await.unwrap().unwrap();
    assert!(!record.broken);
    let nodes = ctx
        .persistence
        .load_objects(repo, ObjectType::Node)
        .await
        .unwrap();
    assert_eq!(nodes.len(), 1);
    assert_eq!(nodes[0].parent, Some(bucket(b1)));
    assert_eq!(
        ctx.persistence
            .load_object_properties(node(n1))
            .await
            .unwrap()
            .len(),
        1
    );

    ctx.supervisor.shutdown().await;
}

#[tokio::test]
async fn test_job_status_is_recorded() {
    skip_if_no_db!();
    let Some(ctx) = TestContext::postgres().await else {
        eprintln!("Skipping test: failed to create test context");
        return;
    };

    let (repo, _) = ctx.seed().await;
    let submitted = job(repo, create_bucket(Uuid::new_v4()));
    let job_id = submitted.job_id;
    let result = ctx.supervisor.submit(submitted).await.unwrap();
    assert!(result.success);

    let record = ctx.persistence.get_job(job_id).await.unwrap().unwrap();
    assert_eq!(record.status, JobStatus::Success);
    assert_eq!(record.action, "create_bucket");
    assert!(record.finished_at.is_some());

    ctx.supervisor.shutdown().await;
}

#[tokio::test]
async fn test_restart_is_quiet_against_database() {
    skip_if_no_db!();
    let Some(ctx) = TestContext::postgres().await else {
        eprintln!("Skipping test: failed to create test context");
        return;
    };

    let (repo, b1) = ctx.seed().await;
    let g1 = Uuid::new_v4();
    let n1 = Uuid::new_v4();
    ctx.ok(repo, create_group(g1, b1)).await;
    ctx.ok(repo, assign_node(n1, b1, 12)).await;
    ctx.ok(repo, add_member(group(g1), node(n1))).await;
    ctx.ok(repo, set_property(group(g1), system_property("dc", "fra", true)))
        .await;
    ctx.ok(repo, add_check(check_config(repo, group(g1), "dc", "fra")))
        .await;
    let before = ctx.persistence.load_check_instances(repo).await.unwrap();
    assert_eq!(before.len(), 2);

    ctx.supervisor.stop(repo).await.unwrap();
    ctx.supervisor.start(repo);
    ctx.ok(repo, create_bucket(Uuid::new_v4())).await;

    assert!(!ctx.supervisor.is_broken(repo).unwrap());
    let after = ctx.persistence.load_check_instances(repo).await.unwrap();
    assert_eq!(before, after);

    ctx.supervisor.shutdown().await;
}

#[tokio::test]
async fn test_configuration_ordering_against_database() {
    skip_if_no_db!();
    let Some(ctx) = TestContext::postgres().await else {
        eprintln!("Skipping test: failed to create test context");
        return;
    };

    let (repo, b1) = ctx.seed().await;
    let n1 = Uuid::new_v4();
    ctx.ok(repo, assign_node(n1, b1, 13)).await;
    ctx.ok(repo, set_property(node(n1), system_property("dc", "fra", false)))
        .await;
    ctx.ok(repo, add_check(check_config(repo, node(n1), "dc", "fra")))
        .await;
    let instance = ctx
        .persistence
        .load_check_instances(repo)
        .await
        .unwrap()
        .remove(0);
    let configuration_id = instance.configuration_id;

    let stored = ctx
        .persistence
        .store_deployment_details(configuration_id, &serde_json::json!({"checks": 1}))
        .await
        .unwrap();
    assert!(stored);
    // Only once.
    assert!(
        !ctx.persistence
            .store_deployment_details(configuration_id, &serde_json::json!({}))
            .await
            .unwrap()
    );

    let applied = ctx
        .persistence
        .apply_ordering(configuration_id, OrderingDecision::Rollout)
        .await
        .unwrap();
    assert!(applied);
    let record = ctx
        .persistence
        .get_configuration(configuration_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, ConfigurationStatus::AwaitingRollout);
    assert!(record.update_available);
    assert!(!record.instance_deleted);

    ctx.supervisor.shutdown().await;
}
