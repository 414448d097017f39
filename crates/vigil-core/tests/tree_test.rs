// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration tree behaviour through its public API.

use uuid::Uuid;

use vigil_core::model::{
    CheckConfig, Constraint, ObjectAttributes, ObjectRef, ObjectState, ObjectType, PropertySpec,
    PropertyValue,
};
use vigil_core::tree::{Action, ActionKind, ConfigTree, NewObject, TreeError};

struct Fixture {
    tree: ConfigTree,
    repo: ObjectRef,
    bucket: ObjectRef,
}

fn fixture() -> Fixture {
    let repo_id = Uuid::new_v4();
    let mut tree = ConfigTree::new(repo_id, 4096);
    tree.attach(
        NewObject::new(
            repo_id,
            "R1",
            ObjectAttributes::Repository {
                team_id: Uuid::new_v4(),
            },
        ),
        None,
    )
    .unwrap();
    let repo = ObjectRef::new(ObjectType::Repository, repo_id);
    let bucket = ObjectRef::new(ObjectType::Bucket, Uuid::new_v4());
    tree.attach(
        NewObject::new(
            bucket.object_id,
            "B1",
            ObjectAttributes::Bucket {
                environment: "live".into(),
                frozen: false,
            },
        ),
        Some(repo),
    )
    .unwrap();
    tree.drain_actions();
    Fixture { tree, repo, bucket }
}

fn add_node(tree: &mut ConfigTree, bucket: ObjectRef, name: &str) -> ObjectRef {
    let node = ObjectRef::new(ObjectType::Node, Uuid::new_v4());
    tree.assign_node(
        NewObject::new(
            node.object_id,
            name,
            ObjectAttributes::Node {
                asset_id: 7,
                server_id: Uuid::new_v4(),
                online: true,
            },
        ),
        bucket,
    )
    .unwrap();
    node
}

fn add_group(tree: &mut ConfigTree, bucket: ObjectRef, name: &str) -> ObjectRef {
    let group = ObjectRef::new(ObjectType::Group, Uuid::new_v4());
    tree.attach(
        NewObject::new(group.object_id, name, ObjectAttributes::Group),
        Some(bucket),
    )
    .unwrap();
    group
}

fn dc(value: &str, children_only: bool) -> PropertySpec {
    PropertySpec {
        instance_id: None,
        inheritance: true,
        children_only,
        view: "any".into(),
        value: PropertyValue::System {
            key: "dc".into(),
            value: value.into(),
        },
    }
}

fn native_check(repo: Uuid, object: ObjectRef, property: &str, value: &str) -> CheckConfig {
    CheckConfig {
        config_id: Uuid::new_v4(),
        name: "ping".into(),
        repository_id: repo,
        bucket_id: None,
        object,
        capability_id: Uuid::new_v4(),
        interval: 30,
        inheritance: true,
        children_only: false,
        thresholds: vec![],
        constraints: vec![Constraint::Native {
            property: property.into(),
            value: value.into(),
        }],
        is_active: true,
        is_enabled: true,
    }
}

fn system_value(tree: &ConfigTree, object: ObjectRef, key: &str) -> Option<(String, Uuid)> {
    tree.get(object)
        .unwrap()
        .effective_properties()
        .find_map(|p| match &p.value {
            PropertyValue::System { key: k, value } if k == key => {
                Some((value.clone(), p.source_instance_id))
            }
            _ => None,
        })
}

#[test]
fn test_bucket_property_reaches_node() {
    let Fixture {
        mut tree, bucket, ..
    } = fixture();
    let node = add_node(&mut tree, bucket, "N1");

    let origin = tree.set_property(bucket, dc("fra", false)).unwrap();

    let (value, source) = system_value(&tree, node, "dc").unwrap();
    assert_eq!(value, "fra");
    assert_eq!(source, origin);

    let new_properties = tree
        .drain_actions()
        .into_iter()
        .filter(|a| a.kind() == ActionKind::PropertyNew)
        .count();
    assert_eq!(new_properties, 2);
}

#[test]
fn test_node_assigned_later_inherits() {
    let Fixture {
        mut tree, bucket, ..
    } = fixture();
    let origin = tree.set_property(bucket, dc("fra", false)).unwrap();
    let node = add_node(&mut tree, bucket, "N1");

    assert_eq!(system_value(&tree, node, "dc").unwrap().1, origin);
}

#[test]
fn test_closer_property_shadows_inherited() {
    let Fixture {
        mut tree, bucket, ..
    } = fixture();
    let group = add_group(&mut tree, bucket, "G1");
    let node = add_node(&mut tree, bucket, "N1");
    tree.reattach(node, group).unwrap();

    tree.set_property(bucket, dc("fra", false)).unwrap();
    let closer = tree.set_property(group, dc("ams", false)).unwrap();

    assert_eq!(
        system_value(&tree, node, "dc"),
        Some(("ams".to_string(), closer))
    );
    assert_eq!(system_value(&tree, group, "dc").unwrap().0, "ams");
}

#[test]
fn test_children_only_property_skips_carrier() {
    let Fixture {
        mut tree, bucket, ..
    } = fixture();
    let node = add_node(&mut tree, bucket, "N1");
    tree.set_property(bucket, dc("fra", true)).unwrap();

    assert!(system_value(&tree, bucket, "dc").is_none());
    assert_eq!(system_value(&tree, node, "dc").unwrap().0, "fra");
}

#[test]
fn test_deleting_property_removes_copies() {
    let Fixture {
        mut tree, bucket, ..
    } = fixture();
    let node = add_node(&mut tree, bucket, "N1");
    let origin = tree.set_property(bucket, dc("fra", false)).unwrap();
    tree.drain_actions();

    tree.delete_property(bucket, origin).unwrap();

    assert!(system_value(&tree, node, "dc").is_none());
    let removed = tree
        .drain_actions()
        .into_iter()
        .filter(|a| a.kind() == ActionKind::PropertyDelete)
        .count();
    assert_eq!(removed, 2);
}

#[test]
fn test_group_check_covers_members() {
    let Fixture {
        mut tree, bucket, ..
    } = fixture();
    let group = add_group(&mut tree, bucket, "G1");
    let node = add_node(&mut tree, bucket, "N2");
    tree.reattach(node, group).unwrap();

    tree.set_check(native_check(tree.repository_id(), group, "object_id", "@defined"))
        .unwrap();
    tree.compute_check_instances().unwrap();

    let mut objects: Vec<ObjectRef> = tree.instances().map(|i| i.object).collect();
    objects.sort_by_key(|o| o.object_type);
    assert_eq!(objects, vec![group, node]);
}

#[test]
fn test_unmatched_object_gets_no_instance() {
    let Fixture {
        mut tree, bucket, ..
    } = fixture();
    let group = add_group(&mut tree, bucket, "G1");
    let node = add_node(&mut tree, bucket, "N2");
    tree.reattach(node, group).unwrap();

    // Groups carry no `online` attribute.
    tree.set_check(native_check(tree.repository_id(), group, "online", "true"))
        .unwrap();
    tree.compute_check_instances().unwrap();

    let objects: Vec<ObjectRef> = tree.instances().map(|i| i.object).collect();
    assert_eq!(objects, vec![node]);
}

#[test]
fn test_compute_is_idempotent() {
    let Fixture {
        mut tree, bucket, ..
    } = fixture();
    add_node(&mut tree, bucket, "N1");
    tree.set_check(native_check(tree.repository_id(), bucket, "name", "@defined"))
        .unwrap();

    tree.compute_check_instances().unwrap();
    let first = tree.drain_actions();
    assert!(
        first
            .iter()
            .any(|a| a.kind() == ActionKind::CheckInstanceCreate)
    );

    tree.compute_check_instances().unwrap();
    assert!(tree.drain_actions().is_empty());
}

#[test]
fn test_value_change_bumps_instance_version() {
    let Fixture {
        mut tree, bucket, ..
    } = fixture();
    let node = add_node(&mut tree, bucket, "N1");
    let origin = tree.set_property(node, dc("fra", false)).unwrap();
    let mut config = native_check(tree.repository_id(), node, "name", "@defined");
    config.constraints = vec![Constraint::System {
        name: "dc".into(),
        value: "@defined".into(),
    }];
    tree.set_check(config).unwrap();
    tree.compute_check_instances().unwrap();
    let before = tree.instances().next().unwrap().clone();
    tree.drain_actions();

    tree.delete_property(node, origin).unwrap();
    tree.set_property(node, dc("ams", false)).unwrap();
    tree.compute_check_instances().unwrap();

    let updated: Vec<_> = tree
        .drain_actions()
        .into_iter()
        .filter_map(|a| match a {
            Action::CheckInstanceUpdate(i) => Some(i),
            _ => None,
        })
        .collect();
    assert_eq!(updated.len(), 1);
    assert_eq!(updated[0].instance_id, before.instance_id);
    assert_eq!(updated[0].version, before.version + 1);
    assert_ne!(updated[0].configuration_id, before.configuration_id);
}

#[test]
fn test_reattach_keeps_single_parent() {
    let Fixture {
        mut tree, bucket, ..
    } = fixture();
    let g1 = add_group(&mut tree, bucket, "G1");
    let g2 = add_group(&mut tree, bucket, "G2");
    let node = add_node(&mut tree, bucket, "N1");

    tree.reattach(node, g1).unwrap();
    tree.reattach(node, g2).unwrap();

    assert_eq!(tree.get(node).unwrap().parent, Some(g2));
    assert_eq!(tree.get(node).unwrap().state, ObjectState::Grouped);
    assert!(!tree.get(g1).unwrap().children.contains(&node));
    assert!(tree.get(g2).unwrap().children.contains(&node));
    assert!(!tree.get(bucket).unwrap().children.contains(&node));
}

#[test]
fn test_group_cannot_join_its_descendant() {
    let Fixture {
        mut tree, bucket, ..
    } = fixture();
    let outer = add_group(&mut tree, bucket, "outer");
    let inner = add_group(&mut tree, bucket, "inner");
    tree.reattach(inner, outer).unwrap();

    let err = tree.reattach(outer, inner).unwrap_err();
    assert!(matches!(err, TreeError::InvalidMove(_)), "{:?}", err);
    assert_eq!(tree.get(outer).unwrap().parent, Some(bucket));
}

#[test]
fn test_reattach_swaps_inherited_entries() {
    let Fixture {
        mut tree, bucket, ..
    } = fixture();
    let g1 = add_group(&mut tree, bucket, "G1");
    let g2 = add_group(&mut tree, bucket, "G2");
    let node = add_node(&mut tree, bucket, "N1");
    tree.reattach(node, g1).unwrap();
    let fra = tree.set_property(g1, dc("fra", false)).unwrap();
    let ams = tree.set_property(g2, dc("ams", false)).unwrap();
    let c1 = native_check(tree.repository_id(), g1, "name", "@defined");
    let c2 = native_check(tree.repository_id(), g2, "name", "@defined");
    tree.set_check(c1.clone()).unwrap();
    tree.set_check(c2.clone()).unwrap();
    assert_eq!(system_value(&tree, node, "dc").unwrap().1, fra);
    tree.drain_actions();

    tree.reattach(node, g2).unwrap();

    assert_eq!(system_value(&tree, node, "dc"), Some(("ams".to_string(), ams)));
    let checks: Vec<(Uuid, ObjectRef)> = tree
        .get(node)
        .unwrap()
        .checks
        .iter()
        .map(|c| (c.config_id, c.inherited_from))
        .collect();
    assert_eq!(checks, vec![(c2.config_id, g2)]);

    let kinds: Vec<ActionKind> = tree.drain_actions().iter().map(Action::kind).collect();
    let position = |kind: ActionKind| kinds.iter().position(|k| *k == kind).unwrap();
    assert!(position(ActionKind::MemberRemoved) < position(ActionKind::MemberNew));
    let last_retraction =
        position(ActionKind::PropertyDelete).max(position(ActionKind::CheckRemoved));
    let first_addition = position(ActionKind::PropertyNew).min(position(ActionKind::CheckNew));
    assert!(last_retraction < first_addition, "{:?}", kinds);
    assert_eq!(kinds.iter().filter(|k| **k == ActionKind::PropertyDelete).count(), 1);
    assert_eq!(kinds.iter().filter(|k| **k == ActionKind::CheckNew).count(), 1);
}

#[test]
fn test_reattach_across_buckets_is_refused() {
    let Fixture {
        mut tree,
        repo,
        bucket,
    } = fixture();
    let other = ObjectRef::new(ObjectType::Bucket, Uuid::new_v4());
    tree.attach(
        NewObject::new(
            other.object_id,
            "B2",
            ObjectAttributes::Bucket {
                environment: "qa".into(),
                frozen: false,
            },
        ),
        Some(repo),
    )
    .unwrap();
    let foreign = add_group(&mut tree, other, "G9");
    let node = add_node(&mut tree, bucket, "N1");
    tree.drain_actions();

    let err = tree.reattach(node, foreign).unwrap_err();

    assert!(matches!(err, TreeError::InvalidMove(_)), "{:?}", err);
    assert_eq!(tree.get(node).unwrap().parent, Some(bucket));
    assert!(!tree.get(foreign).unwrap().children.contains(&node));
    assert!(tree.drain_actions().is_empty());
}

#[test]
fn test_rollback_restores_last_commit() {
    let Fixture {
        mut tree,
        repo,
        bucket,
    } = fixture();
    tree.begin().unwrap();
    let node = add_node(&mut tree, bucket, "N1");
    tree.set_property(bucket, dc("fra", false)).unwrap();
    tree.rollback().unwrap();

    assert!(tree.get(node).is_err());
    assert!(system_value(&tree, bucket, "dc").is_none());
    assert_eq!(tree.pending(), (0, 0));
    assert_eq!(tree.root().map(|r| r.to_ref()), Some(repo));
}

#[test]
fn test_begin_with_pending_output_is_fatal() {
    let Fixture {
        mut tree, bucket, ..
    } = fixture();
    add_node(&mut tree, bucket, "N1");

    assert!(tree.begin().is_err());
    assert!(tree.fatal().is_some());
}
