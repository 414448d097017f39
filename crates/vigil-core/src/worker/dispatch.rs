// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mapping of job actions onto tree mutations.

use uuid::Uuid;

use crate::error::CoreError;
use crate::model::{CheckConfig, JobAction, ObjectAttributes, ObjectRef, ObjectType};
use crate::tree::{ConfigTree, NewObject};

/// Writes a job needs besides the tree's Actions.
#[derive(Debug, Default)]
pub(crate) struct SideWrites {
    /// Stored before any Action.
    pub(crate) save_configs: Vec<CheckConfig>,
    /// Flagged deleted after every Action.
    pub(crate) delete_configs: Vec<Uuid>,
}

fn repository_root(tree: &ConfigTree) -> Result<ObjectRef, CoreError> {
    tree.root()
        .map(|r| r.to_ref())
        .ok_or_else(|| CoreError::not_found("repository", tree.repository_id()))
}

/// Detach `object` and collect the configurations anchored at it.
fn remove(tree: &mut ConfigTree, object: ObjectRef) -> Result<SideWrites, CoreError> {
    let anchored = tree.configs_anchored_at(object);
    tree.detach(object)?;
    Ok(SideWrites {
        save_configs: Vec::new(),
        delete_configs: anchored,
    })
}

/// Apply one job action to the tree.
pub(crate) fn dispatch(tree: &mut ConfigTree, action: &JobAction) -> Result<SideWrites, CoreError> {
    let bucket = |id: Uuid| ObjectRef::new(ObjectType::Bucket, id);
    match action {
        JobAction::CreateRepository {
            repository_id,
            name,
            team_id,
        } => {
            if *repository_id != tree.repository_id() {
                return Err(CoreError::Validation {
                    field: "repository_id".to_string(),
                    message: format!("job routed to repository {}", tree.repository_id()),
                });
            }
            tree.attach(
                NewObject::new(
                    *repository_id,
                    name.clone(),
                    ObjectAttributes::Repository { team_id: *team_id },
                ),
                None,
            )?;
        }
        JobAction::CreateBucket {
            bucket_id,
            name,
            environment,
        } => {
            let root = repository_root(tree)?;
            tree.attach(
                NewObject::new(
                    *bucket_id,
                    name.clone(),
                    ObjectAttributes::Bucket {
                        environment: environment.clone(),
                        frozen: false,
                    },
                ),
                Some(root),
            )?;
        }
        JobAction::CreateGroup {
            group_id,
            bucket_id,
            name,
        } => {
            tree.attach(
                NewObject::new(*group_id, name.clone(), ObjectAttributes::Group),
                Some(bucket(*bucket_id)),
            )?;
        }
        JobAction::CreateCluster {
            cluster_id,
            bucket_id,
            name,
        } => {
            tree.attach(
                NewObject::new(*cluster_id, name.clone(), ObjectAttributes::Cluster),
                Some(bucket(*bucket_id)),
            )?;
        }
        JobAction::AssignNode {
            node_id,
            bucket_id,
            name,
            asset_id,
            server_id,
            online,
        } => {
            tree.assign_node(
                NewObject::new(
                    *node_id,
                    name.clone(),
                    ObjectAttributes::Node {
                        asset_id: *asset_id,
                        server_id: *server_id,
                        online: *online,
                    },
                ),
                bucket(*bucket_id),
            )?;
        }
        JobAction::DeleteBucket { bucket_id } => return remove(tree, bucket(*bucket_id)),
        JobAction::DeleteGroup { group_id } => {
            return remove(tree, ObjectRef::new(ObjectType::Group, *group_id));
        }
        JobAction::DeleteCluster { cluster_id } => {
            return remove(tree, ObjectRef::new(ObjectType::Cluster, *cluster_id));
        }
        JobAction::UnassignNode { node_id } => {
            return remove(tree, ObjectRef::new(ObjectType::Node, *node_id));
        }
        JobAction::AddMember { parent, member } => {
            tree.reattach(*member, *parent)?;
        }
        JobAction::RemoveMember { member } => {
            let home = tree
                .bucket_of(member.object_id)?
                .ok_or_else(|| CoreError::not_found(member.object_type.as_str(), member.object_id))?;
            tree.reattach(*member, home)?;
        }
        JobAction::SetProperty { object, property } => {
            tree.set_property(*object, property.clone())?;
        }
        JobAction::DeleteProperty {
            object,
            source_instance_id,
        } => {
            tree.delete_property(*object, *source_instance_id)?;
        }
        JobAction::AddCheck(config) => {
            if config.repository_id != tree.repository_id() {
                return Err(CoreError::Validation {
                    field: "repository_id".to_string(),
                    message: format!(
                        "check configuration belongs to {}, not {}",
                        config.repository_id,
                        tree.repository_id()
                    ),
                });
            }
            tree.set_check((**config).clone())?;
            return Ok(SideWrites {
                save_configs: vec![(**config).clone()],
                delete_configs: Vec::new(),
            });
        }
        JobAction::RemoveCheck { config_id } => {
            tree.delete_check(*config_id)?;
            return Ok(SideWrites {
                save_configs: Vec::new(),
                delete_configs: vec![*config_id],
            });
        }
    }
    Ok(SideWrites::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{PropertySpec, PropertyValue};
    use crate::tree::Action;

    fn seeded() -> (ConfigTree, Uuid) {
        let repo = Uuid::new_v4();
        let mut tree = ConfigTree::new(repo, 1024);
        dispatch(
            &mut tree,
            &JobAction::CreateRepository {
                repository_id: repo,
                name: "infra".into(),
                team_id: Uuid::new_v4(),
            },
        )
        .unwrap();
        let bucket = Uuid::new_v4();
        dispatch(
            &mut tree,
            &JobAction::CreateBucket {
                bucket_id: bucket,
                name: "live".into(),
                environment: "live".into(),
            },
        )
        .unwrap();
        tree.drain_actions();
        (tree, bucket)
    }

    #[test]
    fn test_create_repository_must_match_worker() {
        let mut tree = ConfigTree::new(Uuid::new_v4(), 16);
        let err = dispatch(
            &mut tree,
            &JobAction::CreateRepository {
                repository_id: Uuid::new_v4(),
                name: "x".into(),
                team_id: Uuid::new_v4(),
            },
        )
        .unwrap_err();
        assert_eq!(err.error_code(), "VALIDATION_ERROR");
        assert!(tree.is_empty());
    }

    #[test]
    fn test_remove_member_returns_to_bucket() {
        let (mut tree, bucket) = seeded();
        let group = Uuid::new_v4();
        let node = Uuid::new_v4();
        dispatch(
            &mut tree,
            &JobAction::CreateGroup {
                group_id: group,
                bucket_id: bucket,
                name: "web".into(),
            },
        )
        .unwrap();
        dispatch(
            &mut tree,
            &JobAction::AssignNode {
                node_id: node,
                bucket_id: bucket,
                name: "web-01".into(),
                asset_id: 1,
                server_id: Uuid::new_v4(),
                online: true,
            },
        )
        .unwrap();
        let member = ObjectRef::new(ObjectType::Node, node);
        dispatch(
            &mut tree,
            &JobAction::AddMember {
                parent: ObjectRef::new(ObjectType::Group, group),
                member,
            },
        )
        .unwrap();
        tree.drain_actions();

        dispatch(&mut tree, &JobAction::RemoveMember { member }).unwrap();
        let actions = tree.drain_actions();
        assert!(matches!(actions[0], Action::MemberRemoved { .. }));
        assert_eq!(
            tree.get(member).unwrap().parent,
            Some(ObjectRef::new(ObjectType::Bucket, bucket))
        );
    }

    #[test]
    fn test_delete_group_collects_anchored_configs() {
        let (mut tree, bucket) = seeded();
        let group = ObjectRef::new(ObjectType::Group, Uuid::new_v4());
        dispatch(
            &mut tree,
            &JobAction::CreateGroup {
                group_id: group.object_id,
                bucket_id: bucket,
                name: "db".into(),
            },
        )
        .unwrap();
        let config = CheckConfig {
            config_id: Uuid::new_v4(),
            name: "disk".into(),
            repository_id: tree.repository_id(),
            bucket_id: None,
            object: group,
            capability_id: Uuid::new_v4(),
            interval: 60,
            inheritance: true,
            children_only: false,
            thresholds: vec![],
            constraints: vec![],
            is_active: true,
            is_enabled: true,
        };
        let side = dispatch(&mut tree, &JobAction::AddCheck(Box::new(config.clone()))).unwrap();
        assert_eq!(side.save_configs, vec![config.clone()]);
        tree.drain_actions();

        let side = dispatch(
            &mut tree,
            &JobAction::DeleteGroup {
                group_id: group.object_id,
            },
        )
        .unwrap();
        assert_eq!(side.delete_configs, vec![config.config_id]);
        assert!(tree.check_config(config.config_id).is_none());
    }

    #[test]
    fn test_set_property_on_missing_object() {
        let (mut tree, _) = seeded();
        let err = dispatch(
            &mut tree,
            &JobAction::SetProperty {
                object: ObjectRef::new(ObjectType::Node, Uuid::new_v4()),
                property: PropertySpec {
                    instance_id: None,
                    inheritance: false,
                    children_only: false,
                    view: "any".into(),
                    value: PropertyValue::System {
                        key: "dc".into(),
                        value: "fra".into(),
                    },
                },
            },
        )
        .unwrap_err();
        assert_eq!(err.error_code(), "NOT_FOUND");
    }
}
