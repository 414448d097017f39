// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Rebuilding a tree from persisted state.
//!
//! Restore operations insert objects, properties, checks and instances with
//! their persisted ids and emit nothing. [`ConfigTree::reconcile`] then
//! re-derives everything; a consistent store produces no Action at all.

use super::{ConfigTree, ObjectSnapshot, TreeError, TreeObject};
use crate::model::{Check, CheckConfig, CheckInstance, ObjectType, Property};

impl ConfigTree {
    /// Insert a persisted object below its (already restored) parent.
    pub fn restore_object(&mut self, snapshot: &ObjectSnapshot) -> Result<(), TreeError> {
        let r = snapshot.object;
        if self.state.objects.contains_key(&r.object_id) {
            return Err(TreeError::Duplicate(format!("{}", r)));
        }
        match snapshot.parent {
            None if r.object_type == ObjectType::Repository => {
                if self.state.root.is_some() {
                    return Err(TreeError::Duplicate("repository root".to_string()));
                }
                self.state.root = Some(r.object_id);
            }
            None => {
                return Err(TreeError::InvalidMove(format!("{} has no parent", r)));
            }
            Some(p) => {
                let host = self.get_mut(p).map_err(|_| TreeError::ParentNotFound(p))?;
                if !host.object_type().can_host(r.object_type) {
                    return Err(TreeError::TypeMismatch {
                        parent: p.object_type,
                        child: r.object_type,
                    });
                }
                host.children.push(r);
            }
        }
        self.state
            .objects
            .insert(r.object_id, TreeObject::from_snapshot(snapshot));
        Ok(())
    }

    /// Insert a persisted property instance.
    pub fn restore_property(&mut self, property: Property) -> Result<(), TreeError> {
        let obj = self.get_mut(property.object)?;
        if obj
            .properties
            .iter()
            .any(|p| p.instance_id == property.instance_id)
        {
            return Err(TreeError::Duplicate(format!(
                "property instance {}",
                property.instance_id
            )));
        }
        obj.properties.push(property);
        Ok(())
    }

    /// Register a persisted check configuration.
    pub fn restore_check_config(&mut self, config: CheckConfig) -> Result<(), TreeError> {
        if self.state.configs.contains_key(&config.config_id) {
            return Err(TreeError::Duplicate(format!(
                "check configuration {}",
                config.config_id
            )));
        }
        self.state.configs.insert(config.config_id, config);
        Ok(())
    }

    /// Insert a persisted check.
    pub fn restore_check(&mut self, check: Check) -> Result<(), TreeError> {
        if !self.state.configs.contains_key(&check.config_id) {
            return Err(TreeError::CheckConfigNotFound(check.config_id));
        }
        let obj = self.get_mut(check.object)?;
        if obj.checks.iter().any(|c| c.check_id == check.check_id) {
            return Err(TreeError::Duplicate(format!("check {}", check.check_id)));
        }
        obj.checks.push(check);
        Ok(())
    }

    /// Insert a persisted check instance.
    pub fn restore_instance(&mut self, instance: CheckInstance) -> Result<(), TreeError> {
        self.get(instance.object)?;
        let key = (
            instance.config_id,
            instance.object.object_id,
            instance.service.clone(),
        );
        if self.state.instances.contains_key(&key) {
            return Err(TreeError::Duplicate(format!(
                "check instance {}",
                instance.instance_id
            )));
        }
        self.state.instances.insert(key, instance);
        Ok(())
    }

    /// Re-derive inheritance and instances over the whole tree.
    ///
    /// After a restore of consistent state this emits nothing.
    pub fn reconcile(&mut self) -> Result<(), TreeError> {
        if let Some(root) = self.root().map(|r| r.to_ref()) {
            self.resync_all(root)?;
        }
        self.compute_check_instances()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ObjectAttributes, ObjectRef, ObjectState, PropertySpec, PropertyValue};
    use crate::tree::NewObject;
    use uuid::Uuid;

    #[test]
    fn test_restore_round_trip_is_quiet() {
        let repo = Uuid::new_v4();
        let mut live = ConfigTree::new(repo, 1024);
        live.attach(
            NewObject::new(
                repo,
                "r",
                ObjectAttributes::Repository {
                    team_id: Uuid::new_v4(),
                },
            ),
            None,
        )
        .unwrap();
        let bucket = ObjectRef::new(ObjectType::Bucket, Uuid::new_v4());
        live.attach(
            NewObject::new(
                bucket.object_id,
                "b",
                ObjectAttributes::Bucket {
                    environment: "qa".into(),
                    frozen: false,
                },
            ),
            Some(ObjectRef::new(ObjectType::Repository, repo)),
        )
        .unwrap();
        let node = ObjectRef::new(ObjectType::Node, Uuid::new_v4());
        live.assign_node(
            NewObject::new(
                node.object_id,
                "n",
                ObjectAttributes::Node {
                    asset_id: 3,
                    server_id: Uuid::new_v4(),
                    online: true,
                },
            ),
            bucket,
        )
        .unwrap();
        live.set_property(
            bucket,
            PropertySpec {
                instance_id: None,
                inheritance: true,
                children_only: false,
                view: "any".into(),
                value: PropertyValue::System {
                    key: "dc".into(),
                    value: "fra".into(),
                },
            },
        )
        .unwrap();
        live.compute_check_instances().unwrap();
        live.drain_actions();

        let mut restored = ConfigTree::new(repo, 1024);
        for r in [ObjectRef::new(ObjectType::Repository, repo), bucket, node] {
            let snapshot = live.get(r).unwrap().snapshot(repo);
            restored.restore_object(&snapshot).unwrap();
        }
        for r in [bucket, node] {
            for p in live.get(r).unwrap().properties.clone() {
                restored.restore_property(p).unwrap();
            }
        }

        restored.reconcile().unwrap();
        assert_eq!(restored.pending(), (0, 0));
        assert_eq!(restored.get(node).unwrap().state, ObjectState::Standalone);
    }

    #[test]
    fn test_restore_requires_parent() {
        let mut tree = ConfigTree::new(Uuid::new_v4(), 16);
        let orphan = ObjectSnapshot {
            object: ObjectRef::new(ObjectType::Group, Uuid::new_v4()),
            repository_id: tree.repository_id(),
            name: "g".into(),
            parent: Some(ObjectRef::new(ObjectType::Bucket, Uuid::new_v4())),
            state: ObjectState::Standalone,
            attributes: ObjectAttributes::Group,
        };
        assert!(matches!(
            tree.restore_object(&orphan),
            Err(TreeError::ParentNotFound(_))
        ));
    }
}
