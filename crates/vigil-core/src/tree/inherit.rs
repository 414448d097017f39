// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Inheritance of properties and checks.
//!
//! An object carries an inherited copy for a key iff it has no directly
//! attached entry for that key and the nearest ancestor that does has
//! marked it inheritable. After any mutation the affected subtree is
//! resynchronised against that rule and the difference is emitted, all
//! retractions before all additions. Copies that are still correct keep
//! their ids.

use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

use super::{Action, ConfigTree, TreeError, TreeObject};
use crate::model::{
    Check, CheckConfig, CheckItem, ObjectRef, Property, PropertyKind, PropertySpec,
};

/// Something that is attached to an object and may propagate downwards.
pub(crate) trait Inheritable: Clone {
    type Key: Ord + Clone;

    fn key(&self) -> Self::Key;
    fn source_id(&self) -> Uuid;
    fn is_origin(&self) -> bool;
    fn propagates(&self) -> bool;
    fn copy_for(&self, object: ObjectRef) -> Self;
    fn slot(obj: &TreeObject) -> &Vec<Self>;
    fn slot_mut(obj: &mut TreeObject) -> &mut Vec<Self>;
    fn new_action(self) -> Action;
    fn delete_action(self) -> Action;
}

impl Inheritable for Property {
    type Key = (PropertyKind, String);

    fn key(&self) -> Self::Key {
        self.shadow_key()
    }

    fn source_id(&self) -> Uuid {
        self.source_instance_id
    }

    fn is_origin(&self) -> bool {
        Property::is_origin(self)
    }

    fn propagates(&self) -> bool {
        self.inheritance
    }

    fn copy_for(&self, object: ObjectRef) -> Self {
        self.inherited_copy(object, Uuid::new_v4())
    }

    fn slot(obj: &TreeObject) -> &Vec<Self> {
        &obj.properties
    }

    fn slot_mut(obj: &mut TreeObject) -> &mut Vec<Self> {
        &mut obj.properties
    }

    fn new_action(self) -> Action {
        Action::PropertyNew(self)
    }

    fn delete_action(self) -> Action {
        Action::PropertyDelete(self)
    }
}

impl Inheritable for Check {
    type Key = Uuid;

    fn key(&self) -> Self::Key {
        self.config_id
    }

    fn source_id(&self) -> Uuid {
        self.source_check_id
    }

    fn is_origin(&self) -> bool {
        Check::is_origin(self)
    }

    fn propagates(&self) -> bool {
        self.inheritance
    }

    fn copy_for(&self, object: ObjectRef) -> Self {
        Check {
            check_id: Uuid::new_v4(),
            source_check_id: self.source_check_id,
            config_id: self.config_id,
            object,
            inherited_from: self.inherited_from,
            inheritance: self.inheritance,
            children_only: self.children_only,
            items: vec![CheckItem::from(object)],
        }
    }

    fn slot(obj: &TreeObject) -> &Vec<Self> {
        &obj.checks
    }

    fn slot_mut(obj: &mut TreeObject) -> &mut Vec<Self> {
        &mut obj.checks
    }

    fn new_action(self) -> Action {
        Action::CheckNew(self)
    }

    fn delete_action(self) -> Action {
        Action::CheckRemoved(self)
    }
}

/// Difference produced by one resynchronisation.
pub(crate) struct Diff<T> {
    pub(crate) deletes: Vec<T>,
    pub(crate) news: Vec<T>,
}

fn apply_directs<T: Inheritable>(map: &mut BTreeMap<T::Key, T>, obj: &TreeObject) {
    for entry in T::slot(obj).iter().filter(|e| e.is_origin()) {
        if entry.propagates() {
            map.insert(entry.key(), entry.clone());
        } else {
            map.remove(&entry.key());
        }
    }
}

impl ConfigTree {
    /// Origins offered to `id` by its ancestors.
    fn offered<T: Inheritable>(&self, id: Uuid) -> Result<BTreeMap<T::Key, T>, TreeError> {
        let mut map = BTreeMap::new();
        for ancestor in self.ancestors(id)?.into_iter().rev() {
            if let Some(obj) = self.state.objects.get(&ancestor.object_id) {
                apply_directs(&mut map, obj);
            }
        }
        Ok(map)
    }

    /// Bring inherited copies in the subtree of `root` in line with the
    /// inheritance rule and return what changed.
    pub(crate) fn resync<T: Inheritable>(&mut self, root: ObjectRef) -> Result<Diff<T>, TreeError> {
        let mut diff = Diff {
            deletes: Vec::new(),
            news: Vec::new(),
        };
        let mut stack = vec![(root, self.offered::<T>(root.object_id)?, 0usize)];

        while let Some((current, offered, depth)) = stack.pop() {
            if depth > super::MAX_DEPTH {
                return Err(TreeError::DepthExceeded(current));
            }
            let obj = self.get_mut(current)?;

            let direct: BTreeSet<T::Key> = T::slot(obj)
                .iter()
                .filter(|e| e.is_origin())
                .map(|e| e.key())
                .collect();
            let wanted: BTreeMap<(T::Key, Uuid), &T> = offered
                .iter()
                .filter(|(k, _)| !direct.contains(*k))
                .map(|(k, origin)| ((k.clone(), origin.source_id()), origin))
                .collect();

            let slot = T::slot_mut(obj);
            let mut present = BTreeSet::new();
            let mut kept = Vec::with_capacity(slot.len());
            for entry in slot.drain(..) {
                if entry.is_origin() {
                    kept.push(entry);
                    continue;
                }
                let id = (entry.key(), entry.source_id());
                if wanted.contains_key(&id) && present.insert(id) {
                    kept.push(entry);
                } else {
                    diff.deletes.push(entry);
                }
            }
            for (id, origin) in &wanted {
                if !present.contains(id) {
                    let copy = origin.copy_for(current);
                    kept.push(copy.clone());
                    diff.news.push(copy);
                }
            }
            *slot = kept;

            let mut passed_on = offered;
            apply_directs(&mut passed_on, obj);
            for child in obj.children.iter().rev() {
                stack.push((*child, passed_on.clone(), depth + 1));
            }
        }

        Ok(diff)
    }

    /// Resynchronise both properties and checks below `root`, emitting all
    /// retractions before all additions.
    pub(crate) fn resync_all(&mut self, root: ObjectRef) -> Result<(), TreeError> {
        let props = self.resync::<Property>(root)?;
        let checks = self.resync::<Check>(root)?;
        self.emit_all(props.deletes.into_iter().map(Inheritable::delete_action))?;
        self.emit_all(checks.deletes.into_iter().map(Inheritable::delete_action))?;
        self.emit_all(props.news.into_iter().map(Inheritable::new_action))?;
        self.emit_all(checks.news.into_iter().map(Inheritable::new_action))?;
        Ok(())
    }

    fn attach_origin<T: Inheritable>(&mut self, object: ObjectRef, origin: T) -> Result<(), TreeError> {
        T::slot_mut(self.get_mut(object)?).push(origin.clone());
        let diff = self.resync::<T>(object)?;
        self.emit_all(diff.deletes.into_iter().map(Inheritable::delete_action))?;
        self.emit(origin.new_action())?;
        self.emit_all(diff.news.into_iter().map(Inheritable::new_action))
    }

    fn detach_origin<T: Inheritable>(
        &mut self,
        object: ObjectRef,
        matches: impl Fn(&T) -> bool,
    ) -> Result<Option<T>, TreeError> {
        let slot = T::slot_mut(self.get_mut(object)?);
        let Some(pos) = slot.iter().position(|e| e.is_origin() && matches(e)) else {
            return Ok(None);
        };
        let origin = slot.remove(pos);
        let diff = self.resync::<T>(object)?;
        self.emit_all(diff.deletes.into_iter().map(Inheritable::delete_action))?;
        self.emit(origin.clone().delete_action())?;
        self.emit_all(diff.news.into_iter().map(Inheritable::new_action))?;
        Ok(Some(origin))
    }

    /// Attach a property directly at `object` and propagate it.
    ///
    /// Returns the origin instance id. A second direct property with the
    /// same key is reported on the Error queue.
    pub fn set_property(&mut self, object: ObjectRef, spec: PropertySpec) -> Result<Uuid, TreeError> {
        let obj = self.get(object)?;
        let instance_id = spec.instance_id.unwrap_or_else(Uuid::new_v4);
        let origin = Property {
            instance_id,
            source_instance_id: instance_id,
            object,
            inherited_from: object,
            inheritance: spec.inheritance,
            children_only: spec.children_only,
            view: spec.view,
            value: spec.value,
        };

        let key = origin.shadow_key();
        if obj.direct_properties().any(|p| p.shadow_key() == key) {
            self.report(
                "set_property",
                format!("{} already carries {} property '{}'", object, key.0, key.1),
            )?;
            return Ok(instance_id);
        }
        if obj.properties.iter().any(|p| p.instance_id == instance_id) {
            return Err(TreeError::Duplicate(format!(
                "property instance {}",
                instance_id
            )));
        }

        self.attach_origin(object, origin)?;
        Ok(instance_id)
    }

    /// Remove a directly attached property and retract its copies.
    pub fn delete_property(
        &mut self,
        object: ObjectRef,
        source_instance_id: Uuid,
    ) -> Result<Property, TreeError> {
        self.detach_origin::<Property>(object, |p| p.instance_id == source_instance_id)?
            .ok_or(TreeError::PropertyNotFound(source_instance_id))
    }

    /// Materialise a check configuration at its object and propagate it.
    ///
    /// Returns the origin check id.
    pub fn set_check(&mut self, config: CheckConfig) -> Result<Uuid, TreeError> {
        if self.state.configs.contains_key(&config.config_id) {
            return Err(TreeError::Duplicate(format!(
                "check configuration {}",
                config.config_id
            )));
        }
        let object = self.get(config.object)?.to_ref();

        if let Some(bucket) = config.bucket_id {
            let actual = self.bucket_of(object.object_id)?.map(|b| b.object_id);
            if actual != Some(bucket) {
                self.report(
                    "set_check",
                    format!(
                        "check {} is scoped to bucket {} but {} is not in it",
                        config.config_id, bucket, object
                    ),
                )?;
                return Ok(config.config_id);
            }
        }

        let check_id = Uuid::new_v4();
        let origin = Check {
            check_id,
            source_check_id: check_id,
            config_id: config.config_id,
            object,
            inherited_from: object,
            inheritance: config.inheritance,
            children_only: config.children_only,
            items: if config.children_only {
                Vec::new()
            } else {
                vec![CheckItem::from(object)]
            },
        };
        self.state.configs.insert(config.config_id, config);
        self.attach_origin(object, origin)?;
        Ok(check_id)
    }

    /// Remove a check configuration, its origin check and all copies.
    pub fn delete_check(&mut self, config_id: Uuid) -> Result<CheckConfig, TreeError> {
        let config = self
            .state
            .configs
            .get(&config_id)
            .cloned()
            .ok_or(TreeError::CheckConfigNotFound(config_id))?;
        if self.get(config.object).is_ok() {
            self.detach_origin::<Check>(config.object, |c| c.config_id == config_id)?;
        }
        self.state.configs.remove(&config_id);
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ObjectAttributes, ObjectType, PropertyValue};
    use crate::tree::NewObject;

    fn system(key: &str, value: &str, inheritance: bool, children_only: bool) -> PropertySpec {
        PropertySpec {
            instance_id: None,
            inheritance,
            children_only,
            view: "any".to_string(),
            value: PropertyValue::System {
                key: key.to_string(),
                value: value.to_string(),
            },
        }
    }

    /// repository -> bucket -> group -> node
    fn tree() -> (ConfigTree, ObjectRef, ObjectRef, ObjectRef) {
        let repo = Uuid::new_v4();
        let mut tree = ConfigTree::new(repo, 1024);
        tree.attach(
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
        tree.attach(
            NewObject::new(
                bucket.object_id,
                "b",
                ObjectAttributes::Bucket {
                    environment: "live".into(),
                    frozen: false,
                },
            ),
            Some(ObjectRef::new(ObjectType::Repository, repo)),
        )
        .unwrap();
        let group = ObjectRef::new(ObjectType::Group, Uuid::new_v4());
        tree.attach(NewObject::new(group.object_id, "g", ObjectAttributes::Group), Some(bucket))
            .unwrap();
        let node = ObjectRef::new(ObjectType::Node, Uuid::new_v4());
        tree.attach(
            NewObject::new(
                node.object_id,
                "n",
                ObjectAttributes::Node {
                    asset_id: 1,
                    server_id: Uuid::new_v4(),
                    online: true,
                },
            ),
            Some(group),
        )
        .unwrap();
        tree.drain_actions();
        (tree, bucket, group, node)
    }

    #[test]
    fn test_local_property_shadows_inherited_copy() {
        let (mut tree, bucket, group, node) = tree();
        let origin = tree.set_property(bucket, system("dc", "fra", true, false)).unwrap();
        tree.drain_actions();

        let local = tree.set_property(group, system("dc", "ams", true, false)).unwrap();
        let actions = tree.drain_actions();

        // group and node copies of the bucket origin go first
        let kinds: Vec<_> = actions.iter().map(|a| a.kind().as_str()).collect();
        assert_eq!(
            kinds,
            vec![
                "property_delete",
                "property_delete",
                "property_new",
                "property_new"
            ]
        );
        let n = tree.get(node).unwrap();
        let resolved: Vec<_> = n.effective_properties().collect();
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].source_instance_id, local);
        assert_ne!(resolved[0].source_instance_id, origin);
    }

    #[test]
    fn test_duplicate_direct_property_reported() {
        let (mut tree, bucket, _, _) = tree();
        tree.set_property(bucket, system("dc", "fra", false, false)).unwrap();
        tree.drain_actions();
        tree.set_property(bucket, system("dc", "ams", false, false)).unwrap();
        let errors = tree.drain_errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].action, "set_property");
        assert!(tree.drain_actions().is_empty());
    }

    #[test]
    fn test_delete_restores_ancestor_copy() {
        let (mut tree, bucket, group, node) = tree();
        let outer = tree.set_property(bucket, system("dc", "fra", true, false)).unwrap();
        let inner = tree.set_property(group, system("dc", "ams", true, false)).unwrap();
        tree.drain_actions();

        tree.delete_property(group, inner).unwrap();
        let n = tree.get(node).unwrap();
        assert_eq!(n.properties.len(), 1);
        assert_eq!(n.properties[0].source_instance_id, outer);
        assert_eq!(
            tree.delete_property(group, inner).unwrap_err(),
            TreeError::PropertyNotFound(inner)
        );
    }

    #[test]
    fn test_non_inheritable_direct_blocks_propagation() {
        let (mut tree, bucket, group, node) = tree();
        tree.set_property(bucket, system("dc", "fra", true, false)).unwrap();
        tree.set_property(group, system("dc", "ams", false, false)).unwrap();
        assert!(tree.get(node).unwrap().properties.is_empty());
    }

    #[test]
    fn test_unchanged_copies_keep_ids() {
        let (mut tree, bucket, _, node) = tree();
        tree.set_property(bucket, system("dc", "fra", true, false)).unwrap();
        let before = tree.get(node).unwrap().properties[0].instance_id;
        tree.set_property(bucket, system("rack", "r1", true, false)).unwrap();
        let n = tree.get(node).unwrap();
        assert!(n.properties.iter().any(|p| p.instance_id == before));
        assert_eq!(n.properties.len(), 2);
    }
}
