// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Structural mutations: attach, detach and re-attach.

use super::{Action, ConfigTree, NewObject, TreeError, TreeObject};
use crate::model::{ObjectRef, ObjectState, ObjectType};

impl ConfigTree {
    /// Insert a new object under `parent`.
    ///
    /// Only the repository is attached without a parent. Emits one
    /// `create`, followed by whatever the new object inherits.
    pub fn attach(&mut self, new: NewObject, parent: Option<ObjectRef>) -> Result<(), TreeError> {
        self.insert(new, parent, false)
    }

    /// Place a globally registered node into a bucket of this repository.
    ///
    /// Same as [`attach`](Self::attach) but emits `node_assignment`.
    pub fn assign_node(&mut self, new: NewObject, bucket: ObjectRef) -> Result<(), TreeError> {
        if new.object_type() != ObjectType::Node {
            return Err(TreeError::TypeMismatch {
                parent: bucket.object_type,
                child: new.object_type(),
            });
        }
        if bucket.object_type != ObjectType::Bucket {
            return Err(TreeError::TypeMismatch {
                parent: bucket.object_type,
                child: ObjectType::Node,
            });
        }
        self.insert(new, Some(bucket), true)
    }

    fn insert(
        &mut self,
        new: NewObject,
        parent: Option<ObjectRef>,
        assignment: bool,
    ) -> Result<(), TreeError> {
        if self.state.objects.contains_key(&new.id) {
            return Err(TreeError::Duplicate(format!(
                "{} {}",
                new.object_type(),
                new.id
            )));
        }
        let child_type = new.object_type();

        match parent {
            None if child_type == ObjectType::Repository => {
                if self.state.root.is_some() {
                    return Err(TreeError::Duplicate("repository root".to_string()));
                }
                if new.id != self.repository_id() {
                    return Err(TreeError::InvalidMove(format!(
                        "repository {} does not belong to this tree",
                        new.id
                    )));
                }
            }
            None => {
                return Err(TreeError::InvalidMove(format!(
                    "{} {} needs a parent",
                    child_type, new.id
                )));
            }
            Some(p) => {
                let host = self.get(p).map_err(|_| TreeError::ParentNotFound(p))?;
                if !host.object_type().can_host(child_type) {
                    return Err(TreeError::TypeMismatch {
                        parent: p.object_type,
                        child: child_type,
                    });
                }
            }
        }

        let obj = TreeObject::from_new(new, parent);
        let r = obj.to_ref();
        if child_type == ObjectType::Repository {
            self.state.root = Some(r.object_id);
        }
        self.state.objects.insert(r.object_id, obj);
        if let Some(p) = parent {
            self.get_mut(p)?.children.push(r);
        }

        let snapshot = self.get(r)?.snapshot(self.repository_id());
        self.emit(if assignment {
            Action::NodeAssignment(snapshot)
        } else {
            Action::Create(snapshot)
        })?;
        if let Some(p) = parent.filter(|p| p.object_type.has_members()) {
            self.emit(Action::MemberNew {
                parent: p,
                member: r,
            })?;
        }
        self.resync_all(r)
    }

    /// Remove an object from the tree.
    ///
    /// Members of a group or cluster are first moved back to the bucket.
    /// Buckets and repositories must be empty. The object's properties and
    /// checks are retracted before the `delete` is emitted.
    pub fn detach(&mut self, object: ObjectRef) -> Result<(), TreeError> {
        let obj = self.get(object)?;
        match object.object_type {
            ObjectType::Repository | ObjectType::Bucket if !obj.children.is_empty() => {
                return Err(TreeError::NotEmpty(object));
            }
            ObjectType::Group | ObjectType::Cluster => {
                let members = obj.children.clone();
                if !members.is_empty() {
                    let bucket = self
                        .bucket_of(object.object_id)?
                        .ok_or_else(|| TreeError::InvalidMove(format!("{} has no bucket", object)))?;
                    if let Some(member) = members
                        .iter()
                        .find(|m| !ObjectType::Bucket.can_host(m.object_type))
                    {
                        return Err(TreeError::TypeMismatch {
                            parent: ObjectType::Bucket,
                            child: member.object_type,
                        });
                    }
                    for member in members {
                        self.reattach(member, bucket)?;
                    }
                }
            }
            _ => {}
        }

        let obj = self.get_mut(object)?;
        let (prop_origins, prop_copies): (Vec<_>, Vec<_>) =
            obj.properties.drain(..).partition(|p| p.is_origin());
        let (check_origins, check_copies): (Vec<_>, Vec<_>) =
            obj.checks.drain(..).partition(|c| c.is_origin());
        self.emit_all(prop_copies.into_iter().map(Action::PropertyDelete))?;
        self.emit_all(prop_origins.into_iter().map(Action::PropertyDelete))?;
        self.emit_all(check_copies.into_iter().map(Action::CheckRemoved))?;
        self.emit_all(check_origins.into_iter().map(Action::CheckRemoved))?;
        self.state.configs.retain(|_, c| c.object != object);

        let parent = self.get(object)?.parent;
        if let Some(p) = parent {
            if let Ok(host) = self.get_mut(p) {
                host.children.retain(|c| *c != object);
            }
            if p.object_type.has_members() {
                self.emit(Action::MemberRemoved {
                    parent: p,
                    member: object,
                })?;
            }
        }

        let mut removed = self
            .state
            .objects
            .remove(&object.object_id)
            .ok_or(TreeError::NotFound(object))?;
        if self.state.root == Some(object.object_id) {
            self.state.root = None;
        }
        removed.state = ObjectState::Deleted;
        let snapshot = removed.snapshot(self.repository_id());
        self.emit(Action::Delete(snapshot))
    }

    /// Move an object under a new parent within its bucket.
    ///
    /// Emits `member_removed`/`member_new` when leaving or joining a group
    /// or cluster, an `update` carrying the new placement, then the
    /// inheritance difference for the moved subtree.
    pub fn reattach(&mut self, object: ObjectRef, new_parent: ObjectRef) -> Result<(), TreeError> {
        let obj = self.get(object)?;
        if matches!(
            object.object_type,
            ObjectType::Repository | ObjectType::Bucket
        ) {
            return Err(TreeError::InvalidMove(format!("{} cannot move", object)));
        }
        let old_parent = obj.parent;
        let host = self
            .get(new_parent)
            .map_err(|_| TreeError::ParentNotFound(new_parent))?;
        if !host.object_type().can_host(object.object_type) {
            return Err(TreeError::TypeMismatch {
                parent: new_parent.object_type,
                child: object.object_type,
            });
        }
        if old_parent == Some(new_parent) {
            return Ok(());
        }
        if new_parent == object || self.ancestors(new_parent.object_id)?.contains(&object) {
            return Err(TreeError::InvalidMove(format!(
                "moving {} under {} creates a cycle",
                object, new_parent
            )));
        }
        if self.bucket_of(object.object_id)? != self.bucket_of(new_parent.object_id)? {
            return Err(TreeError::InvalidMove(format!(
                "moving {} under {} crosses a bucket boundary",
                object, new_parent
            )));
        }

        if let Some(old) = old_parent {
            self.get_mut(old)?.children.retain(|c| *c != object);
            if old.object_type.has_members() {
                self.emit(Action::MemberRemoved {
                    parent: old,
                    member: object,
                })?;
            }
        }
        {
            let obj = self.get_mut(object)?;
            obj.parent = Some(new_parent);
            obj.state = ObjectState::under(Some(new_parent.object_type));
        }
        self.get_mut(new_parent)?.children.push(object);
        if new_parent.object_type.has_members() {
            self.emit(Action::MemberNew {
                parent: new_parent,
                member: object,
            })?;
        }

        let snapshot = self.get(object)?.snapshot(self.repository_id());
        self.emit(Action::Update(snapshot))?;
        self.resync_all(object)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ObjectAttributes;
    use uuid::Uuid;

    fn base() -> (ConfigTree, ObjectRef) {
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
        tree.drain_actions();
        (tree, bucket)
    }

    fn group(tree: &mut ConfigTree, parent: ObjectRef) -> ObjectRef {
        let g = ObjectRef::new(ObjectType::Group, Uuid::new_v4());
        tree.attach(NewObject::new(g.object_id, "g", ObjectAttributes::Group), Some(parent))
            .unwrap();
        g
    }

    #[test]
    fn test_attach_emits_single_create() {
        let (mut tree, bucket) = base();
        group(&mut tree, bucket);
        let actions = tree.drain_actions();
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].kind(), crate::tree::ActionKind::Create);
    }

    #[test]
    fn test_attach_parent_errors() {
        let (mut tree, bucket) = base();
        let missing = ObjectRef::new(ObjectType::Group, Uuid::new_v4());
        let err = tree
            .attach(NewObject::new(Uuid::new_v4(), "g", ObjectAttributes::Group), Some(missing))
            .unwrap_err();
        assert_eq!(err, TreeError::ParentNotFound(missing));

        let cluster = ObjectRef::new(ObjectType::Cluster, Uuid::new_v4());
        tree.attach(NewObject::new(cluster.object_id, "c", ObjectAttributes::Cluster), Some(bucket))
            .unwrap();
        let err = tree
            .attach(NewObject::new(Uuid::new_v4(), "g", ObjectAttributes::Group), Some(cluster))
            .unwrap_err();
        assert!(matches!(err, TreeError::TypeMismatch { .. }));
    }

    #[test]
    fn test_reattach_rejects_cycle() {
        let (mut tree, bucket) = base();
        let outer = group(&mut tree, bucket);
        let inner = group(&mut tree, outer);
        let err = tree.reattach(outer, inner).unwrap_err();
        assert!(matches!(err, TreeError::InvalidMove(_)));
    }

    #[test]
    fn test_reattach_emits_membership_changes() {
        let (mut tree, bucket) = base();
        let a = group(&mut tree, bucket);
        let b = group(&mut tree, bucket);
        let child = group(&mut tree, a);
        tree.drain_actions();

        tree.reattach(child, b).unwrap();
        let kinds: Vec<_> = tree.drain_actions().iter().map(|a| a.kind()).collect();
        use crate::tree::ActionKind::*;
        assert_eq!(kinds, vec![MemberRemoved, MemberNew, Update]);
        assert_eq!(tree.get(child).unwrap().parent, Some(b));
        assert!(tree.get(a).unwrap().children.is_empty());
    }

    #[test]
    fn test_detach_group_releases_members() {
        let (mut tree, bucket) = base();
        let g = group(&mut tree, bucket);
        let member = group(&mut tree, g);
        tree.drain_actions();

        tree.detach(g).unwrap();
        let m = tree.get(member).unwrap();
        assert_eq!(m.parent, Some(bucket));
        assert_eq!(m.state, ObjectState::Standalone);
        assert!(tree.get(g).is_err());
        let last = tree.drain_actions().pop().unwrap();
        assert_eq!(last.kind(), crate::tree::ActionKind::Delete);
    }

    #[test]
    fn test_overflow_during_detach_rolls_back() {
        let repo = Uuid::new_v4();
        let mut tree = ConfigTree::new(repo, 4);
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
        tree.drain_actions();
        let g = group(&mut tree, bucket);
        tree.drain_actions();
        let first = group(&mut tree, g);
        tree.drain_actions();
        let second = group(&mut tree, g);
        tree.drain_actions();

        tree.begin().unwrap();
        // Two members moved out fill the queue before the delete.
        let err = tree.detach(g).unwrap_err();
        assert!(matches!(err, TreeError::QueueOverflow { .. }), "{:?}", err);
        assert!(tree.fatal().is_some());
        assert_eq!(tree.get(first).unwrap().parent, Some(bucket));

        tree.rollback().unwrap();
        assert_eq!(tree.get(g).unwrap().children, vec![first, second]);
        assert_eq!(tree.get(first).unwrap().parent, Some(g));
        assert_eq!(tree.get(second).unwrap().state, ObjectState::Grouped);
        assert_eq!(tree.pending(), (0, 0));
    }

    #[test]
    fn test_detach_non_empty_bucket() {
        let (mut tree, bucket) = base();
        group(&mut tree, bucket);
        assert_eq!(tree.detach(bucket).unwrap_err(), TreeError::NotEmpty(bucket));
    }
}
