// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The in-memory configuration tree of one repository.
//!
//! The tree is an arena of [`TreeObject`]s keyed by id. Every mutation
//! reports what it changed through the Action queue and what went wrong
//! during propagation through the Error queue; the tree never touches
//! storage. Callers drain both queues after each logical operation.
//!
//! ```text
//!   begin() ──► mutate ──► compute_check_instances() ──► drain queues
//!                                                            │
//!                                          ┌─────────────────┴───────┐
//!                                          ▼                         ▼
//!                                       commit()                 rollback()
//!                                 (discard snapshot)        (restore snapshot)
//! ```

mod action;
mod attach;
mod inherit;
mod instances;
mod object;
mod restore;

pub use action::{Action, ActionKind, ErrorMessage, OutputQueue};
pub use object::{NewObject, ObjectSnapshot, TreeObject};

use std::collections::HashMap;
use thiserror::Error;
use uuid::Uuid;

use crate::model::{CheckConfig, CheckInstance, ObjectAttributes, ObjectRef, ObjectType};

/// Bound on every upward or downward traversal.
pub const MAX_DEPTH: usize = 64;

/// Errors returned by tree operations.
///
/// Precondition failures are detected before anything changes and leave the
/// tree untouched. [`TreeError::DepthExceeded`] and
/// [`TreeError::QueueOverflow`] surface while a change propagates and can
/// leave it half applied; callers restore it with [`ConfigTree::rollback`].
/// An overflow also poisons the tree.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TreeError {
    /// Object does not exist.
    #[error("{0} not found")]
    NotFound(ObjectRef),
    /// Parent does not exist.
    #[error("parent {0} not found")]
    ParentNotFound(ObjectRef),
    /// Parent cannot host the child type.
    #[error("{parent} cannot contain {child}")]
    TypeMismatch {
        /// Parent type.
        parent: ObjectType,
        /// Child type.
        child: ObjectType,
    },
    /// Move would create a cycle or leave the bucket.
    #[error("invalid move: {0}")]
    InvalidMove(String),
    /// Object still has children.
    #[error("{0} is not empty")]
    NotEmpty(ObjectRef),
    /// Object or configuration already exists.
    #[error("duplicate: {0}")]
    Duplicate(String),
    /// Traversal exceeded [`MAX_DEPTH`].
    #[error("tree depth exceeded at {0}")]
    DepthExceeded(ObjectRef),
    /// Directly attached property does not exist.
    #[error("property instance {0} not found")]
    PropertyNotFound(Uuid),
    /// Check configuration does not exist.
    #[error("check configuration {0} not found")]
    CheckConfigNotFound(Uuid),
    /// Queue or transaction protocol was not followed.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),
    /// An output queue exceeded its bound.
    #[error("{queue} queue exceeded capacity {capacity}")]
    QueueOverflow {
        /// Queue name.
        queue: &'static str,
        /// Configured bound.
        capacity: usize,
    },
}

/// Check instances are identified by configuration, object and service.
pub(crate) type InstanceKey = (Uuid, Uuid, Option<String>);

#[derive(Debug, Clone, Default)]
pub(crate) struct TreeState {
    pub(crate) objects: HashMap<Uuid, TreeObject>,
    pub(crate) root: Option<Uuid>,
    pub(crate) configs: HashMap<Uuid, CheckConfig>,
    pub(crate) instances: HashMap<InstanceKey, CheckInstance>,
}

/// Configuration tree of one repository.
#[derive(Debug)]
pub struct ConfigTree {
    repository_id: Uuid,
    pub(crate) state: TreeState,
    snapshot: Option<TreeState>,
    actions: OutputQueue<Action>,
    errors: OutputQueue<ErrorMessage>,
    fatal: Option<String>,
}

impl ConfigTree {
    /// Create an empty tree for `repository_id` with bounded output queues.
    pub fn new(repository_id: Uuid, queue_capacity: usize) -> Self {
        Self {
            repository_id,
            state: TreeState::default(),
            snapshot: None,
            actions: OutputQueue::new("action", queue_capacity),
            errors: OutputQueue::new("error", queue_capacity),
            fatal: None,
        }
    }

    /// Repository this tree belongs to.
    pub fn repository_id(&self) -> Uuid {
        self.repository_id
    }

    /// Number of objects in the arena.
    pub fn len(&self) -> usize {
        self.state.objects.len()
    }

    /// Whether the tree holds no object.
    pub fn is_empty(&self) -> bool {
        self.state.objects.is_empty()
    }

    /// Reason the tree is unusable, if a protocol violation was detected.
    pub fn fatal(&self) -> Option<&str> {
        self.fatal.as_deref()
    }

    // ------------------------------------------------------------------
    // Transactions
    // ------------------------------------------------------------------

    /// Snapshot the tree so a later [`rollback`](Self::rollback) can restore it.
    ///
    /// Both queues must be empty.
    pub fn begin(&mut self) -> Result<(), TreeError> {
        if let Some(reason) = &self.fatal {
            return Err(TreeError::ProtocolViolation(reason.clone()));
        }
        if !self.actions.is_empty() || !self.errors.is_empty() {
            let reason = format!(
                "begin with {} actions and {} errors pending",
                self.actions.len(),
                self.errors.len()
            );
            self.fatal = Some(reason.clone());
            return Err(TreeError::ProtocolViolation(reason));
        }
        if self.snapshot.is_some() {
            return Err(TreeError::ProtocolViolation(
                "transaction already open".to_string(),
            ));
        }
        self.snapshot = Some(self.state.clone());
        Ok(())
    }

    /// Discard the snapshot taken by [`begin`](Self::begin).
    pub fn commit(&mut self) -> Result<(), TreeError> {
        self.snapshot
            .take()
            .map(|_| ())
            .ok_or_else(|| TreeError::ProtocolViolation("commit without begin".to_string()))
    }

    /// Restore the snapshot taken by [`begin`](Self::begin) and discard
    /// anything left in the queues.
    pub fn rollback(&mut self) -> Result<(), TreeError> {
        let snapshot = self
            .snapshot
            .take()
            .ok_or_else(|| TreeError::ProtocolViolation("rollback without begin".to_string()))?;
        self.state = snapshot;
        self.actions.drain();
        self.errors.drain();
        Ok(())
    }

    /// Whether a transaction is open.
    pub fn in_transaction(&self) -> bool {
        self.snapshot.is_some()
    }

    // ------------------------------------------------------------------
    // Queues
    // ------------------------------------------------------------------

    /// Take every queued Action in emission order.
    pub fn drain_actions(&mut self) -> Vec<Action> {
        self.actions.drain()
    }

    /// Take every queued Error message in emission order.
    pub fn drain_errors(&mut self) -> Vec<ErrorMessage> {
        self.errors.drain()
    }

    /// Number of pending `(actions, errors)`.
    pub fn pending(&self) -> (usize, usize) {
        (self.actions.len(), self.errors.len())
    }

    pub(crate) fn emit(&mut self, action: Action) -> Result<(), TreeError> {
        self.actions.push(action).inspect_err(|e| {
            self.fatal = Some(e.to_string());
        })
    }

    pub(crate) fn emit_all(
        &mut self,
        actions: impl IntoIterator<Item = Action>,
    ) -> Result<(), TreeError> {
        for action in actions {
            self.emit(action)?;
        }
        Ok(())
    }

    pub(crate) fn report(
        &mut self,
        action: &str,
        detail: impl Into<String>,
    ) -> Result<(), TreeError> {
        let msg = ErrorMessage {
            action: action.to_string(),
            detail: detail.into(),
        };
        self.errors.push(msg).inspect_err(|e| {
            self.fatal = Some(e.to_string());
        })
    }

    // ------------------------------------------------------------------
    // Lookup
    // ------------------------------------------------------------------

    /// Find an object by type and id.
    pub fn find(&self, object_type: ObjectType, id: Uuid) -> Result<&TreeObject, TreeError> {
        self.get(ObjectRef::new(object_type, id))
    }

    /// Find an object by reference.
    pub fn get(&self, r: ObjectRef) -> Result<&TreeObject, TreeError> {
        self.state
            .objects
            .get(&r.object_id)
            .filter(|o| o.object_type() == r.object_type)
            .ok_or(TreeError::NotFound(r))
    }

    pub(crate) fn get_mut(&mut self, r: ObjectRef) -> Result<&mut TreeObject, TreeError> {
        self.state
            .objects
            .get_mut(&r.object_id)
            .filter(|o| o.object_type() == r.object_type)
            .ok_or(TreeError::NotFound(r))
    }

    /// The repository object, once created.
    pub fn root(&self) -> Option<&TreeObject> {
        self.state.root.and_then(|id| self.state.objects.get(&id))
    }

    /// Team owning the repository.
    pub fn team_id(&self) -> Option<Uuid> {
        match self.root().map(|r| &r.attributes) {
            Some(ObjectAttributes::Repository { team_id }) => Some(*team_id),
            _ => None,
        }
    }

    /// All objects in unspecified order.
    pub fn objects(&self) -> impl Iterator<Item = &TreeObject> {
        self.state.objects.values()
    }

    /// All current check instances in unspecified order.
    pub fn instances(&self) -> impl Iterator<Item = &CheckInstance> {
        self.state.instances.values()
    }

    /// A check configuration known to the tree.
    pub fn check_config(&self, config_id: Uuid) -> Option<&CheckConfig> {
        self.state.configs.get(&config_id)
    }

    /// Check configurations anchored directly at `object`.
    pub fn configs_anchored_at(&self, object: ObjectRef) -> Vec<Uuid> {
        let mut ids: Vec<Uuid> = self
            .state
            .configs
            .values()
            .filter(|c| c.object == object)
            .map(|c| c.config_id)
            .collect();
        ids.sort();
        ids
    }

    /// Ancestors of `id`, nearest first.
    pub(crate) fn ancestors(&self, id: Uuid) -> Result<Vec<ObjectRef>, TreeError> {
        let mut out = Vec::new();
        let mut current = self.state.objects.get(&id).and_then(|o| o.parent);
        while let Some(parent) = current {
            if out.len() >= MAX_DEPTH {
                return Err(TreeError::DepthExceeded(parent));
            }
            out.push(parent);
            current = self
                .state
                .objects
                .get(&parent.object_id)
                .and_then(|o| o.parent);
        }
        Ok(out)
    }

    /// Pre-order list of `root` and its descendants.
    pub(crate) fn subtree(&self, root: ObjectRef) -> Result<Vec<ObjectRef>, TreeError> {
        let mut out = Vec::new();
        let mut stack = vec![(root, 0usize)];
        while let Some((r, depth)) = stack.pop() {
            if depth > MAX_DEPTH {
                return Err(TreeError::DepthExceeded(r));
            }
            out.push(r);
            if let Some(obj) = self.state.objects.get(&r.object_id) {
                for child in obj.children.iter().rev() {
                    stack.push((*child, depth + 1));
                }
            }
        }
        Ok(out)
    }

    /// Bucket containing `id`, or `id` itself if it is a bucket.
    pub fn bucket_of(&self, id: Uuid) -> Result<Option<ObjectRef>, TreeError> {
        let Some(obj) = self.state.objects.get(&id) else {
            return Ok(None);
        };
        if obj.object_type() == ObjectType::Bucket {
            return Ok(Some(obj.to_ref()));
        }
        Ok(self
            .ancestors(id)?
            .into_iter()
            .find(|a| a.object_type == ObjectType::Bucket))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_begin_requires_drained_queues() {
        let mut tree = ConfigTree::new(Uuid::new_v4(), 8);
        tree.report("set_property", "duplicate").unwrap();
        let err = tree.begin().unwrap_err();
        assert!(matches!(err, TreeError::ProtocolViolation(_)));
        assert!(tree.fatal().is_some());
    }

    #[test]
    fn test_commit_without_begin() {
        let mut tree = ConfigTree::new(Uuid::new_v4(), 8);
        assert!(tree.commit().is_err());
        tree.begin().unwrap();
        assert!(tree.in_transaction());
        tree.commit().unwrap();
        assert!(!tree.in_transaction());
    }

    #[test]
    fn test_overflow_poisons_tree() {
        let mut tree = ConfigTree::new(Uuid::new_v4(), 1);
        tree.report("a", "1").unwrap();
        assert!(tree.report("a", "2").is_err());
        tree.drain_errors();
        assert!(matches!(tree.begin(), Err(TreeError::ProtocolViolation(_))));
    }
}
