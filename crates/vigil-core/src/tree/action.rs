// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The tree's output protocol: Actions describing effected changes and
//! Error messages describing conflicts found while propagating them.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

use super::{ObjectSnapshot, TreeError};
use crate::model::{Check, CheckInstance, ObjectRef, ObjectType, Property};

/// Kind of an [`Action`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// Object created.
    Create,
    /// Object placement or attributes changed.
    Update,
    /// Object removed.
    Delete,
    /// Property instance added.
    PropertyNew,
    /// Property instance removed.
    PropertyDelete,
    /// Check materialised.
    CheckNew,
    /// Check removed.
    CheckRemoved,
    /// Check instance computed for the first time.
    CheckInstanceCreate,
    /// Check instance hashes changed.
    CheckInstanceUpdate,
    /// Check instance no longer matches.
    CheckInstanceDelete,
    /// Object joined a group or cluster.
    MemberNew,
    /// Object left a group or cluster.
    MemberRemoved,
    /// Node assigned into the repository.
    NodeAssignment,
}

impl ActionKind {
    /// Returns the wire name of this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Create => "create",
            ActionKind::Update => "update",
            ActionKind::Delete => "delete",
            ActionKind::PropertyNew => "property_new",
            ActionKind::PropertyDelete => "property_delete",
            ActionKind::CheckNew => "check_new",
            ActionKind::CheckRemoved => "check_removed",
            ActionKind::CheckInstanceCreate => "check_instance_create",
            ActionKind::CheckInstanceUpdate => "check_instance_update",
            ActionKind::CheckInstanceDelete => "check_instance_delete",
            ActionKind::MemberNew => "member_new",
            ActionKind::MemberRemoved => "member_removed",
            ActionKind::NodeAssignment => "node_assignment",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One effected change, translated by the worker into exactly one write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum Action {
    /// A new object.
    Create(ObjectSnapshot),
    /// New placement of an existing object.
    Update(ObjectSnapshot),
    /// A removed object.
    Delete(ObjectSnapshot),
    /// A property instance to store.
    PropertyNew(Property),
    /// A property instance to remove.
    PropertyDelete(Property),
    /// A check to store.
    CheckNew(Check),
    /// A check to remove.
    CheckRemoved(Check),
    /// A new check instance; carries its first configuration id.
    CheckInstanceCreate(CheckInstance),
    /// A changed check instance; carries its new configuration id.
    CheckInstanceUpdate(CheckInstance),
    /// A check instance that no longer applies.
    CheckInstanceDelete(CheckInstance),
    /// Membership added.
    MemberNew {
        /// Group or cluster.
        parent: ObjectRef,
        /// Joining object.
        member: ObjectRef,
    },
    /// Membership removed.
    MemberRemoved {
        /// Group or cluster.
        parent: ObjectRef,
        /// Leaving object.
        member: ObjectRef,
    },
    /// A globally known node placed into this repository.
    NodeAssignment(ObjectSnapshot),
}

impl Action {
    /// Kind of this action.
    pub fn kind(&self) -> ActionKind {
        match self {
            Action::Create(_) => ActionKind::Create,
            Action::Update(_) => ActionKind::Update,
            Action::Delete(_) => ActionKind::Delete,
            Action::PropertyNew(_) => ActionKind::PropertyNew,
            Action::PropertyDelete(_) => ActionKind::PropertyDelete,
            Action::CheckNew(_) => ActionKind::CheckNew,
            Action::CheckRemoved(_) => ActionKind::CheckRemoved,
            Action::CheckInstanceCreate(_) => ActionKind::CheckInstanceCreate,
            Action::CheckInstanceUpdate(_) => ActionKind::CheckInstanceUpdate,
            Action::CheckInstanceDelete(_) => ActionKind::CheckInstanceDelete,
            Action::MemberNew { .. } => ActionKind::MemberNew,
            Action::MemberRemoved { .. } => ActionKind::MemberRemoved,
            Action::NodeAssignment(_) => ActionKind::NodeAssignment,
        }
    }

    /// Type of the object the action concerns.
    pub fn object_type(&self) -> ObjectType {
        match self {
            Action::Create(o) | Action::Update(o) | Action::Delete(o) | Action::NodeAssignment(o) => {
                o.object.object_type
            }
            Action::PropertyNew(p) | Action::PropertyDelete(p) => p.object.object_type,
            Action::CheckNew(c) | Action::CheckRemoved(c) => c.object.object_type,
            Action::CheckInstanceCreate(i)
            | Action::CheckInstanceUpdate(i)
            | Action::CheckInstanceDelete(i) => i.object.object_type,
            Action::MemberNew { member, .. } | Action::MemberRemoved { member, .. } => {
                member.object_type
            }
        }
    }
}

/// A conflict found while propagating a mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorMessage {
    /// Operation that ran into the conflict.
    pub action: String,
    /// Human readable detail.
    pub detail: String,
}

impl fmt::Display for ErrorMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.action, self.detail)
    }
}

/// Ordered, bounded output queue.
///
/// Exceeding the bound is not backpressure: the push fails and the queue
/// stays overflowed, which the owning tree treats as fatal.
#[derive(Debug, Clone)]
pub struct OutputQueue<T> {
    name: &'static str,
    items: VecDeque<T>,
    capacity: usize,
    overflowed: bool,
}

impl<T> OutputQueue<T> {
    /// Create an empty queue bounded to `capacity` entries.
    pub fn new(name: &'static str, capacity: usize) -> Self {
        Self {
            name,
            items: VecDeque::new(),
            capacity,
            overflowed: false,
        }
    }

    /// Append an entry.
    pub fn push(&mut self, item: T) -> Result<(), TreeError> {
        if self.items.len() >= self.capacity {
            self.overflowed = true;
            return Err(TreeError::QueueOverflow {
                queue: self.name,
                capacity: self.capacity,
            });
        }
        self.items.push_back(item);
        Ok(())
    }

    /// Remove and return every entry in order.
    pub fn drain(&mut self) -> Vec<T> {
        self.items.drain(..).collect()
    }

    /// Number of entries waiting.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether no entry is waiting.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Whether a push ever exceeded the bound.
    pub fn overflowed(&self) -> bool {
        self.overflowed
    }
}
