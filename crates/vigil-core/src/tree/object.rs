// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Arena entries of the configuration tree.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::{Check, ObjectAttributes, ObjectRef, ObjectState, ObjectType, Property};

/// An object about to be attached to the tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewObject {
    /// Object id.
    pub id: Uuid,
    /// Object name.
    pub name: String,
    /// Type specific attributes; also determines the object type.
    pub attributes: ObjectAttributes,
}

impl NewObject {
    /// Create a new object description.
    pub fn new(id: Uuid, name: impl Into<String>, attributes: ObjectAttributes) -> Self {
        Self {
            id,
            name: name.into(),
            attributes,
        }
    }

    /// Type of the object.
    pub fn object_type(&self) -> ObjectType {
        self.attributes.object_type()
    }
}

/// Detached copy of an object's identity and placement.
///
/// This is what Actions carry and what startup load restores from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectSnapshot {
    /// Object reference.
    pub object: ObjectRef,
    /// Owning repository.
    pub repository_id: Uuid,
    /// Object name.
    pub name: String,
    /// Parent, `None` for the repository.
    pub parent: Option<ObjectRef>,
    /// Placement state.
    pub state: ObjectState,
    /// Type specific attributes.
    pub attributes: ObjectAttributes,
}

/// One object in the arena.
///
/// Parent and children are stored as references and resolved through the
/// arena; objects never hold each other directly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeObject {
    /// Object id.
    pub id: Uuid,
    /// Object name.
    pub name: String,
    /// Parent reference.
    pub parent: Option<ObjectRef>,
    /// Children in attach order.
    pub children: Vec<ObjectRef>,
    /// Placement state.
    pub state: ObjectState,
    /// Type specific attributes.
    pub attributes: ObjectAttributes,
    /// Directly attached and inherited properties.
    pub properties: Vec<Property>,
    /// Directly attached and inherited checks.
    pub checks: Vec<Check>,
}

impl TreeObject {
    pub(crate) fn from_new(new: NewObject, parent: Option<ObjectRef>) -> Self {
        Self {
            id: new.id,
            name: new.name,
            state: ObjectState::under(parent.map(|p| p.object_type)),
            parent,
            children: Vec::new(),
            attributes: new.attributes,
            properties: Vec::new(),
            checks: Vec::new(),
        }
    }

    pub(crate) fn from_snapshot(snapshot: &ObjectSnapshot) -> Self {
        Self {
            id: snapshot.object.object_id,
            name: snapshot.name.clone(),
            parent: snapshot.parent,
            children: Vec::new(),
            state: snapshot.state,
            attributes: snapshot.attributes.clone(),
            properties: Vec::new(),
            checks: Vec::new(),
        }
    }

    /// Object type.
    pub fn object_type(&self) -> ObjectType {
        self.attributes.object_type()
    }

    /// Reference to this object.
    pub fn to_ref(&self) -> ObjectRef {
        ObjectRef::new(self.object_type(), self.id)
    }

    /// Snapshot for an Action.
    pub fn snapshot(&self, repository_id: Uuid) -> ObjectSnapshot {
        ObjectSnapshot {
            object: self.to_ref(),
            repository_id,
            name: self.name.clone(),
            parent: self.parent,
            state: self.state,
            attributes: self.attributes.clone(),
        }
    }

    /// Properties the object resolves (children-only origins excluded).
    pub fn effective_properties(&self) -> impl Iterator<Item = &Property> {
        self.properties.iter().filter(|p| p.applies_to_carrier())
    }

    /// Directly attached properties.
    pub fn direct_properties(&self) -> impl Iterator<Item = &Property> {
        self.properties.iter().filter(|p| p.is_origin())
    }

    /// Value of a native attribute used by `native` constraints.
    pub fn native(&self, name: &str) -> Option<String> {
        match name {
            "object_type" => Some(self.object_type().as_str().to_string()),
            "name" => Some(self.name.clone()),
            "object_id" => Some(self.id.to_string()),
            other => self.attributes.native(other),
        }
    }
}
