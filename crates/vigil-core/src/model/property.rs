// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Inheritable properties attached to tree objects.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::ObjectRef;

/// Property variant discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyKind {
    /// Globally defined key/value pair.
    System,
    /// Repository defined key/value pair.
    Custom,
    /// Team service with attributes.
    Service,
    /// Oncall duty assignment.
    Oncall,
}

impl PropertyKind {
    /// All property kinds in load order.
    pub const ALL: [PropertyKind; 4] = [
        PropertyKind::System,
        PropertyKind::Custom,
        PropertyKind::Service,
        PropertyKind::Oncall,
    ];

    /// Returns the string representation used in storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            PropertyKind::System => "system",
            PropertyKind::Custom => "custom",
            PropertyKind::Service => "service",
            PropertyKind::Oncall => "oncall",
        }
    }
}

impl fmt::Display for PropertyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PropertyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "system" => Ok(PropertyKind::System),
            "custom" => Ok(PropertyKind::Custom),
            "service" => Ok(PropertyKind::Service),
            "oncall" => Ok(PropertyKind::Oncall),
            other => Err(format!("unknown property kind '{}'", other)),
        }
    }
}

/// The typed payload of a property.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PropertyValue {
    /// System property.
    System {
        /// Property key, e.g. `dc`.
        key: String,
        /// Property value.
        value: String,
    },
    /// Custom property.
    Custom {
        /// Custom property definition id.
        id: Uuid,
        /// Property key.
        key: String,
        /// Property value.
        value: String,
    },
    /// Service property.
    Service {
        /// Service name.
        name: String,
        /// Team owning the service.
        team_id: Uuid,
        /// Service attributes; an attribute may carry several values.
        #[serde(default)]
        attributes: BTreeMap<String, Vec<String>>,
    },
    /// Oncall property.
    Oncall {
        /// Oncall duty id.
        id: Uuid,
        /// Duty name.
        name: String,
        /// Phone number.
        number: String,
    },
}

impl PropertyValue {
    /// Property kind of this value.
    pub fn kind(&self) -> PropertyKind {
        match self {
            PropertyValue::System { .. } => PropertyKind::System,
            PropertyValue::Custom { .. } => PropertyKind::Custom,
            PropertyValue::Service { .. } => PropertyKind::Service,
            PropertyValue::Oncall { .. } => PropertyKind::Oncall,
        }
    }

    /// Shadowing key: two properties with equal `(kind, key)` on one
    /// inheritance path override each other.
    pub fn key(&self) -> String {
        match self {
            PropertyValue::System { key, .. } => key.clone(),
            PropertyValue::Custom { id, .. } => id.to_string(),
            PropertyValue::Service { name, .. } => name.clone(),
            PropertyValue::Oncall { .. } => "oncall".to_string(),
        }
    }
}

/// A property instance living on one tree object.
///
/// The instance attached by a user is the origin: its `instance_id` equals
/// its `source_instance_id`. Every inherited copy has a fresh `instance_id`
/// and points back at the origin through `source_instance_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Property {
    /// Id of this instance.
    pub instance_id: Uuid,
    /// Id of the originating (directly attached) instance.
    pub source_instance_id: Uuid,
    /// Object carrying this instance.
    pub object: ObjectRef,
    /// Object carrying the originating instance.
    pub inherited_from: ObjectRef,
    /// Propagate to descendants.
    pub inheritance: bool,
    /// Do not apply to the origin object itself.
    pub children_only: bool,
    /// View scope tag (e.g. `internal`, `external`, `any`).
    pub view: String,
    /// Typed payload.
    pub value: PropertyValue,
}

impl Property {
    /// Whether this is the directly attached origin instance.
    pub fn is_origin(&self) -> bool {
        self.instance_id == self.source_instance_id
    }

    /// Whether the object carrying this instance resolves it.
    ///
    /// An origin marked `children_only` is carried but does not apply.
    pub fn applies_to_carrier(&self) -> bool {
        !(self.is_origin() && self.children_only)
    }

    /// Shadowing key `(kind, key)`.
    pub fn shadow_key(&self) -> (PropertyKind, String) {
        (self.value.kind(), self.value.key())
    }

    /// Build an inherited copy of this origin for `object`.
    pub fn inherited_copy(&self, object: ObjectRef, instance_id: Uuid) -> Property {
        Property {
            instance_id,
            source_instance_id: self.source_instance_id,
            object,
            inherited_from: self.inherited_from,
            inheritance: self.inheritance,
            children_only: self.children_only,
            view: self.view.clone(),
            value: self.value.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ObjectType;

    fn origin(children_only: bool) -> Property {
        let id = Uuid::new_v4();
        let obj = ObjectRef::new(ObjectType::Bucket, Uuid::new_v4());
        Property {
            instance_id: id,
            source_instance_id: id,
            object: obj,
            inherited_from: obj,
            inheritance: true,
            children_only,
            view: "any".to_string(),
            value: PropertyValue::System {
                key: "dc".to_string(),
                value: "fra".to_string(),
            },
        }
    }

    #[test]
    fn test_children_only_origin_does_not_apply() {
        assert!(origin(false).applies_to_carrier());
        assert!(!origin(true).applies_to_carrier());
    }

    #[test]
    fn test_inherited_copy_keeps_source() {
        let p = origin(true);
        let node = ObjectRef::new(ObjectType::Node, Uuid::new_v4());
        let copy = p.inherited_copy(node, Uuid::new_v4());
        assert_eq!(copy.source_instance_id, p.instance_id);
        assert_ne!(copy.instance_id, copy.source_instance_id);
        assert!(copy.applies_to_carrier());
        assert_eq!(copy.inherited_from, p.object);
    }

    #[test]
    fn test_oncall_key_is_singular() {
        let a = PropertyValue::Oncall {
            id: Uuid::new_v4(),
            name: "a".into(),
            number: "1".into(),
        };
        let b = PropertyValue::Oncall {
            id: Uuid::new_v4(),
            name: "b".into(),
            number: "2".into(),
        };
        assert_eq!(a.key(), b.key());
    }
}
