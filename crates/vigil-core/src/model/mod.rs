// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Domain types shared by the tree, the workers and the persistence layer.

pub mod check;
pub mod deployment;
pub mod job;
pub mod property;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

pub use check::{
    Check, CheckConfig, CheckInstance, CheckItem, Constraint, ConstraintKind, Threshold,
    ThresholdPredicate,
};
pub use deployment::ConfigurationStatus;
pub use job::{
    Job, JobAction, JobRequest, JobResult, JobStatus, PropertySpec, RebuildLevel, TargetPayload,
};
pub use property::{Property, PropertyKind, PropertyValue};

/// The five levels of the configuration hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectType {
    /// Root of one repository's tree.
    Repository,
    /// Deployment environment slice of a repository.
    Bucket,
    /// Arbitrary grouping of groups, clusters and nodes.
    Group,
    /// Set of nodes providing one service together.
    Cluster,
    /// A single server.
    Node,
}

impl ObjectType {
    /// All object types in load order.
    pub const ALL: [ObjectType; 5] = [
        ObjectType::Repository,
        ObjectType::Bucket,
        ObjectType::Group,
        ObjectType::Cluster,
        ObjectType::Node,
    ];

    /// Returns the string representation used in storage and messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectType::Repository => "repository",
            ObjectType::Bucket => "bucket",
            ObjectType::Group => "group",
            ObjectType::Cluster => "cluster",
            ObjectType::Node => "node",
        }
    }

    /// Whether an object of this type may have `child` as a direct child.
    pub fn can_host(&self, child: ObjectType) -> bool {
        use ObjectType::*;
        matches!(
            (self, child),
            (Repository, Bucket)
                | (Bucket, Group)
                | (Bucket, Cluster)
                | (Bucket, Node)
                | (Group, Group)
                | (Group, Cluster)
                | (Group, Node)
                | (Cluster, Node)
        )
    }

    /// Whether children of this type are members (as opposed to plain children).
    pub fn has_members(&self) -> bool {
        matches!(self, ObjectType::Group | ObjectType::Cluster)
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ObjectType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "repository" => Ok(ObjectType::Repository),
            "bucket" => Ok(ObjectType::Bucket),
            "group" => Ok(ObjectType::Group),
            "cluster" => Ok(ObjectType::Cluster),
            "node" => Ok(ObjectType::Node),
            other => Err(format!("unknown object type '{}'", other)),
        }
    }
}

/// Placement state of a tree object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectState {
    /// Directly below a bucket (or a repository at the root).
    Standalone,
    /// Member of a group.
    Grouped,
    /// Member of a cluster.
    Clustered,
    /// Bucket assigned to its repository.
    Assigned,
    /// Removed from the tree.
    Deleted,
}

impl ObjectState {
    /// The state an object of type `child` has when placed under `parent`.
    pub fn under(parent: Option<ObjectType>) -> Self {
        match parent {
            None | Some(ObjectType::Bucket) => ObjectState::Standalone,
            Some(ObjectType::Repository) => ObjectState::Assigned,
            Some(ObjectType::Group) => ObjectState::Grouped,
            Some(ObjectType::Cluster) => ObjectState::Clustered,
            Some(ObjectType::Node) => ObjectState::Deleted,
        }
    }

    /// Returns the string representation used in storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectState::Standalone => "standalone",
            ObjectState::Grouped => "grouped",
            ObjectState::Clustered => "clustered",
            ObjectState::Assigned => "assigned",
            ObjectState::Deleted => "deleted",
        }
    }
}

impl FromStr for ObjectState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "standalone" => Ok(ObjectState::Standalone),
            "grouped" => Ok(ObjectState::Grouped),
            "clustered" => Ok(ObjectState::Clustered),
            "assigned" => Ok(ObjectState::Assigned),
            "deleted" => Ok(ObjectState::Deleted),
            other => Err(format!("unknown object state '{}'", other)),
        }
    }
}

/// Reference to a tree object by type and id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectRef {
    /// Object type.
    pub object_type: ObjectType,
    /// Object id.
    pub object_id: Uuid,
}

impl ObjectRef {
    /// Create a new reference.
    pub fn new(object_type: ObjectType, object_id: Uuid) -> Self {
        Self {
            object_type,
            object_id,
        }
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.object_type, self.object_id)
    }
}

/// Type specific attributes of a tree object.
///
/// These are the values `native` constraints are evaluated against, in
/// addition to the object's type and name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ObjectAttributes {
    /// Repository attributes.
    Repository {
        /// Owning team.
        team_id: Uuid,
    },
    /// Bucket attributes.
    Bucket {
        /// Deployment environment (e.g. `live`, `qa`).
        environment: String,
        /// Frozen buckets reject structural changes.
        #[serde(default)]
        frozen: bool,
    },
    /// Group attributes.
    Group,
    /// Cluster attributes.
    Cluster,
    /// Node attributes.
    Node {
        /// Asset database id.
        asset_id: u64,
        /// Physical server id.
        server_id: Uuid,
        /// Whether the node is online.
        #[serde(default = "default_true")]
        online: bool,
    },
}

fn default_true() -> bool {
    true
}

impl ObjectAttributes {
    /// The object type these attributes belong to.
    pub fn object_type(&self) -> ObjectType {
        match self {
            ObjectAttributes::Repository { .. } => ObjectType::Repository,
            ObjectAttributes::Bucket { .. } => ObjectType::Bucket,
            ObjectAttributes::Group => ObjectType::Group,
            ObjectAttributes::Cluster => ObjectType::Cluster,
            ObjectAttributes::Node { .. } => ObjectType::Node,
        }
    }

    /// Look up a native attribute by name.
    pub fn native(&self, name: &str) -> Option<String> {
        match (self, name) {
            (ObjectAttributes::Repository { team_id }, "team_id") => Some(team_id.to_string()),
            (ObjectAttributes::Bucket { environment, .. }, "environment") => {
                Some(environment.clone())
            }
            (ObjectAttributes::Bucket { frozen, .. }, "frozen") => Some(frozen.to_string()),
            (ObjectAttributes::Node { asset_id, .. }, "asset_id") => Some(asset_id.to_string()),
            (ObjectAttributes::Node { server_id, .. }, "server_id") => {
                Some(server_id.to_string())
            }
            (ObjectAttributes::Node { online, .. }, "online") => Some(online.to_string()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hosting_rules() {
        assert!(ObjectType::Repository.can_host(ObjectType::Bucket));
        assert!(ObjectType::Bucket.can_host(ObjectType::Node));
        assert!(ObjectType::Group.can_host(ObjectType::Group));
        assert!(ObjectType::Cluster.can_host(ObjectType::Node));
        assert!(!ObjectType::Cluster.can_host(ObjectType::Group));
        assert!(!ObjectType::Node.can_host(ObjectType::Node));
        assert!(!ObjectType::Repository.can_host(ObjectType::Node));
        assert!(!ObjectType::Bucket.can_host(ObjectType::Bucket));
    }

    #[test]
    fn test_object_type_round_trip() {
        for t in ObjectType::ALL {
            assert_eq!(t.as_str().parse::<ObjectType>().unwrap(), t);
        }
        assert!("rack".parse::<ObjectType>().is_err());
    }

    #[test]
    fn test_state_under_parent() {
        assert_eq!(ObjectState::under(Some(ObjectType::Bucket)), ObjectState::Standalone);
        assert_eq!(ObjectState::under(Some(ObjectType::Group)), ObjectState::Grouped);
        assert_eq!(ObjectState::under(Some(ObjectType::Cluster)), ObjectState::Clustered);
        assert_eq!(ObjectState::under(Some(ObjectType::Repository)), ObjectState::Assigned);
    }

    #[test]
    fn test_native_attributes() {
        let server = Uuid::new_v4();
        let attrs = ObjectAttributes::Node {
            asset_id: 42,
            server_id: server,
            online: true,
        };
        assert_eq!(attrs.native("asset_id").as_deref(), Some("42"));
        assert_eq!(attrs.native("server_id"), Some(server.to_string()));
        assert_eq!(attrs.native("environment"), None);
    }
}
