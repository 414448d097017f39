// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Jobs: immutable mutation requests processed by repository workers.
//!
//! A [`JobRequest`] arrives in the loosely typed wire shape produced by the
//! routing layer. [`Job::from_request`] validates it and fills defaults,
//! producing a [`Job`] carrying a typed [`JobAction`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::{CheckConfig, ObjectRef, ObjectType, PropertyValue};
use crate::error::CoreError;

/// Processing status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Accepted, waiting in a worker mailbox.
    Queued,
    /// Being applied by its worker.
    Processing,
    /// Committed.
    Success,
    /// Rolled back.
    Failed,
}

impl JobStatus {
    /// Returns the string representation used in storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Success => "success",
            JobStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobStatus::Queued),
            "processing" => Ok(JobStatus::Processing),
            "success" => Ok(JobStatus::Success),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status '{}'", other)),
        }
    }
}

/// Scope of an operator triggered rebuild.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RebuildLevel {
    /// Re-create every check from the persisted check configurations.
    Checks,
    /// Keep checks, re-compute every check instance.
    Instances,
}

impl RebuildLevel {
    /// Returns the string representation used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            RebuildLevel::Checks => "checks",
            RebuildLevel::Instances => "instances",
        }
    }
}

/// Property as submitted with a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertySpec {
    /// Origin instance id; required for deletion, generated on creation.
    #[serde(default)]
    pub instance_id: Option<Uuid>,
    /// Propagate to descendants.
    #[serde(default)]
    pub inheritance: bool,
    /// Do not apply to the object itself.
    #[serde(default)]
    pub children_only: bool,
    /// View scope tag.
    #[serde(default = "default_view")]
    pub view: String,
    /// Typed payload.
    pub value: PropertyValue,
}

fn default_view() -> String {
    "any".to_string()
}

/// Repository sub-payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryPayload {
    /// Repository id, generated when absent on creation.
    #[serde(default)]
    pub id: Option<Uuid>,
    /// Repository name.
    #[serde(default)]
    pub name: String,
    /// Owning team.
    #[serde(default)]
    pub team_id: Option<Uuid>,
    /// Property to set or delete.
    #[serde(default)]
    pub property: Option<PropertySpec>,
}

/// Bucket sub-payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketPayload {
    /// Bucket id, generated when absent on creation.
    #[serde(default)]
    pub id: Option<Uuid>,
    /// Bucket name.
    #[serde(default)]
    pub name: String,
    /// Owning repository.
    pub repository_id: Uuid,
    /// Deployment environment.
    #[serde(default)]
    pub environment: String,
    /// Property to set or delete.
    #[serde(default)]
    pub property: Option<PropertySpec>,
}

/// Group or cluster sub-payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupPayload {
    /// Object id, generated when absent on creation.
    #[serde(default)]
    pub id: Option<Uuid>,
    /// Object name.
    #[serde(default)]
    pub name: String,
    /// Owning repository.
    pub repository_id: Uuid,
    /// Bucket the object lives in.
    #[serde(default)]
    pub bucket_id: Option<Uuid>,
    /// Group members to add.
    #[serde(default)]
    pub member_groups: Vec<Uuid>,
    /// Cluster members to add.
    #[serde(default)]
    pub member_clusters: Vec<Uuid>,
    /// Node members to add.
    #[serde(default)]
    pub member_nodes: Vec<Uuid>,
    /// Property to set or delete.
    #[serde(default)]
    pub property: Option<PropertySpec>,
}

/// Node sub-payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodePayload {
    /// Node id (nodes are registered globally before assignment).
    pub id: Uuid,
    /// Node name.
    #[serde(default)]
    pub name: String,
    /// Asset database id.
    #[serde(default)]
    pub asset_id: u64,
    /// Physical server.
    #[serde(default)]
    pub server_id: Uuid,
    /// Whether the node is online.
    #[serde(default)]
    pub online: Option<bool>,
    /// Owning repository.
    pub repository_id: Uuid,
    /// Bucket to assign to.
    #[serde(default)]
    pub bucket_id: Option<Uuid>,
    /// Property to set or delete.
    #[serde(default)]
    pub property: Option<PropertySpec>,
}

/// Target sub-payload of a job request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TargetPayload {
    /// Repository target.
    Repository(RepositoryPayload),
    /// Bucket target.
    Bucket(BucketPayload),
    /// Group target.
    Group(GroupPayload),
    /// Cluster target.
    Cluster(GroupPayload),
    /// Node target.
    Node(NodePayload),
    /// Check configuration target.
    CheckConfig(Box<CheckConfig>),
}

impl TargetPayload {
    fn kind(&self) -> &'static str {
        match self {
            TargetPayload::Repository(_) => "repository",
            TargetPayload::Bucket(_) => "bucket",
            TargetPayload::Group(_) => "group",
            TargetPayload::Cluster(_) => "cluster",
            TargetPayload::Node(_) => "node",
            TargetPayload::CheckConfig(_) => "check_config",
        }
    }
}

/// Job request as delivered by the routing layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRequest {
    /// Request section (`repository`, `bucket`, `group`, ...).
    pub request_type: String,
    /// Action name (`create_group`, `set_property`, ...).
    pub action: String,
    /// Requesting user.
    pub user: String,
    /// Target payload.
    pub target: TargetPayload,
    /// Job id assigned by the routing layer.
    pub job_id: Uuid,
}

/// Validated, typed mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum JobAction {
    /// Create the repository root.
    CreateRepository {
        /// Repository id.
        repository_id: Uuid,
        /// Name.
        name: String,
        /// Owning team.
        team_id: Uuid,
    },
    /// Create a bucket below the repository.
    CreateBucket {
        /// Bucket id.
        bucket_id: Uuid,
        /// Name.
        name: String,
        /// Deployment environment.
        environment: String,
    },
    /// Delete an empty bucket.
    DeleteBucket {
        /// Bucket id.
        bucket_id: Uuid,
    },
    /// Create a standalone group.
    CreateGroup {
        /// Group id.
        group_id: Uuid,
        /// Bucket.
        bucket_id: Uuid,
        /// Name.
        name: String,
    },
    /// Delete a group, releasing its members.
    DeleteGroup {
        /// Group id.
        group_id: Uuid,
    },
    /// Create a standalone cluster.
    CreateCluster {
        /// Cluster id.
        cluster_id: Uuid,
        /// Bucket.
        bucket_id: Uuid,
        /// Name.
        name: String,
    },
    /// Delete a cluster, releasing its members.
    DeleteCluster {
        /// Cluster id.
        cluster_id: Uuid,
    },
    /// Assign a globally registered node to a bucket.
    AssignNode {
        /// Node id.
        node_id: Uuid,
        /// Bucket.
        bucket_id: Uuid,
        /// Name.
        name: String,
        /// Asset id.
        asset_id: u64,
        /// Server id.
        server_id: Uuid,
        /// Online flag.
        online: bool,
    },
    /// Remove a node from the repository.
    UnassignNode {
        /// Node id.
        node_id: Uuid,
    },
    /// Move an object into a group or cluster.
    AddMember {
        /// Group or cluster.
        parent: ObjectRef,
        /// New member.
        member: ObjectRef,
    },
    /// Move a member back to its bucket.
    RemoveMember {
        /// Member to release.
        member: ObjectRef,
    },
    /// Attach a property.
    SetProperty {
        /// Carrier object.
        object: ObjectRef,
        /// Property.
        property: PropertySpec,
    },
    /// Remove a directly attached property.
    DeleteProperty {
        /// Carrier object.
        object: ObjectRef,
        /// Origin instance id.
        source_instance_id: Uuid,
    },
    /// Attach a check configuration.
    AddCheck(Box<CheckConfig>),
    /// Remove a check configuration.
    RemoveCheck {
        /// Configuration id.
        config_id: Uuid,
    },
}

impl JobAction {
    /// Canonical action name.
    pub fn name(&self) -> &'static str {
        match self {
            JobAction::CreateRepository { .. } => "create_repository",
            JobAction::CreateBucket { .. } => "create_bucket",
            JobAction::DeleteBucket { .. } => "delete_bucket",
            JobAction::CreateGroup { .. } => "create_group",
            JobAction::DeleteGroup { .. } => "delete_group",
            JobAction::CreateCluster { .. } => "create_cluster",
            JobAction::DeleteCluster { .. } => "delete_cluster",
            JobAction::AssignNode { .. } => "assign_node",
            JobAction::UnassignNode { .. } => "unassign_node",
            JobAction::AddMember { .. } => "add_member",
            JobAction::RemoveMember { .. } => "remove_member",
            JobAction::SetProperty { .. } => "set_property",
            JobAction::DeleteProperty { .. } => "delete_property",
            JobAction::AddCheck(_) => "add_check",
            JobAction::RemoveCheck { .. } => "remove_check",
        }
    }
}

/// A validated job bound to one repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    /// Unique job id.
    pub job_id: Uuid,
    /// Repository whose worker processes the job.
    pub repository_id: Uuid,
    /// Requesting user.
    pub user: String,
    /// Request section from the original request.
    pub request_type: String,
    /// Typed mutation.
    pub action: JobAction,
    /// When the job was accepted.
    pub queued_at: DateTime<Utc>,
    /// Rebuild replays are not persisted as jobs.
    #[serde(default)]
    pub rebuild: bool,
}

/// Outcome published for every processed job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobResult {
    /// Job id.
    pub job_id: Uuid,
    /// Whether the job committed.
    pub success: bool,
    /// Recorded error on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Machine readable error code on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

impl JobResult {
    /// Successful result.
    pub fn success(job_id: Uuid) -> Self {
        Self {
            job_id,
            success: true,
            error: None,
            error_code: None,
        }
    }

    /// Failed result carrying the error text and code.
    pub fn failure(job_id: Uuid, err: &CoreError) -> Self {
        Self {
            job_id,
            success: false,
            error: Some(err.to_string()),
            error_code: Some(err.error_code().to_string()),
        }
    }
}

fn validation(field: &str, message: impl Into<String>) -> CoreError {
    CoreError::Validation {
        field: field.to_string(),
        message: message.into(),
    }
}

fn require_name(name: &str) -> Result<String, CoreError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(validation("name", "must not be empty"));
    }
    Ok(trimmed.to_string())
}

fn require_bucket(bucket_id: Option<Uuid>) -> Result<Uuid, CoreError> {
    bucket_id.ok_or_else(|| validation("bucket_id", "is required"))
}

fn require_id(id: Option<Uuid>, field: &str) -> Result<Uuid, CoreError> {
    id.ok_or_else(|| validation(field, "is required"))
}

fn property_action(
    action: &str,
    object: ObjectRef,
    property: &Option<PropertySpec>,
) -> Result<JobAction, CoreError> {
    let spec = property
        .clone()
        .ok_or_else(|| validation("property", "is required"))?;
    match action {
        "set_property" => Ok(JobAction::SetProperty {
            object,
            property: spec,
        }),
        "delete_property" => Ok(JobAction::DeleteProperty {
            object,
            source_instance_id: require_id(spec.instance_id, "property.instance_id")?,
        }),
        other => Err(unknown_action(other, object.object_type.as_str())),
    }
}

/// Translate a group/cluster payload's member lists into a single move.
fn member_action(
    parent: ObjectRef,
    payload: &GroupPayload,
    member_type: ObjectType,
) -> Result<JobAction, CoreError> {
    let members = match member_type {
        ObjectType::Group => &payload.member_groups,
        ObjectType::Cluster => &payload.member_clusters,
        _ => &payload.member_nodes,
    };
    match members.as_slice() {
        [member] => Ok(JobAction::AddMember {
            parent,
            member: ObjectRef::new(member_type, *member),
        }),
        [] => Err(validation("members", "no member given")),
        _ => Err(validation("members", "exactly one member per job")),
    }
}

impl Job {
    /// Validate a wire request and fill in generated ids.
    ///
    /// Validation failures never reach a worker.
    pub fn from_request(request: JobRequest) -> Result<Self, CoreError> {
        if request.user.trim().is_empty() {
            return Err(validation("user", "must not be empty"));
        }
        if request.request_type != request.target.kind() {
            return Err(validation(
                "request_type",
                format!(
                    "'{}' does not match {} payload",
                    request.request_type,
                    request.target.kind()
                ),
            ));
        }

        let action_name = request.action.as_str();
        let (repository_id, action) = match &request.target {
            TargetPayload::Repository(p) => {
                let repository_id = p.id.unwrap_or_else(Uuid::new_v4);
                let object = ObjectRef::new(ObjectType::Repository, repository_id);
                let action = match action_name {
                    "create_repository" => JobAction::CreateRepository {
                        repository_id,
                        name: require_name(&p.name)?,
                        team_id: require_id(p.team_id, "team_id")?,
                    },
                    "set_property" | "delete_property" => {
                        require_id(p.id, "id")?;
                        property_action(action_name, object, &p.property)?
                    }
                    other => return Err(unknown_action(other, "repository")),
                };
                (repository_id, action)
            }
            TargetPayload::Bucket(p) => {
                let action = match action_name {
                    "create_bucket" => JobAction::CreateBucket {
                        bucket_id: p.id.unwrap_or_else(Uuid::new_v4),
                        name: require_name(&p.name)?,
                        environment: require_name(&p.environment)
                            .map_err(|_| validation("environment", "must not be empty"))?,
                    },
                    "delete_bucket" => JobAction::DeleteBucket {
                        bucket_id: require_id(p.id, "id")?,
                    },
                    "set_property" | "delete_property" => property_action(
                        action_name,
                        ObjectRef::new(ObjectType::Bucket, require_id(p.id, "id")?),
                        &p.property,
                    )?,
                    other => return Err(unknown_action(other, "bucket")),
                };
                (p.repository_id, action)
            }
            TargetPayload::Group(p) => {
                let action = match action_name {
                    "create_group" => JobAction::CreateGroup {
                        group_id: p.id.unwrap_or_else(Uuid::new_v4),
                        bucket_id: require_bucket(p.bucket_id)?,
                        name: require_name(&p.name)?,
                    },
                    "delete_group" => JobAction::DeleteGroup {
                        group_id: require_id(p.id, "id")?,
                    },
                    "add_group_to_group" | "add_cluster_to_group" | "add_node_to_group" => {
                        let parent = ObjectRef::new(ObjectType::Group, require_id(p.id, "id")?);
                        let member_type = match action_name {
                            "add_group_to_group" => ObjectType::Group,
                            "add_cluster_to_group" => ObjectType::Cluster,
                            _ => ObjectType::Node,
                        };
                        member_action(parent, p, member_type)?
                    }
                    "remove_member" => JobAction::RemoveMember {
                        member: ObjectRef::new(ObjectType::Group, require_id(p.id, "id")?),
                    },
                    "set_property" | "delete_property" => property_action(
                        action_name,
                        ObjectRef::new(ObjectType::Group, require_id(p.id, "id")?),
                        &p.property,
                    )?,
                    other => return Err(unknown_action(other, "group")),
                };
                (p.repository_id, action)
            }
            TargetPayload::Cluster(p) => {
                let action = match action_name {
                    "create_cluster" => JobAction::CreateCluster {
                        cluster_id: p.id.unwrap_or_else(Uuid::new_v4),
                        bucket_id: require_bucket(p.bucket_id)?,
                        name: require_name(&p.name)?,
                    },
                    "delete_cluster" => JobAction::DeleteCluster {
                        cluster_id: require_id(p.id, "id")?,
                    },
                    "add_node_to_cluster" => member_action(
                        ObjectRef::new(ObjectType::Cluster, require_id(p.id, "id")?),
                        p,
                        ObjectType::Node,
                    )?,
                    "remove_member" => JobAction::RemoveMember {
                        member: ObjectRef::new(ObjectType::Cluster, require_id(p.id, "id")?),
                    },
                    "set_property" | "delete_property" => property_action(
                        action_name,
                        ObjectRef::new(ObjectType::Cluster, require_id(p.id, "id")?),
                        &p.property,
                    )?,
                    other => return Err(unknown_action(other, "cluster")),
                };
                (p.repository_id, action)
            }
            TargetPayload::Node(p) => {
                let object = ObjectRef::new(ObjectType::Node, p.id);
                let action = match action_name {
                    "assign_node" => JobAction::AssignNode {
                        node_id: p.id,
                        bucket_id: require_bucket(p.bucket_id)?,
                        name: require_name(&p.name)?,
                        asset_id: p.asset_id,
                        server_id: p.server_id,
                        online: p.online.unwrap_or(true),
                    },
                    "unassign_node" => JobAction::UnassignNode { node_id: p.id },
                    "remove_member" => JobAction::RemoveMember { member: object },
                    "set_property" | "delete_property" => {
                        property_action(action_name, object, &p.property)?
                    }
                    other => return Err(unknown_action(other, "node")),
                };
                (p.repository_id, action)
            }
            TargetPayload::CheckConfig(c) => {
                let action = match action_name {
                    "add_check" => {
                        if c.interval == 0 {
                            return Err(validation("interval", "must be positive"));
                        }
                        require_name(&c.name)?;
                        if let Some(t) = c.thresholds.iter().find(|t| t.level.trim().is_empty()) {
                            return Err(validation(
                                "thresholds",
                                format!("threshold {} has no level", t.value),
                            ));
                        }
                        JobAction::AddCheck(c.clone())
                    }
                    "remove_check" => JobAction::RemoveCheck {
                        config_id: c.config_id,
                    },
                    other => return Err(unknown_action(other, "check_config")),
                };
                (c.repository_id, action)
            }
        };

        Ok(Job {
            job_id: request.job_id,
            repository_id,
            user: request.user,
            request_type: request.request_type,
            action,
            queued_at: Utc::now(),
            rebuild: false,
        })
    }

    /// Build a rebuild replay job; these are never persisted.
    pub fn rebuild(repository_id: Uuid, action: JobAction) -> Self {
        Job {
            job_id: Uuid::new_v4(),
            repository_id,
            user: "system".to_string(),
            request_type: "rebuild".to_string(),
            action,
            queued_at: Utc::now(),
            rebuild: true,
        }
    }
}

fn unknown_action(action: &str, section: &str) -> CoreError {
    validation(
        "action",
        format!("unknown action '{}' for {}", action, section),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(request_type: &str, action: &str, target: TargetPayload) -> JobRequest {
        JobRequest {
            request_type: request_type.to_string(),
            action: action.to_string(),
            user: "alice".to_string(),
            target,
            job_id: Uuid::new_v4(),
        }
    }

    #[test]
    fn test_create_group_fills_id() {
        let repo = Uuid::new_v4();
        let bucket = Uuid::new_v4();
        let job = Job::from_request(request(
            "group",
            "create_group",
            TargetPayload::Group(GroupPayload {
                name: "web".into(),
                repository_id: repo,
                bucket_id: Some(bucket),
                ..Default::default()
            }),
        ))
        .unwrap();

        assert_eq!(job.repository_id, repo);
        match job.action {
            JobAction::CreateGroup {
                bucket_id, name, ..
            } => {
                assert_eq!(bucket_id, bucket);
                assert_eq!(name, "web");
            }
            other => panic!("unexpected action {:?}", other),
        }
    }

    #[test]
    fn test_request_type_must_match_payload() {
        let err = Job::from_request(request(
            "bucket",
            "create_group",
            TargetPayload::Group(GroupPayload {
                name: "web".into(),
                repository_id: Uuid::new_v4(),
                bucket_id: Some(Uuid::new_v4()),
                ..Default::default()
            }),
        ))
        .unwrap_err();
        assert_eq!(err.error_code(), "VALIDATION_ERROR");
    }

    #[test]
    fn test_member_requires_exactly_one() {
        let err = Job::from_request(request(
            "group",
            "add_node_to_group",
            TargetPayload::Group(GroupPayload {
                id: Some(Uuid::new_v4()),
                repository_id: Uuid::new_v4(),
                member_nodes: vec![Uuid::new_v4(), Uuid::new_v4()],
                ..Default::default()
            }),
        ))
        .unwrap_err();
        assert!(err.to_string().contains("exactly one member"));
    }

    #[test]
    fn test_delete_property_requires_instance_id() {
        let err = Job::from_request(request(
            "bucket",
            "delete_property",
            TargetPayload::Bucket(BucketPayload {
                id: Some(Uuid::new_v4()),
                repository_id: Uuid::new_v4(),
                property: Some(PropertySpec {
                    instance_id: None,
                    inheritance: true,
                    children_only: false,
                    view: "any".into(),
                    value: PropertyValue::System {
                        key: "dc".into(),
                        value: "fra".into(),
                    },
                }),
                ..Default::default()
            }),
        ))
        .unwrap_err();
        assert!(err.to_string().contains("property.instance_id"));
    }

    #[test]
    fn test_unknown_action_rejected() {
        let err = Job::from_request(request(
            "node",
            "reboot",
            TargetPayload::Node(NodePayload {
                id: Uuid::new_v4(),
                name: "n1".into(),
                asset_id: 1,
                server_id: Uuid::new_v4(),
                online: None,
                repository_id: Uuid::new_v4(),
                bucket_id: None,
                property: None,
            }),
        ))
        .unwrap_err();
        assert!(err.to_string().contains("unknown action 'reboot'"));
    }
}
