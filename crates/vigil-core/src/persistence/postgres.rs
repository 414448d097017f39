// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! PostgreSQL persistence for vigil.
//!
//! Tree writes go through [`apply_action`] on a transaction connection; the
//! deployment side uses compare-and-set updates so concurrent lifecycle
//! passes never move a configuration twice.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use sqlx::{PgConnection, PgPool, Postgres, Transaction};
use std::str::FromStr;
use uuid::Uuid;

use super::{
    CapabilityRecord, CheckInstanceRecord, ConfigurationRecord, DependencyRecord, JobRecord,
    OrderingDecision, Persistence, PersistenceTransaction, RepositoryRecord,
};
use crate::error::CoreError;
use crate::model::{
    Check, CheckConfig, CheckInstance, ConfigurationStatus, Job, JobStatus, ObjectAttributes,
    ObjectRef, ObjectType, Property, PropertyKind, RebuildLevel,
};
use crate::tree::{Action, ObjectSnapshot};

/// PostgreSQL-backed persistence implementation.
#[derive(Clone)]
pub struct PostgresPersistence {
    pool: PgPool,
}

impl PostgresPersistence {
    /// Create a new Postgres-backed persistence implementation.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

// ============================================================================
// Row Types
// ============================================================================

fn parse<T: FromStr<Err = String>>(field: &str, raw: &str) -> Result<T, CoreError> {
    raw.parse()
        .map_err(|e| CoreError::persistence(format!("decode {}", field), e))
}

fn from_json<T: DeserializeOwned>(value: serde_json::Value) -> Result<T, CoreError> {
    Ok(serde_json::from_value(value)?)
}

fn to_json<T: Serialize>(value: &T) -> Result<serde_json::Value, CoreError> {
    Ok(serde_json::to_value(value)?)
}

#[derive(sqlx::FromRow)]
struct RepositoryRow {
    repository_id: Uuid,
    name: String,
    team_id: Uuid,
    broken: bool,
    broken_reason: Option<String>,
}

impl From<RepositoryRow> for RepositoryRecord {
    fn from(row: RepositoryRow) -> Self {
        Self {
            repository_id: row.repository_id,
            name: row.name,
            team_id: row.team_id,
            broken: row.broken,
            broken_reason: row.broken_reason,
        }
    }
}

#[derive(sqlx::FromRow)]
struct JobRow {
    job_id: Uuid,
    repository_id: Uuid,
    user_name: String,
    request_type: String,
    action: String,
    status: String,
    error: Option<String>,
    payload: serde_json::Value,
    queued_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
}

impl TryFrom<JobRow> for JobRecord {
    type Error = CoreError;

    fn try_from(row: JobRow) -> Result<Self, CoreError> {
        Ok(Self {
            job_id: row.job_id,
            repository_id: row.repository_id,
            user: row.user_name,
            request_type: row.request_type,
            action: row.action,
            status: parse("job status", &row.status)?,
            error: row.error,
            payload: row.payload,
            queued_at: row.queued_at,
            finished_at: row.finished_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ObjectRow {
    object_id: Uuid,
    object_type: String,
    repository_id: Uuid,
    name: String,
    parent_type: Option<String>,
    parent_id: Option<Uuid>,
    state: String,
    attributes: serde_json::Value,
}

impl TryFrom<ObjectRow> for ObjectSnapshot {
    type Error = CoreError;

    fn try_from(row: ObjectRow) -> Result<Self, CoreError> {
        let parent = match (row.parent_type, row.parent_id) {
            (Some(t), Some(id)) => Some(ObjectRef::new(parse("parent type", &t)?, id)),
            _ => None,
        };
        Ok(Self {
            object: ObjectRef::new(parse("object type", &row.object_type)?, row.object_id),
            repository_id: row.repository_id,
            name: row.name,
            parent,
            state: parse("object state", &row.state)?,
            attributes: from_json(row.attributes)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ConfigurationRow {
    configuration_id: Uuid,
    check_instance_id: Uuid,
    repository_id: Uuid,
    version: i64,
    status: String,
    next_status: Option<String>,
    update_available: bool,
    details: Option<serde_json::Value>,
    created_at: DateTime<Utc>,
    status_updated_at: DateTime<Utc>,
    instance_deleted: bool,
}

impl TryFrom<ConfigurationRow> for ConfigurationRecord {
    type Error = CoreError;

    fn try_from(row: ConfigurationRow) -> Result<Self, CoreError> {
        Ok(Self {
            configuration_id: row.configuration_id,
            check_instance_id: row.check_instance_id,
            repository_id: row.repository_id,
            version: u64::try_from(row.version).unwrap_or_default(),
            status: parse("configuration status", &row.status)?,
            next_status: row
                .next_status
                .as_deref()
                .map(|s| parse("next status", s))
                .transpose()?,
            update_available: row.update_available,
            details: row.details,
            created_at: row.created_at,
            status_updated_at: row.status_updated_at,
            instance_deleted: row.instance_deleted,
        })
    }
}

#[derive(sqlx::FromRow)]
struct DependencyRow {
    blocked_id: Uuid,
    blocking_id: Uuid,
    release_status: String,
    created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct CapabilityRow {
    capability_id: Uuid,
    monitoring_system: String,
    callback_uri: String,
    metric: String,
    unit: String,
    description: String,
    view: String,
}

impl From<CapabilityRow> for CapabilityRecord {
    fn from(row: CapabilityRow) -> Self {
        Self {
            capability_id: row.capability_id,
            monitoring_system: row.monitoring_system,
            callback_uri: row.callback_uri,
            metric: row.metric,
            unit: row.unit,
            description: row.description,
            view: row.view,
        }
    }
}

const CONFIGURATION_SELECT: &str = r#"
    SELECT c.configuration_id, c.check_instance_id, c.repository_id, c.version,
           c.status::text AS status, c.next_status::text AS next_status,
           c.update_available, c.details, c.created_at, c.status_updated_at,
           COALESCE(ci.deleted, TRUE) AS instance_deleted
    FROM check_instance_configurations c
    LEFT JOIN check_instances ci ON ci.instance_id = c.check_instance_id
"#;

// ============================================================================
// Job Operations
// ============================================================================

/// Record an accepted job.
pub async fn insert_job(pool: &PgPool, job: &Job) -> Result<(), CoreError> {
    sqlx::query(
        r#"
        INSERT INTO jobs (job_id, repository_id, user_name, request_type, action, status, payload, queued_at)
        VALUES ($1, $2, $3, $4, $5, 'queued'::job_status, $6, $7)
        "#,
    )
    .bind(job.job_id)
    .bind(job.repository_id)
    .bind(&job.user)
    .bind(&job.request_type)
    .bind(job.action.name())
    .bind(to_json(&job.action)?)
    .bind(job.queued_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Update job status; final statuses also set `finished_at`.
pub async fn update_job_status(
    pool: &PgPool,
    job_id: Uuid,
    status: JobStatus,
    error: Option<&str>,
) -> Result<(), CoreError> {
    let result = sqlx::query(
        r#"
        UPDATE jobs
        SET status = $2::job_status,
            error = $3,
            finished_at = CASE WHEN $2 IN ('success', 'failed') THEN NOW() ELSE finished_at END
        WHERE job_id = $1
        "#,
    )
    .bind(job_id)
    .bind(status.as_str())
    .bind(error)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(CoreError::not_found("job", job_id));
    }

    Ok(())
}

/// Get a job by ID.
pub async fn get_job(pool: &PgPool, job_id: Uuid) -> Result<Option<JobRecord>, CoreError> {
    let row = sqlx::query_as::<_, JobRow>(
        r#"
        SELECT job_id, repository_id, user_name, request_type, action,
               status::text AS status, error, payload, queued_at, finished_at
        FROM jobs
        WHERE job_id = $1
        "#,
    )
    .bind(job_id)
    .fetch_optional(pool)
    .await?;

    row.map(JobRecord::try_from).transpose()
}

// ============================================================================
// Repository Operations
// ============================================================================

/// List every repository.
pub async fn list_repositories(pool: &PgPool) -> Result<Vec<RepositoryRecord>, CoreError> {
    let rows = sqlx::query_as::<_, RepositoryRow>(
        r#"
        SELECT repository_id, name, team_id, broken, broken_reason
        FROM repositories
        ORDER BY name
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(Into::into).collect())
}

/// Get a repository by ID.
pub async fn get_repository(
    pool: &PgPool,
    repository_id: Uuid,
) -> Result<Option<RepositoryRecord>, CoreError> {
    let row = sqlx::query_as::<_, RepositoryRow>(
        r#"
        SELECT repository_id, name, team_id, broken, broken_reason
        FROM repositories
        WHERE repository_id = $1
        "#,
    )
    .bind(repository_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(Into::into))
}

/// Flag a repository broken.
pub async fn mark_repository_broken(
    pool: &PgPool,
    repository_id: Uuid,
    reason: &str,
) -> Result<(), CoreError> {
    let result = sqlx::query(
        r#"
        UPDATE repositories SET broken = TRUE, broken_reason = $2
        WHERE repository_id = $1
        "#,
    )
    .bind(repository_id)
    .bind(reason)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(CoreError::not_found("repository", repository_id));
    }

    Ok(())
}

/// Clear the broken flag after a successful rebuild.
pub async fn clear_repository_broken(pool: &PgPool, repository_id: Uuid) -> Result<(), CoreError> {
    sqlx::query(
        r#"
        UPDATE repositories SET broken = FALSE, broken_reason = NULL
        WHERE repository_id = $1
        "#,
    )
    .bind(repository_id)
    .execute(pool)
    .await?;

    Ok(())
}

// ============================================================================
// Tree Load
// ============================================================================

/// Live objects of one type.
pub async fn load_objects(
    pool: &PgPool,
    repository_id: Uuid,
    object_type: ObjectType,
) -> Result<Vec<ObjectSnapshot>, CoreError> {
    let rows = sqlx::query_as::<_, ObjectRow>(
        r#"
        SELECT object_id, object_type, repository_id, name, parent_type, parent_id, state, attributes
        FROM objects
        WHERE repository_id = $1 AND object_type = $2 AND NOT deleted
        ORDER BY object_id
        "#,
    )
    .bind(repository_id)
    .bind(object_type.as_str())
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(ObjectSnapshot::try_from).collect()
}

/// Property instances of one kind on objects of one type.
pub async fn load_properties(
    pool: &PgPool,
    repository_id: Uuid,
    object_type: ObjectType,
    kind: PropertyKind,
) -> Result<Vec<Property>, CoreError> {
    let bodies: Vec<serde_json::Value> = sqlx::query_scalar(
        r#"
        SELECT body FROM properties
        WHERE repository_id = $1 AND object_type = $2 AND kind = $3
        ORDER BY instance_id
        "#,
    )
    .bind(repository_id)
    .bind(object_type.as_str())
    .bind(kind.as_str())
    .fetch_all(pool)
    .await?;

    bodies.into_iter().map(from_json).collect()
}

/// Live check configurations.
pub async fn load_check_configs(
    pool: &PgPool,
    repository_id: Uuid,
) -> Result<Vec<CheckConfig>, CoreError> {
    let bodies: Vec<serde_json::Value> = sqlx::query_scalar(
        r#"
        SELECT body FROM check_configs
        WHERE repository_id = $1 AND NOT deleted
        ORDER BY config_id
        "#,
    )
    .bind(repository_id)
    .fetch_all(pool)
    .await?;

    bodies.into_iter().map(from_json).collect()
}

/// Materialised checks.
pub async fn load_checks(pool: &PgPool, repository_id: Uuid) -> Result<Vec<Check>, CoreError> {
    let bodies: Vec<serde_json::Value> = sqlx::query_scalar(
        r#"
        SELECT body FROM checks WHERE repository_id = $1 ORDER BY check_id
        "#,
    )
    .bind(repository_id)
    .fetch_all(pool)
    .await?;

    bodies.into_iter().map(from_json).collect()
}

/// Check instances not flagged deleted.
pub async fn load_check_instances(
    pool: &PgPool,
    repository_id: Uuid,
) -> Result<Vec<CheckInstance>, CoreError> {
    let bodies: Vec<serde_json::Value> = sqlx::query_scalar(
        r#"
        SELECT body FROM check_instances
        WHERE repository_id = $1 AND NOT deleted
        ORDER BY instance_id
        "#,
    )
    .bind(repository_id)
    .fetch_all(pool)
    .await?;

    bodies.into_iter().map(from_json).collect()
}

/// Drop derived state ahead of a rebuild.
///
/// `checks` drops every materialised check; both levels flag every check
/// instance deleted so the rebuilt tree re-creates them.
pub async fn reset_for_rebuild(
    pool: &PgPool,
    repository_id: Uuid,
    level: RebuildLevel,
) -> Result<(), CoreError> {
    let mut tx = pool.begin().await?;

    if level == RebuildLevel::Checks {
        sqlx::query("DELETE FROM checks WHERE repository_id = $1")
            .bind(repository_id)
            .execute(&mut *tx)
            .await?;
    }
    sqlx::query(
        r#"
        UPDATE check_instances SET deleted = TRUE, updated_at = NOW()
        WHERE repository_id = $1 AND NOT deleted
        "#,
    )
    .bind(repository_id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}

// ============================================================================
// Tree Writes
// ============================================================================

async fn upsert_object(conn: &mut PgConnection, s: &ObjectSnapshot) -> Result<(), CoreError> {
    sqlx::query(
        r#"
        INSERT INTO objects (object_id, object_type, repository_id, name, parent_type, parent_id, state, attributes, deleted)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, FALSE)
        ON CONFLICT (object_id) DO UPDATE
        SET name = EXCLUDED.name,
            parent_type = EXCLUDED.parent_type,
            parent_id = EXCLUDED.parent_id,
            state = EXCLUDED.state,
            attributes = EXCLUDED.attributes,
            deleted = FALSE,
            updated_at = NOW()
        "#,
    )
    .bind(s.object.object_id)
    .bind(s.object.object_type.as_str())
    .bind(s.repository_id)
    .bind(&s.name)
    .bind(s.parent.map(|p| p.object_type.as_str()))
    .bind(s.parent.map(|p| p.object_id))
    .bind(s.state.as_str())
    .bind(to_json(&s.attributes)?)
    .execute(conn)
    .await?;

    Ok(())
}

async fn insert_configuration(
    conn: &mut PgConnection,
    instance: &CheckInstance,
) -> Result<(), CoreError> {
    sqlx::query(
        r#"
        INSERT INTO check_instance_configurations
            (configuration_id, check_instance_id, repository_id, version, status)
        SELECT $1, $2, repository_id, $3, 'awaiting_computation'::configuration_status
        FROM objects WHERE object_id = $4
        "#,
    )
    .bind(instance.configuration_id)
    .bind(instance.instance_id)
    .bind(instance.version as i64)
    .bind(instance.object.object_id)
    .execute(conn)
    .await?;

    Ok(())
}

/// Persist one tree Action on a transaction connection.
pub async fn apply_action(conn: &mut PgConnection, action: &Action) -> Result<(), CoreError> {
    match action {
        Action::Create(s) | Action::NodeAssignment(s) => {
            if let ObjectAttributes::Repository { team_id } = &s.attributes {
                sqlx::query(
                    r#"
                    INSERT INTO repositories (repository_id, name, team_id)
                    VALUES ($1, $2, $3)
                    ON CONFLICT (repository_id) DO UPDATE SET name = EXCLUDED.name, team_id = EXCLUDED.team_id
                    "#,
                )
                .bind(s.object.object_id)
                .bind(&s.name)
                .bind(team_id)
                .execute(&mut *conn)
                .await?;
            }
            upsert_object(conn, s).await?;
        }
        Action::Update(s) => {
            let result = sqlx::query(
                r#"
                UPDATE objects
                SET parent_type = $2, parent_id = $3, state = $4, updated_at = NOW()
                WHERE object_id = $1
                "#,
            )
            .bind(s.object.object_id)
            .bind(s.parent.map(|p| p.object_type.as_str()))
            .bind(s.parent.map(|p| p.object_id))
            .bind(s.state.as_str())
            .execute(conn)
            .await?;
            if result.rows_affected() == 0 {
                return Err(CoreError::not_found(s.object.object_type.as_str(), s.object.object_id));
            }
        }
        Action::Delete(s) => {
            sqlx::query(
                r#"
                UPDATE objects SET state = 'deleted', deleted = TRUE, updated_at = NOW()
                WHERE object_id = $1
                "#,
            )
            .bind(s.object.object_id)
            .execute(conn)
            .await?;
        }
        Action::MemberNew { parent, member } => {
            sqlx::query(
                r#"
                INSERT INTO memberships (parent_id, member_id, member_type)
                VALUES ($1, $2, $3)
                ON CONFLICT DO NOTHING
                "#,
            )
            .bind(parent.object_id)
            .bind(member.object_id)
            .bind(member.object_type.as_str())
            .execute(conn)
            .await?;
        }
        Action::MemberRemoved { parent, member } => {
            sqlx::query("DELETE FROM memberships WHERE parent_id = $1 AND member_id = $2")
                .bind(parent.object_id)
                .bind(member.object_id)
                .execute(conn)
                .await?;
        }
        Action::PropertyNew(p) => {
            sqlx::query(
                r#"
                INSERT INTO properties (instance_id, repository_id, object_type, object_id, kind, body)
                SELECT $1, repository_id, $2, $3, $4, $5 FROM objects WHERE object_id = $3
                "#,
            )
            .bind(p.instance_id)
            .bind(p.object.object_type.as_str())
            .bind(p.object.object_id)
            .bind(p.value.kind().as_str())
            .bind(to_json(p)?)
            .execute(conn)
            .await?;
        }
        Action::PropertyDelete(p) => {
            sqlx::query("DELETE FROM properties WHERE instance_id = $1")
                .bind(p.instance_id)
                .execute(conn)
                .await?;
        }
        Action::CheckNew(c) => {
            sqlx::query(
                r#"
                INSERT INTO checks (check_id, repository_id, object_id, config_id, body)
                SELECT $1, repository_id, $2, $3, $4 FROM objects WHERE object_id = $2
                "#,
            )
            .bind(c.check_id)
            .bind(c.object.object_id)
            .bind(c.config_id)
            .bind(to_json(c)?)
            .execute(conn)
            .await?;
        }
        Action::CheckRemoved(c) => {
            sqlx::query("DELETE FROM checks WHERE check_id = $1")
                .bind(c.check_id)
                .execute(conn)
                .await?;
        }
        Action::CheckInstanceCreate(i) | Action::CheckInstanceUpdate(i) => {
            sqlx::query(
                r#"
                INSERT INTO check_instances (instance_id, repository_id, config_id, object_id, body)
                SELECT $1, repository_id, $2, $3, $4 FROM objects WHERE object_id = $3
                ON CONFLICT (instance_id) DO UPDATE
                SET body = EXCLUDED.body, deleted = FALSE, updated_at = NOW()
                "#,
            )
            .bind(i.instance_id)
            .bind(i.config_id)
            .bind(i.object.object_id)
            .bind(to_json(i)?)
            .execute(&mut *conn)
            .await?;
            insert_configuration(conn, i).await?;
        }
        Action::CheckInstanceDelete(i) => {
            sqlx::query(
                "UPDATE check_instances SET deleted = TRUE, updated_at = NOW() WHERE instance_id = $1",
            )
            .bind(i.instance_id)
            .execute(conn)
            .await?;
        }
    }
    Ok(())
}

/// Store (or overwrite) a check configuration.
pub async fn save_check_config(
    conn: &mut PgConnection,
    config: &CheckConfig,
) -> Result<(), CoreError> {
    sqlx::query(
        r#"
        INSERT INTO check_configs (config_id, repository_id, body)
        VALUES ($1, $2, $3)
        ON CONFLICT (config_id) DO UPDATE
        SET body = EXCLUDED.body, deleted = FALSE, updated_at = NOW()
        "#,
    )
    .bind(config.config_id)
    .bind(config.repository_id)
    .bind(to_json(config)?)
    .execute(conn)
    .await?;

    Ok(())
}

/// Flag a check configuration deleted.
pub async fn delete_check_config(conn: &mut PgConnection, config_id: Uuid) -> Result<(), CoreError> {
    sqlx::query("UPDATE check_configs SET deleted = TRUE, updated_at = NOW() WHERE config_id = $1")
        .bind(config_id)
        .execute(conn)
        .await?;

    Ok(())
}

// ============================================================================
// Deployment Reads
// ============================================================================

/// Configurations in one status, oldest first.
pub async fn list_configurations(
    pool: &PgPool,
    status: ConfigurationStatus,
    limit: i64,
) -> Result<Vec<ConfigurationRecord>, CoreError> {
    let sql = format!(
        "{} WHERE c.status = $1::configuration_status ORDER BY c.created_at, c.version LIMIT $2",
        CONFIGURATION_SELECT
    );
    let rows = sqlx::query_as::<_, ConfigurationRow>(&sql)
        .bind(status.as_str())
        .bind(limit)
        .fetch_all(pool)
        .await?;

    rows.into_iter().map(ConfigurationRecord::try_from).collect()
}

/// Get a configuration by ID.
pub async fn get_configuration(
    pool: &PgPool,
    configuration_id: Uuid,
) -> Result<Option<ConfigurationRecord>, CoreError> {
    let sql = format!("{} WHERE c.configuration_id = $1", CONFIGURATION_SELECT);
    let row = sqlx::query_as::<_, ConfigurationRow>(&sql)
        .bind(configuration_id)
        .fetch_optional(pool)
        .await?;

    row.map(ConfigurationRecord::try_from).transpose()
}

/// Newest live configuration of the same instance with a lower version.
pub async fn prior_configuration(
    pool: &PgPool,
    configuration: &ConfigurationRecord,
) -> Result<Option<ConfigurationRecord>, CoreError> {
    let sql = format!(
        r#"{}
        WHERE c.check_instance_id = $1
          AND c.configuration_id <> $2
          AND c.version < $3
          AND c.status NOT IN ('deprovisioned', 'awaiting_deletion')
        ORDER BY c.version DESC
        LIMIT 1"#,
        CONFIGURATION_SELECT
    );
    let row = sqlx::query_as::<_, ConfigurationRow>(&sql)
        .bind(configuration.check_instance_id)
        .bind(configuration.configuration_id)
        .bind(configuration.version as i64)
        .fetch_optional(pool)
        .await?;

    row.map(ConfigurationRecord::try_from).transpose()
}

/// Get a check instance by ID, deleted ones included.
pub async fn get_check_instance(
    pool: &PgPool,
    instance_id: Uuid,
) -> Result<Option<CheckInstanceRecord>, CoreError> {
    let row: Option<(serde_json::Value, Uuid, bool)> = sqlx::query_as(
        "SELECT body, repository_id, deleted FROM check_instances WHERE instance_id = $1",
    )
    .bind(instance_id)
    .fetch_optional(pool)
    .await?;

    row.map(|(body, repository_id, deleted)| {
        Ok(CheckInstanceRecord {
            instance: from_json(body)?,
            repository_id,
            deleted,
        })
    })
    .transpose()
}

/// Get a check by ID.
pub async fn get_check(pool: &PgPool, check_id: Uuid) -> Result<Option<Check>, CoreError> {
    let body: Option<serde_json::Value> =
        sqlx::query_scalar("SELECT body FROM checks WHERE check_id = $1")
            .bind(check_id)
            .fetch_optional(pool)
            .await?;

    body.map(from_json).transpose()
}

/// Get a check configuration by ID, deleted ones included.
pub async fn get_check_config(
    pool: &PgPool,
    config_id: Uuid,
) -> Result<Option<CheckConfig>, CoreError> {
    let body: Option<serde_json::Value> =
        sqlx::query_scalar("SELECT body FROM check_configs WHERE config_id = $1")
            .bind(config_id)
            .fetch_optional(pool)
            .await?;

    body.map(from_json).transpose()
}

/// Get an object by reference, deleted ones included.
pub async fn get_object(
    pool: &PgPool,
    object: ObjectRef,
) -> Result<Option<ObjectSnapshot>, CoreError> {
    let row = sqlx::query_as::<_, ObjectRow>(
        r#"
        SELECT object_id, object_type, repository_id, name, parent_type, parent_id, state, attributes
        FROM objects
        WHERE object_id = $1 AND object_type = $2
        "#,
    )
    .bind(object.object_id)
    .bind(object.object_type.as_str())
    .fetch_optional(pool)
    .await?;

    row.map(ObjectSnapshot::try_from).transpose()
}

/// Every property instance on one object.
pub async fn load_object_properties(
    pool: &PgPool,
    object: ObjectRef,
) -> Result<Vec<Property>, CoreError> {
    let bodies: Vec<serde_json::Value> = sqlx::query_scalar(
        "SELECT body FROM properties WHERE object_id = $1 ORDER BY instance_id",
    )
    .bind(object.object_id)
    .fetch_all(pool)
    .await?;

    bodies.into_iter().map(from_json).collect()
}

/// Get a capability by ID.
pub async fn get_capability(
    pool: &PgPool,
    capability_id: Uuid,
) -> Result<Option<CapabilityRecord>, CoreError> {
    let row = sqlx::query_as::<_, CapabilityRow>(
        r#"
        SELECT capability_id, monitoring_system, callback_uri, metric, unit, description, view
        FROM capabilities
        WHERE capability_id = $1
        "#,
    )
    .bind(capability_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(Into::into))
}

/// Get the dependency a blocked configuration waits on.
pub async fn get_dependency(
    pool: &PgPool,
    blocked_id: Uuid,
) -> Result<Option<DependencyRecord>, CoreError> {
    let row = sqlx::query_as::<_, DependencyRow>(
        r#"
        SELECT blocked_id, blocking_id, release_status::text AS release_status, created_at
        FROM configuration_dependencies
        WHERE blocked_id = $1
        "#,
    )
    .bind(blocked_id)
    .fetch_optional(pool)
    .await?;

    row.map(|r| {
        Ok(DependencyRecord {
            blocked_id: r.blocked_id,
            blocking_id: r.blocking_id,
            release_status: parse("release status", &r.release_status)?,
            created_at: r.created_at,
        })
    })
    .transpose()
}

// ============================================================================
// Deployment Writes
// ============================================================================

async fn set_status(
    conn: &mut PgConnection,
    configuration_id: Uuid,
    to: ConfigurationStatus,
    update_available: Option<bool>,
) -> Result<(), CoreError> {
    sqlx::query(
        r#"
        UPDATE check_instance_configurations
        SET status = $2::configuration_status,
            next_status = NULL,
            update_available = COALESCE($3, update_available),
            status_updated_at = NOW()
        WHERE configuration_id = $1
        "#,
    )
    .bind(configuration_id)
    .bind(to.as_str())
    .bind(update_available)
    .execute(conn)
    .await?;

    Ok(())
}

async fn lock_status(
    tx: &mut Transaction<'static, Postgres>,
    configuration_id: Uuid,
) -> Result<Option<ConfigurationStatus>, CoreError> {
    let status: Option<String> = sqlx::query_scalar(
        r#"
        SELECT status::text FROM check_instance_configurations
        WHERE configuration_id = $1
        FOR UPDATE
        "#,
    )
    .bind(configuration_id)
    .fetch_optional(&mut **tx)
    .await?;

    status.map(|s| parse("configuration status", &s)).transpose()
}

/// Store the deployment document of an `awaiting_computation` configuration.
pub async fn store_deployment_details(
    pool: &PgPool,
    configuration_id: Uuid,
    details: &serde_json::Value,
) -> Result<bool, CoreError> {
    let result = sqlx::query(
        r#"
        UPDATE check_instance_configurations
        SET details = $2, status = 'computed', status_updated_at = NOW()
        WHERE configuration_id = $1 AND status = 'awaiting_computation'
        "#,
    )
    .bind(configuration_id)
    .bind(details)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Apply an ordering decision to a `computed` configuration.
pub async fn apply_ordering(
    pool: &PgPool,
    configuration_id: Uuid,
    decision: OrderingDecision,
) -> Result<bool, CoreError> {
    use ConfigurationStatus::*;

    let mut tx = pool.begin().await?;
    if lock_status(&mut tx, configuration_id).await? != Some(Computed) {
        tx.rollback().await?;
        return Ok(false);
    }

    match decision {
        OrderingDecision::Rollout => {
            set_status(&mut tx, configuration_id, AwaitingRollout, Some(true)).await?;
        }
        OrderingDecision::Discard => {
            set_status(&mut tx, configuration_id, AwaitingDeletion, Some(false)).await?;
        }
        OrderingDecision::Supersede { prior } => {
            set_status(&mut tx, prior, AwaitingDeletion, Some(false)).await?;
            set_status(&mut tx, configuration_id, AwaitingRollout, Some(true)).await?;
        }
        OrderingDecision::Block { prior, blocking } => {
            if prior != blocking {
                set_status(&mut tx, prior, AwaitingDeletion, Some(false)).await?;
                sqlx::query("DELETE FROM configuration_dependencies WHERE blocked_id = $1")
                    .bind(prior)
                    .execute(&mut *tx)
                    .await?;
            }
            set_status(&mut tx, configuration_id, Blocked, Some(false)).await?;
            sqlx::query(
                r#"
                INSERT INTO configuration_dependencies (blocked_id, blocking_id, release_status)
                VALUES ($1, $2, 'deprovisioned')
                ON CONFLICT (blocked_id) DO UPDATE
                SET blocking_id = EXCLUDED.blocking_id, release_status = EXCLUDED.release_status
                "#,
            )
            .bind(configuration_id)
            .bind(blocking)
            .execute(&mut *tx)
            .await?;
            if matches!(
                lock_status(&mut tx, blocking).await?,
                Some(Active | RolloutInProgress | RolloutFailed)
            ) {
                set_status(&mut tx, blocking, AwaitingDeprovision, None).await?;
            }
        }
    }

    tx.commit().await?;
    Ok(true)
}

/// Compare-and-set status change.
pub async fn transition_configuration(
    pool: &PgPool,
    configuration_id: Uuid,
    from: ConfigurationStatus,
    to: ConfigurationStatus,
    update_available: Option<bool>,
) -> Result<bool, CoreError> {
    let result = sqlx::query(
        r#"
        UPDATE check_instance_configurations
        SET status = $3::configuration_status,
            next_status = NULL,
            update_available = COALESCE($4, update_available),
            status_updated_at = NOW()
        WHERE configuration_id = $1 AND status = $2::configuration_status
        "#,
    )
    .bind(configuration_id)
    .bind(from.as_str())
    .bind(to.as_str())
    .bind(update_available)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Release a blocked configuration and drop its dependency.
pub async fn release_blocked(pool: &PgPool, configuration_id: Uuid) -> Result<bool, CoreError> {
    let mut tx = pool.begin().await?;
    let result = sqlx::query(
        r#"
        UPDATE check_instance_configurations
        SET status = 'awaiting_rollout',
            next_status = 'rollout_in_progress',
            update_available = TRUE,
            status_updated_at = NOW()
        WHERE configuration_id = $1 AND status = 'blocked'
        "#,
    )
    .bind(configuration_id)
    .execute(&mut *tx)
    .await?;

    if result.rows_affected() == 0 {
        tx.rollback().await?;
        return Ok(false);
    }

    sqlx::query("DELETE FROM configuration_dependencies WHERE blocked_id = $1")
        .bind(configuration_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(true)
}

/// Delete a configuration with its dependencies.
pub async fn delete_configuration(pool: &PgPool, configuration_id: Uuid) -> Result<(), CoreError> {
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM configuration_dependencies WHERE blocked_id = $1 OR blocking_id = $1")
        .bind(configuration_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM check_instance_configurations WHERE configuration_id = $1")
        .bind(configuration_id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(())
}

/// Delete configurations in `statuses` not touched since `older_than`.
pub async fn purge_configurations(
    pool: &PgPool,
    statuses: &[ConfigurationStatus],
    older_than: DateTime<Utc>,
) -> Result<u64, CoreError> {
    let statuses: Vec<&str> = statuses.iter().map(|s| s.as_str()).collect();
    let mut tx = pool.begin().await?;

    let ids: Vec<Uuid> = sqlx::query_scalar(
        r#"
        SELECT configuration_id FROM check_instance_configurations
        WHERE status::text = ANY($1) AND status_updated_at < $2
        FOR UPDATE
        "#,
    )
    .bind(&statuses)
    .bind(older_than)
    .fetch_all(&mut *tx)
    .await?;

    if ids.is_empty() {
        tx.rollback().await?;
        return Ok(0);
    }

    sqlx::query(
        "DELETE FROM configuration_dependencies WHERE blocked_id = ANY($1) OR blocking_id = ANY($1)",
    )
    .bind(&ids)
    .execute(&mut *tx)
    .await?;
    let result =
        sqlx::query("DELETE FROM check_instance_configurations WHERE configuration_id = ANY($1)")
            .bind(&ids)
            .execute(&mut *tx)
            .await?;

    tx.commit().await?;
    Ok(result.rows_affected())
}

/// Clear the notification flag.
pub async fn clear_update_available(
    pool: &PgPool,
    configuration_id: Uuid,
) -> Result<bool, CoreError> {
    let result = sqlx::query(
        r#"
        UPDATE check_instance_configurations SET update_available = FALSE
        WHERE configuration_id = $1 AND update_available
        "#,
    )
    .bind(configuration_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Insert or replace a capability catalog entry.
pub async fn upsert_capability(pool: &PgPool, c: &CapabilityRecord) -> Result<(), CoreError> {
    sqlx::query(
        r#"
        INSERT INTO capabilities (capability_id, monitoring_system, callback_uri, metric, unit, description, view)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (capability_id) DO UPDATE
        SET monitoring_system = EXCLUDED.monitoring_system,
            callback_uri = EXCLUDED.callback_uri,
            metric = EXCLUDED.metric,
            unit = EXCLUDED.unit,
            description = EXCLUDED.description,
            view = EXCLUDED.view
        "#,
    )
    .bind(c.capability_id)
    .bind(&c.monitoring_system)
    .bind(&c.callback_uri)
    .bind(&c.metric)
    .bind(&c.unit)
    .bind(&c.description)
    .bind(&c.view)
    .execute(pool)
    .await?;

    Ok(())
}

// ============================================================================
// Trait Implementations
// ============================================================================

/// Job-scoped Postgres transaction.
pub struct PgTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl PersistenceTransaction for PgTransaction {
    async fn apply(&mut self, action: &Action) -> Result<(), CoreError> {
        apply_action(&mut self.tx, action).await
    }

    async fn save_check_config(&mut self, config: &CheckConfig) -> Result<(), CoreError> {
        save_check_config(&mut self.tx, config).await
    }

    async fn delete_check_config(&mut self, config_id: Uuid) -> Result<(), CoreError> {
        delete_check_config(&mut self.tx, config_id).await
    }

    async fn commit(self: Box<Self>) -> Result<(), CoreError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), CoreError> {
        self.tx.rollback().await?;
        Ok(())
    }
}

#[async_trait]
impl Persistence for PostgresPersistence {
    async fn insert_job(&self, job: &Job) -> Result<(), CoreError> {
        insert_job(&self.pool, job).await
    }

    async fn update_job_status(
        &self,
        job_id: Uuid,
        status: JobStatus,
        error: Option<&str>,
    ) -> Result<(), CoreError> {
        update_job_status(&self.pool, job_id, status, error).await
    }

    async fn get_job(&self, job_id: Uuid) -> Result<Option<JobRecord>, CoreError> {
        get_job(&self.pool, job_id).await
    }

    async fn list_repositories(&self) -> Result<Vec<RepositoryRecord>, CoreError> {
        list_repositories(&self.pool).await
    }

    async fn get_repository(
        &self,
        repository_id: Uuid,
    ) -> Result<Option<RepositoryRecord>, CoreError> {
        get_repository(&self.pool, repository_id).await
    }

    async fn mark_repository_broken(
        &self,
        repository_id: Uuid,
        reason: &str,
    ) -> Result<(), CoreError> {
        mark_repository_broken(&self.pool, repository_id, reason).await
    }

    async fn clear_repository_broken(&self, repository_id: Uuid) -> Result<(), CoreError> {
        clear_repository_broken(&self.pool, repository_id).await
    }

    async fn load_objects(
        &self,
        repository_id: Uuid,
        object_type: ObjectType,
    ) -> Result<Vec<ObjectSnapshot>, CoreError> {
        load_objects(&self.pool, repository_id, object_type).await
    }

    async fn load_properties(
        &self,
        repository_id: Uuid,
        object_type: ObjectType,
        kind: PropertyKind,
    ) -> Result<Vec<Property>, CoreError> {
        load_properties(&self.pool, repository_id, object_type, kind).await
    }

    async fn load_check_configs(
        &self,
        repository_id: Uuid,
    ) -> Result<Vec<CheckConfig>, CoreError> {
        load_check_configs(&self.pool, repository_id).await
    }

    async fn load_checks(&self, repository_id: Uuid) -> Result<Vec<Check>, CoreError> {
        load_checks(&self.pool, repository_id).await
    }

    async fn load_check_instances(
        &self,
        repository_id: Uuid,
    ) -> Result<Vec<CheckInstance>, CoreError> {
        load_check_instances(&self.pool, repository_id).await
    }

    async fn reset_for_rebuild(
        &self,
        repository_id: Uuid,
        level: RebuildLevel,
    ) -> Result<(), CoreError> {
        reset_for_rebuild(&self.pool, repository_id, level).await
    }

    async fn begin(&self) -> Result<Box<dyn PersistenceTransaction>, CoreError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgTransaction { tx }))
    }

    async fn list_configurations(
        &self,
        status: ConfigurationStatus,
        limit: i64,
    ) -> Result<Vec<ConfigurationRecord>, CoreError> {
        list_configurations(&self.pool, status, limit).await
    }

    async fn get_configuration(
        &self,
        configuration_id: Uuid,
    ) -> Result<Option<ConfigurationRecord>, CoreError> {
        get_configuration(&self.pool, configuration_id).await
    }

    async fn get_check_instance(
        &self,
        instance_id: Uuid,
    ) -> Result<Option<CheckInstanceRecord>, CoreError> {
        get_check_instance(&self.pool, instance_id).await
    }

    async fn get_check(&self, check_id: Uuid) -> Result<Option<Check>, CoreError> {
        get_check(&self.pool, check_id).await
    }

    async fn get_check_config(&self, config_id: Uuid) -> Result<Option<CheckConfig>, CoreError> {
        get_check_config(&self.pool, config_id).await
    }

    async fn get_object(&self, object: ObjectRef) -> Result<Option<ObjectSnapshot>, CoreError> {
        get_object(&self.pool, object).await
    }

    async fn load_object_properties(
        &self,
        object: ObjectRef,
    ) -> Result<Vec<Property>, CoreError> {
        load_object_properties(&self.pool, object).await
    }

    async fn get_capability(
        &self,
        capability_id: Uuid,
    ) -> Result<Option<CapabilityRecord>, CoreError> {
        get_capability(&self.pool, capability_id).await
    }

    async fn store_deployment_details(
        &self,
        configuration_id: Uuid,
        details: &serde_json::Value,
    ) -> Result<bool, CoreError> {
        store_deployment_details(&self.pool, configuration_id, details).await
    }

    async fn prior_configuration(
        &self,
        configuration: &ConfigurationRecord,
    ) -> Result<Option<ConfigurationRecord>, CoreError> {
        prior_configuration(&self.pool, configuration).await
    }

    async fn get_dependency(
        &self,
        blocked_id: Uuid,
    ) -> Result<Option<DependencyRecord>, CoreError> {
        get_dependency(&self.pool, blocked_id).await
    }

    async fn apply_ordering(
        &self,
        configuration_id: Uuid,
        decision: OrderingDecision,
    ) -> Result<bool, CoreError> {
        apply_ordering(&self.pool, configuration_id, decision).await
    }

    async fn transition_configuration(
        &self,
        configuration_id: Uuid,
        from: ConfigurationStatus,
        to: ConfigurationStatus,
        update_available: Option<bool>,
    ) -> Result<bool, CoreError> {
        transition_configuration(&self.pool, configuration_id, from, to, update_available).await
    }

    async fn release_blocked(&self, configuration_id: Uuid) -> Result<bool, CoreError> {
        release_blocked(&self.pool, configuration_id).await
    }

    async fn delete_configuration(&self, configuration_id: Uuid) -> Result<(), CoreError> {
        delete_configuration(&self.pool, configuration_id).await
    }

    async fn purge_configurations(
        &self,
        statuses: &[ConfigurationStatus],
        older_than: DateTime<Utc>,
    ) -> Result<u64, CoreError> {
        purge_configurations(&self.pool, statuses, older_than).await
    }

    async fn clear_update_available(&self, configuration_id: Uuid) -> Result<bool, CoreError> {
        clear_update_available(&self.pool, configuration_id).await
    }

    async fn upsert_capability(&self, capability: &CapabilityRecord) -> Result<(), CoreError> {
        upsert_capability(&self.pool, capability).await
    }
}
