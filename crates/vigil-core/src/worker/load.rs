// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Rebuilding a repository tree from persisted state.
//!
//! Objects are restored parents first: repository, buckets, groups,
//! clusters, nodes. Groups may nest, so they are restored in passes; a
//! group whose parent never shows up stalls the passes and the load fails.
//! Properties follow per object type and kind, then check configurations,
//! checks and check instances.

use std::collections::HashSet;
use tracing::debug;
use uuid::Uuid;

use crate::config::WorkerConfig;
use crate::error::CoreError;
use crate::model::{ObjectType, PropertyKind};
use crate::persistence::Persistence;
use crate::tree::{ConfigTree, ObjectSnapshot, TreeError};

/// What to restore besides objects and properties.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LoadScope {
    /// Everything, used at startup.
    Full,
    /// Objects and properties only; checks are replayed afterwards.
    WithoutChecks,
}

fn integrity(err: TreeError) -> CoreError {
    CoreError::Integrity {
        reason: err.to_string(),
    }
}

/// Order groups so every group follows the group it is nested in.
pub(crate) fn order_groups(
    groups: Vec<ObjectSnapshot>,
    stall_limit: usize,
) -> Result<Vec<ObjectSnapshot>, CoreError> {
    let ids: HashSet<Uuid> = groups.iter().map(|g| g.object.object_id).collect();
    let mut placed: HashSet<Uuid> = HashSet::new();
    let mut ordered = Vec::with_capacity(groups.len());
    let mut pending = groups;
    let mut stalled = 0;

    while !pending.is_empty() {
        let before = pending.len();
        let (ready, waiting): (Vec<_>, Vec<_>) = pending.into_iter().partition(|g| {
            match g.parent {
                Some(p) if p.object_type == ObjectType::Group && ids.contains(&p.object_id) => {
                    placed.contains(&p.object_id)
                }
                _ => true,
            }
        });
        for g in ready {
            placed.insert(g.object.object_id);
            ordered.push(g);
        }
        pending = waiting;
        if pending.len() == before {
            stalled += 1;
            if stalled >= stall_limit {
                return Err(CoreError::Integrity {
                    reason: format!(
                        "group ordering unresolvable, {} groups left after {} stalled passes",
                        pending.len(),
                        stalled
                    ),
                });
            }
        } else {
            stalled = 0;
        }
    }
    Ok(ordered)
}

/// Restore the tree of `repository_id` without emitting anything.
pub(crate) async fn load_tree(
    persistence: &dyn Persistence,
    repository_id: Uuid,
    config: &WorkerConfig,
    scope: LoadScope,
) -> Result<ConfigTree, CoreError> {
    let mut tree = ConfigTree::new(repository_id, config.queue_capacity);

    for object_type in ObjectType::ALL {
        let mut objects = persistence.load_objects(repository_id, object_type).await?;
        if object_type == ObjectType::Group {
            objects = order_groups(objects, config.group_order_stall_limit)?;
        }
        debug!(
            repository = %repository_id,
            object_type = %object_type,
            count = objects.len(),
            "Restoring objects"
        );
        for snapshot in &objects {
            tree.restore_object(snapshot).map_err(integrity)?;
        }
    }

    for object_type in ObjectType::ALL {
        for kind in PropertyKind::ALL {
            for property in persistence
                .load_properties(repository_id, object_type, kind)
                .await?
            {
                tree.restore_property(property).map_err(integrity)?;
            }
        }
    }

    if scope == LoadScope::Full {
        for config in persistence.load_check_configs(repository_id).await? {
            tree.restore_check_config(config).map_err(integrity)?;
        }
        for check in persistence.load_checks(repository_id).await? {
            tree.restore_check(check).map_err(integrity)?;
        }
        for instance in persistence.load_check_instances(repository_id).await? {
            tree.restore_instance(instance).map_err(integrity)?;
        }
    }

    Ok(tree)
}
