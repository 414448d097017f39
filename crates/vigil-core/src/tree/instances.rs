// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Check instance computation.
//!
//! Every check associated with an object is matched against that object's
//! resolved properties. All constraints must hold. The result is one
//! instance per `(configuration, object, service binding)`; a `service`
//! constraint fixes the binding, `attribute` constraints alone yield one
//! instance per matching service.

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

use super::{Action, ConfigTree, InstanceKey, TreeError, TreeObject};
use crate::model::check::value_matches;
use crate::model::{CheckConfig, CheckInstance, Constraint, ObjectRef, PropertyValue};

/// SHA-256 over the canonical JSON encoding of `value`.
pub fn digest<T: Serialize + ?Sized>(value: &T) -> String {
    let bytes = serde_json::to_vec(value).unwrap_or_default();
    format!("{:x}", Sha256::digest(&bytes))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Binding {
    pub(crate) service: Option<String>,
    pub(crate) values: Vec<(String, String)>,
}

struct Candidate {
    check_id: Uuid,
    object: ObjectRef,
    service: Option<String>,
    constraint_hash: String,
    value_hash: String,
}

/// Match `config`'s constraints against `obj`.
pub(crate) fn evaluate(config: &CheckConfig, obj: &TreeObject) -> Vec<Binding> {
    let props: Vec<&PropertyValue> = obj.effective_properties().map(|p| &p.value).collect();
    let mut values = Vec::new();
    let mut wanted_services: Option<BTreeSet<&str>> = None;
    let mut attributes: Vec<(&str, &str)> = Vec::new();

    for constraint in &config.constraints {
        match constraint {
            Constraint::Native { property, value } => match obj.native(property) {
                Some(actual) if value_matches(value, &actual) => {
                    values.push((format!("native:{}", property), actual));
                }
                _ => return Vec::new(),
            },
            Constraint::System { name, value } => {
                let hit = props.iter().find_map(|p| match p {
                    PropertyValue::System { key, value: actual }
                        if key == name && value_matches(value, actual) =>
                    {
                        Some(actual.clone())
                    }
                    _ => None,
                });
                match hit {
                    Some(actual) => values.push((format!("system:{}", name), actual)),
                    None => return Vec::new(),
                }
            }
            Constraint::Custom { id, value, .. } => {
                let hit = props.iter().find_map(|p| match p {
                    PropertyValue::Custom {
                        id: pid,
                        value: actual,
                        ..
                    } if pid == id && value_matches(value, actual) => Some(actual.clone()),
                    _ => None,
                });
                match hit {
                    Some(actual) => values.push((format!("custom:{}", id), actual)),
                    None => return Vec::new(),
                }
            }
            Constraint::Oncall { id, .. } => {
                let hit = props.iter().find_map(|p| match p {
                    PropertyValue::Oncall {
                        id: pid, number, ..
                    } if pid == id => Some(number.clone()),
                    _ => None,
                });
                match hit {
                    Some(number) => values.push((format!("oncall:{}", id), number)),
                    None => return Vec::new(),
                }
            }
            Constraint::Service { name, team_id } => {
                // A service owned by another team is simply not a match.
                let owned = props.iter().any(|p| {
                    matches!(p, PropertyValue::Service { name: n, team_id: t, .. }
                        if n == name && t == team_id)
                });
                if !owned {
                    return Vec::new();
                }
                let set = wanted_services.get_or_insert_with(|| BTreeSet::from([name.as_str()]));
                set.retain(|s| *s == name.as_str());
            }
            Constraint::Attribute { name, value } => attributes.push((name, value)),
        }
    }

    if wanted_services.is_none() && attributes.is_empty() {
        return vec![Binding {
            service: None,
            values,
        }];
    }

    let mut out = Vec::new();
    for prop in &props {
        let PropertyValue::Service {
            name, attributes: attrs, ..
        } = prop
        else {
            continue;
        };
        if let Some(wanted) = &wanted_services {
            if !wanted.contains(name.as_str()) {
                continue;
            }
        }
        let mut matched = Vec::with_capacity(attributes.len());
        let all = attributes.iter().all(|(attr, expected)| {
            match attrs
                .get(*attr)
                .and_then(|vals| vals.iter().find(|v| value_matches(expected, v)))
            {
                Some(v) => {
                    matched.push((format!("attribute:{}", attr), v.clone()));
                    true
                }
                None => false,
            }
        });
        if all {
            let mut vals = values.clone();
            vals.push(("service".to_string(), name.clone()));
            vals.extend(matched);
            out.push(Binding {
                service: Some(name.clone()),
                values: vals,
            });
        }
    }
    out
}

impl ConfigTree {
    /// Re-evaluate every check against the objects it is associated with
    /// and emit the instance difference.
    ///
    /// Calling this twice without an intervening mutation emits nothing the
    /// second time.
    pub fn compute_check_instances(&mut self) -> Result<(), TreeError> {
        let mut ids: Vec<Uuid> = self.state.objects.keys().copied().collect();
        ids.sort();

        let mut wanted: BTreeMap<InstanceKey, Candidate> = BTreeMap::new();
        let mut problems = Vec::new();
        for id in ids {
            let Some(obj) = self.state.objects.get(&id) else {
                continue;
            };
            for check in obj.checks.iter().filter(|c| c.items.iter().any(|i| i.object_id == id)) {
                let Some(config) = self.state.configs.get(&check.config_id) else {
                    problems.push(format!(
                        "check {} on {} references unknown configuration {}",
                        check.check_id,
                        obj.to_ref(),
                        check.config_id
                    ));
                    continue;
                };
                let mut constraints = config.constraints.clone();
                constraints.sort();
                let constraint_hash = digest(&constraints);
                for binding in evaluate(config, obj) {
                    let mut values = binding.values;
                    values.sort();
                    wanted.insert(
                        (config.config_id, id, binding.service.clone()),
                        Candidate {
                            check_id: check.check_id,
                            object: obj.to_ref(),
                            service: binding.service,
                            constraint_hash: constraint_hash.clone(),
                            value_hash: digest(&values),
                        },
                    );
                }
            }
        }
        for problem in problems {
            self.report("compute_check_instances", problem)?;
        }

        let mut stale: Vec<InstanceKey> = self
            .state
            .instances
            .keys()
            .filter(|k| !wanted.contains_key(*k))
            .cloned()
            .collect();
        stale.sort();
        for key in stale {
            if let Some(instance) = self.state.instances.remove(&key) {
                self.emit(Action::CheckInstanceDelete(instance))?;
            }
        }

        for (key, cand) in wanted {
            match self.state.instances.get_mut(&key) {
                None => {
                    let instance = CheckInstance {
                        instance_id: Uuid::new_v4(),
                        check_id: cand.check_id,
                        config_id: key.0,
                        object: cand.object,
                        service: cand.service,
                        version: 0,
                        constraint_hash: cand.constraint_hash,
                        value_hash: cand.value_hash,
                        configuration_id: Uuid::new_v4(),
                    };
                    self.state.instances.insert(key, instance.clone());
                    self.emit(Action::CheckInstanceCreate(instance))?;
                }
                Some(existing)
                    if existing.check_id != cand.check_id
                        || existing.constraint_hash != cand.constraint_hash
                        || existing.value_hash != cand.value_hash =>
                {
                    existing.check_id = cand.check_id;
                    existing.constraint_hash = cand.constraint_hash;
                    existing.value_hash = cand.value_hash;
                    existing.version += 1;
                    existing.configuration_id = Uuid::new_v4();
                    let updated = existing.clone();
                    self.emit(Action::CheckInstanceUpdate(updated))?;
                }
                Some(_) => {}
            }
        }
        Ok(())
    }
}
