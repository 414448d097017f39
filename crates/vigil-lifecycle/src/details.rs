// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The deployment document handed to monitoring systems.
//!
//! A document is self-contained: a monitoring system can deploy a check
//! from it without calling back for the check, its thresholds, the metric
//! or the target object.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use vigil_core::model::{
    Check, CheckConfig, CheckInstance, ObjectAttributes, ObjectRef, Property, PropertyValue,
    Threshold,
};
use vigil_core::persistence::CapabilityRecord;
use vigil_core::tree::ObjectSnapshot;

/// View that matches every other view.
pub const ANY_VIEW: &str = "any";

/// Top-level fields that differ between two configurations of one instance
/// even when nothing deployable changed.
const IDENTITY_FIELDS: [&str; 2] = ["configuration_id", "version"];

/// Deployment document of one check instance configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentDetails {
    /// Configuration this document was built for.
    pub configuration_id: Uuid,
    /// Instance version the configuration belongs to.
    pub version: u64,
    /// The check instance.
    pub instance: InstanceSection,
    /// Where the check lives in the tree.
    pub check: CheckSection,
    /// Check definition.
    pub config: ConfigSection,
    /// Metric and monitoring system.
    pub capability: CapabilitySection,
    /// The monitored object.
    pub target: TargetSection,
}

/// Check instance identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceSection {
    /// Check instance id; monitoring systems key deployments by it.
    pub instance_id: Uuid,
    /// Originating check configuration.
    pub config_id: Uuid,
    /// Bound service, if the check constrains on one.
    pub service: Option<String>,
}

/// Placement of the check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckSection {
    /// Object the check was attached to.
    pub inherited_from: ObjectRef,
    /// Whether the check propagates.
    pub inheritance: bool,
    /// Whether the check skips its carrier.
    pub children_only: bool,
}

/// Check definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigSection {
    /// Check name.
    pub name: String,
    /// Check interval in seconds.
    pub interval: u64,
    /// Thresholds, ordered by level then value.
    pub thresholds: Vec<Threshold>,
    /// Whether alerts are active.
    pub is_active: bool,
    /// Whether the check is enabled.
    pub is_enabled: bool,
}

/// Metric and monitoring system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilitySection {
    /// Capability id.
    pub capability_id: Uuid,
    /// Monitoring system name.
    pub monitoring_system: String,
    /// Metric path.
    pub metric: String,
    /// Metric unit.
    pub unit: String,
    /// Metric description.
    pub description: String,
    /// View properties were selected with.
    pub view: String,
}

/// The monitored object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetSection {
    /// Object reference.
    pub object: ObjectRef,
    /// Object name.
    pub name: String,
    /// Team owning the repository.
    pub team_id: Uuid,
    /// Type specific attributes.
    pub attributes: ObjectAttributes,
    /// Oncall duty, if one applies.
    pub oncall: Option<OncallSection>,
    /// Services with their attributes, ordered by name.
    pub services: Vec<ServiceSection>,
    /// System properties by key.
    pub system: BTreeMap<String, String>,
    /// Custom properties, ordered by key.
    pub custom: Vec<CustomSection>,
}

/// Oncall duty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OncallSection {
    /// Duty id.
    pub id: Uuid,
    /// Duty name.
    pub name: String,
    /// Phone number.
    pub number: String,
}

/// Service with attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceSection {
    /// Service name.
    pub name: String,
    /// Service attributes.
    pub attributes: BTreeMap<String, Vec<String>>,
}

/// Custom property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomSection {
    /// Custom property definition id.
    pub id: Uuid,
    /// Property key.
    pub key: String,
    /// Property value.
    pub value: String,
}

/// Whether a property scoped to `property_view` is visible to a capability
/// reading `capability_view`.
pub fn view_matches(property_view: &str, capability_view: &str) -> bool {
    property_view == ANY_VIEW || capability_view == ANY_VIEW || property_view == capability_view
}

/// Everything a document is assembled from.
pub struct DetailSources<'a> {
    /// Configuration id.
    pub configuration_id: Uuid,
    /// Configuration version.
    pub version: u64,
    /// Check instance.
    pub instance: &'a CheckInstance,
    /// Check the instance was computed from.
    pub check: &'a Check,
    /// Check configuration.
    pub config: &'a CheckConfig,
    /// Capability the configuration targets.
    pub capability: &'a CapabilityRecord,
    /// Target object.
    pub object: &'a ObjectSnapshot,
    /// Owning team.
    pub team_id: Uuid,
    /// Properties stored on the target object.
    pub properties: &'a [Property],
}

impl DeploymentDetails {
    /// Assemble a document.
    ///
    /// Only properties the object resolves and the capability's view can
    /// see are included. Lists are sorted so equal inputs give equal
    /// documents.
    pub fn assemble(sources: DetailSources<'_>) -> Self {
        let DetailSources {
            configuration_id,
            version,
            instance,
            check,
            config,
            capability,
            object,
            team_id,
            properties,
        } = sources;

        let mut thresholds = config.thresholds.clone();
        thresholds.sort_by(|a, b| a.level.cmp(&b.level).then(a.value.cmp(&b.value)));

        let mut oncall = None;
        let mut services = Vec::new();
        let mut system = BTreeMap::new();
        let mut custom = Vec::new();
        let visible = properties
            .iter()
            .filter(|p| p.applies_to_carrier() && view_matches(&p.view, &capability.view));
        for property in visible {
            match &property.value {
                PropertyValue::System { key, value } => {
                    system.insert(key.clone(), value.clone());
                }
                PropertyValue::Custom { id, key, value } => custom.push(CustomSection {
                    id: *id,
                    key: key.clone(),
                    value: value.clone(),
                }),
                PropertyValue::Service {
                    name, attributes, ..
                } => services.push(ServiceSection {
                    name: name.clone(),
                    attributes: attributes.clone(),
                }),
                PropertyValue::Oncall { id, name, number } => {
                    oncall = Some(OncallSection {
                        id: *id,
                        name: name.clone(),
                        number: number.clone(),
                    })
                }
            }
        }
        services.sort_by(|a, b| a.name.cmp(&b.name));
        custom.sort_by(|a, b| a.key.cmp(&b.key).then(a.id.cmp(&b.id)));

        Self {
            configuration_id,
            version,
            instance: InstanceSection {
                instance_id: instance.instance_id,
                config_id: instance.config_id,
                service: instance.service.clone(),
            },
            check: CheckSection {
                inherited_from: check.inherited_from,
                inheritance: check.inheritance,
                children_only: check.children_only,
            },
            config: ConfigSection {
                name: config.name.clone(),
                interval: config.interval,
                thresholds,
                is_active: config.is_active,
                is_enabled: config.is_enabled,
            },
            capability: CapabilitySection {
                capability_id: capability.capability_id,
                monitoring_system: capability.monitoring_system.clone(),
                metric: capability.metric.clone(),
                unit: capability.unit.clone(),
                description: capability.description.clone(),
                view: capability.view.clone(),
            },
            target: TargetSection {
                object: object.object,
                name: object.name.clone(),
                team_id,
                attributes: object.attributes.clone(),
                oncall,
                services,
                system,
                custom,
            },
        }
    }
}

/// Deep comparison of two stored documents, ignoring the fields that
/// identify the configuration rather than what is deployed.
pub fn same_deployment(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Object(a), Value::Object(b)) => {
            let deployable = |m: &Map<String, Value>| {
                m.keys()
                    .filter(|k| !IDENTITY_FIELDS.contains(&k.as_str()))
                    .count()
            };
            deployable(a) == deployable(b)
                && a.iter()
                    .filter(|(k, _)| !IDENTITY_FIELDS.contains(&k.as_str()))
                    .all(|(k, v)| b.get(k) == Some(v))
        }
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_view_matching() {
        assert!(view_matches("any", "internal"));
        assert!(view_matches("external", "any"));
        assert!(view_matches("internal", "internal"));
        assert!(!view_matches("internal", "external"));
    }

    #[test]
    fn test_identity_fields_are_ignored() {
        let a = json!({"configuration_id": "a", "version": 1, "config": {"interval": 60}});
        let b = json!({"configuration_id": "b", "version": 2, "config": {"interval": 60}});
        assert!(same_deployment(&a, &b));
    }

    #[test]
    fn test_nested_change_is_detected() {
        let a = json!({"version": 1, "config": {"thresholds": [{"value": 90}]}});
        let b = json!({"version": 2, "config": {"thresholds": [{"value": 95}]}});
        assert!(!same_deployment(&a, &b));
    }

    #[test]
    fn test_missing_section_is_a_change() {
        let a = json!({"version": 1, "target": {}});
        let b = json!({"version": 2});
        assert!(!same_deployment(&a, &b));
    }
}
