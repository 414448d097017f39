// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Check configurations, their materialisation in the tree, and the
//! computed check instances.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::ObjectRef;

/// Sentinel constraint value matching any present value.
pub const DEFINED: &str = "@defined";

/// Comparison applied by a threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ThresholdPredicate {
    /// `<`
    #[serde(rename = "<")]
    Less,
    /// `<=`
    #[serde(rename = "<=")]
    LessEqual,
    /// `==`
    #[serde(rename = "==")]
    Equal,
    /// `!=`
    #[serde(rename = "!=")]
    NotEqual,
    /// `>=`
    #[serde(rename = ">=")]
    GreaterEqual,
    /// `>`
    #[serde(rename = ">")]
    Greater,
}

/// Alerting threshold of a check.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Threshold {
    /// Comparison predicate.
    pub predicate: ThresholdPredicate,
    /// Numeric threshold value.
    pub value: i64,
    /// Notification level name (e.g. `warning`, `critical`).
    pub level: String,
}

/// Constraint type discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintKind {
    /// Native object attribute.
    Native,
    /// System property.
    System,
    /// Custom property.
    Custom,
    /// Service property.
    Service,
    /// Service attribute.
    Attribute,
    /// Oncall property.
    Oncall,
}

impl ConstraintKind {
    /// Returns the string representation used in storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConstraintKind::Native => "native",
            ConstraintKind::System => "system",
            ConstraintKind::Custom => "custom",
            ConstraintKind::Service => "service",
            ConstraintKind::Attribute => "attribute",
            ConstraintKind::Oncall => "oncall",
        }
    }
}

impl fmt::Display for ConstraintKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed constraint restricting which objects a check applies to.
///
/// All constraints of a check must match for an instance to exist.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Constraint {
    /// Native attribute (`object_type`, `name`, or a type specific attribute).
    Native {
        /// Attribute name.
        property: String,
        /// Expected value or `@defined`.
        value: String,
    },
    /// System property.
    System {
        /// Property key.
        name: String,
        /// Expected value or `@defined`.
        value: String,
    },
    /// Custom property.
    Custom {
        /// Custom property definition id.
        id: Uuid,
        /// Property key.
        key: String,
        /// Expected value or `@defined`.
        value: String,
    },
    /// Service property of the owning team.
    Service {
        /// Service name.
        name: String,
        /// Team that must own the service.
        team_id: Uuid,
    },
    /// Service attribute.
    Attribute {
        /// Attribute name.
        name: String,
        /// Expected value or `@defined`.
        value: String,
    },
    /// Oncall duty.
    Oncall {
        /// Oncall duty id.
        id: Uuid,
        /// Duty name.
        name: String,
        /// Duty number.
        number: String,
    },
}

impl Constraint {
    /// Constraint type.
    pub fn kind(&self) -> ConstraintKind {
        match self {
            Constraint::Native { .. } => ConstraintKind::Native,
            Constraint::System { .. } => ConstraintKind::System,
            Constraint::Custom { .. } => ConstraintKind::Custom,
            Constraint::Service { .. } => ConstraintKind::Service,
            Constraint::Attribute { .. } => ConstraintKind::Attribute,
            Constraint::Oncall { .. } => ConstraintKind::Oncall,
        }
    }
}

/// Whether `actual` satisfies the constraint value `expected`.
pub fn value_matches(expected: &str, actual: &str) -> bool {
    expected == DEFINED || expected == actual
}

/// A monitoring rule as submitted by a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckConfig {
    /// Configuration id.
    pub config_id: Uuid,
    /// Human readable name.
    pub name: String,
    /// Repository scope.
    pub repository_id: Uuid,
    /// Optional bucket scope.
    #[serde(default)]
    pub bucket_id: Option<Uuid>,
    /// Object the check is attached to.
    pub object: ObjectRef,
    /// Monitoring capability this check uses.
    pub capability_id: Uuid,
    /// Check interval in seconds.
    pub interval: u64,
    /// Propagate to descendants.
    #[serde(default)]
    pub inheritance: bool,
    /// Do not apply to the attachment object itself.
    #[serde(default)]
    pub children_only: bool,
    /// Alerting thresholds.
    #[serde(default)]
    pub thresholds: Vec<Threshold>,
    /// Applicability constraints.
    #[serde(default)]
    pub constraints: Vec<Constraint>,
    /// Whether monitoring should actually run.
    #[serde(default = "default_true")]
    pub is_active: bool,
    /// Whether the configuration is enabled.
    #[serde(default = "default_true")]
    pub is_enabled: bool,
}

fn default_true() -> bool {
    true
}

/// Concrete object a check has been associated with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CheckItem {
    /// Object id.
    pub object_id: Uuid,
    /// Object type.
    pub object_type: super::ObjectType,
}

impl From<ObjectRef> for CheckItem {
    fn from(r: ObjectRef) -> Self {
        Self {
            object_id: r.object_id,
            object_type: r.object_type,
        }
    }
}

/// A check configuration materialised on one tree object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Check {
    /// Id of this materialisation.
    pub check_id: Uuid,
    /// Id of the originating materialisation.
    pub source_check_id: Uuid,
    /// Configuration this check was created from.
    pub config_id: Uuid,
    /// Object carrying this check.
    pub object: ObjectRef,
    /// Object the configuration is attached to.
    pub inherited_from: ObjectRef,
    /// Propagate to descendants.
    pub inheritance: bool,
    /// Do not apply to the origin object.
    pub children_only: bool,
    /// Objects this check produces instances for.
    pub items: Vec<CheckItem>,
}

impl Check {
    /// Whether this is the materialisation at the attachment object.
    pub fn is_origin(&self) -> bool {
        self.check_id == self.source_check_id
    }
}

/// A check matched against one concrete object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckInstance {
    /// Instance id.
    pub instance_id: Uuid,
    /// Check this instance was computed from.
    pub check_id: Uuid,
    /// Configuration of that check.
    pub config_id: Uuid,
    /// Object this instance monitors.
    pub object: ObjectRef,
    /// Resolved service binding.
    pub service: Option<String>,
    /// Monotonic version, bumped on every change.
    pub version: u64,
    /// Hash over the matched constraint set.
    pub constraint_hash: String,
    /// Hash over the values the constraints matched.
    pub value_hash: String,
    /// Current deployable configuration.
    pub configuration_id: Uuid,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defined_matches_anything() {
        assert!(value_matches(DEFINED, "fra"));
        assert!(value_matches("fra", "fra"));
        assert!(!value_matches("fra", "ams"));
    }

    #[test]
    fn test_threshold_predicate_serde() {
        let t = Threshold {
            predicate: ThresholdPredicate::GreaterEqual,
            value: 90,
            level: "critical".into(),
        };
        let json = serde_json::to_string(&t).unwrap();
        assert!(json.contains("\">=\""));
        let back: Threshold = serde_json::from_str(&json).unwrap();
        assert_eq!(back, t);
    }

    #[test]
    fn test_constraint_tagging() {
        let c: Constraint =
            serde_json::from_str(r#"{"type":"native","property":"object_type","value":"node"}"#)
                .unwrap();
        assert_eq!(c.kind(), ConstraintKind::Native);
    }
}
