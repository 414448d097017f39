// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Lifecycle states of a check instance configuration.
//!
//! ```text
//! awaiting_computation ─► computed ─► awaiting_rollout ─► rollout_in_progress ─► active
//!                            │              ▲                     │                 │
//!                            ▼              │                     ▼                 ▼
//!                         blocked ──────────┘              rollout_failed   awaiting_deprovision
//!                                                                                   │
//!                                                                                   ▼
//!                    awaiting_deletion ◄─ deprovisioned ◄─ deprovision_in_progress ─┘
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Status of a check instance configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigurationStatus {
    /// Created by the tree, document not yet assembled.
    AwaitingComputation,
    /// Deployment document assembled.
    Computed,
    /// Waiting for a monitoring system to pick it up.
    AwaitingRollout,
    /// Monitoring system is deploying it.
    RolloutInProgress,
    /// Deployed.
    Active,
    /// Waiting for a monitoring system to remove it.
    AwaitingDeprovision,
    /// Monitoring system is removing it.
    DeprovisionInProgress,
    /// Removed from the monitoring system.
    Deprovisioned,
    /// May be purged.
    AwaitingDeletion,
    /// Waiting for an older configuration of the same instance to go away.
    Blocked,
    /// Monitoring system reported a failed rollout.
    RolloutFailed,
    /// Monitoring system reported a failed deprovision.
    DeprovisionFailed,
}

impl ConfigurationStatus {
    /// Returns the string representation used in storage.
    pub fn as_str(&self) -> &'static str {
        use ConfigurationStatus::*;
        match self {
            AwaitingComputation => "awaiting_computation",
            Computed => "computed",
            AwaitingRollout => "awaiting_rollout",
            RolloutInProgress => "rollout_in_progress",
            Active => "active",
            AwaitingDeprovision => "awaiting_deprovision",
            DeprovisionInProgress => "deprovision_in_progress",
            Deprovisioned => "deprovisioned",
            AwaitingDeletion => "awaiting_deletion",
            Blocked => "blocked",
            RolloutFailed => "rollout_failed",
            DeprovisionFailed => "deprovision_failed",
        }
    }

    /// Terminal states never transition again except by purge.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ConfigurationStatus::Deprovisioned | ConfigurationStatus::AwaitingDeletion
        )
    }

    /// States in which nothing was ever handed to a monitoring system.
    pub fn is_unshipped(&self) -> bool {
        use ConfigurationStatus::*;
        matches!(self, AwaitingComputation | Computed | AwaitingRollout | Blocked)
    }

    /// States on the way out of a monitoring system.
    pub fn is_retiring(&self) -> bool {
        use ConfigurationStatus::*;
        matches!(
            self,
            AwaitingDeprovision | DeprovisionInProgress | DeprovisionFailed
        )
    }

    /// Allowed successor states.
    pub fn allowed_transitions(&self) -> &'static [ConfigurationStatus] {
        use ConfigurationStatus::*;
        match self {
            AwaitingComputation => &[Computed, AwaitingDeletion],
            Computed => &[AwaitingRollout, Blocked, AwaitingDeletion],
            Blocked => &[AwaitingRollout, AwaitingDeletion],
            AwaitingRollout => &[RolloutInProgress, AwaitingDeletion],
            RolloutInProgress => &[Active, RolloutFailed, AwaitingDeprovision],
            Active => &[AwaitingDeprovision],
            RolloutFailed => &[AwaitingRollout, AwaitingDeprovision, AwaitingDeletion],
            AwaitingDeprovision => &[DeprovisionInProgress],
            DeprovisionInProgress => &[Deprovisioned, DeprovisionFailed, AwaitingDeprovision],
            DeprovisionFailed => &[AwaitingDeprovision],
            Deprovisioned => &[AwaitingDeletion],
            AwaitingDeletion => &[],
        }
    }

    /// Whether `self -> to` is a legal transition.
    pub fn can_transition_to(&self, to: ConfigurationStatus) -> bool {
        self.allowed_transitions().contains(&to)
    }
}

impl fmt::Display for ConfigurationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConfigurationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        use ConfigurationStatus::*;
        Ok(match s {
            "awaiting_computation" => AwaitingComputation,
            "computed" => Computed,
            "awaiting_rollout" => AwaitingRollout,
            "rollout_in_progress" => RolloutInProgress,
            "active" => Active,
            "awaiting_deprovision" => AwaitingDeprovision,
            "deprovision_in_progress" => DeprovisionInProgress,
            "deprovisioned" => Deprovisioned,
            "awaiting_deletion" => AwaitingDeletion,
            "blocked" => Blocked,
            "rollout_failed" => RolloutFailed,
            "deprovision_failed" => DeprovisionFailed,
            other => return Err(format!("unknown configuration status '{}'", other)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ConfigurationStatus::*;

    #[test]
    fn test_normal_flow_is_allowed() {
        let flow = [
            AwaitingComputation,
            Computed,
            AwaitingRollout,
            RolloutInProgress,
            Active,
            AwaitingDeprovision,
            DeprovisionInProgress,
            Deprovisioned,
            AwaitingDeletion,
        ];
        for pair in flow.windows(2) {
            assert!(
                pair[0].can_transition_to(pair[1]),
                "{} -> {} should be allowed",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn test_retiring_states() {
        for status in [AwaitingDeprovision, DeprovisionInProgress, DeprovisionFailed] {
            assert!(status.is_retiring(), "{} should be retiring", status);
            assert!(!status.is_unshipped());
        }
        for status in [Computed, AwaitingRollout, RolloutInProgress, Active, RolloutFailed] {
            assert!(!status.is_retiring(), "{} should not be retiring", status);
        }
    }

    #[test]
    fn test_blocked_side_state() {
        assert!(Computed.can_transition_to(Blocked));
        assert!(Blocked.can_transition_to(AwaitingRollout));
        assert!(!Blocked.can_transition_to(Active));
    }

    #[test]
    fn test_terminal_has_no_exit_but_purge() {
        assert!(AwaitingDeletion.allowed_transitions().is_empty());
        assert!(Deprovisioned.is_terminal());
        assert!(!Active.is_terminal());
    }

    #[test]
    fn test_status_string_round_trip() {
        for s in [Blocked, RolloutFailed, DeprovisionInProgress, AwaitingComputation] {
            assert_eq!(s.as_str().parse::<ConfigurationStatus>().unwrap(), s);
        }
    }
}
