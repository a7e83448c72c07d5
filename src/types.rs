//! Core record types for the reconciliation engine.
//!
//! The component record is the unit of reconciliation: a declared desired
//! boot state, the last observed actual state, and the bookkeeping the
//! operators use to decide which state-machine edge applies. Updates to the
//! store are sparse patches ([`ComponentUpdate`]) applied field-wise, so
//! concurrent operators writing orthogonal fields commute.

use serde::{Deserialize, Serialize};

use crate::clock;

// ============================================================================
// Action / Phase / Status vocabularies
// ============================================================================

/// The closed set of actions an operator can record on a component.
///
/// `None` serializes as the empty string; operators outside the boot flow
/// (configuration, status recomputation) record no action at all.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    PowerOn,
    PowerOffGracefully,
    PowerOffForcefully,
    Configuring,
    SessionSetup,
    ActualStateCleanup,
    NewlyDiscovered,
    Recovery,
    Complete,
    #[default]
    #[serde(rename = "")]
    None,
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Action::PowerOn => "power_on",
            Action::PowerOffGracefully => "power_off_gracefully",
            Action::PowerOffForcefully => "power_off_forcefully",
            Action::Configuring => "configuring",
            Action::SessionSetup => "session_setup",
            Action::ActualStateCleanup => "actual_state_cleanup",
            Action::NewlyDiscovered => "newly_discovered",
            Action::Recovery => "recovery",
            Action::Complete => "complete",
            Action::None => "",
        };
        write!(f, "{}", name)
    }
}

/// Boot-flow phase of a component, derived from its record.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    PoweringOn,
    PoweringOff,
    Configuring,
    #[default]
    #[serde(rename = "")]
    None,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Phase::PoweringOn => "powering_on",
            Phase::PoweringOff => "powering_off",
            Phase::Configuring => "configuring",
            Phase::None => "",
        };
        write!(f, "{}", name)
    }
}

/// Derived component status, recomputed every status tick.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    PowerOnPending,
    PowerOnCalled,
    PowerOffPending,
    PowerOffGracefullyCalled,
    PowerOffForcefullyCalled,
    Configuring,
    #[default]
    Stable,
    Failed,
    OnHold,
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Status::PowerOnPending => "power_on_pending",
            Status::PowerOnCalled => "power_on_called",
            Status::PowerOffPending => "power_off_pending",
            Status::PowerOffGracefullyCalled => "power_off_gracefully_called",
            Status::PowerOffForcefullyCalled => "power_off_forcefully_called",
            Status::Configuring => "configuring",
            Status::Stable => "stable",
            Status::Failed => "failed",
            Status::OnHold => "on_hold",
        };
        write!(f, "{}", name)
    }
}

// ============================================================================
// Boot artifacts and state blocks
// ============================================================================

/// The artifact tuple a node boots from, plus the BSS referral token that
/// identifies the staged combination.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default, Hash)]
pub struct BootArtifacts {
    #[serde(default)]
    pub kernel: String,
    #[serde(default)]
    pub initrd: String,
    #[serde(default)]
    pub kernel_parameters: String,
    #[serde(default)]
    pub bss_token: String,
}

impl BootArtifacts {
    /// True when no artifact field is set. Components in this state have no
    /// boot to stage and no boot to trust.
    pub fn is_empty(&self) -> bool {
        self.kernel.is_empty() && self.initrd.is_empty() && self.kernel_parameters.is_empty()
    }

    /// Artifact equality ignoring the referral token.
    pub fn same_artifacts(&self, other: &BootArtifacts) -> bool {
        self.kernel == other.kernel
            && self.initrd == other.initrd
            && self.kernel_parameters == other.kernel_parameters
    }
}

/// Declared desired state: what the node should be running.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct DesiredState {
    #[serde(default)]
    pub boot_artifacts: BootArtifacts,
    #[serde(default)]
    pub configuration: String,
}

impl DesiredState {
    /// No desired boot. The component is either freshly discovered or is
    /// being shut down.
    pub fn boot_is_none(&self) -> bool {
        self.boot_artifacts.is_empty()
    }

    /// Nothing desired at all, boot or configuration.
    pub fn is_none(&self) -> bool {
        self.boot_artifacts.is_empty() && self.configuration.is_empty()
    }
}

/// Observed actual state: what the node last reported booting, and when.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ActualState {
    #[serde(default)]
    pub boot_artifacts: BootArtifacts,
    #[serde(default)]
    pub last_updated: String,
}

impl ActualState {
    pub fn is_empty(&self) -> bool {
        self.boot_artifacts.is_empty()
    }
}

/// The last action an operator recorded on a component. Together with
/// `last_updated` this identifies the single pending action.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct LastAction {
    #[serde(default)]
    pub action: Action,
    #[serde(default)]
    pub failed: bool,
    #[serde(default)]
    pub num_attempts: u32,
    #[serde(default)]
    pub last_updated: String,
}

/// Derived status summary stored on the record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct StatusSummary {
    #[serde(default)]
    pub status: Status,
    /// Non-empty to pin the reported status regardless of derivation
    /// (e.g. `on_hold` while a staged state waits).
    #[serde(default)]
    pub status_override: String,
    #[serde(default)]
    pub phase: Phase,
}

// ============================================================================
// Component record
// ============================================================================

/// One compute node as tracked by the engine, keyed by xname.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Component {
    pub id: String,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub desired_state: DesiredState,
    #[serde(default)]
    pub actual_state: ActualState,
    #[serde(default)]
    pub staged_state: DesiredState,
    #[serde(default)]
    pub last_action: LastAction,
    #[serde(default)]
    pub status: StatusSummary,
    #[serde(default)]
    pub session: String,
    #[serde(default)]
    pub error: String,
}

impl Component {
    /// A freshly discovered record: disabled, empty states, tagged so that
    /// the inventory history shows where it came from.
    pub fn newly_discovered(id: &str) -> Component {
        Component {
            id: id.to_string(),
            enabled: false,
            last_action: LastAction {
                action: Action::NewlyDiscovered,
                failed: false,
                num_attempts: 0,
                last_updated: clock::now_string(),
            },
            ..Component::default()
        }
    }

    /// Desired and actual boot artifacts are the same tuple, referral token
    /// included. This is the "terminal state of a successful boot" equality.
    pub fn states_match(&self) -> bool {
        !self.desired_state.boot_artifacts.is_empty()
            && self.desired_state.boot_artifacts == self.actual_state.boot_artifacts
    }

    /// Artifact equality without the token: the node is running the right
    /// kernel/initrd/parameters even if it booted via an older staging.
    pub fn boot_artifact_states_match(&self) -> bool {
        self.desired_state
            .boot_artifacts
            .same_artifacts(&self.actual_state.boot_artifacts)
    }

    /// Seconds since the last recorded action, or `None` when no action has
    /// ever been stamped (or its timestamp is unreadable).
    pub fn seconds_since_last_action(&self) -> Option<i64> {
        clock::age_seconds(&self.last_action.last_updated)
    }

    /// Seconds since the actual state was last reported.
    pub fn actual_state_age_seconds(&self) -> Option<i64> {
        clock::age_seconds(&self.actual_state.last_updated)
    }
}

// ============================================================================
// Sparse update patches
// ============================================================================

/// Patch for the nested `desired_state.boot_artifacts.bss_token` write the
/// power-on operator performs after BSS accepts a staging.
#[derive(Debug, Clone, Serialize, Default)]
pub struct BootArtifactsPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bss_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct DesiredStatePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub boot_artifacts: Option<BootArtifactsPatch>,
}

/// Sparse patch for `last_action`. A failure bumps `num_attempts` without
/// touching the action or its timestamp; a success rewrites the whole block.
#[derive(Debug, Clone, Serialize, Default)]
pub struct LastActionPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<Action>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_attempts: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<String>,
}

/// A field-wise component patch. `None` fields are omitted from the wire
/// body entirely, so the store merges only what an operator actually owns.
#[derive(Debug, Clone, Serialize, Default)]
pub struct ComponentUpdate {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub desired_state: Option<DesiredStatePatch>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual_state: Option<ActualState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_action: Option<LastActionPatch>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<StatusSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ComponentUpdate {
    pub fn new(id: &str) -> ComponentUpdate {
        ComponentUpdate {
            id: id.to_string(),
            ..ComponentUpdate::default()
        }
    }

    /// Patch assigning the BSS referral token to the desired boot artifacts.
    pub fn bss_token(id: &str, token: &str) -> ComponentUpdate {
        ComponentUpdate {
            id: id.to_string(),
            desired_state: Some(DesiredStatePatch {
                boot_artifacts: Some(BootArtifactsPatch {
                    bss_token: Some(token.to_string()),
                }),
            }),
            ..ComponentUpdate::default()
        }
    }
}

// ============================================================================
// Session record
// ============================================================================

/// A session as the engine sees it: enough to find its members and mark it
/// complete. Creation and the template payload belong to the API surface.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Session {
    pub name: String,
    #[serde(default)]
    pub template: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub complete: bool,
    #[serde(default)]
    pub components: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_serializes_to_snake_case() {
        assert_eq!(
            serde_json::to_string(&Action::PowerOffGracefully).unwrap(),
            "\"power_off_gracefully\""
        );
        assert_eq!(serde_json::to_string(&Action::None).unwrap(), "\"\"");
    }

    #[test]
    fn empty_action_deserializes_to_none() {
        let action: Action = serde_json::from_str("\"\"").unwrap();
        assert_eq!(action, Action::None);
    }

    #[test]
    fn partial_component_record_parses() {
        let component: Component = serde_json::from_str(r#"{"id": "x1c0s0b0n0"}"#).unwrap();
        assert_eq!(component.id, "x1c0s0b0n0");
        assert!(!component.enabled);
        assert!(component.desired_state.is_none());
        assert_eq!(component.last_action.action, Action::None);
    }

    #[test]
    fn update_patch_omits_unset_fields() {
        let update = ComponentUpdate {
            id: "x1c0s0b0n0".to_string(),
            enabled: Some(false),
            ..ComponentUpdate::default()
        };
        let value = serde_json::to_value(&update).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"id": "x1c0s0b0n0", "enabled": false})
        );
    }

    #[test]
    fn bss_token_patch_shape() {
        let update = ComponentUpdate::bss_token("x1c0s0b0n0", "token-1");
        let value = serde_json::to_value(&update).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "id": "x1c0s0b0n0",
                "desired_state": {"boot_artifacts": {"bss_token": "token-1"}}
            })
        );
    }

    #[test]
    fn states_match_requires_token_equality() {
        let artifacts = BootArtifacts {
            kernel: "k".to_string(),
            initrd: "i".to_string(),
            kernel_parameters: "p".to_string(),
            bss_token: "t1".to_string(),
        };
        let mut component = Component {
            id: "x1c0s0b0n0".to_string(),
            desired_state: DesiredState {
                boot_artifacts: artifacts.clone(),
                configuration: String::new(),
            },
            actual_state: ActualState {
                boot_artifacts: artifacts,
                last_updated: clock::now_string(),
            },
            ..Component::default()
        };
        assert!(component.states_match());
        assert!(component.boot_artifact_states_match());

        component.actual_state.boot_artifacts.bss_token = "t0".to_string();
        assert!(!component.states_match());
        assert!(component.boot_artifact_states_match());
    }

    #[test]
    fn empty_states_never_match() {
        let component = Component {
            id: "x1c0s0b0n0".to_string(),
            ..Component::default()
        };
        assert!(!component.states_match());
    }
}
