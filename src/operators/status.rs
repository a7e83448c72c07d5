//! Status recomputation operator.
//!
//! The `status` block on a component record is derived, not authored: phase
//! from the relation between desired and actual boot artifacts, status from
//! phase plus the last recorded action. This operator recomputes the
//! summary for every component each tick and persists only the ones that
//! changed, so server-side status queries (e.g. the configuration
//! operator's `status=configuring`) stay current.

use std::collections::HashMap;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::clients::bos::ComponentQuery;
use crate::clients::cfs::CfsClient;
use crate::filters::Filter;
use crate::operators::base::{Operator, OperatorError};
use crate::options::Options;
use crate::types::{Action, Component, ComponentUpdate, Phase, Status, StatusSummary};

/// Derive the status summary for one component. `cfs_configured` is only
/// consulted when the component is booted to its desired artifacts and has
/// a desired configuration — the one case where CFS decides the phase.
pub fn derive_status(component: &Component, cfs_configured: bool) -> StatusSummary {
    let desired_empty = component.desired_state.boot_is_none();
    let actual_empty = component.actual_state.is_empty();

    let phase = if desired_empty {
        if actual_empty {
            Phase::None
        } else {
            Phase::PoweringOff
        }
    } else if component.states_match() {
        if !component.desired_state.configuration.is_empty() && !cfs_configured {
            Phase::Configuring
        } else {
            Phase::None
        }
    } else if actual_empty {
        Phase::PoweringOn
    } else {
        // A stale actual boot has to come down before the right one goes up.
        Phase::PoweringOff
    };

    let last = &component.last_action;
    let mut status = match phase {
        Phase::PoweringOn => {
            if last.action == Action::PowerOn && !last.failed {
                Status::PowerOnCalled
            } else {
                Status::PowerOnPending
            }
        }
        Phase::PoweringOff => match last.action {
            Action::PowerOffGracefully if !last.failed => Status::PowerOffGracefullyCalled,
            Action::PowerOffForcefully if !last.failed => Status::PowerOffForcefullyCalled,
            _ => Status::PowerOffPending,
        },
        Phase::Configuring => Status::Configuring,
        Phase::None => Status::Stable,
    };

    if last.failed {
        status = Status::Failed;
    }
    if let Some(pinned) = parse_override(&component.status.status_override) {
        status = pinned;
    }

    StatusSummary {
        status,
        status_override: component.status.status_override.clone(),
        phase,
    }
}

fn parse_override(raw: &str) -> Option<Status> {
    if raw.is_empty() {
        return None;
    }
    serde_json::from_value(serde_json::Value::String(raw.to_string())).ok()
}

pub struct SetStatusOperator {
    cfs: Arc<CfsClient>,
}

impl SetStatusOperator {
    pub fn new(cfs: Arc<CfsClient>) -> SetStatusOperator {
        SetStatusOperator { cfs }
    }

    fn needs_cfs(component: &Component) -> bool {
        component.states_match() && !component.desired_state.configuration.is_empty()
    }
}

#[async_trait]
impl Operator for SetStatusOperator {
    fn name(&self) -> &'static str {
        "set_status"
    }

    fn query(&self) -> ComponentQuery {
        ComponentQuery::default()
    }

    fn filters(&self) -> Vec<Filter> {
        Vec::new()
    }

    async fn act(&self, components: Vec<Component>) -> Result<Vec<Component>, OperatorError> {
        let cfs_ids: Vec<String> = components
            .iter()
            .filter(|c| Self::needs_cfs(c))
            .map(|c| c.id.clone())
            .collect();

        // A CFS outage must not rewrite statuses wrongly; components whose
        // phase depends on CFS are left untouched until it answers.
        let cfs_state: Option<HashMap<_, _>> = if cfs_ids.is_empty() {
            Some(HashMap::new())
        } else {
            match self.cfs.get_components(&cfs_ids).await {
                Ok(state) => Some(state),
                Err(err) => {
                    warn!(error = %err, "CFS unavailable, skipping configuration-phase statuses");
                    None
                }
            }
        };

        let mut changed = Vec::new();
        for mut component in components {
            let configured = if Self::needs_cfs(&component) {
                match &cfs_state {
                    Some(state) => state
                        .get(&component.id)
                        .map(|c| c.is_configured())
                        .unwrap_or(false),
                    None => continue,
                }
            } else {
                false
            };

            let derived = derive_status(&component, configured);
            if derived != component.status {
                component.status = derived;
                changed.push(component);
            }
        }
        Ok(changed)
    }

    fn success_update(&self, component: &Component, _options: &Options) -> ComponentUpdate {
        ComponentUpdate {
            id: component.id.clone(),
            status: Some(component.status.clone()),
            ..ComponentUpdate::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock;
    use crate::types::{ActualState, BootArtifacts, DesiredState, LastAction};

    fn artifacts(token: &str) -> BootArtifacts {
        BootArtifacts {
            kernel: "k".to_string(),
            initrd: "i".to_string(),
            kernel_parameters: "p".to_string(),
            bss_token: token.to_string(),
        }
    }

    fn pending_component() -> Component {
        Component {
            id: "x1c0s0b0n0".to_string(),
            enabled: true,
            desired_state: DesiredState {
                boot_artifacts: artifacts("t1"),
                configuration: String::new(),
            },
            ..Component::default()
        }
    }

    #[test]
    fn fresh_component_is_power_on_pending() {
        let summary = derive_status(&pending_component(), false);
        assert_eq!(summary.phase, Phase::PoweringOn);
        assert_eq!(summary.status, Status::PowerOnPending);
    }

    #[test]
    fn called_power_on_is_reflected() {
        let mut c = pending_component();
        c.last_action = LastAction {
            action: Action::PowerOn,
            failed: false,
            num_attempts: 0,
            last_updated: clock::now_string(),
        };
        let summary = derive_status(&c, false);
        assert_eq!(summary.status, Status::PowerOnCalled);
    }

    #[test]
    fn stale_actual_boot_routes_through_power_off() {
        let mut c = pending_component();
        c.actual_state = ActualState {
            boot_artifacts: BootArtifacts {
                kernel: "old-k".to_string(),
                ..artifacts("t0")
            },
            last_updated: clock::now_string(),
        };
        let summary = derive_status(&c, false);
        assert_eq!(summary.phase, Phase::PoweringOff);
        assert_eq!(summary.status, Status::PowerOffPending);

        c.last_action.action = Action::PowerOffGracefully;
        assert_eq!(
            derive_status(&c, false).status,
            Status::PowerOffGracefullyCalled
        );

        c.last_action.action = Action::PowerOffForcefully;
        assert_eq!(
            derive_status(&c, false).status,
            Status::PowerOffForcefullyCalled
        );
    }

    #[test]
    fn matched_boot_with_pending_configuration_is_configuring() {
        let mut c = pending_component();
        c.desired_state.configuration = "compute-config".to_string();
        c.actual_state = ActualState {
            boot_artifacts: artifacts("t1"),
            last_updated: clock::now_string(),
        };
        let summary = derive_status(&c, false);
        assert_eq!(summary.phase, Phase::Configuring);
        assert_eq!(summary.status, Status::Configuring);

        let configured = derive_status(&c, true);
        assert_eq!(configured.phase, Phase::None);
        assert_eq!(configured.status, Status::Stable);
    }

    #[test]
    fn matched_boot_without_configuration_is_stable() {
        let mut c = pending_component();
        c.actual_state = ActualState {
            boot_artifacts: artifacts("t1"),
            last_updated: clock::now_string(),
        };
        let summary = derive_status(&c, false);
        assert_eq!(summary.phase, Phase::None);
        assert_eq!(summary.status, Status::Stable);
    }

    #[test]
    fn empty_desired_with_actual_boot_is_powering_off() {
        let mut c = pending_component();
        c.desired_state = DesiredState::default();
        c.actual_state = ActualState {
            boot_artifacts: artifacts("t0"),
            last_updated: clock::now_string(),
        };
        let summary = derive_status(&c, false);
        assert_eq!(summary.phase, Phase::PoweringOff);
    }

    #[test]
    fn failed_action_wins_over_phase_status() {
        let mut c = pending_component();
        c.last_action = LastAction {
            action: Action::PowerOn,
            failed: true,
            num_attempts: 3,
            last_updated: clock::now_string(),
        };
        assert_eq!(derive_status(&c, false).status, Status::Failed);
    }

    #[test]
    fn status_override_pins_the_result() {
        let mut c = pending_component();
        c.status.status_override = "on_hold".to_string();
        let summary = derive_status(&c, false);
        assert_eq!(summary.status, Status::OnHold);
        assert_eq!(summary.status_override, "on_hold");
    }

    #[test]
    fn unknown_override_is_ignored() {
        let mut c = pending_component();
        c.status.status_override = "??".to_string();
        assert_eq!(derive_status(&c, false).status, Status::PowerOnPending);
    }
}
