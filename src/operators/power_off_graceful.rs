//! Graceful power-off operator.
//!
//! Fires when a powered-on node's actual boot disagrees with its desired
//! boot and no off-leg action is already pending: the node must come down
//! before the right artifacts can be staged and booted. Issues a PCS
//! `Soft-Off` and leaves escalation to the forceful operator.

use std::sync::Arc;

use async_trait::async_trait;

use crate::clients::bos::ComponentQuery;
use crate::clients::hsm::HsmClient;
use crate::clients::pcs::{PcsClient, PowerOperation, PowerState};
use crate::filters::{BootArtifactStatesMatch, Filter, HsmStateFilter, LastActionIs, PowerStateFilter};
use crate::operators::base::{Operator, OperatorError};
use crate::types::{Action, Component};

pub struct GracefulPowerOffOperator {
    pcs: Arc<PcsClient>,
    hsm: Arc<HsmClient>,
}

impl GracefulPowerOffOperator {
    pub fn new(pcs: Arc<PcsClient>, hsm: Arc<HsmClient>) -> GracefulPowerOffOperator {
        GracefulPowerOffOperator { pcs, hsm }
    }
}

#[async_trait]
impl Operator for GracefulPowerOffOperator {
    fn name(&self) -> &'static str {
        "power_off_graceful"
    }

    fn action(&self) -> Option<Action> {
        Some(Action::PowerOffGracefully)
    }

    fn query(&self) -> ComponentQuery {
        ComponentQuery::enabled(true)
    }

    fn filters(&self) -> Vec<Filter> {
        vec![
            Filter::not(BootArtifactStatesMatch),
            // Only from a settled state; a pending off-leg belongs to the
            // forceful operator.
            Filter::local(LastActionIs::new(vec![
                Action::Complete,
                Action::Recovery,
                Action::None,
            ])),
            Filter::batch(HsmStateFilter::new(self.hsm.clone(), Some(true), None)),
            Filter::batch(PowerStateFilter::new(self.pcs.clone(), PowerState::On)),
        ]
    }

    async fn act(&self, components: Vec<Component>) -> Result<Vec<Component>, OperatorError> {
        let xnames: Vec<String> = components.iter().map(|c| c.id.clone()).collect();
        self.pcs.transition(PowerOperation::SoftOff, &xnames).await?;
        Ok(components)
    }
}
