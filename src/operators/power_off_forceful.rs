//! Forceful power-off operator.
//!
//! Escalation edge: an off-leg action was already attempted, at least five
//! minutes have passed, and PCS still reports the node on. Issues a PCS
//! `Force-Off`.

use std::sync::Arc;

use async_trait::async_trait;

use crate::clients::bos::ComponentQuery;
use crate::clients::hsm::HsmClient;
use crate::clients::pcs::{PcsClient, PowerOperation, PowerState};
use crate::filters::{Filter, HsmStateFilter, LastActionIs, PowerStateFilter, StatesMatch, TimeSinceLastAction};
use crate::operators::base::{Operator, OperatorError};
use crate::types::{Action, Component};

/// How long a pending off-leg action gets before escalation.
pub(crate) const POWER_ACTION_WAIT_MINUTES: i64 = 5;

pub struct ForcefulPowerOffOperator {
    pcs: Arc<PcsClient>,
    hsm: Arc<HsmClient>,
}

impl ForcefulPowerOffOperator {
    pub fn new(pcs: Arc<PcsClient>, hsm: Arc<HsmClient>) -> ForcefulPowerOffOperator {
        ForcefulPowerOffOperator { pcs, hsm }
    }
}

#[async_trait]
impl Operator for ForcefulPowerOffOperator {
    fn name(&self) -> &'static str {
        "power_off_forceful"
    }

    fn action(&self) -> Option<Action> {
        Some(Action::PowerOffForcefully)
    }

    fn query(&self) -> ComponentQuery {
        ComponentQuery::enabled(true)
    }

    fn filters(&self) -> Vec<Filter> {
        vec![
            Filter::not(StatesMatch),
            Filter::local(LastActionIs::new(vec![
                Action::PowerOffGracefully,
                Action::PowerOffForcefully,
            ])),
            Filter::local(TimeSinceLastAction::minutes(POWER_ACTION_WAIT_MINUTES)),
            Filter::batch(HsmStateFilter::new(self.hsm.clone(), Some(true), None)),
            Filter::batch(PowerStateFilter::new(self.pcs.clone(), PowerState::On)),
        ]
    }

    async fn act(&self, components: Vec<Component>) -> Result<Vec<Component>, OperatorError> {
        let xnames: Vec<String> = components.iter().map(|c| c.id.clone()).collect();
        self.pcs.transition(PowerOperation::ForceOff, &xnames).await?;
        Ok(components)
    }
}
