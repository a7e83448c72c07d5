//! Ready-recovery operator.
//!
//! A component that was powered on five minutes ago, is drawing power, but
//! still has not reached Ready in HSM has a stalled boot. The recovery is
//! to bring it back down; the normal power-on edge then retries the boot on
//! a later tick.

use std::sync::Arc;

use async_trait::async_trait;

use crate::clients::bos::ComponentQuery;
use crate::clients::hsm::HsmClient;
use crate::clients::pcs::{PcsClient, PowerOperation, PowerState};
use crate::filters::{DesiredStateIsNone, Filter, HsmStateFilter, LastActionIs, PowerStateFilter, TimeSinceLastAction};
use crate::operators::base::{Operator, OperatorError};
use crate::operators::power_off_forceful::POWER_ACTION_WAIT_MINUTES;
use crate::types::{Action, Component};

pub struct ReadyRecoveryOperator {
    pcs: Arc<PcsClient>,
    hsm: Arc<HsmClient>,
}

impl ReadyRecoveryOperator {
    pub fn new(pcs: Arc<PcsClient>, hsm: Arc<HsmClient>) -> ReadyRecoveryOperator {
        ReadyRecoveryOperator { pcs, hsm }
    }
}

#[async_trait]
impl Operator for ReadyRecoveryOperator {
    fn name(&self) -> &'static str {
        "ready_recovery"
    }

    fn action(&self) -> Option<Action> {
        Some(Action::Recovery)
    }

    fn query(&self) -> ComponentQuery {
        ComponentQuery::enabled(true)
    }

    fn filters(&self) -> Vec<Filter> {
        vec![
            Filter::not(DesiredStateIsNone),
            Filter::local(LastActionIs::new(vec![Action::PowerOn])),
            Filter::local(TimeSinceLastAction::minutes(POWER_ACTION_WAIT_MINUTES)),
            Filter::batch(HsmStateFilter::new(self.hsm.clone(), Some(true), Some(false))),
            Filter::batch(PowerStateFilter::new(self.pcs.clone(), PowerState::On)),
        ]
    }

    async fn act(&self, components: Vec<Component>) -> Result<Vec<Component>, OperatorError> {
        let xnames: Vec<String> = components.iter().map(|c| c.id.clone()).collect();
        self.pcs.transition(PowerOperation::SoftOff, &xnames).await?;
        Ok(components)
    }
}
