//! Disable operator.
//!
//! The terminal edge. A component is done when either its actual boot
//! matches its desired boot and it is powered on, or it has nothing desired
//! and is powered off. The component is stamped complete and, unless the
//! deployment opts out, disabled so no further operator touches it.

use std::sync::Arc;

use async_trait::async_trait;

use crate::clients::bos::ComponentQuery;
use crate::clients::pcs::{PcsClient, PowerState};
use crate::filters::{DesiredStateIsNone, Filter, PowerStateFilter, StatesMatch};
use crate::operators::base::{standard_success_update, Operator, OperatorError};
use crate::options::Options;
use crate::types::{Action, Component, ComponentUpdate};

pub struct DisableOperator {
    pcs: Arc<PcsClient>,
}

impl DisableOperator {
    pub fn new(pcs: Arc<PcsClient>) -> DisableOperator {
        DisableOperator { pcs }
    }
}

#[async_trait]
impl Operator for DisableOperator {
    fn name(&self) -> &'static str {
        "disable"
    }

    fn action(&self) -> Option<Action> {
        Some(Action::Complete)
    }

    fn query(&self) -> ComponentQuery {
        ComponentQuery::enabled(true)
    }

    fn filters(&self) -> Vec<Filter> {
        vec![Filter::any(vec![
            vec![
                Filter::local(StatesMatch),
                Filter::batch(PowerStateFilter::new(self.pcs.clone(), PowerState::On)),
            ],
            vec![
                Filter::local(DesiredStateIsNone),
                Filter::batch(PowerStateFilter::new(self.pcs.clone(), PowerState::Off)),
            ],
        ])]
    }

    async fn act(&self, components: Vec<Component>) -> Result<Vec<Component>, OperatorError> {
        // Nothing external to do; the whole effect is the record update.
        Ok(components)
    }

    fn success_update(&self, component: &Component, options: &Options) -> ComponentUpdate {
        let mut update = standard_success_update(self.action(), component);
        if options.disable_components_on_completion {
            update.enabled = Some(false);
        }
        update
    }
}
