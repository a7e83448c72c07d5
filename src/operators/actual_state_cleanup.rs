//! Actual-state cleanup operator.
//!
//! A node's reported boot is only trustworthy while its reporter keeps
//! checking in. When the report is older than the configured TTL — kernel
//! panic, management network loss, a foreign OS without the reporter — the
//! actual state is zeroed so the next reconciliation cycle treats the node
//! as unknown instead of trusting a stale claim.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::clients::bos::{BosClient, ComponentQuery};
use crate::filters::{ActualBootStateIsSet, ActualStateAge, Filter};
use crate::operators::base::{Operator, OperatorError};
use crate::options::OptionsCache;
use crate::types::{Action, ActualState, Component, ComponentUpdate};

pub struct ActualStateCleanupOperator {
    store: Arc<BosClient>,
    options: Arc<OptionsCache>,
}

impl ActualStateCleanupOperator {
    pub fn new(store: Arc<BosClient>, options: Arc<OptionsCache>) -> ActualStateCleanupOperator {
        ActualStateCleanupOperator { store, options }
    }
}

#[async_trait]
impl Operator for ActualStateCleanupOperator {
    fn name(&self) -> &'static str {
        "actual_state_cleanup"
    }

    fn action(&self) -> Option<Action> {
        Some(Action::ActualStateCleanup)
    }

    fn query(&self) -> ComponentQuery {
        ComponentQuery::default()
    }

    fn filters(&self) -> Vec<Filter> {
        let ttl = self.options.snapshot().actual_state_ttl();
        vec![
            Filter::local(ActualBootStateIsSet),
            Filter::local(ActualStateAge::seconds(ttl.as_secs() as i64)),
        ]
    }

    async fn act(&self, components: Vec<Component>) -> Result<Vec<Component>, OperatorError> {
        let updates: Vec<ComponentUpdate> = components
            .iter()
            .map(|component| ComponentUpdate {
                id: component.id.clone(),
                actual_state: Some(ActualState::default()),
                ..ComponentUpdate::default()
            })
            .collect();
        info!(components = updates.len(), "Expiring stale actual state");
        self.store.components().update_components(&updates).await?;
        Ok(components)
    }
}
