//! Configuration operator.
//!
//! For components in the configuring phase whose desired configuration is
//! not yet what CFS has recorded, patch CFS. Configuration can run at any
//! point relative to the boot flow, so this operator records no action and
//! leaves `last_action` alone.

use std::sync::Arc;

use async_trait::async_trait;

use crate::clients::bos::ComponentQuery;
use crate::clients::cfs::CfsClient;
use crate::filters::{DesiredConfigurationSetInCfs, Filter};
use crate::operators::base::{Operator, OperatorError};
use crate::types::{Component, Status};

pub struct ConfigurationOperator {
    cfs: Arc<CfsClient>,
}

impl ConfigurationOperator {
    pub fn new(cfs: Arc<CfsClient>) -> ConfigurationOperator {
        ConfigurationOperator { cfs }
    }
}

#[async_trait]
impl Operator for ConfigurationOperator {
    fn name(&self) -> &'static str {
        "configuration"
    }

    fn query(&self) -> ComponentQuery {
        ComponentQuery::enabled(true).with_status(Status::Configuring)
    }

    fn filters(&self) -> Vec<Filter> {
        vec![Filter::not(DesiredConfigurationSetInCfs::new(
            self.cfs.clone(),
        ))]
    }

    async fn act(&self, components: Vec<Component>) -> Result<Vec<Component>, OperatorError> {
        self.cfs.set_desired_config(&components, true).await?;
        Ok(components)
    }
}
