//! Session cleanup operator.
//!
//! Deletes complete sessions once they are older than the configured TTL.
//! A zero-valued TTL disables the operator entirely; the option is
//! re-checked every pass so cleanup can be turned on or off at runtime.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::clients::bos::BosClient;
use crate::operators::base::{HousekeepingOperator, OperatorError};
use crate::options::Options;

pub struct SessionCleanupOperator {
    store: Arc<BosClient>,
}

impl SessionCleanupOperator {
    pub fn new(store: Arc<BosClient>) -> SessionCleanupOperator {
        SessionCleanupOperator { store }
    }
}

#[async_trait]
impl HousekeepingOperator for SessionCleanupOperator {
    fn name(&self) -> &'static str {
        "session_cleanup"
    }

    async fn run_once(&self, options: &Options) -> Result<(), OperatorError> {
        if options.session_cleanup_ttl().is_none() {
            debug!("Session cleanup disabled by option");
            return Ok(());
        }

        self.store
            .sessions()
            .delete_sessions("complete", &options.cleanup_completed_session_ttl)
            .await?;
        Ok(())
    }
}
