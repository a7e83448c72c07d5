//! Session completion operator.
//!
//! A session is complete when none of its components remain enabled — every
//! member either finished its boot cycle and was disabled, or was disabled
//! by hand. Walks the incomplete sessions each pass and marks the finished
//! ones.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::clients::bos::{BosClient, ComponentQuery};
use crate::operators::base::{HousekeepingOperator, OperatorError};
use crate::options::Options;

pub struct SessionCompletionOperator {
    store: Arc<BosClient>,
}

impl SessionCompletionOperator {
    pub fn new(store: Arc<BosClient>) -> SessionCompletionOperator {
        SessionCompletionOperator { store }
    }
}

#[async_trait]
impl HousekeepingOperator for SessionCompletionOperator {
    fn name(&self) -> &'static str {
        "session_completion"
    }

    async fn run_once(&self, _options: &Options) -> Result<(), OperatorError> {
        let sessions = self.store.sessions().get_sessions(Some(false)).await?;
        debug!(count = sessions.len(), "Incomplete sessions");

        for session in sessions {
            let remaining = self
                .store
                .components()
                .get_components(&ComponentQuery::enabled(true).with_session(&session.name))
                .await?;
            if remaining.is_empty() {
                self.store.sessions().mark_complete(&session.name).await?;
            } else {
                debug!(
                    session = %session.name,
                    remaining = remaining.len(),
                    "Session still has enabled components"
                );
            }
        }
        Ok(())
    }
}
