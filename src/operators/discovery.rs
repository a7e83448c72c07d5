//! Component discovery operator.
//!
//! Periodically compares the set of node xnames HSM knows against the set
//! of component ids in the store and creates records for anything missing,
//! disabled and with empty states. Records are never deleted here: a node
//! absent from HSM may be a hardware swap or a transient HSM outage, and
//! losing its history would be worse than carrying a dormant record.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::clients::bos::{BosClient, ComponentQuery};
use crate::clients::hsm::HsmClient;
use crate::operators::base::{chunked, HousekeepingOperator, OperatorError};
use crate::options::Options;
use crate::types::Component;

pub struct DiscoveryOperator {
    hsm: Arc<HsmClient>,
    store: Arc<BosClient>,
}

impl DiscoveryOperator {
    pub fn new(hsm: Arc<HsmClient>, store: Arc<BosClient>) -> DiscoveryOperator {
        DiscoveryOperator { hsm, store }
    }

    /// The sorted list of ids present in HSM but absent from the store.
    pub fn missing_ids(hsm_xnames: &HashSet<String>, bos_ids: &HashSet<String>) -> Vec<String> {
        let mut missing: Vec<String> = hsm_xnames.difference(bos_ids).cloned().collect();
        missing.sort();
        missing
    }
}

#[async_trait]
impl HousekeepingOperator for DiscoveryOperator {
    fn name(&self) -> &'static str {
        "discovery"
    }

    fn frequency_seconds(&self, options: &Options) -> u64 {
        options.discovery_frequency
    }

    async fn run_once(&self, options: &Options) -> Result<(), OperatorError> {
        let hsm_xnames = self.hsm.read_all_node_xnames().await?;
        let bos_ids: HashSet<String> = self
            .store
            .components()
            .get_components(&ComponentQuery::default())
            .await?
            .into_iter()
            .map(|component| component.id)
            .collect();

        let missing = Self::missing_ids(&hsm_xnames, &bos_ids);
        if missing.is_empty() {
            debug!("No new components discovered");
            return Ok(());
        }

        info!(count = missing.len(), "New components reported by HSM");
        let records: Vec<Component> = missing
            .iter()
            .map(|id| Component::newly_discovered(id))
            .collect();
        for chunk in chunked(records, options.max_component_batch_size) {
            self.store.components().put_components(&chunk).await?;
            info!(count = chunk.len(), "New components added to the store");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(ids: &[&str]) -> HashSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn missing_ids_is_sorted_hsm_minus_bos() {
        let hsm = set(&["x3c0s0b0n0", "x1c0s0b0n0", "x2c0s0b0n0"]);
        let bos = set(&["x1c0s0b0n0"]);
        assert_eq!(
            DiscoveryOperator::missing_ids(&hsm, &bos),
            vec!["x2c0s0b0n0", "x3c0s0b0n0"]
        );
    }

    #[test]
    fn components_unknown_to_hsm_are_never_flagged() {
        // Store knows more than HSM (swap or outage): nothing to add, and
        // nothing to remove either.
        let hsm = set(&["x1c0s0b0n0"]);
        let bos = set(&["x1c0s0b0n0", "x9c0s0b0n0"]);
        assert!(DiscoveryOperator::missing_ids(&hsm, &bos).is_empty());
    }

    #[test]
    fn identical_inventories_produce_no_work() {
        let both = set(&["x1c0s0b0n0", "x2c0s0b0n0"]);
        assert!(DiscoveryOperator::missing_ids(&both, &both).is_empty());
    }
}
