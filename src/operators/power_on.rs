//! Power-on operator.
//!
//! Drives components that are enabled, have a desired boot, are enabled in
//! hardware and are currently powered off. Acting is two-phase: stage the
//! boot artifacts in BSS (one PUT per distinct artifact tuple, covering all
//! hosts that share it), then submit a single PCS `On` transition for
//! everything that staged. The referral token BSS issues per tuple is
//! recorded in the token table and on each component's desired state — it
//! is the identity the node later reports back.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;

use crate::clients::bos::{BosClient, ComponentQuery};
use crate::clients::bss::BssClient;
use crate::clients::cfs::CfsClient;
use crate::clients::hsm::HsmClient;
use crate::clients::pcs::{PcsClient, PowerOperation, PowerState};
use crate::filters::{
    DesiredBootStateIsNone, DesiredConfigurationIsNone, DesiredConfigurationSetInCfs, Filter,
    HsmStateFilter, LastActionIs, PowerStateFilter, TimeSinceLastAction,
};
use crate::operators::base::{Operator, OperatorError};
use crate::options::OptionsCache;
use crate::tokens::TokenTable;
use crate::types::{Action, Component, ComponentUpdate};

/// An artifact tuple as BSS sees it: kernel, kernel parameters, initrd.
type ArtifactKey = (String, String, String);

pub struct PowerOnOperator {
    bss: Arc<BssClient>,
    pcs: Arc<PcsClient>,
    hsm: Arc<HsmClient>,
    cfs: Arc<CfsClient>,
    store: Arc<BosClient>,
    tokens: Arc<TokenTable>,
    options: Arc<OptionsCache>,
}

impl PowerOnOperator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        bss: Arc<BssClient>,
        pcs: Arc<PcsClient>,
        hsm: Arc<HsmClient>,
        cfs: Arc<CfsClient>,
        store: Arc<BosClient>,
        tokens: Arc<TokenTable>,
        options: Arc<OptionsCache>,
    ) -> PowerOnOperator {
        PowerOnOperator {
            bss,
            pcs,
            hsm,
            cfs,
            store,
            tokens,
            options,
        }
    }

    /// Group components by artifact tuple for staging. Components with no
    /// kernel, no initrd and no parameters have nothing to stage and are
    /// silently skipped.
    fn group_by_artifacts(components: &[Component]) -> BTreeMap<ArtifactKey, BTreeSet<String>> {
        let mut groups: BTreeMap<ArtifactKey, BTreeSet<String>> = BTreeMap::new();
        for component in components {
            let artifacts = &component.desired_state.boot_artifacts;
            if artifacts.is_empty() {
                continue;
            }
            let key = (
                artifacts.kernel.clone(),
                artifacts.kernel_parameters.clone(),
                artifacts.initrd.clone(),
            );
            groups.entry(key).or_default().insert(component.id.clone());
        }
        groups
    }

    /// Stage every artifact group in BSS, record each referral token, and
    /// write the token onto the grouped components' desired state. Returns
    /// the set of component ids that staged.
    async fn stage_artifacts(
        &self,
        components: &[Component],
    ) -> Result<BTreeSet<String>, OperatorError> {
        let mut staged = BTreeSet::new();
        for ((kernel, kernel_parameters, initrd), hosts) in Self::group_by_artifacts(components) {
            let token = self
                .bss
                .set_boot_parameters(&hosts, &kernel_parameters, &kernel, &initrd)
                .await?;
            self.tokens
                .put(&token, &kernel, &kernel_parameters, &initrd)?;

            let updates: Vec<ComponentUpdate> = hosts
                .iter()
                .map(|id| ComponentUpdate::bss_token(id, &token))
                .collect();
            self.store.components().update_components(&updates).await?;
            staged.extend(hosts);
        }
        Ok(staged)
    }
}

#[async_trait]
impl Operator for PowerOnOperator {
    fn name(&self) -> &'static str {
        "power_on"
    }

    fn action(&self) -> Option<Action> {
        Some(Action::PowerOn)
    }

    fn query(&self) -> ComponentQuery {
        ComponentQuery::enabled(true)
    }

    fn filters(&self) -> Vec<Filter> {
        let options = self.options.snapshot();
        vec![
            Filter::not(DesiredBootStateIsNone),
            // Retry a power-on only after the component wait time passed.
            Filter::any(vec![
                vec![Filter::not(LastActionIs::new(vec![Action::PowerOn]))],
                vec![Filter::local(TimeSinceLastAction::seconds(
                    options.max_component_wait_time as i64,
                ))],
            ]),
            Filter::any(vec![
                vec![Filter::local(DesiredConfigurationSetInCfs::new(
                    self.cfs.clone(),
                ))],
                vec![Filter::local(DesiredConfigurationIsNone)],
            ]),
            Filter::batch(HsmStateFilter::new(self.hsm.clone(), Some(true), None)),
            Filter::batch(PowerStateFilter::new(self.pcs.clone(), PowerState::Off)),
        ]
    }

    async fn act(&self, components: Vec<Component>) -> Result<Vec<Component>, OperatorError> {
        let staged = self.stage_artifacts(&components).await?;
        if staged.is_empty() {
            return Ok(Vec::new());
        }

        let xnames: Vec<String> = staged.iter().cloned().collect();
        self.pcs.transition(PowerOperation::On, &xnames).await?;

        Ok(components
            .into_iter()
            .filter(|component| staged.contains(&component.id))
            .collect())
    }
}
