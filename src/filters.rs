//! Composable component filters.
//!
//! Each operator selects its candidates with a chain of filters. The first
//! selection step is always the server-side store query
//! ([`crate::clients::bos::ComponentQuery`]); everything after it runs over
//! the fetched list:
//!
//! - **Batch filters** re-select ids through a downstream service (PCS
//!   power state, HSM state). They cannot be negated — "not powered on"
//!   and "powered off" are different questions when a node is undefined.
//! - **Local filters** match one component at a time against the record
//!   (plus optionally prefetched facts), so negation is well-defined.
//! - **`Or`** takes lists of filters; each list is evaluated as an AND over
//!   the same input and the resulting id sets are unioned.
//!
//! Every filter is fail-closed: an error during evaluation is logged and
//! treated as "matched nothing", so a flaky downstream can only ever shrink
//! the set of components an operator acts on.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use futures::future::BoxFuture;
use tracing::{debug, warn};

use crate::clients::cfs::{CfsClient, CfsComponent};
use crate::clients::hsm::HsmClient;
use crate::clients::pcs::{PcsClient, PowerState};
use crate::clients::ClientError;
use crate::types::{Action, Component};

#[derive(Debug, thiserror::Error)]
pub enum FilterError {
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error("filter state poisoned")]
    Poisoned,
}

/// A filter that re-selects candidates through a downstream query.
#[async_trait]
pub trait BatchFilter: Send + Sync {
    fn name(&self) -> &'static str;
    async fn filter(&self, components: Vec<Component>) -> Result<Vec<Component>, FilterError>;
}

/// A per-component predicate. `load` runs once per evaluation to prefetch
/// any external facts `matches` needs.
#[async_trait]
pub trait LocalFilter: Send + Sync {
    fn name(&self) -> &'static str;
    async fn load(&self, _components: &[Component]) -> Result<(), FilterError> {
        Ok(())
    }
    fn matches(&self, component: &Component) -> bool;
}

/// One node of a filter chain.
pub enum Filter {
    Batch(Box<dyn BatchFilter>),
    Local {
        filter: Box<dyn LocalFilter>,
        negate: bool,
    },
    Or(Vec<Vec<Filter>>),
}

impl Filter {
    pub fn batch(filter: impl BatchFilter + 'static) -> Filter {
        Filter::Batch(Box::new(filter))
    }

    pub fn local(filter: impl LocalFilter + 'static) -> Filter {
        Filter::Local {
            filter: Box::new(filter),
            negate: false,
        }
    }

    /// Negated per-component match.
    pub fn not(filter: impl LocalFilter + 'static) -> Filter {
        Filter::Local {
            filter: Box::new(filter),
            negate: true,
        }
    }

    /// Union of alternatives, each alternative an AND of its filters.
    pub fn any(alternatives: Vec<Vec<Filter>>) -> Filter {
        Filter::Or(alternatives)
    }

    fn label(&self) -> String {
        match self {
            Filter::Batch(f) => f.name().to_string(),
            Filter::Local { filter, negate } => {
                if *negate {
                    format!("not({})", filter.name())
                } else {
                    filter.name().to_string()
                }
            }
            Filter::Or(alternatives) => format!("or({} alternatives)", alternatives.len()),
        }
    }

    /// Apply this filter to an already-fetched candidate list. Boxed so the
    /// `Or` arm can recurse.
    pub fn apply<'a>(&'a self, input: Vec<Component>) -> BoxFuture<'a, Vec<Component>> {
        Box::pin(async move {
            if input.is_empty() {
                return input;
            }
            let output = match self {
                Filter::Batch(filter) => match filter.filter(input).await {
                    Ok(kept) => kept,
                    Err(err) => {
                        warn!(filter = filter.name(), error = %err, "Filter failed, matching nothing");
                        Vec::new()
                    }
                },
                Filter::Local { filter, negate } => {
                    if let Err(err) = filter.load(&input).await {
                        warn!(filter = filter.name(), error = %err, "Filter failed, matching nothing");
                        return Vec::new();
                    }
                    input
                        .into_iter()
                        .filter(|component| filter.matches(component) != *negate)
                        .collect()
                }
                Filter::Or(alternatives) => {
                    let mut matched: HashSet<String> = HashSet::new();
                    for alternative in alternatives {
                        let mut survivors = input.clone();
                        for filter in alternative {
                            survivors = filter.apply(survivors).await;
                        }
                        matched.extend(survivors.into_iter().map(|c| c.id));
                    }
                    input
                        .into_iter()
                        .filter(|component| matched.contains(&component.id))
                        .collect()
                }
            };
            debug!(
                filter = %self.label(),
                matched = output.len(),
                "Filter evaluated"
            );
            output
        })
    }
}

/// Run a full chain over the fetched candidates.
pub async fn apply_all(filters: &[Filter], mut components: Vec<Component>) -> Vec<Component> {
    for filter in filters {
        if components.is_empty() {
            return components;
        }
        components = filter.apply(components).await;
    }
    components
}

// ============================================================================
// Batch filters (PCS / HSM backed)
// ============================================================================

/// Keep components whose PCS-reported power state matches. Nodes PCS does
/// not report are `undefined`.
pub struct PowerStateFilter {
    pcs: Arc<PcsClient>,
    state: PowerState,
}

impl PowerStateFilter {
    pub fn new(pcs: Arc<PcsClient>, state: PowerState) -> PowerStateFilter {
        PowerStateFilter { pcs, state }
    }

    fn select(
        components: Vec<Component>,
        states: &HashMap<String, PowerState>,
        wanted: PowerState,
    ) -> Vec<Component> {
        components
            .into_iter()
            .filter(|component| {
                states
                    .get(&component.id)
                    .copied()
                    .unwrap_or(PowerState::Undefined)
                    == wanted
            })
            .collect()
    }
}

#[async_trait]
impl BatchFilter for PowerStateFilter {
    fn name(&self) -> &'static str {
        "power_state"
    }

    async fn filter(&self, components: Vec<Component>) -> Result<Vec<Component>, FilterError> {
        let ids: Vec<String> = components.iter().map(|c| c.id.clone()).collect();
        let states = self.pcs.power_status(&ids).await?;
        Ok(Self::select(components, &states, self.state))
    }
}

/// Keep components by their HSM hardware state: enabled flag and/or
/// readiness.
pub struct HsmStateFilter {
    hsm: Arc<HsmClient>,
    enabled: Option<bool>,
    ready: Option<bool>,
}

impl HsmStateFilter {
    pub fn new(hsm: Arc<HsmClient>, enabled: Option<bool>, ready: Option<bool>) -> HsmStateFilter {
        HsmStateFilter {
            hsm,
            enabled,
            ready,
        }
    }

    fn select(
        components: Vec<Component>,
        ready_by_id: &HashMap<String, bool>,
        ready_wanted: Option<bool>,
    ) -> Vec<Component> {
        components
            .into_iter()
            .filter(|component| match ready_by_id.get(&component.id) {
                // Absent means HSM filtered it out (or no longer knows it).
                None => false,
                Some(ready) => ready_wanted.map(|wanted| *ready == wanted).unwrap_or(true),
            })
            .collect()
    }
}

#[async_trait]
impl BatchFilter for HsmStateFilter {
    fn name(&self) -> &'static str {
        "hsm_state"
    }

    async fn filter(&self, components: Vec<Component>) -> Result<Vec<Component>, FilterError> {
        let ids: Vec<String> = components.iter().map(|c| c.id.clone()).collect();
        let reported = self.hsm.query_components(&ids, self.enabled).await?;
        let ready_by_id: HashMap<String, bool> = reported
            .into_iter()
            .map(|c| (c.id.clone(), c.is_ready()))
            .collect();
        Ok(Self::select(components, &ready_by_id, self.ready))
    }
}

// ============================================================================
// Local filters
// ============================================================================

/// Desired and actual boot artifacts identical, referral token included.
pub struct StatesMatch;

#[async_trait]
impl LocalFilter for StatesMatch {
    fn name(&self) -> &'static str {
        "states_match"
    }

    fn matches(&self, component: &Component) -> bool {
        component.states_match()
    }
}

/// Desired and actual artifact tuples identical, token ignored.
pub struct BootArtifactStatesMatch;

#[async_trait]
impl LocalFilter for BootArtifactStatesMatch {
    fn name(&self) -> &'static str {
        "boot_artifact_states_match"
    }

    fn matches(&self, component: &Component) -> bool {
        component.boot_artifact_states_match()
    }
}

/// No desired boot artifacts at all.
pub struct DesiredBootStateIsNone;

#[async_trait]
impl LocalFilter for DesiredBootStateIsNone {
    fn name(&self) -> &'static str {
        "desired_boot_state_is_none"
    }

    fn matches(&self, component: &Component) -> bool {
        component.desired_state.boot_is_none()
    }
}

/// Nothing desired, boot or configuration.
pub struct DesiredStateIsNone;

#[async_trait]
impl LocalFilter for DesiredStateIsNone {
    fn name(&self) -> &'static str {
        "desired_state_is_none"
    }

    fn matches(&self, component: &Component) -> bool {
        component.desired_state.is_none()
    }
}

/// No desired configuration on the record.
pub struct DesiredConfigurationIsNone;

#[async_trait]
impl LocalFilter for DesiredConfigurationIsNone {
    fn name(&self) -> &'static str {
        "desired_configuration_is_none"
    }

    fn matches(&self, component: &Component) -> bool {
        component.desired_state.configuration.is_empty()
    }
}

/// The record's last action is one of the given set. `Action::None` in the
/// set matches components that have never been acted on.
pub struct LastActionIs {
    actions: Vec<Action>,
}

impl LastActionIs {
    pub fn new(actions: impl Into<Vec<Action>>) -> LastActionIs {
        LastActionIs {
            actions: actions.into(),
        }
    }
}

#[async_trait]
impl LocalFilter for LastActionIs {
    fn name(&self) -> &'static str {
        "last_action_is"
    }

    fn matches(&self, component: &Component) -> bool {
        self.actions.contains(&component.last_action.action)
    }
}

/// The last action is at least `seconds` old. A record with no readable
/// action timestamp counts as old — there is nothing recent to wait for.
pub struct TimeSinceLastAction {
    seconds: i64,
}

impl TimeSinceLastAction {
    pub fn seconds(seconds: i64) -> TimeSinceLastAction {
        TimeSinceLastAction { seconds }
    }

    pub fn minutes(minutes: i64) -> TimeSinceLastAction {
        TimeSinceLastAction {
            seconds: minutes * 60,
        }
    }
}

#[async_trait]
impl LocalFilter for TimeSinceLastAction {
    fn name(&self) -> &'static str {
        "time_since_last_action"
    }

    fn matches(&self, component: &Component) -> bool {
        component
            .seconds_since_last_action()
            .map_or(true, |age| age > self.seconds)
    }
}

/// The reported actual state is at least `seconds` old. An actual state
/// with boot artifacts but no readable timestamp counts as expired.
pub struct ActualStateAge {
    seconds: i64,
}

impl ActualStateAge {
    pub fn seconds(seconds: i64) -> ActualStateAge {
        ActualStateAge { seconds }
    }
}

#[async_trait]
impl LocalFilter for ActualStateAge {
    fn name(&self) -> &'static str {
        "actual_state_age"
    }

    fn matches(&self, component: &Component) -> bool {
        component
            .actual_state_age_seconds()
            .map_or(true, |age| age > self.seconds)
    }
}

/// The component has reported some actual boot.
pub struct ActualBootStateIsSet;

#[async_trait]
impl LocalFilter for ActualBootStateIsSet {
    fn name(&self) -> &'static str {
        "actual_boot_state_is_set"
    }

    fn matches(&self, component: &Component) -> bool {
        !component.actual_state.is_empty()
    }
}

/// The desired configuration recorded in CFS already equals the one on the
/// component record. Prefetches CFS state for the whole candidate list.
pub struct DesiredConfigurationSetInCfs {
    cfs: Arc<CfsClient>,
    fetched: RwLock<HashMap<String, CfsComponent>>,
}

impl DesiredConfigurationSetInCfs {
    pub fn new(cfs: Arc<CfsClient>) -> DesiredConfigurationSetInCfs {
        DesiredConfigurationSetInCfs {
            cfs,
            fetched: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl LocalFilter for DesiredConfigurationSetInCfs {
    fn name(&self) -> &'static str {
        "desired_configuration_set_in_cfs"
    }

    async fn load(&self, components: &[Component]) -> Result<(), FilterError> {
        let ids: Vec<String> = components.iter().map(|c| c.id.clone()).collect();
        let fetched = self.cfs.get_components(&ids).await?;
        *self.fetched.write().map_err(|_| FilterError::Poisoned)? = fetched;
        Ok(())
    }

    fn matches(&self, component: &Component) -> bool {
        match self.fetched.read() {
            Ok(fetched) => fetched
                .get(&component.id)
                .map(|cfs| cfs.desired_config == component.desired_state.configuration)
                .unwrap_or(false),
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock;
    use crate::types::{ActualState, BootArtifacts, DesiredState, LastAction};
    use chrono::Duration as ChronoDuration;

    fn component(id: &str) -> Component {
        Component {
            id: id.to_string(),
            enabled: true,
            ..Component::default()
        }
    }

    fn booted_component(id: &str, matching: bool) -> Component {
        let desired = BootArtifacts {
            kernel: "k".to_string(),
            initrd: "i".to_string(),
            kernel_parameters: "p".to_string(),
            bss_token: "t".to_string(),
        };
        let actual = if matching {
            desired.clone()
        } else {
            BootArtifacts {
                kernel: "old-k".to_string(),
                ..desired.clone()
            }
        };
        Component {
            id: id.to_string(),
            enabled: true,
            desired_state: DesiredState {
                boot_artifacts: desired,
                configuration: String::new(),
            },
            actual_state: ActualState {
                boot_artifacts: actual,
                last_updated: clock::now_string(),
            },
            ..Component::default()
        }
    }

    struct AlwaysFails;

    #[async_trait]
    impl LocalFilter for AlwaysFails {
        fn name(&self) -> &'static str {
            "always_fails"
        }

        async fn load(&self, _components: &[Component]) -> Result<(), FilterError> {
            Err(FilterError::Poisoned)
        }

        fn matches(&self, _component: &Component) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn local_filter_keeps_matches() {
        let input = vec![booted_component("a", true), booted_component("b", false)];
        let kept = Filter::local(StatesMatch).apply(input).await;
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].id, "a");
    }

    #[tokio::test]
    async fn negation_inverts_the_match() {
        let input = vec![booted_component("a", true), booted_component("b", false)];
        let kept = Filter::not(StatesMatch).apply(input).await;
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].id, "b");
    }

    #[tokio::test]
    async fn failing_filter_matches_nothing() {
        let input = vec![component("a"), component("b")];
        let kept = Filter::local(AlwaysFails).apply(input).await;
        assert!(kept.is_empty());
    }

    #[tokio::test]
    async fn or_unions_alternatives_each_as_and() {
        // Alternative 1: states match. Alternative 2: never acted on.
        let mut fresh = component("fresh");
        fresh.last_action = LastAction::default();
        let matching = booted_component("matching", true);
        let mut acted = booted_component("acted", false);
        acted.last_action.action = Action::PowerOn;

        let chain = Filter::any(vec![
            vec![Filter::local(StatesMatch)],
            vec![Filter::local(LastActionIs::new(vec![Action::None]))],
        ]);
        let kept = chain
            .apply(vec![fresh, matching, acted])
            .await;
        let ids: Vec<&str> = kept.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["fresh", "matching"]);
    }

    #[tokio::test]
    async fn empty_input_short_circuits() {
        let kept = Filter::local(AlwaysFails).apply(Vec::new()).await;
        assert!(kept.is_empty());
    }

    #[tokio::test]
    async fn chain_applies_in_order() {
        let input = vec![booted_component("a", true), booted_component("b", false)];
        let filters = vec![
            Filter::local(ActualBootStateIsSet),
            Filter::not(StatesMatch),
        ];
        let kept = apply_all(&filters, input).await;
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].id, "b");
    }

    #[test]
    fn last_action_set_includes_never_acted() {
        let filter = LastActionIs::new(vec![Action::Complete, Action::Recovery, Action::None]);
        let mut c = component("a");
        assert!(filter.matches(&c));
        c.last_action.action = Action::Complete;
        assert!(filter.matches(&c));
        c.last_action.action = Action::PowerOn;
        assert!(!filter.matches(&c));
    }

    #[test]
    fn time_since_last_action_thresholds() {
        let filter = TimeSinceLastAction::minutes(5);
        let mut c = component("a");
        // Never acted on: nothing recent to wait for.
        assert!(filter.matches(&c));

        c.last_action.last_updated = clock::now_string();
        assert!(!filter.matches(&c));

        c.last_action.last_updated =
            clock::format_timestamp(clock::now() - ChronoDuration::minutes(6));
        assert!(filter.matches(&c));
    }

    #[test]
    fn actual_state_age_treats_missing_timestamp_as_expired() {
        let filter = ActualStateAge::seconds(14_400);
        let mut c = booted_component("a", true);
        assert!(!filter.matches(&c));

        c.actual_state.last_updated =
            clock::format_timestamp(clock::now() - ChronoDuration::hours(5));
        assert!(filter.matches(&c));

        c.actual_state.last_updated = String::new();
        assert!(filter.matches(&c));
    }

    #[test]
    fn power_state_selection_defaults_to_undefined() {
        let mut states = HashMap::new();
        states.insert("on-node".to_string(), PowerState::On);
        states.insert("off-node".to_string(), PowerState::Off);
        let input = vec![
            component("on-node"),
            component("off-node"),
            component("mystery-node"),
        ];

        let off = PowerStateFilter::select(input.clone(), &states, PowerState::Off);
        assert_eq!(off.len(), 1);
        assert_eq!(off[0].id, "off-node");

        let undefined = PowerStateFilter::select(input, &states, PowerState::Undefined);
        assert_eq!(undefined.len(), 1);
        assert_eq!(undefined[0].id, "mystery-node");
    }

    #[test]
    fn hsm_selection_drops_unknown_and_honors_ready() {
        let mut ready_by_id = HashMap::new();
        ready_by_id.insert("ready-node".to_string(), true);
        ready_by_id.insert("booting-node".to_string(), false);
        let input = vec![
            component("ready-node"),
            component("booting-node"),
            component("gone-node"),
        ];

        let any = HsmStateFilter::select(input.clone(), &ready_by_id, None);
        assert_eq!(any.len(), 2);

        let not_ready = HsmStateFilter::select(input, &ready_by_id, Some(false));
        assert_eq!(not_ready.len(), 1);
        assert_eq!(not_ready[0].id, "booting-node");
    }
}
