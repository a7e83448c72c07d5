//! The shared operator frame.
//!
//! Every filter-driven operator runs the same tick: take an options
//! snapshot, fetch candidates with its store query, run the remaining
//! filters, act on the survivors in batches, write the resulting patches
//! back, beat the liveness registry, sleep. Housekeeping operators replace
//! the fetch/filter/act middle with their own `run_once`.
//!
//! Two invariants bind every operator:
//!
//! - At most one side effect per component per tick, and filters are
//!   deterministic over persisted state, so a crash mid-tick re-selects
//!   the same candidates on restart.
//! - No error crosses the tick boundary. Downstream failures become
//!   per-component `error` state and a bumped attempt counter; the loop
//!   itself never dies.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::clients::bos::{BosClient, ComponentQuery};
use crate::clients::ClientError;
use crate::clock;
use crate::filters::{self, Filter};
use crate::options::{Options, OptionsCache};
use crate::tokens::TokenError;
use crate::types::{Action, Component, ComponentUpdate, LastActionPatch};

#[derive(Debug, thiserror::Error)]
pub enum OperatorError {
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error(transparent)]
    Token(#[from] TokenError),
}

/// Shared dependencies every operator loop needs.
pub struct OperatorContext {
    pub store: Arc<BosClient>,
    pub options: Arc<OptionsCache>,
    pub liveness: Arc<Liveness>,
}

/// A filter-driven operator: one state-machine edge.
#[async_trait]
pub trait Operator: Send + Sync {
    fn name(&self) -> &'static str;

    /// Action recorded in `last_action` on success. `None` for operators
    /// outside the boot flow, which must not pollute the record.
    fn action(&self) -> Option<Action> {
        None
    }

    /// Loop cadence; most operators follow the global polling frequency.
    fn frequency_seconds(&self, options: &Options) -> u64 {
        options.polling_frequency
    }

    /// Server-side predicates of the INITIAL candidate fetch.
    fn query(&self) -> ComponentQuery;

    /// The remaining filter chain, built fresh each tick so per-evaluation
    /// prefetch caches start empty.
    fn filters(&self) -> Vec<Filter>;

    /// Perform the side effect. Returns the components that were actually
    /// acted on; a returned error marks the whole batch failed.
    async fn act(&self, components: Vec<Component>) -> Result<Vec<Component>, OperatorError>;

    /// The patch written for each acted-on component. The default stamps
    /// the operator's action and clears the error field.
    fn success_update(&self, component: &Component, _options: &Options) -> ComponentUpdate {
        standard_success_update(self.action(), component)
    }
}

/// A housekeeping operator: owns its whole iteration instead of the
/// fetch/filter/act frame.
#[async_trait]
pub trait HousekeepingOperator: Send + Sync {
    fn name(&self) -> &'static str;

    fn frequency_seconds(&self, options: &Options) -> u64 {
        options.polling_frequency
    }

    async fn run_once(&self, options: &Options) -> Result<(), OperatorError>;
}

/// The two operator shapes the engine hosts.
pub enum EngineOperator {
    Filtered(Arc<dyn Operator>),
    Housekeeping(Arc<dyn HousekeepingOperator>),
}

impl EngineOperator {
    pub fn name(&self) -> &'static str {
        match self {
            EngineOperator::Filtered(op) => op.name(),
            EngineOperator::Housekeeping(op) => op.name(),
        }
    }

    /// Run this operator's loop until cancelled.
    pub async fn run(self, ctx: Arc<OperatorContext>, cancel: CancellationToken) {
        match self {
            EngineOperator::Filtered(op) => run_operator(op, ctx, cancel).await,
            EngineOperator::Housekeeping(op) => run_housekeeping(op, ctx, cancel).await,
        }
    }
}

/// The default success patch: stamp the action, reset the attempt counter,
/// clear the error. Operators with no action produce a no-op patch that the
/// frame drops.
pub fn standard_success_update(action: Option<Action>, component: &Component) -> ComponentUpdate {
    let mut update = ComponentUpdate::new(&component.id);
    if let Some(action) = action {
        update.last_action = Some(LastActionPatch {
            action: Some(action),
            failed: Some(false),
            num_attempts: Some(0),
            last_updated: Some(clock::now_string()),
        });
        update.error = Some(String::new());
    }
    update
}

/// The failure patch: record the error, bump the attempt counter, flag the
/// last action failed. The action itself and its timestamp stay untouched
/// so the next tick re-evaluates the same pending action.
pub fn failure_update(component: &Component, message: &str) -> ComponentUpdate {
    let mut update = ComponentUpdate::new(&component.id);
    update.error = Some(message.to_string());
    update.last_action = Some(LastActionPatch {
        action: None,
        failed: Some(true),
        num_attempts: Some(component.last_action.num_attempts.saturating_add(1)),
        last_updated: None,
    });
    update
}

fn update_is_noop(update: &ComponentUpdate) -> bool {
    update.enabled.is_none()
        && update.desired_state.is_none()
        && update.actual_state.is_none()
        && update.last_action.is_none()
        && update.status.is_none()
        && update.session.is_none()
        && update.error.is_none()
}

/// Split a component list into store/downstream sized batches.
pub fn chunked(components: Vec<Component>, size: usize) -> Vec<Vec<Component>> {
    let size = size.max(1);
    let mut chunks = Vec::with_capacity(components.len().div_ceil(size));
    let mut current = Vec::with_capacity(size.min(components.len()));
    for component in components {
        current.push(component);
        if current.len() == size {
            chunks.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Per-operator last-tick timestamps, surfaced through `/healthz`.
pub struct Liveness {
    beats: RwLock<BTreeMap<&'static str, DateTime<Utc>>>,
}

impl Liveness {
    pub fn new() -> Liveness {
        Liveness {
            beats: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn beat(&self, name: &'static str) {
        if let Ok(mut beats) = self.beats.write() {
            beats.insert(name, clock::now());
        }
    }

    /// Seconds since each operator's last completed tick.
    pub fn ages(&self) -> BTreeMap<String, i64> {
        match self.beats.read() {
            Ok(beats) => beats
                .iter()
                .map(|(name, at)| ((*name).to_string(), (clock::now() - *at).num_seconds()))
                .collect(),
            Err(_) => BTreeMap::new(),
        }
    }
}

impl Default for Liveness {
    fn default() -> Self {
        Self::new()
    }
}

/// Run one filter-driven operator loop until cancelled.
pub async fn run_operator(
    op: Arc<dyn Operator>,
    ctx: Arc<OperatorContext>,
    cancel: CancellationToken,
) {
    info!(operator = op.name(), "Operator loop started");
    loop {
        let options = ctx.options.snapshot();
        tick(op.as_ref(), &ctx, &options).await;
        ctx.liveness.beat(op.name());

        let sleep = Duration::from_secs(op.frequency_seconds(&options).max(1));
        tokio::select! {
            _ = cancel.cancelled() => {
                info!(operator = op.name(), "Operator loop stopping");
                return;
            }
            _ = tokio::time::sleep(sleep) => {}
        }
    }
}

/// One iteration of the fetch → filter → act → update frame.
async fn tick(op: &dyn Operator, ctx: &OperatorContext, options: &Options) {
    let candidates = match ctx.store.components().get_components(&op.query()).await {
        Ok(candidates) => candidates,
        Err(err) => {
            warn!(operator = op.name(), error = %err, "Candidate fetch failed, skipping tick");
            return;
        }
    };

    let filters = op.filters();
    let survivors = filters::apply_all(&filters, candidates).await;
    if survivors.is_empty() {
        debug!(operator = op.name(), "No components to act on");
        return;
    }
    info!(
        operator = op.name(),
        components = survivors.len(),
        "Acting on components"
    );

    for chunk in chunked(survivors, options.max_component_batch_size) {
        match op.act(chunk.clone()).await {
            Ok(acted) => {
                let updates: Vec<ComponentUpdate> = acted
                    .iter()
                    .map(|component| op.success_update(component, options))
                    .filter(|update| !update_is_noop(update))
                    .collect();
                if let Err(err) = ctx.store.components().update_components(&updates).await {
                    warn!(operator = op.name(), error = %err, "Could not record action results");
                }
            }
            Err(err) => {
                error!(operator = op.name(), error = %err, components = chunk.len(),
                       "Operator action failed");
                let message = err.to_string();
                let updates: Vec<ComponentUpdate> = chunk
                    .iter()
                    .map(|component| failure_update(component, &message))
                    .collect();
                if let Err(err) = ctx.store.components().update_components(&updates).await {
                    warn!(operator = op.name(), error = %err, "Could not record action failures");
                }
            }
        }
    }
}

/// Run one housekeeping loop until cancelled.
pub async fn run_housekeeping(
    op: Arc<dyn HousekeepingOperator>,
    ctx: Arc<OperatorContext>,
    cancel: CancellationToken,
) {
    info!(operator = op.name(), "Operator loop started");
    loop {
        let options = ctx.options.snapshot();
        if let Err(err) = op.run_once(&options).await {
            error!(operator = op.name(), error = %err, "Housekeeping pass failed");
        }
        ctx.liveness.beat(op.name());

        let sleep = Duration::from_secs(op.frequency_seconds(&options).max(1));
        tokio::select! {
            _ = cancel.cancelled() => {
                info!(operator = op.name(), "Operator loop stopping");
                return;
            }
            _ = tokio::time::sleep(sleep) => {}
        }
    }
}
