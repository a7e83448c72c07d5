//! BOS reconciliation engine.
//!
//! Drives a declared desired boot state toward the observed actual state
//! for every tracked compute node by coordinating four collaborators: the
//! hardware state manager (HSM), the boot-script service (BSS), the power
//! control service (PCS) and the configuration framework (CFS).
//!
//! ## Architecture
//!
//! - **Operators**: independent loops, each owning one edge of the
//!   per-component state machine (power on, the two off legs,
//!   configuration, recovery, disable) plus housekeeping (discovery,
//!   actual-state expiry, session completion and cleanup).
//! - **Filters**: composable predicates that select each operator's
//!   candidates; fail-closed on any downstream error.
//! - **Token table**: maps BSS referral tokens back to the artifacts they
//!   were issued for, so node reports can be resolved.
//! - **Option cache**: process-wide tunables refreshed in the background
//!   and read as immutable snapshots.

pub mod api;
pub mod clients;
pub mod clock;
pub mod config;
pub mod filters;
pub mod operators;
pub mod options;
pub mod tokens;
pub mod types;
pub mod xname;

// Re-export the types nearly every consumer touches.
pub use config::EngineConfig;
pub use options::{Options, OptionsCache};
pub use tokens::{BootArtifactRecord, TokenError, TokenTable};
pub use types::{
    Action, ActualState, BootArtifacts, Component, ComponentUpdate, DesiredState, LastAction,
    Phase, Session, Status, StatusSummary,
};
