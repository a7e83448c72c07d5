//! Thin retrying HTTP clients for the engine's collaborators.
//!
//! One client per downstream service — BSS, PCS, HSM, CFS — plus the BOS
//! store client for components, sessions and options. All of them share the
//! retry/backoff behavior in [`http`]: connect timeout of 3 seconds,
//! per-call read timeouts taken from options, exponential backoff on
//! transient status codes and connection failures.

pub mod bos;
pub mod bss;
pub mod cfs;
pub mod hsm;
pub mod http;
pub mod pcs;

pub use http::ClientError;
