//! BOS store client.
//!
//! The component store is the single source of truth; operators read their
//! candidates from it and write sparse patches back. Session and option
//! records live behind the same API. One pooled client is shared by the
//! three endpoint handles.

mod components;
mod options;
mod sessions;

pub use components::{ComponentQuery, ComponentsEndpoint};
pub use options::OptionsEndpoint;
pub use sessions::SessionsEndpoint;

use std::time::Duration;

use crate::clients::http::{ClientError, RetryingClient};

/// Read timeout for store calls. The store is engine-local infrastructure,
/// not one of the tunable downstream services.
pub(crate) const STORE_READ_TIMEOUT: Duration = Duration::from_secs(10);

pub struct BosClient {
    http: RetryingClient,
    base: String,
}

impl BosClient {
    pub fn new(base: &str) -> Result<BosClient, ClientError> {
        Ok(BosClient {
            http: RetryingClient::new("bos", false)?,
            base: format!("{}/v2", base.trim_end_matches('/')),
        })
    }

    pub fn components(&self) -> ComponentsEndpoint<'_> {
        ComponentsEndpoint::new(&self.http, &self.base)
    }

    pub fn sessions(&self) -> SessionsEndpoint<'_> {
        SessionsEndpoint::new(&self.http, &self.base)
    }

    pub fn options(&self) -> OptionsEndpoint<'_> {
        OptionsEndpoint::new(&self.http, &self.base)
    }
}
