//! Component store endpoint.

use serde::Serialize;
use tracing::debug;

use super::STORE_READ_TIMEOUT;
use crate::clients::http::{ClientError, RetryingClient};
use crate::types::{Component, ComponentUpdate, Status};

/// Server-side predicates for the INITIAL candidate fetch. Everything an
/// operator can push down to the store instead of filtering locally.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ComponentQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
}

impl ComponentQuery {
    pub fn enabled(value: bool) -> ComponentQuery {
        ComponentQuery {
            enabled: Some(value),
            ..ComponentQuery::default()
        }
    }

    pub fn with_status(mut self, status: Status) -> ComponentQuery {
        self.status = Some(status);
        self
    }

    pub fn with_session(mut self, session: &str) -> ComponentQuery {
        self.session = Some(session.to_string());
        self
    }
}

pub struct ComponentsEndpoint<'a> {
    http: &'a RetryingClient,
    endpoint: String,
}

impl<'a> ComponentsEndpoint<'a> {
    pub(super) fn new(http: &'a RetryingClient, base: &str) -> Self {
        ComponentsEndpoint {
            http,
            endpoint: format!("{}/components", base),
        }
    }

    /// Fetch every component matching the query.
    pub async fn get_components(
        &self,
        query: &ComponentQuery,
    ) -> Result<Vec<Component>, ClientError> {
        let request = self.http.inner().get(&self.endpoint).query(query);
        let response = self.http.send(request, STORE_READ_TIMEOUT).await?;
        let components: Vec<Component> =
            response
                .json()
                .await
                .map_err(|source| ClientError::Decode {
                    service: "bos",
                    source,
                })?;
        debug!(count = components.len(), "Fetched components from store");
        Ok(components)
    }

    /// Create or replace full component records (discovery only).
    pub async fn put_components(&self, components: &[Component]) -> Result<(), ClientError> {
        let request = self.http.inner().put(&self.endpoint).json(components);
        self.http.send(request, STORE_READ_TIMEOUT).await?;
        Ok(())
    }

    /// Apply sparse patches to many components at once.
    pub async fn update_components(
        &self,
        updates: &[ComponentUpdate],
    ) -> Result<(), ClientError> {
        if updates.is_empty() {
            return Ok(());
        }
        let request = self.http.inner().patch(&self.endpoint).json(updates);
        self.http.send(request, STORE_READ_TIMEOUT).await?;
        debug!(count = updates.len(), "Patched components in store");
        Ok(())
    }

    /// Patch a single component record.
    pub async fn update_component(&self, update: &ComponentUpdate) -> Result<(), ClientError> {
        let request = self
            .http
            .inner()
            .patch(format!("{}/{}", self.endpoint, update.id))
            .json(update);
        self.http.send(request, STORE_READ_TIMEOUT).await?;
        Ok(())
    }
}
