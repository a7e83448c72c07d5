//! Session store endpoint.

use serde::Serialize;
use tracing::info;

use super::STORE_READ_TIMEOUT;
use crate::clients::http::{ClientError, RetryingClient};
use crate::types::Session;

#[derive(Serialize)]
struct CompletePatch {
    complete: bool,
}

pub struct SessionsEndpoint<'a> {
    http: &'a RetryingClient,
    endpoint: String,
}

impl<'a> SessionsEndpoint<'a> {
    pub(super) fn new(http: &'a RetryingClient, base: &str) -> Self {
        SessionsEndpoint {
            http,
            endpoint: format!("{}/sessions", base),
        }
    }

    /// List sessions, optionally restricted by completion state.
    pub async fn get_sessions(
        &self,
        complete: Option<bool>,
    ) -> Result<Vec<Session>, ClientError> {
        let mut request = self.http.inner().get(&self.endpoint);
        if let Some(value) = complete {
            request = request.query(&[("complete", value.to_string())]);
        }
        let response = self.http.send(request, STORE_READ_TIMEOUT).await?;
        response
            .json()
            .await
            .map_err(|source| ClientError::Decode {
                service: "bos",
                source,
            })
    }

    /// Mark one session complete.
    pub async fn mark_complete(&self, name: &str) -> Result<(), ClientError> {
        let request = self
            .http
            .inner()
            .patch(format!("{}/{}", self.endpoint, name))
            .json(&CompletePatch { complete: true });
        self.http.send(request, STORE_READ_TIMEOUT).await?;
        info!(session = %name, "Session is complete");
        Ok(())
    }

    /// Ask the store to delete sessions matching a status older than
    /// `min_age` (duration string, e.g. `"24h"`).
    pub async fn delete_sessions(&self, status: &str, min_age: &str) -> Result<(), ClientError> {
        let request = self
            .http
            .inner()
            .delete(&self.endpoint)
            .query(&[("status", status), ("min_age", min_age)]);
        self.http.send(request, STORE_READ_TIMEOUT).await?;
        info!(status = %status, min_age = %min_age, "Requested session cleanup");
        Ok(())
    }
}
