//! Option store endpoint.

use super::STORE_READ_TIMEOUT;
use crate::clients::http::{ClientError, RetryingClient};
use crate::options::Options;

pub struct OptionsEndpoint<'a> {
    http: &'a RetryingClient,
    endpoint: String,
}

impl<'a> OptionsEndpoint<'a> {
    pub(super) fn new(http: &'a RetryingClient, base: &str) -> Self {
        OptionsEndpoint {
            http,
            endpoint: format!("{}/options", base),
        }
    }

    /// Fetch the single option record. Missing keys take their defaults;
    /// unknown keys are ignored.
    pub async fn get_options(&self) -> Result<Options, ClientError> {
        let request = self.http.inner().get(&self.endpoint);
        let response = self.http.send(request, STORE_READ_TIMEOUT).await?;
        response
            .json()
            .await
            .map_err(|source| ClientError::Decode {
                service: "bos",
                source,
            })
    }
}
