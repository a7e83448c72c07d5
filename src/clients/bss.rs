//! Boot Script Service client.
//!
//! One call matters to the engine: telling BSS which boot artifacts belong
//! to which hosts. BSS answers with a `bss-referral-token` header naming
//! the staged combination; nodes echo that token when they report what they
//! actually booted.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info};

use crate::clients::http::{ClientError, RetryingClient};
use crate::options::OptionsCache;

const REFERRAL_TOKEN_HEADER: &str = "bss-referral-token";

#[derive(Serialize)]
struct BootParametersPut<'a> {
    hosts: Vec<&'a str>,
    params: &'a str,
    kernel: &'a str,
    initrd: &'a str,
}

pub struct BssClient {
    http: RetryingClient,
    endpoint: String,
    options: Arc<OptionsCache>,
}

impl BssClient {
    pub fn new(base: &str, options: Arc<OptionsCache>) -> Result<BssClient, ClientError> {
        // BSS serves cluster-internal certificates; verification stays off.
        let http = RetryingClient::new("bss", true)?;
        Ok(BssClient {
            http,
            endpoint: format!("{}/boot/v1/bootparameters", base.trim_end_matches('/')),
            options,
        })
    }

    fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.options.snapshot().bss_read_timeout)
    }

    /// Stage an artifact tuple for a set of hosts and return the referral
    /// token BSS issued for it.
    ///
    /// Calling this with no hosts is a programming error in the caller, not
    /// a condition to tolerate: BSS would mint a token describing nothing.
    pub async fn set_boot_parameters(
        &self,
        hosts: &BTreeSet<String>,
        kernel_parameters: &str,
        kernel: &str,
        initrd: &str,
    ) -> Result<String, ClientError> {
        if hosts.is_empty() {
            return Err(ClientError::EmptyHostSet);
        }

        debug!(hosts = hosts.len(), params = kernel_parameters, "Staging boot parameters");
        let payload = BootParametersPut {
            hosts: hosts.iter().map(String::as_str).collect(),
            params: kernel_parameters,
            kernel,
            initrd,
        };
        let request = self.http.inner().put(&self.endpoint).json(&payload);
        let response = self.http.send(request, self.read_timeout()).await?;

        let token = response
            .headers()
            .get(REFERRAL_TOKEN_HEADER)
            .and_then(|value| value.to_str().ok())
            .ok_or(ClientError::MissingHeader {
                service: "bss",
                header: REFERRAL_TOKEN_HEADER,
            })?
            .to_string();
        info!(hosts = hosts.len(), token = %token, "BSS accepted boot parameters");
        Ok(token)
    }
}
