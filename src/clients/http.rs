//! Shared retrying request machinery.
//!
//! Every downstream call goes through [`RetryingClient::send`]: up to ten
//! attempts, exponential backoff with a base factor of 0.5 seconds, retry
//! on 500/502/503/504 and on connect/timeout failures. Anything else is
//! returned to the caller immediately — a 404 from the store is an answer,
//! not an outage.

use std::time::Duration;

use reqwest::{RequestBuilder, Response, StatusCode};
use thiserror::Error;
use tracing::{debug, warn};

/// Connect timeout for every downstream client.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// Maximum attempts per logical request.
pub const RETRY_ATTEMPTS: u32 = 10;

/// Base backoff factor in seconds; attempt n sleeps `0.5 * 2^(n-1)`.
pub const BACKOFF_FACTOR: f64 = 0.5;

/// Ceiling on a single backoff sleep.
const BACKOFF_CAP: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("{service}: {source}")]
    Http {
        service: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("{service} returned status {status}")]
    Status {
        service: &'static str,
        status: StatusCode,
    },
    #[error("{service} still failing after {attempts} attempts")]
    RetriesExhausted {
        service: &'static str,
        attempts: u32,
    },
    #[error("{service} response missing header {header}")]
    MissingHeader {
        service: &'static str,
        header: &'static str,
    },
    #[error("{service} response body could not be decoded: {source}")]
    Decode {
        service: &'static str,
        #[source]
        source: reqwest::Error,
    },
    /// Programming error in an operator: BSS must never be driven with an
    /// empty host set.
    #[error("boot parameter staging invoked with an empty host set")]
    EmptyHostSet,
}

impl ClientError {
    /// Whether the failure is worth another tick (as opposed to a bug).
    pub fn is_transient(&self) -> bool {
        !matches!(self, ClientError::EmptyHostSet)
    }
}

fn retryable_status(status: StatusCode) -> bool {
    matches!(status.as_u16(), 500 | 502 | 503 | 504)
}

fn backoff_delay(attempt: u32) -> Duration {
    let secs = BACKOFF_FACTOR * f64::from(1u32 << attempt.min(16));
    Duration::from_secs_f64(secs).min(BACKOFF_CAP)
}

/// A pooled reqwest client tagged with the service it talks to.
#[derive(Clone)]
pub struct RetryingClient {
    http: reqwest::Client,
    service: &'static str,
}

impl RetryingClient {
    /// Build the pooled client. `accept_invalid_certs` is set only for BSS,
    /// which runs with cluster-internal certificates.
    pub fn new(service: &'static str, accept_invalid_certs: bool) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .danger_accept_invalid_certs(accept_invalid_certs)
            .build()
            .map_err(|source| ClientError::Http { service, source })?;
        Ok(RetryingClient { http, service })
    }

    pub fn service(&self) -> &'static str {
        self.service
    }

    /// Access to the underlying pool for request building.
    pub fn inner(&self) -> &reqwest::Client {
        &self.http
    }

    /// Send with retries. The builder must be cloneable (JSON bodies are);
    /// `read_timeout` bounds each individual attempt.
    pub async fn send(
        &self,
        request: RequestBuilder,
        read_timeout: Duration,
    ) -> Result<Response, ClientError> {
        let request = request.timeout(read_timeout);
        let mut last_status: Option<StatusCode> = None;

        for attempt in 0..RETRY_ATTEMPTS {
            if attempt > 0 {
                let delay = backoff_delay(attempt - 1);
                debug!(
                    service = self.service,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Retrying request"
                );
                tokio::time::sleep(delay).await;
            }

            let cloned = match request.try_clone() {
                Some(r) => r,
                None => {
                    // Streaming bodies cannot be retried; send the original once.
                    let response =
                        request.send().await.map_err(|source| ClientError::Http {
                            service: self.service,
                            source,
                        })?;
                    if response.status().is_success() {
                        return Ok(response);
                    }
                    return Err(ClientError::Status {
                        service: self.service,
                        status: response.status(),
                    });
                }
            };

            match cloned.send().await {
                Ok(response) if retryable_status(response.status()) => {
                    warn!(
                        service = self.service,
                        status = %response.status(),
                        attempt,
                        "Transient status from downstream"
                    );
                    last_status = Some(response.status());
                }
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response) => {
                    return Err(ClientError::Status {
                        service: self.service,
                        status: response.status(),
                    })
                }
                Err(err) if err.is_connect() || err.is_timeout() => {
                    warn!(service = self.service, error = %err, attempt, "Connection failure");
                    last_status = None;
                }
                Err(source) => {
                    return Err(ClientError::Http {
                        service: self.service,
                        source,
                    })
                }
            }
        }

        if let Some(status) = last_status {
            warn!(service = self.service, status = %status, "Giving up after retries");
        }
        Err(ClientError::RetriesExhausted {
            service: self.service,
            attempts: RETRY_ATTEMPTS,
        })
    }

}
