//! Power Control Service client.
//!
//! The engine submits power transitions and reads observed power state.
//! Transition ids are not tracked synchronously; the next operator tick
//! re-reads `/power-status` and acts on what PCS reports.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::clients::http::{ClientError, RetryingClient};
use crate::options::OptionsCache;

/// The transition operations PCS accepts.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PowerOperation {
    On,
    Off,
    #[serde(rename = "Soft-Off")]
    SoftOff,
    #[serde(rename = "Soft-Restart")]
    SoftRestart,
    #[serde(rename = "Hard-Restart")]
    HardRestart,
    Init,
    #[serde(rename = "Force-Off")]
    ForceOff,
}

impl std::fmt::Display for PowerOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PowerOperation::On => "On",
            PowerOperation::Off => "Off",
            PowerOperation::SoftOff => "Soft-Off",
            PowerOperation::SoftRestart => "Soft-Restart",
            PowerOperation::HardRestart => "Hard-Restart",
            PowerOperation::Init => "Init",
            PowerOperation::ForceOff => "Force-Off",
        };
        write!(f, "{}", name)
    }
}

/// Observed power state of one xname.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PowerState {
    On,
    Off,
    #[default]
    Undefined,
}

#[derive(Serialize)]
struct ReservedLocation<'a> {
    xname: &'a str,
}

#[derive(Serialize)]
struct TransitionCreate<'a> {
    operation: PowerOperation,
    location: Vec<ReservedLocation<'a>>,
    #[serde(rename = "taskDeadlineMinutes", skip_serializing_if = "Option::is_none")]
    task_deadline_minutes: Option<i64>,
}

/// PCS's answer to a transition request.
#[derive(Debug, Clone, Deserialize)]
pub struct TransitionStartOutput {
    #[serde(rename = "transitionID", default)]
    pub transition_id: String,
    #[serde(default)]
    pub operation: String,
}

#[derive(Deserialize)]
struct PowerStatusEntry {
    #[serde(default)]
    xname: String,
    #[serde(rename = "powerState", default)]
    power_state: PowerState,
}

#[derive(Deserialize)]
struct PowerStatusAll {
    #[serde(default)]
    status: Vec<PowerStatusEntry>,
}

pub struct PcsClient {
    http: RetryingClient,
    base: String,
    options: Arc<OptionsCache>,
}

impl PcsClient {
    pub fn new(base: &str, options: Arc<OptionsCache>) -> Result<PcsClient, ClientError> {
        Ok(PcsClient {
            http: RetryingClient::new("pcs", false)?,
            base: base.trim_end_matches('/').to_string(),
            options,
        })
    }

    fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.options.snapshot().pcs_read_timeout)
    }

    /// Submit one transition covering all the given xnames. The returned
    /// transition id is logged, not awaited.
    pub async fn transition(
        &self,
        operation: PowerOperation,
        xnames: &[String],
    ) -> Result<TransitionStartOutput, ClientError> {
        let payload = TransitionCreate {
            operation,
            location: xnames
                .iter()
                .map(|xname| ReservedLocation { xname })
                .collect(),
            task_deadline_minutes: None,
        };
        let request = self
            .http
            .inner()
            .post(format!("{}/transitions", self.base))
            .json(&payload);
        let response = self.http.send(request, self.read_timeout()).await?;
        let output: TransitionStartOutput =
            response
                .json()
                .await
                .map_err(|source| ClientError::Decode {
                    service: "pcs",
                    source,
                })?;
        info!(
            operation = %operation,
            xnames = xnames.len(),
            transition_id = %output.transition_id,
            "PCS transition submitted"
        );
        Ok(output)
    }

    /// Observed power state for each requested xname. Xnames PCS does not
    /// answer for are absent from the map (treated as `undefined` upstream).
    pub async fn power_status(
        &self,
        xnames: &[String],
    ) -> Result<HashMap<String, PowerState>, ClientError> {
        let query: Vec<(&str, &str)> = xnames
            .iter()
            .map(|xname| ("xname", xname.as_str()))
            .collect();
        let request = self
            .http
            .inner()
            .get(format!("{}/power-status", self.base))
            .query(&query);
        let response = self.http.send(request, self.read_timeout()).await?;
        let all: PowerStatusAll = response
            .json()
            .await
            .map_err(|source| ClientError::Decode {
                service: "pcs",
                source,
            })?;
        debug!(entries = all.status.len(), "PCS power status fetched");
        Ok(all
            .status
            .into_iter()
            .map(|entry| (entry.xname, entry.power_state))
            .collect())
    }
}
