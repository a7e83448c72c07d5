//! Hardware State Manager client.
//!
//! HSM is the authority on which nodes exist, whether they are enabled in
//! hardware, and whether they have reached Ready. The engine uses the
//! components query endpoint both for per-candidate checks and for the
//! discovery sweep over all nodes.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::clients::http::{ClientError, RetryingClient};
use crate::options::OptionsCache;

/// HSM state string for a node that has fully booted into readiness.
pub const STATE_READY: &str = "Ready";

#[derive(Serialize)]
struct ComponentsQuery<'a> {
    #[serde(rename = "ComponentIDs", skip_serializing_if = "Vec::is_empty")]
    component_ids: Vec<&'a str>,
    #[serde(rename = "Type", skip_serializing_if = "Vec::is_empty")]
    r#type: Vec<&'a str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    enabled: Vec<String>,
}

/// One node as HSM reports it.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct HsmComponent {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "Enabled", default)]
    pub enabled: bool,
    #[serde(rename = "State", default)]
    pub state: String,
}

impl HsmComponent {
    pub fn is_ready(&self) -> bool {
        self.state == STATE_READY
    }
}

#[derive(Deserialize)]
struct ComponentsResponse {
    #[serde(rename = "Components", default)]
    components: Vec<HsmComponent>,
}

pub struct HsmClient {
    http: RetryingClient,
    endpoint: String,
    options: Arc<OptionsCache>,
}

impl HsmClient {
    pub fn new(base: &str, options: Arc<OptionsCache>) -> Result<HsmClient, ClientError> {
        Ok(HsmClient {
            http: RetryingClient::new("hsm", false)?,
            endpoint: format!(
                "{}/hsm/v2/State/Components/Query",
                base.trim_end_matches('/')
            ),
            options,
        })
    }

    fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.options.snapshot().hsm_read_timeout)
    }

    async fn query(&self, payload: &ComponentsQuery<'_>) -> Result<Vec<HsmComponent>, ClientError> {
        let request = self.http.inner().post(&self.endpoint).json(payload);
        let response = self.http.send(request, self.read_timeout()).await?;
        let parsed: ComponentsResponse =
            response
                .json()
                .await
                .map_err(|source| ClientError::Decode {
                    service: "hsm",
                    source,
                })?;
        Ok(parsed.components)
    }

    /// State of the listed components, optionally restricted to an enabled
    /// value (HSM expects the filter as a list of strings).
    pub async fn query_components(
        &self,
        ids: &[String],
        enabled: Option<bool>,
    ) -> Result<Vec<HsmComponent>, ClientError> {
        let payload = ComponentsQuery {
            component_ids: ids.iter().map(String::as_str).collect(),
            r#type: Vec::new(),
            enabled: enabled.map(|value| vec![value.to_string()]).unwrap_or_default(),
        };
        let components = self.query(&payload).await?;
        debug!(requested = ids.len(), returned = components.len(), "HSM component query");
        Ok(components)
    }

    /// Every node xname HSM currently knows. Drives the discovery sweep.
    pub async fn read_all_node_xnames(&self) -> Result<HashSet<String>, ClientError> {
        let payload = ComponentsQuery {
            component_ids: Vec::new(),
            r#type: vec!["Node"],
            enabled: Vec::new(),
        };
        let components = self.query(&payload).await?;
        Ok(components.into_iter().map(|c| c.id).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_payload_shape() {
        let ids = vec!["x1c0s0b0n0".to_string()];
        let payload = ComponentsQuery {
            component_ids: ids.iter().map(String::as_str).collect(),
            r#type: Vec::new(),
            enabled: vec!["true".to_string()],
        };
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "ComponentIDs": ["x1c0s0b0n0"],
                "enabled": ["true"]
            })
        );
    }

    #[test]
    fn all_nodes_payload_uses_type_filter() {
        let payload = ComponentsQuery {
            component_ids: Vec::new(),
            r#type: vec!["Node"],
            enabled: Vec::new(),
        };
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value, serde_json::json!({"Type": ["Node"]}));
    }

    #[test]
    fn response_parses_hsm_field_names() {
        let raw = r#"{"Components": [
            {"ID": "x1c0s0b0n0", "Enabled": true, "State": "Ready"},
            {"ID": "x1c0s0b0n1", "Enabled": false, "State": "Off"}
        ]}"#;
        let parsed: ComponentsResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.components.len(), 2);
        assert!(parsed.components[0].is_ready());
        assert!(!parsed.components[1].enabled);
    }
}
