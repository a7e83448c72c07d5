//! Configuration Framework Service client.
//!
//! CFS owns post-boot configuration. The engine reads per-component desired
//! configuration to decide whether a patch is needed, and patches desired
//! configuration in chunks of at most 1000 components per request.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::clients::http::{ClientError, RetryingClient};
use crate::options::OptionsCache;
use crate::types::Component;

/// CFS accepts at most this many components per PATCH.
pub const PATCH_BATCH_SIZE: usize = 1000;

/// CFS configuration status for a fully configured component.
pub const STATUS_CONFIGURED: &str = "configured";

/// One component as CFS reports it.
#[derive(Debug, Clone, Deserialize, PartialEq, Default)]
pub struct CfsComponent {
    pub id: String,
    #[serde(default)]
    pub enabled: bool,
    #[serde(rename = "desiredConfig", default)]
    pub desired_config: String,
    #[serde(rename = "configurationStatus", default)]
    pub configuration_status: String,
}

impl CfsComponent {
    pub fn is_configured(&self) -> bool {
        self.configuration_status == STATUS_CONFIGURED
    }
}

#[derive(Serialize)]
struct CfsPatch<'a> {
    id: &'a str,
    enabled: bool,
    #[serde(rename = "desiredConfig")]
    desired_config: &'a str,
    tags: HashMap<&'a str, &'a str>,
}

pub struct CfsClient {
    http: RetryingClient,
    endpoint: String,
    options: Arc<OptionsCache>,
}

impl CfsClient {
    pub fn new(base: &str, options: Arc<OptionsCache>) -> Result<CfsClient, ClientError> {
        Ok(CfsClient {
            http: RetryingClient::new("cfs", false)?,
            endpoint: format!("{}/v2/components", base.trim_end_matches('/')),
            options,
        })
    }

    fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.options.snapshot().cfs_read_timeout)
    }

    /// Current CFS state for the given ids, keyed by id. Ids CFS does not
    /// know are simply absent.
    pub async fn get_components(
        &self,
        ids: &[String],
    ) -> Result<HashMap<String, CfsComponent>, ClientError> {
        let mut found = HashMap::with_capacity(ids.len());
        // The ids filter is a comma-separated list; chunk it so the query
        // string stays bounded on large candidate sets.
        for chunk in ids.chunks(PATCH_BATCH_SIZE) {
            let request = self
                .http
                .inner()
                .get(&self.endpoint)
                .query(&[("ids", chunk.join(","))]);
            let response = self.http.send(request, self.read_timeout()).await?;
            let components: Vec<CfsComponent> =
                response
                    .json()
                    .await
                    .map_err(|source| ClientError::Decode {
                        service: "cfs",
                        source,
                    })?;
            for component in components {
                found.insert(component.id.clone(), component);
            }
        }
        debug!(requested = ids.len(), returned = found.len(), "CFS component query");
        Ok(found)
    }

    /// Set each component's desired configuration in CFS, tagging the patch
    /// with the driving session. Chunked at [`PATCH_BATCH_SIZE`].
    pub async fn set_desired_config(
        &self,
        components: &[Component],
        enabled: bool,
    ) -> Result<(), ClientError> {
        for chunk in components.chunks(PATCH_BATCH_SIZE) {
            let payload: Vec<CfsPatch<'_>> = chunk
                .iter()
                .map(|component| {
                    let mut tags = HashMap::new();
                    if !component.session.is_empty() {
                        tags.insert("bos_session", component.session.as_str());
                    }
                    CfsPatch {
                        id: &component.id,
                        enabled,
                        desired_config: &component.desired_state.configuration,
                        tags,
                    }
                })
                .collect();
            let request = self.http.inner().patch(&self.endpoint).json(&payload);
            self.http.send(request, self.read_timeout()).await?;
            info!(components = chunk.len(), "CFS desired configuration patched");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DesiredState;

    #[test]
    fn patch_payload_shape() {
        let component = Component {
            id: "x1c0s0b0n0".to_string(),
            session: "session-1".to_string(),
            desired_state: DesiredState {
                configuration: "compute-config".to_string(),
                ..DesiredState::default()
            },
            ..Component::default()
        };
        let mut tags = HashMap::new();
        tags.insert("bos_session", component.session.as_str());
        let patch = CfsPatch {
            id: &component.id,
            enabled: true,
            desired_config: &component.desired_state.configuration,
            tags,
        };
        let value = serde_json::to_value(&patch).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "id": "x1c0s0b0n0",
                "enabled": true,
                "desiredConfig": "compute-config",
                "tags": {"bos_session": "session-1"}
            })
        );
    }

    #[test]
    fn cfs_component_parses_wire_names() {
        let raw = r#"{"id": "x1c0s0b0n0", "enabled": true,
                      "desiredConfig": "compute-config",
                      "configurationStatus": "configured"}"#;
        let component: CfsComponent = serde_json::from_str(raw).unwrap();
        assert_eq!(component.desired_config, "compute-config");
        assert!(component.is_configured());
    }
}
