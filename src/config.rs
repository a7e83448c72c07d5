//! Static engine configuration.
//!
//! Service locations and local paths that do not change while the process
//! runs. Everything tunable at runtime lives in the option store instead
//! (see [`crate::options`]). Loading order:
//!
//! 1. Path given on the command line
//! 2. `BOS_ENGINE_CONFIG` environment variable
//! 3. `bos_engine.toml` in the working directory
//! 4. Built-in defaults (in-cluster service names)

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("cannot parse config file {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
}

/// Where the engine finds its collaborators and keeps its state.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Boot Script Service base URL.
    pub bss_base: String,
    /// Power Control Service base URL.
    pub pcs_base: String,
    /// Hardware State Manager base URL.
    pub hsm_base: String,
    /// Configuration Framework Service base URL.
    pub cfs_base: String,
    /// Component / session / option store (BOS API) base URL.
    pub bos_base: String,
    /// Bind address for the reporter endpoint and health checks.
    pub server_addr: String,
    /// Directory for the token table database.
    pub data_dir: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            bss_base: "http://cray-bss".to_string(),
            pcs_base: "http://cray-power-control".to_string(),
            hsm_base: "http://cray-smd".to_string(),
            cfs_base: "http://cray-cfs-api".to_string(),
            bos_base: "http://cray-bos".to_string(),
            server_addr: "0.0.0.0:9000".to_string(),
            data_dir: PathBuf::from("./data"),
        }
    }
}

impl EngineConfig {
    /// Load configuration, falling back through env var and working
    /// directory to defaults. A missing file is fine; an unreadable or
    /// unparsable file is not.
    pub fn load(explicit: Option<&Path>) -> Result<EngineConfig, ConfigError> {
        let candidate = explicit
            .map(PathBuf::from)
            .or_else(|| std::env::var("BOS_ENGINE_CONFIG").ok().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from("bos_engine.toml"));

        if !candidate.exists() {
            if explicit.is_some() {
                return Err(ConfigError::Io {
                    path: candidate.display().to_string(),
                    source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
                });
            }
            info!("No config file found, using built-in service locations");
            return Ok(EngineConfig::default());
        }

        let raw = std::fs::read_to_string(&candidate).map_err(|source| ConfigError::Io {
            path: candidate.display().to_string(),
            source,
        })?;
        let config: EngineConfig = toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: candidate.display().to_string(),
            source,
        })?;
        info!(path = %candidate.display(), "Loaded engine config");
        Ok(config)
    }
}
