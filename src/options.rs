//! Runtime-tunable options.
//!
//! One well-known record in the option store holds every tunable the engine
//! consumes: client read timeouts, TTLs, loop frequencies, batch sizes and
//! the logging level. A single background refresher polls the store and
//! publishes each new value set as an immutable snapshot through an
//! [`ArcSwap`]; operator loops take a snapshot at the top of every tick and
//! never see a half-updated set.
//!
//! If the option store is unreachable the engine keeps running on compiled
//! defaults; the refresher retries every second until its first successful
//! fetch, then settles to its normal cadence.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::clients::bos::BosClient;
use crate::clock;

/// Cadence of the option refresher once the store has answered.
const REFRESH_INTERVAL: Duration = Duration::from_secs(5);

/// Retry interval while waiting for the store's first answer.
const STARTUP_RETRY_INTERVAL: Duration = Duration::from_secs(1);

fn default_read_timeout() -> u64 {
    10
}

/// The tunable option set with its compiled defaults.
///
/// Unknown keys in the stored record are ignored; missing keys fall back to
/// the defaults, so a partially populated store is never fatal.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct Options {
    #[serde(deserialize_with = "lenient_u64", default = "default_read_timeout")]
    pub bss_read_timeout: u64,
    #[serde(deserialize_with = "lenient_u64", default = "default_read_timeout")]
    pub cfs_read_timeout: u64,
    #[serde(deserialize_with = "lenient_u64", default = "default_read_timeout")]
    pub hsm_read_timeout: u64,
    #[serde(deserialize_with = "lenient_u64", default = "default_read_timeout")]
    pub pcs_read_timeout: u64,
    /// Duration string; a zero value (`"0"`, `"0s"`, ...) disables session
    /// cleanup entirely.
    pub cleanup_completed_session_ttl: String,
    /// Duration string; how long a reported actual state stays trusted.
    pub component_actual_state_ttl: String,
    #[serde(deserialize_with = "lenient_u64")]
    pub discovery_frequency: u64,
    #[serde(deserialize_with = "lenient_u64")]
    pub polling_frequency: u64,
    /// How long the power-on operator waits before re-driving a component
    /// whose last action was already power-on.
    #[serde(deserialize_with = "lenient_u64")]
    pub max_component_wait_time: u64,
    #[serde(deserialize_with = "lenient_u64")]
    pub max_boot_wait_time: u64,
    #[serde(deserialize_with = "lenient_u64")]
    pub max_power_on_wait_time: u64,
    #[serde(deserialize_with = "lenient_u64")]
    pub max_power_off_wait_time: u64,
    pub logging_level: String,
    #[serde(deserialize_with = "lenient_usize")]
    pub max_component_batch_size: usize,
    pub disable_components_on_completion: bool,
    pub clear_stage: bool,
    #[serde(deserialize_with = "lenient_u64")]
    pub default_retry_policy: u64,
    pub session_limit_required: bool,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            bss_read_timeout: 10,
            cfs_read_timeout: 10,
            hsm_read_timeout: 10,
            pcs_read_timeout: 10,
            cleanup_completed_session_ttl: "7d".to_string(),
            component_actual_state_ttl: "4h".to_string(),
            discovery_frequency: 300,
            polling_frequency: 15,
            max_component_wait_time: 300,
            max_boot_wait_time: 1200,
            max_power_on_wait_time: 120,
            max_power_off_wait_time: 300,
            logging_level: "INFO".to_string(),
            max_component_batch_size: 2800,
            disable_components_on_completion: true,
            clear_stage: false,
            default_retry_policy: 3,
            session_limit_required: false,
        }
    }
}

impl Options {
    /// TTL for trusted actual state. Falls back to the default on an
    /// unparsable stored value rather than treating every state as expired.
    pub fn actual_state_ttl(&self) -> Duration {
        clock::parse_duration(&self.component_actual_state_ttl).unwrap_or_else(|_| {
            warn!(
                value = %self.component_actual_state_ttl,
                "Unparsable component_actual_state_ttl, using default"
            );
            Duration::from_secs(4 * 3600)
        })
    }

    /// Minimum age of complete sessions before cleanup, or `None` when the
    /// operator is disabled (any zero-valued duration).
    pub fn session_cleanup_ttl(&self) -> Option<Duration> {
        let digits: String = self
            .cleanup_completed_session_ttl
            .chars()
            .filter(|c| c.is_ascii_digit())
            .collect();
        if digits.parse::<u64>().map(|v| v == 0).unwrap_or(true) {
            return None;
        }
        clock::parse_duration(&self.cleanup_completed_session_ttl).ok()
    }
}

/// Numeric options may be stored as numbers or numeric strings depending on
/// which client wrote them; accept both.
fn lenient_u64<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u64),
        Text(String),
    }
    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

fn lenient_usize<'de, D>(deserializer: D) -> Result<usize, D::Error>
where
    D: serde::Deserializer<'de>,
{
    lenient_u64(deserializer).map(|v| v as usize)
}

/// Callback applied when the stored logging level changes.
pub type LogLevelFn = Box<dyn Fn(&str) + Send + Sync>;

/// Process-wide option snapshot holder.
pub struct OptionsCache {
    current: ArcSwap<Options>,
}

impl OptionsCache {
    pub fn new() -> OptionsCache {
        OptionsCache {
            current: ArcSwap::from_pointee(Options::default()),
        }
    }

    /// The current snapshot. Cheap; safe to call from every tick.
    pub fn snapshot(&self) -> Arc<Options> {
        self.current.load_full()
    }

    /// Fetch the stored options and publish a new snapshot. Returns whether
    /// the fetch succeeded; on failure the previous snapshot stays current.
    pub async fn refresh(&self, store: &BosClient) -> bool {
        match store.options().get_options().await {
            Ok(fetched) => {
                let previous = self.snapshot();
                if *previous != fetched {
                    debug!("Options changed, publishing new snapshot");
                    self.current.store(Arc::new(fetched));
                }
                true
            }
            Err(err) => {
                warn!(error = %err, "Could not refresh options, keeping current snapshot");
                false
            }
        }
    }

    /// Run the refresher loop (call from `tokio::spawn`). Retries every
    /// second until the store answers once, then polls every five seconds.
    /// Applies `on_logging_level` whenever the stored level changes.
    pub async fn run(
        self: Arc<Self>,
        store: Arc<BosClient>,
        on_logging_level: Option<LogLevelFn>,
        cancel: CancellationToken,
    ) {
        info!(
            interval_secs = REFRESH_INTERVAL.as_secs(),
            "Option refresher started"
        );
        let mut fetched_once = false;
        let mut applied_level = self.snapshot().logging_level.clone();

        loop {
            let ok = self.refresh(store.as_ref()).await;
            if ok && !fetched_once {
                fetched_once = true;
                info!("First option fetch succeeded, leaving startup retry cadence");
            }

            if let Some(apply) = on_logging_level.as_ref() {
                let level = self.snapshot().logging_level.clone();
                if level != applied_level {
                    info!(from = %applied_level, to = %level, "Applying new logging level");
                    apply(&level);
                    applied_level = level;
                }
            }

            let sleep = if fetched_once {
                REFRESH_INTERVAL
            } else {
                STARTUP_RETRY_INTERVAL
            };
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Option refresher stopping");
                    return;
                }
                _ = tokio::time::sleep(sleep) => {}
            }
        }
    }
}

impl Default for OptionsCache {
    fn default() -> Self {
        Self::new()
    }
}
