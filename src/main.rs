//! bos-engine — Boot Orchestration Service reconciliation engine.
//!
//! Hosts the full set of operator loops, the option refresher and the small
//! reporter-facing API in one process.
//!
//! # Usage
//!
//! ```bash
//! # Run against in-cluster service names
//! bos-engine
//!
//! # Run with an explicit config file and bind address
//! bos-engine --config ./bos_engine.toml --addr 127.0.0.1:9000
//! ```
//!
//! # Environment Variables
//!
//! - `BOS_ENGINE_CONFIG`: path to the TOML config file
//! - `RUST_LOG`: initial logging filter (overridden later by the
//!   `logging_level` option)

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{reload, EnvFilter};

use bos_engine::api::{self, ApiState};
use bos_engine::clients::bos::BosClient;
use bos_engine::clients::bss::BssClient;
use bos_engine::clients::cfs::CfsClient;
use bos_engine::clients::hsm::HsmClient;
use bos_engine::clients::pcs::PcsClient;
use bos_engine::operators::{
    ActualStateCleanupOperator, ConfigurationOperator, DisableOperator, DiscoveryOperator,
    EngineOperator, ForcefulPowerOffOperator, GracefulPowerOffOperator, Liveness,
    OperatorContext, PowerOnOperator, ReadyRecoveryOperator, SessionCleanupOperator,
    SessionCompletionOperator, SetStatusOperator,
};
use bos_engine::{EngineConfig, OptionsCache, TokenTable};

#[derive(Parser, Debug)]
#[command(name = "bos-engine")]
#[command(about = "Boot Orchestration Service reconciliation engine")]
#[command(version)]
struct CliArgs {
    /// Path to the engine config file (TOML)
    #[arg(long, env = "BOS_ENGINE_CONFIG")]
    config: Option<PathBuf>,

    /// Override the API bind address (default from config)
    #[arg(short, long)]
    addr: Option<String>,

    /// Override the data directory for the token table
    #[arg(long)]
    data_dir: Option<PathBuf>,
}

/// Map a stored logging level (`DEBUG|INFO|WARNING|ERROR`) onto a tracing
/// filter directive.
fn level_directive(level: &str) -> Option<&'static str> {
    match level.to_ascii_uppercase().as_str() {
        "DEBUG" => Some("debug"),
        "INFO" => Some("info"),
        "WARNING" => Some("warn"),
        "ERROR" => Some("error"),
        _ => None,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let (filter_layer, filter_handle) = reload::Layer::new(filter);
    tracing_subscriber::registry()
        .with(filter_layer)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config =
        EngineConfig::load(args.config.as_deref()).context("loading engine config")?;
    if let Some(addr) = args.addr {
        config.server_addr = addr;
    }
    if let Some(data_dir) = args.data_dir {
        config.data_dir = data_dir;
    }

    info!(
        bss = %config.bss_base,
        pcs = %config.pcs_base,
        hsm = %config.hsm_base,
        cfs = %config.cfs_base,
        bos = %config.bos_base,
        "Starting reconciliation engine"
    );

    // Token table lives in the engine's own database.
    std::fs::create_dir_all(&config.data_dir).context("creating data directory")?;
    let db = sled::open(config.data_dir.join("engine-db")).context("opening engine database")?;
    let tokens = Arc::new(TokenTable::open(&db).context("opening token table")?);

    // Shared option snapshot plus one client per collaborator.
    let options = Arc::new(OptionsCache::new());
    let store = Arc::new(BosClient::new(&config.bos_base)?);
    let bss = Arc::new(BssClient::new(&config.bss_base, options.clone())?);
    let pcs = Arc::new(PcsClient::new(&config.pcs_base, options.clone())?);
    let hsm = Arc::new(HsmClient::new(&config.hsm_base, options.clone())?);
    let cfs = Arc::new(CfsClient::new(&config.cfs_base, options.clone())?);

    let liveness = Arc::new(Liveness::new());
    let ctx = Arc::new(OperatorContext {
        store: store.clone(),
        options: options.clone(),
        liveness: liveness.clone(),
    });
    let cancel = CancellationToken::new();

    let mut tasks = JoinSet::new();

    // Option refresher, applying logging-level changes to the live filter.
    {
        let handle = filter_handle.clone();
        let apply = move |level: &str| match level_directive(level) {
            Some(directive) => {
                if let Err(err) = handle.reload(EnvFilter::new(directive)) {
                    warn!(error = %err, "Could not apply logging level");
                }
            }
            None => warn!(level = %level, "Ignoring unrecognized logging level"),
        };
        let refresher = options.clone().run(store.clone(), Some(Box::new(apply)), cancel.clone());
        tasks.spawn(refresher);
    }

    // One loop per state-machine edge, plus housekeeping.
    let operators: Vec<EngineOperator> = vec![
        EngineOperator::Filtered(Arc::new(PowerOnOperator::new(
            bss.clone(),
            pcs.clone(),
            hsm.clone(),
            cfs.clone(),
            store.clone(),
            tokens.clone(),
            options.clone(),
        ))),
        EngineOperator::Filtered(Arc::new(GracefulPowerOffOperator::new(
            pcs.clone(),
            hsm.clone(),
        ))),
        EngineOperator::Filtered(Arc::new(ForcefulPowerOffOperator::new(
            pcs.clone(),
            hsm.clone(),
        ))),
        EngineOperator::Filtered(Arc::new(ReadyRecoveryOperator::new(
            pcs.clone(),
            hsm.clone(),
        ))),
        EngineOperator::Filtered(Arc::new(ConfigurationOperator::new(cfs.clone()))),
        EngineOperator::Filtered(Arc::new(SetStatusOperator::new(cfs.clone()))),
        EngineOperator::Filtered(Arc::new(DisableOperator::new(pcs.clone()))),
        EngineOperator::Filtered(Arc::new(ActualStateCleanupOperator::new(
            store.clone(),
            options.clone(),
        ))),
        EngineOperator::Housekeeping(Arc::new(DiscoveryOperator::new(
            hsm.clone(),
            store.clone(),
        ))),
        EngineOperator::Housekeeping(Arc::new(SessionCompletionOperator::new(store.clone()))),
        EngineOperator::Housekeeping(Arc::new(SessionCleanupOperator::new(store.clone()))),
    ];
    for operator in operators {
        info!(operator = operator.name(), "Spawning operator");
        tasks.spawn(operator.run(ctx.clone(), cancel.clone()));
    }

    // Reporter endpoint + health.
    let app = api::router(ApiState {
        tokens: tokens.clone(),
        store: store.clone(),
        liveness: liveness.clone(),
    });
    let listener = tokio::net::TcpListener::bind(&config.server_addr)
        .await
        .with_context(|| format!("binding {}", config.server_addr))?;
    info!(addr = %config.server_addr, "API listening");
    {
        let cancel = cancel.clone();
        tasks.spawn(async move {
            let shutdown = async move { cancel.cancelled().await };
            if let Err(err) = axum::serve(listener, app)
                .with_graceful_shutdown(shutdown)
                .await
            {
                error!(error = %err, "API server exited with error");
            }
        });
    }

    // Run until interrupted, then stop every loop cooperatively.
    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("Shutdown signal received, stopping operators");
    cancel.cancel();

    while let Some(result) = tasks.join_next().await {
        if let Err(err) = result {
            error!(error = %err, "Task ended abnormally");
        }
    }
    info!("Engine stopped");
    Ok(())
}
