//! Cableward - SNMP-driven firmware upgrade orchestration for DOCSIS fleets
//!
//! This is the main entry point for the `cableward` binary.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cw_config::AppConfig;
use cw_engine::{Engine, EngineConfig, FileOverrides, UdpConnector};
use cw_store::Store;
use cw_web::WebServer;

#[derive(Parser)]
#[command(
    name = "cableward",
    version,
    about = "Firmware upgrade orchestration for DOCSIS cable modem fleets"
)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the control plane: schedulers, worker pool, and management API
    Serve {
        /// Config file path (default: discover from standard paths)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Database path override
        #[arg(long)]
        db: Option<PathBuf>,
    },

    /// Configuration helpers
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print a commented default configuration
    Generate,

    /// Parse and validate a configuration file
    Validate { path: PathBuf },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = if cli.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    match cli.command {
        Command::Serve { config, db } => serve(config, db).await,
        Command::Config { action } => match action {
            ConfigAction::Generate => {
                print!("{}", AppConfig::generate_default_toml());
                Ok(())
            }
            ConfigAction::Validate { path } => {
                AppConfig::load(&path)
                    .with_context(|| format!("config at {} is invalid", path.display()))?;
                println!("{} OK", path.display());
                Ok(())
            }
        },
    }
}

async fn serve(config_path: Option<PathBuf>, db_override: Option<PathBuf>) -> Result<()> {
    let mut config = match config_path {
        Some(path) => AppConfig::load_with_env(&path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => AppConfig::discover_with_env().context("failed to load configuration")?,
    };
    if let Some(db) = db_override {
        config.global.db_path = db;
    }

    let store = Store::open(&config.global.db_path).with_context(|| {
        format!(
            "failed to open database at {}",
            config.global.db_path.display()
        )
    })?;

    let overrides = FileOverrides {
        workers: config.engine.workers,
        poll_interval_secs: config.engine.poll_interval_secs,
        discovery_interval_secs: config.engine.discovery_interval_secs,
        evaluation_interval_secs: config.engine.evaluation_interval_secs,
        job_timeout_secs: config.engine.job_timeout_secs,
        retry_attempts: config.engine.retry_attempts,
        signal_level_min: config.engine.signal_level_min,
        signal_level_max: config.engine.signal_level_max,
        max_upgrades_per_cmts: config.engine.max_upgrades_per_cmts,
    };
    let engine_config = EngineConfig::resolve(&overrides, &store);

    let cancel = CancellationToken::new();
    let engine = Engine::new(
        store.clone(),
        Arc::new(UdpConnector),
        engine_config,
        cancel.clone(),
    );
    let web = WebServer::new(
        store.clone(),
        Arc::clone(&engine),
        config.web.clone(),
        cancel.clone(),
    );

    let engine_task = tokio::spawn(Arc::clone(&engine).run());
    let mut web_task = tokio::spawn(async move { web.run().await });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
        }
        result = &mut web_task => {
            result.context("web server task failed")??;
        }
    }

    cancel.cancel();
    engine_task.await.context("engine task failed")?;
    web_task.abort();

    Ok(())
}
