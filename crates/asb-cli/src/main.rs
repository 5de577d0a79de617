// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
//! The `asb` binary: run the coordination hub, tick it once, or check a
//! configuration.

use anyhow::{Context, Result};
use asb_config::{HubConfig, load_config, validate_config};
use asb_hub::{Hub, recovery};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Exit code for runtime errors.
const EXIT_RUNTIME_ERROR: i32 = 1;

#[derive(Parser, Debug)]
#[command(name = "asb", version, about = "Agent Switchboard — coordination hub for AI coding agents")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to a TOML configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Hub working tree root (overrides the config file).
    #[arg(long, global = true)]
    hub_dir: Option<PathBuf>,

    /// Façade port (overrides the config file).
    #[arg(long, global = true)]
    port: Option<u16>,

    /// Per-request timeout in seconds (overrides the config file).
    #[arg(long, global = true)]
    timeout: Option<u64>,

    /// Agent command for local executions (overrides the config file).
    #[arg(long, global = true)]
    agent_cmd: Option<String>,

    /// Enable debug logging.
    #[arg(long, global = true)]
    debug: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the hub until interrupted.
    Run,

    /// Run exactly one scheduler tick, wait for workers, and exit.
    Tick,

    /// Validate the configuration and exit.
    Check,
}

fn resolve_config(cli: &Cli) -> Result<HubConfig> {
    let mut config = load_config(cli.config.as_deref()).context("load configuration")?;

    if let Some(dir) = &cli.hub_dir {
        config.hub_dir = dir.clone();
    }
    if let Some(port) = cli.port {
        config.port = Some(port);
    }
    if let Some(timeout) = cli.timeout {
        config.dispatcher.request_timeout = timeout;
    }
    if let Some(agent_cmd) = &cli.agent_cmd {
        config.agent_cmd = agent_cmd.clone();
    }
    if cli.debug {
        config.dispatcher.debug = true;
        config.log_level = Some("debug".into());
    }

    Ok(config)
}

fn init_tracing(config: &HubConfig) {
    let level = config.log_level.as_deref().unwrap_or("info");
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn run(cli: Cli) -> Result<()> {
    let config = resolve_config(&cli)?;
    init_tracing(&config);

    match cli.command {
        Commands::Check => {
            let warnings = validate_config(&config).context("validate configuration")?;
            for warning in &warnings {
                println!("warning: {warning}");
            }
            println!("configuration ok");
            Ok(())
        }
        Commands::Tick => {
            let hub = Hub::new(config).context("construct hub")?;
            let recovered = recovery::recover(hub.shared()).await;
            if recovered > 0 {
                println!("recovered {recovered} in-progress request(s)");
            }
            let processed = hub.tick_now().await;
            hub.drain().await;
            println!("processed {processed} request(s)");
            Ok(())
        }
        Commands::Run => {
            let mut hub = Hub::new(config).context("construct hub")?;
            hub.start().await;
            tokio::signal::ctrl_c().await.context("wait for ctrl-c")?;
            hub.stop().await;
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("error: {e:#}");
        std::process::exit(EXIT_RUNTIME_ERROR);
    }
}
