//! ---
//! erc_section: "07-daemon"
//! erc_subsection: "binary"
//! erc_type: "source"
//! erc_scope: "code"
//! erc_description: "Binary entrypoint for the ERC daemon."
//! erc_version: "v0.0.0-prealpha"
//! erc_owner: "tbd"
//! ---
use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use erc_common::config::{AppConfig, Mode};
use erc_common::logging::init_tracing;
use erc_core::orchestrator::RigOrchestrator;
use erc_replay::PowerTrace;
use erc_scheduler::search_scale_factor;
use tokio::signal;
use tracing::info;

#[derive(Debug, Parser)]
#[command(author, version, about = "ERC daemon", long_about = None)]
struct Cli {
    #[arg(long, value_name = "FILE", help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[arg(long, value_enum, help = "Override application mode")]
    mode: Option<CliMode>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliMode {
    Live,
    Replay,
}

impl From<CliMode> for Mode {
    fn from(value: CliMode) -> Self {
        match value {
            CliMode::Live => Mode::Live,
            CliMode::Replay => Mode::Replay,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Run the rig orchestrator")]
    Run,
    #[command(about = "Run the offline scale-factor search and report the result")]
    Search,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut candidates = Vec::new();
    if let Some(path) = &cli.config {
        candidates.push(path.clone());
    }
    candidates.push(PathBuf::from("configs/erc.toml"));
    candidates.push(PathBuf::from("configs/example.toml"));

    let loaded = AppConfig::load_with_source(&candidates)?;
    let mut config = loaded.config;
    if let Some(mode) = cli.mode {
        config.mode = mode.into();
    }
    init_tracing("ercd", &config.logging)?;
    info!(config_path = %loaded.source.display(), mode = ?config.mode, "configuration loaded");

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_daemon(config).await,
        Commands::Search => run_search(config),
    }
}

async fn run_daemon(config: AppConfig) -> Result<()> {
    let orchestrator = RigOrchestrator::new(config)?;
    let handle = orchestrator.start().await?;

    info!("daemon running; waiting for termination signal");
    signal::ctrl_c().await?;
    info!("ctrl-c received; shutting down");
    handle.stop().await?;
    handle.shutdown().await?;
    Ok(())
}

fn run_search(config: AppConfig) -> Result<()> {
    let trace = PowerTrace::from_csv(
        &config.trace.path,
        config.scheduler.interval_minutes,
        &config.trace.timestamp_column,
        &config.trace.power_column,
    )?;
    let result = search_scale_factor(
        trace.samples(),
        trace.max_power_kw(),
        config.scheduler.interval_minutes,
    );
    info!(
        samples = trace.len(),
        scale_factor = result.scale_factor,
        efficiency = result.efficiency,
        "scale-factor search complete"
    );
    println!(
        "{}",
        serde_json::json!({
            "samples": trace.len(),
            "raw_max_power_kw": trace.max_power_kw(),
            "total_generated_kwh": trace.total_generated_kwh(),
            "scale_factor": result.scale_factor,
            "efficiency": result.efficiency,
        })
    );
    Ok(())
}
