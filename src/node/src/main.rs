//! NodeStake - Main Binary
//!
//! Operator CLI for the node staking engine:
//! - Scenario replay with expected failures
//! - TOML configuration with env overrides
//! - JSON ledger state
//! - Prometheus metrics dump

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use nodestake_core::units;
use nodestake_node::{NodeConfig, Scenario, StakeNode};
use std::path::PathBuf;
use tracing::info;

/// NodeStake operator CLI
#[derive(Parser)]
#[command(name = "nodestake")]
#[command(about = "Node staking and withdrawal engine")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, env = "NODESTAKE_CONFIG")]
    config: Option<PathBuf>,

    /// State file (overrides config)
    #[arg(long, env = "NODESTAKE_STATE")]
    state: Option<PathBuf>,

    /// Withdrawal cooldown in blocks (overrides config)
    #[arg(long, env = "NODESTAKE_COOLDOWN_BLOCKS")]
    cooldown_blocks: Option<u64>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Subcommand
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Replay a scenario file against the engine
    Run {
        /// Scenario TOML file
        scenario: PathBuf,

        /// Print events as JSON lines
        #[arg(long)]
        json: bool,
    },

    /// Print the effective protocol settings
    ShowSettings,

    /// Show version
    Version,
}

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("{},nodestake_staking={}", log_level, log_level).into()),
        )
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    if let Command::Version = cli.command {
        println!("NodeStake v{}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let mut config = match &cli.config {
        Some(path) => {
            let config = NodeConfig::load(path)?;
            info!("Loaded configuration from {:?}", path);
            config
        }
        None => NodeConfig::default(),
    };

    // Apply CLI overrides
    if let Some(state) = cli.state {
        config.state.path = Some(state);
    }
    if let Some(blocks) = cli.cooldown_blocks {
        config.settings.cooldown_interval_blocks = blocks;
    }

    config.validate()?;

    match cli.command {
        Command::Run { scenario, json } => run_scenario(config, scenario, json),
        Command::ShowSettings => {
            let settings = &config.settings;
            println!("cooldown_interval_blocks = {}", settings.cooldown_interval_blocks);
            println!(
                "min_collateral_ratio     = {} ({}%)",
                units::format_ether(settings.min_collateral_ratio),
                units::format_ether(settings.min_collateral_ratio * 100)
            );
            println!(
                "minipool_launch_amount   = {} ({} wei)",
                units::format_ether(settings.minipool_launch_amount),
                settings.minipool_launch_amount
            );
            Ok(())
        }
        Command::Version => Ok(()),
    }
}

fn run_scenario(config: NodeConfig, path: PathBuf, json: bool) -> Result<()> {
    let scenario = Scenario::load(&path).with_context(|| format!("Failed to load scenario {:?}", path))?;
    let print_metrics = config.metrics.print_on_exit;
    let node = StakeNode::new(config)?;

    let outcome = node.run_scenario(&scenario);

    // Persist whatever was accepted, even when an expectation failed
    node.persist()?;

    let report = outcome?;
    for event in &report.events {
        if json {
            println!("{}", serde_json::to_string(event)?);
        } else {
            println!("{:?}", event);
        }
    }

    println!(
        "Scenario {} passed: {} steps, {} expected failures, block {}",
        report.name.as_deref().unwrap_or("unnamed"),
        report.steps_run,
        report.expected_failures,
        report.final_block
    );

    if print_metrics {
        if let Some(text) = node.metrics_text()? {
            print!("{}", text);
        }
    }

    Ok(())
}
