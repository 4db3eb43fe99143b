//! CLI Command Handlers
//!
//! Implementation of all CLI commands for the token scout.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::{build_cycle, load_config, Config};
use crate::domain::CostModel;

/// Default configuration file
pub const DEFAULT_CONFIG: &str = "config/scout.toml";

/// Token Scout - multi-provider token discovery and scoring
#[derive(Parser, Debug)]
#[command(
    name = "token-scout",
    version = env!("CARGO_PKG_VERSION"),
    about = "Multi-provider token discovery and scoring",
    long_about = "Token Scout polls several market data providers for newly listed tokens, \
                  merges their views into one record per token and ranks them through a \
                  quick -> medium -> full scoring funnel under a daily compute budget."
)]
pub struct CliApp {
    /// The command to execute
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the discovery loop
    Run(RunCmd),

    /// Run a single discovery cycle and print the report
    Once(OnceCmd),

    /// Validate a configuration file
    CheckConfig(CheckConfigCmd),

    /// Print the batch cost curve
    Costs(CostsCmd),
}

impl Command {
    /// Configuration file the command reads, if any
    pub fn config_path(&self) -> Option<&Path> {
        match self {
            Command::Run(cmd) => Some(cmd.config.as_path()),
            Command::Once(cmd) => Some(cmd.config.as_path()),
            Command::CheckConfig(cmd) => Some(cmd.config.as_path()),
            Command::Costs(_) => None,
        }
    }
}

/// Start the discovery loop
#[derive(Parser, Debug)]
pub struct RunCmd {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", default_value = DEFAULT_CONFIG)]
    pub config: PathBuf,

    /// Stop after this many cycles
    #[arg(long, value_name = "N")]
    pub max_cycles: Option<u64>,
}

/// Run one cycle
#[derive(Parser, Debug)]
pub struct OnceCmd {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", default_value = DEFAULT_CONFIG)]
    pub config: PathBuf,

    /// Print the full cycle report as JSON
    #[arg(long)]
    pub json: bool,
}

/// Validate configuration
#[derive(Parser, Debug)]
pub struct CheckConfigCmd {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", default_value = DEFAULT_CONFIG)]
    pub config: PathBuf,
}

/// Batch cost curve
#[derive(Parser, Debug)]
pub struct CostsCmd {
    /// Per-call base cost in compute units
    #[arg(long, value_name = "UNITS", default_value = "1")]
    pub base: u64,

    /// Largest batch size to print
    #[arg(long, value_name = "N", default_value = "50")]
    pub max: usize,
}

/// Execute the CLI command
pub async fn execute(app: CliApp) -> Result<()> {
    let config = match app.command.config_path() {
        Some(path) => Some(load(path)?),
        None => None,
    };
    init_logging(app.verbose, app.debug, config.as_ref().map(|c| c.logging.level.as_str()))?;

    match (app.command, config) {
        (Command::Run(cmd), Some(config)) => run_command(cmd, config).await,
        (Command::Once(cmd), Some(config)) => once_command(cmd, config).await,
        (Command::CheckConfig(cmd), Some(config)) => check_config_command(cmd, config),
        (Command::Costs(cmd), _) => costs_command(cmd),
        (command, None) => anyhow::bail!("{:?} requires a configuration file", command),
    }
}

/// Expand `~` and load the configuration file
fn load(path: &Path) -> Result<Config> {
    let expanded = shellexpand::tilde(&path.to_string_lossy()).to_string();
    load_config(&expanded).with_context(|| format!("Failed to load configuration from {}", expanded))
}

/// Filter directive: `--debug` > `--verbose` > config level > "warn"
pub fn log_directive(verbose: bool, debug: bool, configured: Option<&str>) -> String {
    if debug {
        "debug".to_string()
    } else if verbose {
        "info".to_string()
    } else {
        configured.unwrap_or("warn").to_string()
    }
}

/// Initialize logging system
fn init_logging(verbose: bool, debug: bool, configured: Option<&str>) -> Result<()> {
    use tracing_subscriber::{fmt, EnvFilter};

    let directive = log_directive(verbose, debug, configured);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    Ok(())
}

/// Handle run command
async fn run_command(cmd: RunCmd, config: Config) -> Result<()> {
    tracing::info!("Starting token scout...");
    tracing::info!("Config: {}", cmd.config.display());

    let cycle = Arc::new(build_cycle(&config).context("Failed to build discovery cycle")?);

    // Setup Ctrl+C handler
    let handle = cycle.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("Shutdown signal received");
        handle.stop();
    });

    cycle.run(cmd.max_cycles).await;
    tracing::info!("Token scout stopped after {} cycles", cycle.cycles_run());
    Ok(())
}

/// Handle once command
async fn once_command(cmd: OnceCmd, config: Config) -> Result<()> {
    let cycle = build_cycle(&config).context("Failed to build discovery cycle")?;
    let report = cycle.run_once().await;

    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&report).context("Failed to encode report")?);
        return Ok(());
    }

    let summary = &report.summary;
    println!("Cycle {} {} in {} ms", summary.cycle, summary.outcome, summary.duration_ms);
    println!("  Discovered:    {}", summary.tokens_discovered);
    println!("  Rejected:      {}", summary.total_rejected());
    println!("  Fully scored:  {}", summary.tokens_fully_scored);
    println!("  High conviction: {}", summary.high_conviction);
    println!("  Cost:          {} units (cache hit rate {:.1}%)", summary.total_cost, summary.cache_hit_rate * 100.0);

    for stage in &report.stages {
        println!(
            "  {:<6} evaluated {:>4}  passed {:>4}  requests {:>4}  unavailable {:>3}",
            stage.stage, stage.evaluated, stage.passed, stage.requests, stage.unavailable
        );
    }

    if !report.published.is_empty() {
        println!();
        for (rank, token) in report.published.iter().enumerate() {
            let score = token
                .score
                .map(|s| format!("{:.1}", s))
                .unwrap_or_else(|| "-".to_string());
            let marker = if token.is_high_conviction() {
                "*"
            } else if token.is_partial() {
                "~"
            } else {
                " "
            };
            println!("{}{:>3}. {} score {} ({})", marker, rank + 1, token.address, score, token.stage);
        }
    }

    Ok(())
}

/// Handle check-config command
fn check_config_command(cmd: CheckConfigCmd, config: Config) -> Result<()> {
    println!("✓ {} is valid", cmd.config.display());
    println!("  Poll interval: {}s, deadline {}s", config.cycle.poll_interval_secs, config.cycle.deadline_secs);
    println!("  Discovery: {:?}", config.cycle.discovery_providers);
    println!(
        "  Budget: {} units/day, alerts at {:?}%, reserve {}%",
        config.budget.daily_budget, config.budget.alert_levels, config.budget.reserve_pct
    );

    for (provider, section) in &config.providers {
        if !section.enabled {
            println!("  {:<14} disabled", provider.as_str());
            continue;
        }
        let endpoints = section.endpoints(*provider);
        println!(
            "  {:<14} {} calls/{}s, base cost {}, batch {}{}",
            provider.as_str(),
            section.calls_per_period,
            section.period_secs,
            section.base_cost,
            section.max_batch_size,
            if endpoints.api_key.is_some() { ", api key set" } else { "" }
        );
    }
    Ok(())
}

/// One row of the cost curve
#[derive(Debug, Clone, PartialEq)]
pub struct CostRow {
    pub size: usize,
    pub individual: u64,
    pub batch: u64,
    pub savings_pct: f64,
}

/// Cost of `n` lookups individually vs batched, for n in 1..=max
pub fn cost_table(base: u64, max: usize) -> Vec<CostRow> {
    let model = CostModel::new();
    (1..=max)
        .map(|n| CostRow {
            size: n,
            individual: model.individual_cost(base).saturating_mul(n as u64),
            batch: model.batch_cost(base, n),
            savings_pct: model.savings_pct(n, base),
        })
        .collect()
}

/// Handle costs command
fn costs_command(cmd: CostsCmd) -> Result<()> {
    anyhow::ensure!(cmd.base > 0, "--base must be > 0");

    println!("{:>5} {:>12} {:>10} {:>9}", "n", "individual", "batched", "savings");
    for row in cost_table(cmd.base, cmd.max) {
        println!(
            "{:>5} {:>12} {:>10} {:>8.1}%",
            row.size, row.individual, row.batch, row.savings_pct
        );
    }
    Ok(())
}
