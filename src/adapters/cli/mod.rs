//! CLI Adapter
//!
//! Command-line interface for the token scout.
//! Uses clap derive macros for argument parsing.

mod commands;

pub use commands::{
    cost_table, log_directive, CheckConfigCmd, CliApp, Command, CostRow, CostsCmd, OnceCmd, RunCmd, DEFAULT_CONFIG,
};

use anyhow::Result;

/// Initialize the CLI application
pub fn init() -> CliApp {
    use clap::Parser;
    CliApp::parse()
}

/// Execute the CLI command
pub async fn execute(app: CliApp) -> Result<()> {
    commands::execute(app).await
}
