//! Vigil CLI - validate and refine detection rules
//!
//! - `vigil run <rules-dir>` runs every rule through the three gates,
//!   refining within budget, and writes approved rules and rejection reports
//! - `vigil check <rules-dir>` runs the offline syntax, schema and corpus checks
//! - `vigil config` prints the effective configuration
//!
//! Exit codes: 0 when every rule passed, 1 when any was rejected, 2 on a
//! run-level fault.

use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod collaborators;
mod commands;
mod config;
mod error;
mod output;

use commands::{check, run};
use config::{LoggingConfig, VigilConfig};

const FAULT_EXIT: u8 = 2;

#[derive(Parser)]
#[command(name = "vigil")]
#[command(about = "Vigil - detection rule validation and refinement", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "VIGIL_CONFIG")]
    config: Option<String>,

    /// Output format (table, json, yaml)
    #[arg(short, long, default_value = "table")]
    output: output::OutputFormat,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate, test and refine every rule in a directory
    Run(run::RunArgs),

    /// Offline syntax, schema and corpus checks
    Check(check::CheckArgs),

    /// Show the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match VigilConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            output::print_error(&format!("Configuration error: {}", e));
            return ExitCode::from(FAULT_EXIT);
        }
    };
    init_tracing(&config.logging, cli.verbose, cli.json_logs);

    match execute(cli.command, config, cli.output).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            output::print_error(&format!("{:#}", e));
            ExitCode::from(FAULT_EXIT)
        }
    }
}

async fn execute(
    command: Commands,
    config: VigilConfig,
    format: output::OutputFormat,
) -> anyhow::Result<u8> {
    match command {
        Commands::Run(args) => {
            let dir = args.rules_dir.display().to_string();
            run::execute(args, config, format)
                .await
                .with_context(|| format!("run over {} failed", dir))
        }
        Commands::Check(args) => {
            let dir = args.rules_dir.display().to_string();
            check::execute(args, config, format)
                .await
                .with_context(|| format!("check of {} failed", dir))
        }
        Commands::Config => {
            output::print_single(&config.redacted(), format)?;
            Ok(0)
        }
    }
}

/// Logs go to stderr so tables and JSON on stdout stay parseable.
fn init_tracing(logging: &LoggingConfig, verbose: bool, json: bool) {
    let level = if verbose { "debug" } else { logging.level.as_str() };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let registry = tracing_subscriber::registry().with(filter);

    if json || logging.json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .init();
    }
}
