//! clusterprobe - polling-and-assertion harness for CLI tools driven against
//! a live cluster.

#![forbid(unsafe_code)]

mod commands;
mod scenarios;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use clusterprobe_common::HarnessConfig;
use tracing::debug;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use commands::config::ConfigAction;
use commands::run::RunArgs;
use commands::scenarios::ScenariosAction;
use commands::wait::WaitArgs;

#[derive(Parser)]
#[command(name = "clusterprobe")]
#[command(author, version, about = "Run, assert and poll CLI commands against a live cluster")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to a TOML config file
    #[arg(long, global = true, env = "CLUSTERPROBE_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a command once and require it to pass or fail
    Run(RunArgs),

    /// Re-run a command until its output contains the given text
    Wait(WaitArgs),

    /// List or run the operator-backed service scenarios
    Scenarios {
        #[command(subcommand)]
        action: ScenariosAction,
    },

    /// Inspect configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

fn init_logging(verbose: bool, level: &str) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let config = HarnessConfig::load(cli.config.as_deref());
    let level = config
        .as_ref()
        .map(|c| c.log_level.clone())
        .unwrap_or_else(|_| "info".to_string());
    init_logging(cli.verbose, &level);
    let config = config?;
    debug!(flavor = %config.flavor, odo = %config.odo_binary, "configuration loaded");

    match cli.command {
        Commands::Run(args) => commands::run::run(args, &config),
        Commands::Wait(args) => commands::wait::run(args, &config),
        Commands::Scenarios { action } => commands::scenarios::run(action, &config),
        Commands::Config { action } => {
            commands::config::run(action, &config, cli.config.as_deref())?;
            Ok(ExitCode::SUCCESS)
        }
    }
}
