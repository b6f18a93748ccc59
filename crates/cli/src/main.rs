//! secflow - repository security-config pipeline
//!
//! Two stages connected by NATS: the collector lists an organization's
//! repositories and publishes them, the validator checks each one for a
//! security config file and routes it to a valid or invalid subject.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use secflow::config::Config;

mod commands;
mod logging;

use commands::{cmd_check, cmd_collector, cmd_config_show, cmd_validator};
use logging::init_logging;

#[derive(Parser)]
#[command(name = "secflow")]
#[command(about = "Collect organization repositories and route them by security config")]
#[command(after_help = "\
QUICK START:
  secflow collector               # Scan on CRON_SCHEDULE and publish repositories
  secflow validator               # Route published repositories to valid/invalid
  secflow check acme demo         # Probe one repository
  secflow config show             # Print the effective configuration

Every setting can also come from the environment (GITHUB_TOKEN, NATS_URL, ...).")]
struct Cli {
  /// Config file (default: user config dir, e.g. ~/.config/secflow/config.toml)
  #[arg(short, long, global = true, value_name = "FILE")]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Commands,
}

/// Subcommands for `secflow config`
#[derive(Subcommand)]
pub enum ConfigCommand {
  /// Show the effective configuration (token redacted)
  Show,
}

#[derive(Subcommand)]
enum Commands {
  /// Run the organization scan producer
  Collector {
    /// Run a single scan and exit
    #[arg(long)]
    once: bool,
  },
  /// Run the validation router until interrupted
  Validator,
  /// Check one repository for the probe file
  Check {
    /// Repository owner
    owner: String,
    /// Repository name
    repo: String,
    /// Path to probe (default: validator.probe_path)
    #[arg(long)]
    path: Option<String>,
  },
  /// Configuration management
  Config {
    #[command(subcommand)]
    command: ConfigCommand,
  },
}

#[tokio::main]
async fn main() -> Result<()> {
  let cli = Cli::parse();

  let config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;
  let _guard = init_logging(&config.logging);

  match cli.command {
    Commands::Collector { once } => cmd_collector(&config, once).await,
    Commands::Validator => cmd_validator(&config).await,
    Commands::Check { owner, repo, path } => cmd_check(&config, &owner, &repo, path.as_deref()).await,
    Commands::Config { command } => match command {
      ConfigCommand::Show => cmd_config_show(&config, cli.config.as_deref()),
    },
  }
}
