//! Interactive Host runner
//!
//! # Configuration
//!
//! Settings come from an optional TOML file (`--config`); missing keys use
//! the defaults. `RUST_LOG` overrides the configured log filter.
//!
//! The `simulate` subcommand runs against in-memory collaborators and is
//! only built with the `simulate` feature (on by default).

#[cfg(feature = "simulate")]
mod simulate;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ih_core::HostConfig;
#[cfg(feature = "simulate")]
use simulate::Scenario;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Interactive Host - embedded interactive protocol runner
#[derive(Parser, Debug)]
#[command(name = "ih-host")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Host configuration file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    #[cfg(feature = "simulate")]
    /// Run a scripted session and save every interactive
    Simulate {
        /// Interactives that answer state requests
        #[arg(long, default_value_t = 3)]
        interactives: usize,

        /// Interactives that never answer state requests
        #[arg(long, default_value_t = 0)]
        silent: usize,

        /// Interactives rendered in report mode
        #[arg(long, default_value_t = 0)]
        report: usize,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the effective configuration as TOML
    PrintConfig,
}

fn load_config(path: Option<&PathBuf>) -> Result<HostConfig> {
    match path {
        Some(path) => HostConfig::load(path)
            .with_context(|| format!("loading configuration from {}", path.display())),
        None => Ok(HostConfig::default()),
    }
}

fn init_tracing(config: &HostConfig, json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_filter))
        .context("invalid log filter")?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    let installed = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;
    init_tracing(&config, cli.json_logs || config.log_json)?;

    match cli.command {
        #[cfg(feature = "simulate")]
        Command::Simulate {
            interactives,
            silent,
            report,
            json,
        } => {
            tracing::info!(interactives, silent, report, "running scripted session");
            let outcome = simulate::run(
                config,
                Scenario {
                    interactives,
                    silent,
                    report,
                },
            )
            .await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&outcome.to_json())?);
            } else {
                println!("{}", outcome.generate_text());
            }
            std::process::exit(if outcome.passed() { 0 } else { 1 });
        }
        Command::PrintConfig => {
            print!("{}", toml::to_string_pretty(&config)?);
        }
    }
    Ok(())
}
