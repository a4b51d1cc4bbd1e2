#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Command-line adapter that replays terrain condition scenarios.

mod replay;
mod scenario;

use std::{io, path::PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{filter::LevelFilter, fmt, prelude::*, EnvFilter};

use crate::scenario::Scenario;

/// Replays scripted entities across a layered terrain map and reports the
/// conditions they gain and lose.
#[derive(Debug, Parser)]
#[command(name = "terrain-conditions", version, about)]
struct Cli {
    /// Verbosity of diagnostics written to stderr. `RUST_LOG` takes precedence.
    #[arg(long, global = true, default_value_t = LevelFilter::INFO)]
    log_level: LevelFilter,
    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Debug, Subcommand)]
enum CliCommand {
    /// Plays a scenario and prints every condition change.
    Run {
        /// Path to the scenario TOML file.
        scenario: PathBuf,
        /// Number of ticks to simulate. Defaults to the length of the script.
        #[arg(long)]
        ticks: Option<u64>,
    },
    /// Validates a scenario without running it.
    Check {
        /// Path to the scenario TOML file.
        scenario: PathBuf,
    },
}

/// Entry point for the terrain conditions command-line interface.
fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_level)?;

    match cli.command {
        CliCommand::Run { scenario, ticks } => {
            let loaded = Scenario::load(&scenario)?;
            let ticks = ticks.unwrap_or_else(|| loaded.script_length());
            info!(
                scenario = %scenario.display(),
                ticks,
                rules = loaded.rules.len(),
                "replaying scenario"
            );
            let mut out = io::stdout().lock();
            replay::run(&loaded, ticks, &mut out)
        }
        CliCommand::Check { scenario } => {
            let loaded = Scenario::load(&scenario)?;
            println!(
                "{}: ok ({} rules, {} scripted actions over {} ticks)",
                scenario.display(),
                loaded.rules.len(),
                loaded.action_count(),
                loaded.script_length()
            );
            Ok(())
        }
    }
}

fn init_tracing(level: LevelFilter) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(format!("terrain_conditions={level}"))
            .context("invalid log level")?,
    };
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();
    Ok(())
}
