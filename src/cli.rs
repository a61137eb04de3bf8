use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Canary Guardian CLI (library-facing definitions)
#[derive(Debug, Parser)]
#[command(name = "canary_guardian", about = "Smart contract anomaly monitor", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the monitoring loop against the contract backend until Ctrl-C
    Run {
        /// TOML configuration file (falls back to CONFIG_PATH)
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Replay a JSON fixture through the detectors and print the outcome as JSON
    Check {
        /// Fixture file: { "contracts": [...], "snapshots": { address: snapshot } }
        #[arg(long)]
        fixture: PathBuf,
        /// Number of cycles to run
        #[arg(long, default_value_t = 1)]
        cycles: u32,
        /// Evaluation time in epoch seconds (defaults to now)
        #[arg(long)]
        now: Option<i64>,
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Print the rule catalogue
    Rules {
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Print the status of every watched contract once
    Status {
        #[arg(long)]
        config: Option<PathBuf>,
    },
}
