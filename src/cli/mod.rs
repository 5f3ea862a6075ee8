pub mod config;
pub mod init;
pub mod inspect;
pub mod validate;

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "rampclock")]
#[command(about = "Ramping arrival-rate load runner with a stage clock", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Log at debug level (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a ramp profile against the configured target
    Run {
        /// Path to the configuration file (YAML/JSON)
        config: PathBuf,
        /// Override the target base URL (env: BASE_URL)
        #[arg(long)]
        base_url: Option<String>,
        /// Treat every configuration problem as fatal
        #[arg(long)]
        strict: bool,
        /// Print the final summary as JSON instead of text
        #[arg(long)]
        json: bool,
        /// Export summary and stage starts to a JSON file
        #[arg(long)]
        export_json: Option<PathBuf>,
        /// Output configuration (e.g., --out csv=results.csv)
        #[arg(long)]
        out: Option<String>,
    },
    /// Show the stage table of a profile
    Stages {
        config: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Resolve which stage is active at an elapsed time
    Resolve {
        config: PathBuf,
        /// Elapsed time: milliseconds ("90000") or tokens ("1m30s")
        #[arg(short, long, allow_hyphen_values = true)]
        elapsed: String,
    },
    /// Recompute stage start timestamps from a run's end time
    Project {
        config: PathBuf,
        /// Run end: RFC 3339, epoch milliseconds or "now"
        #[arg(long, default_value = "now")]
        end: String,
        /// Run duration: milliseconds or tokens (default: profile total)
        #[arg(short, long)]
        duration: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Check a configuration file without running it
    Validate {
        config: PathBuf,
        #[arg(long)]
        strict: bool,
    },
    /// Write a starter ramp configuration
    Init {
        /// Output file path (default: rampclock.yaml)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Also write a .env template next to it
        #[arg(long)]
        env: bool,
    },
    /// Print the configuration JSON Schema
    Schema {
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Generate shell completions
    Completion {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}
