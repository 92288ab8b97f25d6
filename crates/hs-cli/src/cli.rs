//! Command-line structure for the `hypersweep` binary.

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Hypersweep - random hyperparameter search with bandit early termination
#[derive(Parser)]
#[command(name = "hypersweep")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Log output format
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Clone, Copy, Debug, Default, ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Args, Debug)]
pub struct SweepFileArgs {
    /// Sweep file (.toml or .json)
    #[arg(short, long, env = "HYPERSWEEP_CONFIG")]
    pub config: PathBuf,

    /// Override the sampler seed from the sweep file
    #[arg(long, env = "HYPERSWEEP_SEED")]
    pub seed: Option<u64>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a sweep against the simulated executor
    Run {
        #[command(flatten)]
        file: SweepFileArgs,

        /// Write the JSON report here
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Check a sweep file without running it
    Validate {
        #[command(flatten)]
        file: SweepFileArgs,
    },

    /// Print draws from the configured distribution
    Sample {
        #[command(flatten)]
        file: SweepFileArgs,

        /// Number of draws
        #[arg(short = 'n', long, default_value_t = 10)]
        count: usize,
    },
}
