//! CLI definitions for statpipe.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[clap(
    name = "statpipe",
    version,
    about = "Adaptive statsd relay\n\nParses metric lines at wire speed, samples hot keys down to recoverable aggregates, and forwards everything else untouched.",
    long_about = None
)]
pub struct Cli {
    /// Path to statpipe.toml config file
    #[clap(long, short, default_value = "statpipe.toml")]
    pub config: PathBuf,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Print an example statpipe.toml to stdout
    Init,

    /// Run the relay in the foreground, appending metrics snapshots to a JSONL log
    Run {
        /// Snapshot interval in seconds
        #[clap(long, default_value = "10")]
        interval: u64,

        /// Metrics log path
        #[clap(long, default_value = "/var/log/statpipe.jsonl")]
        log: PathBuf,
    },

    /// Parse a single metric line and print what the relay would see
    Check {
        /// The raw line, e.g. 'api.latency:12.5|ms|@0.1'
        line: String,
    },
}
