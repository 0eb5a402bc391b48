//! statpipe — adaptive statsd relay.
//!
//! Sits between high-volume statsd emitters and a downstream collector,
//! absorbing hot metric keys into sampled aggregates that the collector
//! can expand back into true totals. Run `statpipe --help` for usage.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli;
mod config;
mod run;

use cli::{Cli, Commands};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init => {
            print!("{}", toml::to_string_pretty(&config::RelayConfig::default())?);
        }
        Commands::Run { interval, log } => {
            let config = if cli.config.exists() {
                config::RelayConfig::load(&cli.config)?
            } else {
                eprintln!(
                    "No '{}' found — using built-in defaults. Run `statpipe init` to write one.",
                    cli.config.display()
                );
                config::RelayConfig::default()
            };
            run::run(&config, interval, log)?;
        }
        Commands::Check { line } => match stat_core::parse_line(line.as_bytes()) {
            Ok(parsed) => {
                println!("key       = {}", String::from_utf8_lossy(parsed.key));
                println!("value     = {}", parsed.value);
                println!("type      = {:?}", parsed.metric_type);
                println!("presample = {}", parsed.presample);
            }
            Err(e) => {
                println!("invalid: {}", e);
                std::process::exit(1);
            }
        },
    }

    Ok(())
}
