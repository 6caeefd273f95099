//! Command-line interface
//!
//! Parses arguments with clap, installs logging, and dispatches to the
//! command implementations in [`commands`].

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};

pub mod commands;
mod output;

pub use output::Output;

use commands::{config, generate};

#[derive(Parser)]
#[command(
    name = "compliance-reports",
    version = env!("CARGO_PKG_VERSION"),
    about = "Generate compliance reports and deliver them by email or for download",
    long_about = "Aggregates stored compliance check results into per-cluster CSV files, \
                  packs them into a zip archive, and delivers it through the configured \
                  notifiers or saves it for download while tracking the run in a snapshot."
)]
pub struct Cli {
    /// Increase verbosity (can be repeated)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Use custom configuration file
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Generate a report for a request and deliver it
    Generate(generate::GenerateArgs),
    /// Configuration management
    Config(config::ConfigArgs),
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        setup_logging(self.verbose, self.quiet);
        let output = Output::new(self.verbose > 0, self.quiet);

        match self.command {
            Some(Commands::Generate(args)) => {
                generate::execute(args, self.config.as_deref(), &output).await
            }
            Some(Commands::Config(args)) => {
                config::execute(args, self.config.as_deref(), &output).await
            }
            None => {
                Cli::command().print_help()?;
                Ok(())
            }
        }
    }
}

fn setup_logging(verbose: u8, quiet: bool) {
    if quiet {
        return;
    }

    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        match verbose {
            0 => tracing_subscriber::EnvFilter::new("warn"),
            1 => tracing_subscriber::EnvFilter::new("info"),
            2 => tracing_subscriber::EnvFilter::new("debug"),
            _ => tracing_subscriber::EnvFilter::new("trace"),
        }
    });

    // stdout is reserved for command output
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
