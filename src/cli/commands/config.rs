use anyhow::{Context, Result};
use clap::{Args, Subcommand};

use crate::cli::Output;
use crate::config::ReportsConfig;

#[derive(Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Display current merged configuration
    Show {
        /// Output format: toml, json
        #[arg(short, long, default_value = "toml")]
        format: String,
    },
    /// Validate the merged configuration
    Validate,
}

pub async fn execute(args: ConfigArgs, custom_config: Option<&str>, output: &Output) -> Result<()> {
    let config = ReportsConfig::load(custom_config)?;

    match args.command {
        ConfigCommand::Show { format } => {
            let rendered = match format.to_lowercase().as_str() {
                "toml" => config.to_toml()?,
                "json" => serde_json::to_string_pretty(&config)
                    .context("Failed to serialize configuration")?,
                _ => anyhow::bail!("Unsupported format: {format}. Use toml or json"),
            };
            println!("{rendered}");
        }
        ConfigCommand::Validate => {
            config.validate().context("Configuration is invalid")?;
            output.success("Configuration is valid");
        }
    }

    Ok(())
}
