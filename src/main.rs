use anyhow::Result;
use clap::Parser;

use compliance_reports::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    cli.run().await
}
