mod cli;

use anyhow::Result;
use clap::Parser;
use cli::Cli;
use log::info;
use refactor_lens::output;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    output::print_banner();

    let cli = Cli::parse();
    info!("Starting refactor-lens");
    cli.execute().await?;

    Ok(())
}
