//! Prospector CLI: resumable, region-wide organization research.
//!
//! Walks every sub-region of a region, asks a research engine which
//! organizations match a query there, and keeps the best-supported answer
//! per sub-region.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
