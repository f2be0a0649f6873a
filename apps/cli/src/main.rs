//! scholarflow CLI: multi-stage research document generation.
//!
//! Plans a query into subtopics, researches them in parallel, and merges the
//! results into one validated, citation-formatted document.

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
