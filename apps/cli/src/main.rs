//! nbdocs CLI: build Markdown documentation from executable notebooks.
//!
//! Executes each declared notebook in a fresh kernel, renders the executed
//! notebook to Markdown with extracted images, and publishes the result
//! into the documentation tree.

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
