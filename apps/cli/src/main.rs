//! SpecPress CLI: turn API documentation sites into OpenAPI documents.
//!
//! Crawls a docs site, generates spec fragments per chunk with an LLM,
//! merges them and optionally opens a pull request with the result.

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
