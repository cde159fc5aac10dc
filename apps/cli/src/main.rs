//! qaforge CLI — QA dataset synthesis over a legislation corpus.
//!
//! Feeds filtered document chunks to browser-driven chat sessions and
//! accumulates the extracted question/answer pairs into a resumable CSV
//! dataset.

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
