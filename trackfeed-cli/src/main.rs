//! ## trackfeed
//! **Tracking feed ingester**
//!
//! Keeps a connection open to every configured feed, fans all received
//! records into one bounded bus and appends them to daily output files.

use clap::Parser;

mod commands;
mod signals;
mod sink;

use commands::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    commands::run_command(cli).await
}
