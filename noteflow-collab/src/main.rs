//! noteflow-collab: realtime document store daemon.

use anyhow::Result;
use clap::Parser;

use noteflow_collab::cli::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    noteflow_collab::run_with_cli(Cli::parse()).await
}
