mod bootstrap_helpers;
mod cli_args;
mod commands;
mod render;

use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;

use crate::bootstrap_helpers::init_tracing;
use crate::cli_args::Cli;
use crate::commands::run_cli;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    init_tracing();
    run_cli(Cli::parse()).await
}
