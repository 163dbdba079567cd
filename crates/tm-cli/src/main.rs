//! Tidemark CLI - apply and inspect schema migrations

use anyhow::Result;
use clap::Parser;

mod catalog;
mod cli;
mod commands;
mod context;

use cli::Cli;
use commands::common::ExitCode;
use commands::{ls, migrate, serve, status, unlock};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.global.verbose);

    let result = match &cli.command {
        cli::Commands::Migrate(args) => migrate::execute(args, &cli.global).await,
        cli::Commands::Status(args) => status::execute(args, &cli.global).await,
        cli::Commands::Ls => ls::execute().await,
        cli::Commands::Unlock => unlock::execute(&cli.global).await,
        cli::Commands::Serve(args) => serve::execute(args, &cli.global).await,
    };

    match result {
        Err(err) => match err.downcast_ref::<ExitCode>() {
            Some(ExitCode(code)) => std::process::exit(*code),
            None => Err(err),
        },
        ok => ok,
    }
}

/// `RUST_LOG` wins; otherwise info, or debug with `--verbose`
fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp(None)
        .init();
}
