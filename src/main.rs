mod cli;
mod commands;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

use crate::cli::{BenchCommands, Cli, Commands};

fn main() {
    init_tracing();

    if let Err(err) = run() {
        error!(error = %err, "command failed");
        for cause in err.chain().skip(1) {
            error!(cause = %cause, "caused by");
        }
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;

    runtime.block_on(async move {
        match cli.command {
            Commands::Ingest(args) => commands::ingest::run(args).await,
            Commands::Rebuild(args) => commands::rebuild::run(args).await,
            Commands::Search(args) => commands::search::run(args).await,
            Commands::Status(args) => commands::status::run(args).await,
            Commands::Bench(command) => match command {
                BenchCommands::Run(args) => commands::bench::run(args).await,
                BenchCommands::Baseline(args) => commands::bench::baseline(args).await,
                BenchCommands::History(args) => commands::bench::history(args).await,
                BenchCommands::Report(args) => commands::bench::report(args).await,
                BenchCommands::Prune(args) => commands::bench::prune(args).await,
            },
        }
    })
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
