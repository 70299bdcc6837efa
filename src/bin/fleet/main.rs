//! Fleet CLI - build one CMake project for every ARM board at once

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli;
mod commands;

use cli::{Cli, Commands};

fn main() {
    if let Err(e) = run() {
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "fleet=debug"
    } else {
        "fleet=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    // Logs go to stderr so `--json` output stays machine-readable.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    let config = cli.config.as_deref();
    match cli.command {
        Commands::Run(args) => commands::run::execute(args, config, cli.verbose),
        Commands::Profiles(args) => commands::profiles::execute(args, config),
        Commands::Probe(args) => commands::probe::execute(args, config),
        Commands::Cache(args) => commands::cache::execute(args, config),
        Commands::Completions(args) => commands::completions::execute(args),
    }
}
