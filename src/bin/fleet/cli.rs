//! CLI definitions using clap.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;

/// Fleet - parallel cross-compilation and packaging for ARM targets
#[derive(Parser)]
#[command(name = "fleet")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to Fleet.toml (defaults to searching upwards from the current directory)
    #[arg(long, global = true, env = "FLEET_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Build, package, verify and publish every target
    Run(RunArgs),

    /// List the available target profiles
    Profiles(ProfilesArgs),

    /// Check that a target's cross toolchain works
    Probe(ProbeArgs),

    /// Inspect or clean the dependency cache
    Cache(CacheArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

#[derive(Args)]
pub struct RunArgs {
    /// Only build these targets (repeatable)
    #[arg(short, long = "target", value_name = "ID")]
    pub targets: Vec<String>,

    /// Print build events and the summary as JSON
    #[arg(long)]
    pub json: bool,

    /// Neither restore nor persist the dependency cache
    #[arg(long)]
    pub no_cache: bool,

    /// Cancel every pipeline after this many seconds
    #[arg(long, value_name = "SECONDS")]
    pub max_duration: Option<u64>,
}

#[derive(Args)]
pub struct ProfilesArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args)]
pub struct ProbeArgs {
    /// Target profile id
    pub target: String,
}

#[derive(Args)]
pub struct CacheArgs {
    #[command(subcommand)]
    pub command: CacheCommands,
}

#[derive(Subcommand)]
pub enum CacheCommands {
    /// List cached dependency entries
    List,

    /// Remove cached entries
    Clean(CacheCleanArgs),
}

#[derive(Args)]
pub struct CacheCleanArgs {
    /// Only remove entries for this target
    #[arg(long)]
    pub target: Option<String>,
}

#[derive(Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,
}
