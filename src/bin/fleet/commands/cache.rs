//! `fleet cache` command
//!
//! Inspect and clean the per-target dependency cache.

use std::path::Path;

use anyhow::Result;

use super::load_config;
use crate::cli::{CacheArgs, CacheCleanArgs, CacheCommands};
use fleet::cache::FsCacheBackend;
use fleet::core::TargetId;
use fleet::util::fs::format_size;
use fleet::FleetConfig;

pub fn execute(args: CacheArgs, config: Option<&Path>) -> Result<()> {
    let config = load_config(config)?;
    match args.command {
        CacheCommands::List => list_cache(&config),
        CacheCommands::Clean(clean_args) => clean_cache(&config, clean_args),
    }
}

fn list_cache(config: &FleetConfig) -> Result<()> {
    let backend = FsCacheBackend::new(config.cache_dir());
    println!("Cache directory: {}", backend.root().display());
    println!();

    let entries = backend.list()?;
    if entries.is_empty() {
        println!("  (empty)");
        return Ok(());
    }

    let mut total = 0;
    for entry in &entries {
        total += entry.size_bytes;
        println!(
            "  {:<12} {} ({})",
            entry.target,
            entry.fingerprint,
            format_size(entry.size_bytes)
        );
    }
    println!();
    println!("{} entries, {}", entries.len(), format_size(total));
    Ok(())
}

fn clean_cache(config: &FleetConfig, args: CacheCleanArgs) -> Result<()> {
    let backend = FsCacheBackend::new(config.cache_dir());
    let target = args.target.map(TargetId::new).transpose()?;

    let freed = backend.clean(target.as_ref())?;
    match &target {
        Some(id) => eprintln!("     Removed cache for {} ({})", id, format_size(freed)),
        None => eprintln!(
            "     Removed all entries in {} ({})",
            backend.root().display(),
            format_size(freed)
        ),
    }
    Ok(())
}
