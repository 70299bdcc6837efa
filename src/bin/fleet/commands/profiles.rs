//! `fleet profiles` command

use std::path::Path;

use anyhow::Result;

use super::load_config;
use crate::cli::ProfilesArgs;

pub fn execute(args: ProfilesArgs, config: Option<&Path>) -> Result<()> {
    let config = load_config(config)?;
    let registry = config.registry()?;

    if args.json {
        let profiles: Vec<_> = registry.iter().collect();
        println!("{}", serde_json::to_string_pretty(&profiles)?);
        return Ok(());
    }

    println!(
        "{:<12} {:<10} {:<6} {:>4}  {}",
        "ID", "ARCH", "FLOAT", "JOBS", "NAME"
    );
    for profile in registry.iter() {
        println!(
            "{:<12} {:<10} {:<6} {:>4}  {}",
            profile.id,
            profile.architecture.as_str(),
            profile.float_abi.map(|f| f.as_str()).unwrap_or("-"),
            profile.parallelism,
            profile.display_name
        );
    }
    Ok(())
}
