//! Command implementations

pub mod cache;
pub mod completions;
pub mod probe;
pub mod profiles;
pub mod run;

use std::path::Path;

use anyhow::{Context, Result};
use fleet::util::config::find_config;
use fleet::FleetConfig;

/// Load the explicit config, the nearest `Fleet.toml`, or the defaults.
pub fn load_config(explicit: Option<&Path>) -> Result<FleetConfig> {
    if let Some(path) = explicit {
        return FleetConfig::load(path);
    }

    let cwd = std::env::current_dir().context("failed to get current directory")?;
    match find_config(&cwd) {
        Some(path) => {
            tracing::debug!("Using {}", path.display());
            FleetConfig::load(&path)
        }
        None => {
            tracing::debug!("No Fleet.toml found, using defaults");
            let mut config = FleetConfig::default();
            config.resolve_paths(&cwd);
            config.apply_env(|key| std::env::var(key).ok());
            Ok(config)
        }
    }
}
