//! `fleet probe` command
//!
//! Resolves one target's toolchain without building anything.

use std::path::Path;

use anyhow::{anyhow, Result};

use super::load_config;
use crate::cli::ProbeArgs;
use fleet::builder::toolchain::{ToolchainProbe, ToolchainResolver};
use fleet::util::CancelToken;

pub fn execute(args: ProbeArgs, config: Option<&Path>) -> Result<()> {
    let config = load_config(config)?;
    let registry = config.registry()?;
    let profile = registry
        .get(&args.target)
        .ok_or_else(|| anyhow!("unknown target `{}`", args.target))?;

    let resolver = ToolchainResolver::new(
        config.build.work_dir.clone(),
        config.timeouts.probe(),
        CancelToken::new(),
    );
    let spec = resolver.resolve(profile)?;

    eprintln!("   Toolchain {} ({})", profile.id, profile.display_name);
    println!("cc:    {}", spec.cc.display());
    println!("cxx:   {}", spec.cxx.display());
    println!("strip: {}", spec.strip.display());
    println!("arch:  {}", spec.architecture.as_str());
    if let Some(abi) = spec.float_abi {
        println!("float: {}", abi.as_str());
    }
    if !spec.compile_flags.is_empty() {
        println!("flags: {}", spec.compile_flags.join(" "));
    }
    Ok(())
}
