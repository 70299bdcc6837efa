//! `fleet run` command
//!
//! Runs the full matrix and prints the summary.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};

use super::load_config;
use crate::cli::RunArgs;
use fleet::builder::events::{BuildEvent, EventSink};
use fleet::ops::{self, RunOptions};
use fleet::util::CancelToken;

pub fn execute(args: RunArgs, config: Option<&Path>, verbose: bool) -> Result<()> {
    let config = load_config(config)?;
    let cancel = CancelToken::new();

    if let Some(secs) = args.max_duration {
        spawn_watchdog(Duration::from_secs(secs), cancel.clone());
    }

    let events: Option<EventSink> = if args.json {
        Some(Arc::new(|event: &BuildEvent| println!("{}", event.to_json())))
    } else {
        None
    };

    let options = RunOptions {
        targets: args.targets,
        no_cache: args.no_cache,
        events,
        progress: !args.json && !verbose,
        cancel,
    };

    let summary = ops::run(&config, &options)?;

    if args.json {
        println!("{}", summary.to_json()?);
    } else {
        print!("{}", summary.render_table());
    }

    if !summary.any_produced_artifact() {
        bail!("no target produced an artifact");
    }
    Ok(())
}

/// Cancel every pipeline once `limit` has elapsed.
fn spawn_watchdog(limit: Duration, cancel: CancelToken) {
    std::thread::spawn(move || {
        std::thread::sleep(limit);
        tracing::warn!("Maximum duration of {}s reached, cancelling", limit.as_secs());
        cancel.cancel();
    });
}
