//! Per-target advisory locks.
//!
//! At most one pipeline may work on a given target at a time, across
//! processes. Different targets never contend.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::Context;
use fs2::FileExt;
use thiserror::Error;

use crate::core::profile::TargetId;
use crate::util::cancel::CancelToken;
use crate::util::fs::ensure_dir;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum LockError {
    #[error("cancelled while waiting for {}", .path.display())]
    Cancelled { path: PathBuf },

    #[error("gave up waiting for {} after {timeout:?}", .path.display())]
    TimedOut { path: PathBuf, timeout: Duration },

    #[error(transparent)]
    Io(#[from] anyhow::Error),
}

/// Held for the duration of one target pipeline. Released on drop.
#[derive(Debug)]
pub struct TargetLock {
    _file: File,
    path: PathBuf,
}

impl TargetLock {
    /// Acquire `<lock_dir>/<target-id>.lock`, waiting up to `timeout` if
    /// another run holds it. The wait stops as soon as `cancel` is set.
    pub fn acquire(
        lock_dir: &Path,
        target: &TargetId,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> Result<Self, LockError> {
        ensure_dir(lock_dir)?;
        let path = lock_dir.join(format!("{}.lock", target));

        // The lock file is never unlinked; removing a held lock file would let
        // a second process lock a fresh inode at the same path.
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .with_context(|| format!("failed to create lock file {}", path.display()))?;

        let deadline = Instant::now() + timeout;
        let mut announced = false;
        while file.try_lock_exclusive().is_err() {
            if cancel.is_cancelled() {
                return Err(LockError::Cancelled { path });
            }
            if Instant::now() >= deadline {
                return Err(LockError::TimedOut { path, timeout });
            }
            if !announced {
                tracing::info!("Waiting for another run of `{}` to finish", target);
                announced = true;
            }
            std::thread::sleep(POLL_INTERVAL);
        }

        Ok(TargetLock { _file: file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
