//! Per-target dependency cache.
//!
//! Package-manager downloads (archives and index lists) are persisted between
//! runs, keyed by [`CacheKey`]. The key carries the target id as a mandatory
//! field and every storage path starts with it, so an entry written for one
//! target can never be restored into another.

pub mod backend;
pub mod lock;
pub mod package_manager;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Result};

use crate::core::error::PipelineError;
use crate::core::profile::{TargetId, TargetProfile};
use crate::util::archive::{pack_dir, unpack};
use crate::util::fs::{ensure_dir, remove_dir_all_if_exists};
use crate::util::hash::Fingerprint;

pub use backend::FsCacheBackend;
pub use lock::{LockError, TargetLock};
pub use package_manager::{AptGet, InstallRequest, PackageManager};

/// Identity of one cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub target: TargetId,
    pub fingerprint: String,
}

impl CacheKey {
    pub fn new(target: TargetId, fingerprint: impl Into<String>) -> Result<Self> {
        let fingerprint = fingerprint.into();
        if fingerprint.is_empty() || !fingerprint.chars().all(|c| c.is_ascii_alphanumeric()) {
            bail!("invalid cache fingerprint `{}`", fingerprint);
        }
        Ok(CacheKey {
            target,
            fingerprint,
        })
    }

    /// Key for a profile and the exact package list it installs.
    pub fn for_profile(profile: &TargetProfile, packages: &[String]) -> Self {
        let mut fp = Fingerprint::new();
        fp.update_set(packages.iter().map(|p| p.as_str()))
            .update_str(profile.architecture.as_str())
            .update_opt(profile.float_abi.map(|f| f.as_str()))
            .update_str(&profile.compiler.c)
            .update_str(&profile.compiler.cxx);

        CacheKey {
            target: profile.id.clone(),
            fingerprint: fp.finish_short(),
        }
    }
}

/// The two halves of a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryPart {
    Archives,
    Index,
}

impl EntryPart {
    pub const ALL: [EntryPart; 2] = [EntryPart::Archives, EntryPart::Index];

    pub fn file_name(&self) -> &'static str {
        match self {
            EntryPart::Archives => "archives.tar.gz",
            EntryPart::Index => "index.tar.gz",
        }
    }
}

/// Key/value storage for cache entries.
pub trait CacheBackend: Send + Sync {
    fn get(&self, key: &CacheKey, part: EntryPart) -> Result<Option<Vec<u8>>>;

    /// Store `bytes`. Must be atomic: a concurrent `get` sees the old entry
    /// or the new one, never a partial write.
    fn put(&self, key: &CacheKey, part: EntryPart, bytes: &[u8]) -> Result<()>;
}

/// What a restore attempt found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreOutcome {
    Restored,
    Miss,
    /// An entry existed but could not be unpacked; it was discarded.
    Corrupt,
    /// Caching is disabled for this run.
    Skipped,
}

/// Sorted, deduplicated install list for a profile.
pub fn install_list(common: &[String], profile: &TargetProfile) -> Vec<String> {
    let mut packages: Vec<String> = common.iter().chain(&profile.packages).cloned().collect();
    packages.sort();
    packages.dedup();
    packages
}

/// Restores, installs and persists one target's dependencies.
#[derive(Clone)]
pub struct DependencyCacheManager {
    backend: Arc<dyn CacheBackend>,
    package_manager: Arc<dyn PackageManager>,
    work_dir: PathBuf,
    enabled: bool,
}

impl DependencyCacheManager {
    pub fn new(
        backend: Arc<dyn CacheBackend>,
        package_manager: Arc<dyn PackageManager>,
        work_dir: impl Into<PathBuf>,
    ) -> Self {
        DependencyCacheManager {
            backend,
            package_manager,
            work_dir: work_dir.into(),
            enabled: true,
        }
    }

    /// Disable restore and persist. Install still runs.
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// `<work>/<target-id>/deps`.
    pub fn deps_dir(&self, target: &TargetId) -> PathBuf {
        self.work_dir.join(target.as_str()).join("deps")
    }

    fn part_dir(&self, target: &TargetId, part: EntryPart) -> PathBuf {
        let deps = self.deps_dir(target);
        match part {
            EntryPart::Archives => deps.join("archives"),
            EntryPart::Index => deps.join("lists"),
        }
    }

    /// Best-effort: anything short of a clean restore is logged and
    /// reported as a miss, so a cold fetch follows.
    pub fn restore(&self, key: &CacheKey) -> RestoreOutcome {
        if !self.enabled {
            return RestoreOutcome::Skipped;
        }

        let mut parts = Vec::new();
        for part in EntryPart::ALL {
            match self.backend.get(key, part) {
                Ok(Some(bytes)) => parts.push((part, bytes)),
                Ok(None) => {
                    tracing::info!("Cache miss for {} ({})", key.target, key.fingerprint);
                    return RestoreOutcome::Miss;
                }
                Err(e) => {
                    tracing::warn!("Cache read failed for {}: {:#}", key.target, e);
                    return RestoreOutcome::Miss;
                }
            }
        }

        for (part, bytes) in &parts {
            let dest = self.part_dir(&key.target, *part);
            if let Err(e) = unpack(bytes, &dest) {
                tracing::warn!(
                    "Discarding corrupt cache entry for {} ({}): {:#}",
                    key.target,
                    key.fingerprint,
                    e
                );
                let _ = remove_dir_all_if_exists(&self.deps_dir(&key.target));
                return RestoreOutcome::Corrupt;
            }
        }

        tracing::info!("Restored cache for {} ({})", key.target, key.fingerprint);
        RestoreOutcome::Restored
    }

    /// Always runs, restored or not; the package manager treats already
    /// present packages as satisfied.
    pub fn fetch_and_install(
        &self,
        target: &TargetId,
        packages: &[String],
    ) -> Result<(), PipelineError> {
        let request = InstallRequest {
            target: target.clone(),
            packages: packages.to_vec(),
            archives_dir: self.part_dir(target, EntryPart::Archives),
            lists_dir: self.part_dir(target, EntryPart::Index),
        };

        self.package_manager
            .install(&request)
            .map_err(|e| PipelineError::InstallFailed {
                target: target.clone(),
                message: format!("{:#}", e),
            })
    }

    /// Best-effort: returns whether the entry was stored.
    pub fn persist(&self, key: &CacheKey) -> bool {
        if !self.enabled {
            return false;
        }

        for part in EntryPart::ALL {
            let dir = self.part_dir(&key.target, part);
            let stored = ensure_dir(&dir)
                .and_then(|_| pack_dir(&dir, None))
                .and_then(|bytes| self.backend.put(key, part, &bytes));
            if let Err(e) = stored {
                tracing::warn!("Failed to persist cache for {}: {:#}", key.target, e);
                return false;
            }
        }

        tracing::info!("Persisted cache for {} ({})", key.target, key.fingerprint);
        true
    }
}
