//! Filesystem cache storage.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use super::{CacheBackend, CacheKey, EntryPart};
use crate::core::profile::TargetId;
use crate::util::fs::{dir_size, remove_dir_all_if_exists, write_atomic};

/// One stored entry, as reported by [`FsCacheBackend::list`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEntry {
    pub target: String,
    pub fingerprint: String,
    pub size_bytes: u64,
}

/// Stores entries at `<root>/<target-id>/<fingerprint>/<part>`.
#[derive(Debug, Clone)]
pub struct FsCacheBackend {
    root: PathBuf,
}

impl FsCacheBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FsCacheBackend { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entry_dir(&self, key: &CacheKey) -> PathBuf {
        self.root.join(key.target.as_str()).join(&key.fingerprint)
    }

    /// Every stored entry, sorted by target then fingerprint.
    pub fn list(&self) -> Result<Vec<StoredEntry>> {
        let mut entries = Vec::new();
        for target_dir in sorted_subdirs(&self.root)? {
            let Some(target) = dir_name(&target_dir) else {
                continue;
            };
            // Skip `locks/` and anything else that is not a target namespace.
            if TargetId::new(target.clone()).is_err() {
                continue;
            }
            for entry_dir in sorted_subdirs(&target_dir)? {
                let Some(fingerprint) = dir_name(&entry_dir) else {
                    continue;
                };
                entries.push(StoredEntry {
                    target: target.clone(),
                    fingerprint,
                    size_bytes: dir_size(&entry_dir),
                });
            }
        }
        Ok(entries)
    }

    /// Remove every entry for `target`, or for every target when `None`.
    /// Lock files are never removed. Returns the number of bytes freed.
    pub fn clean(&self, target: Option<&TargetId>) -> Result<u64> {
        let namespaces = match target {
            Some(target) => vec![self.root.join(target.as_str())],
            None => sorted_subdirs(&self.root)?
                .into_iter()
                .filter(|dir| dir_name(dir).is_some_and(|name| TargetId::new(name).is_ok()))
                .collect(),
        };

        let mut freed = 0;
        for path in namespaces {
            freed += dir_size(&path);
            remove_dir_all_if_exists(&path)?;
        }
        Ok(freed)
    }
}

impl CacheBackend for FsCacheBackend {
    fn get(&self, key: &CacheKey, part: EntryPart) -> Result<Option<Vec<u8>>> {
        let path = self.entry_dir(key).join(part.file_name());
        if !path.exists() {
            return Ok(None);
        }
        let bytes =
            fs::read(&path).with_context(|| format!("failed to read {}", path.display()))?;
        Ok(Some(bytes))
    }

    fn put(&self, key: &CacheKey, part: EntryPart, bytes: &[u8]) -> Result<()> {
        let path = self.entry_dir(key).join(part.file_name());
        write_atomic(&path, bytes)
    }
}

fn sorted_subdirs(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut out = Vec::new();
    for entry in
        fs::read_dir(dir).with_context(|| format!("failed to read {}", dir.display()))?
    {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            out.push(entry.path());
        }
    }
    out.sort();
    Ok(out)
}

fn dir_name(path: &Path) -> Option<String> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|s| s.to_string())
}
