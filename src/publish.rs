//! Artifact publication.
//!
//! The storage and retention backend is external; fleet only needs
//! `upload(name, bytes) -> handle`. [`DirectoryPublisher`] implements it
//! against a local dist directory, which CI then hands to its own artifact
//! store.

use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use serde::Serialize;

use crate::util::fs::write_atomic;
use crate::util::hash::sha256_bytes;

/// What a publication backend returns for an uploaded archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublicationHandle {
    pub name: String,
    pub location: String,
    pub sha256: String,
    pub size_bytes: u64,
}

/// A destination for finished archives.
pub trait Publisher: Send + Sync {
    fn upload(&self, name: &str, bytes: &[u8]) -> Result<PublicationHandle>;
}

/// Publishes archives into a directory.
#[derive(Debug, Clone)]
pub struct DirectoryPublisher {
    root: PathBuf,
}

impl DirectoryPublisher {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        DirectoryPublisher { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl Publisher for DirectoryPublisher {
    fn upload(&self, name: &str, bytes: &[u8]) -> Result<PublicationHandle> {
        if name.is_empty() || name.contains('/') || name.contains('\\') || name.starts_with('.') {
            bail!("refusing to publish `{}`: not a plain file name", name);
        }

        let path = self.root.join(name);
        write_atomic(&path, bytes)?;

        let sha256 = sha256_bytes(bytes);
        write_atomic(
            &self.root.join(format!("{}.sha256", name)),
            format!("{}  {}\n", sha256, name).as_bytes(),
        )?;

        tracing::info!("Published {} ({} bytes)", path.display(), bytes.len());

        Ok(PublicationHandle {
            name: name.to_string(),
            location: path.display().to_string(),
            sha256,
            size_bytes: bytes.len() as u64,
        })
    }
}
