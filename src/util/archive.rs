//! Gzip'd tarballs for cache entries and release bundles.
//!
//! Packing is deterministic: entries are visited in file-name order and
//! headers carry fixed mtime/uid/gid, so the same tree always yields the same
//! bytes.

use std::fs::File;
use std::io::Cursor;
use std::path::Path;

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use tar::{Archive, Builder, HeaderMode};
use walkdir::WalkDir;

/// Pack everything below `dir` into a `.tar.gz`.
///
/// When `prefix` is given every entry is placed under it (e.g.
/// `v4l2rtspserver-arm64/README.md`).
pub fn pack_dir(dir: &Path, prefix: Option<&Path>) -> Result<Vec<u8>> {
    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = Builder::new(encoder);
    builder.mode(HeaderMode::Deterministic);
    builder.follow_symlinks(false);

    if let Some(prefix) = prefix {
        builder
            .append_dir(prefix, dir)
            .with_context(|| format!("failed to add {} to archive", prefix.display()))?;
    }

    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.with_context(|| format!("failed to walk {}", dir.display()))?;
        let rel = entry
            .path()
            .strip_prefix(dir)
            .with_context(|| format!("{} escaped {}", entry.path().display(), dir.display()))?;
        if rel.as_os_str().is_empty() {
            continue;
        }

        let name = match prefix {
            Some(prefix) => prefix.join(rel),
            None => rel.to_path_buf(),
        };

        if entry.file_type().is_dir() {
            builder
                .append_dir(&name, entry.path())
                .with_context(|| format!("failed to add {} to archive", name.display()))?;
        } else if entry.file_type().is_file() {
            let mut file = File::open(entry.path())
                .with_context(|| format!("failed to open {}", entry.path().display()))?;
            builder
                .append_file(&name, &mut file)
                .with_context(|| format!("failed to add {} to archive", name.display()))?;
        }
    }

    let encoder = builder.into_inner().context("failed to finish tar stream")?;
    encoder.finish().context("failed to finish gzip stream")
}

/// Unpack a `.tar.gz` produced by [`pack_dir`] into `dest`.
pub fn unpack(data: &[u8], dest: &Path) -> Result<()> {
    std::fs::create_dir_all(dest)
        .with_context(|| format!("failed to create destination directory: {}", dest.display()))?;

    let mut archive = Archive::new(GzDecoder::new(Cursor::new(data)));
    archive
        .unpack(dest)
        .with_context(|| format!("failed to unpack archive into {}", dest.display()))
}

/// List entry paths of a `.tar.gz`, in archive order.
pub fn list_entries(data: &[u8]) -> Result<Vec<String>> {
    let mut archive = Archive::new(GzDecoder::new(Cursor::new(data)));
    let mut names = Vec::new();
    for entry in archive.entries().context("failed to read archive entries")? {
        let entry = entry.context("failed to read archive entry")?;
        let path = entry.path().context("failed to read entry path")?;
        names.push(path.to_string_lossy().trim_end_matches('/').to_string());
    }
    Ok(names)
}
