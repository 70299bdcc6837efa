//! Per-target bundles and release archives.
//!
//! A bundle is `<work>/<target>/bundle/<project>-<target>/` holding the
//! primary binary, whatever optional outputs were produced, and a generated
//! README. It is then archived as `<project>-<target>.tar.gz` with
//! deterministic headers.
//!
//! Only the primary binary is required. Everything else is best-effort and
//! reported as a warning when absent.

pub mod readme;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::builder::cmake::BuildSystem;
use crate::builder::events::StepReporter;
use crate::builder::executor::BuildOutputs;
use crate::core::error::PipelineError;
use crate::core::profile::{TargetId, TargetProfile};
use crate::util::archive::pack_dir;
use crate::util::fs::{copy_file, ensure_dir, glob_files, remove_dir_all_if_exists, write_bytes};

use readme::ReadmeContents;

/// A packaged target. Only constructed when the primary binary was copied.
#[derive(Debug, Clone)]
pub struct PackageBundle {
    target: TargetId,
    dir: PathBuf,
    primary: PathBuf,
    secondary: Option<PathBuf>,
    resources: Vec<PathBuf>,
    native_package: Option<PathBuf>,
    readme: PathBuf,
    archive: PathBuf,
    warnings: Vec<String>,
}

impl PackageBundle {
    pub fn target(&self) -> &TargetId {
        &self.target
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The primary binary inside the bundle.
    pub fn primary(&self) -> &Path {
        &self.primary
    }

    pub fn secondary(&self) -> Option<&Path> {
        self.secondary.as_deref()
    }

    pub fn resources(&self) -> &[PathBuf] {
        &self.resources
    }

    pub fn native_package(&self) -> Option<&Path> {
        self.native_package.as_deref()
    }

    pub fn readme(&self) -> &Path {
        &self.readme
    }

    /// The `.tar.gz` built from the bundle directory.
    pub fn archive(&self) -> &Path {
        &self.archive
    }

    pub fn archive_name(&self) -> String {
        file_name(&self.archive)
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }
}

/// Project-level packaging settings.
#[derive(Debug, Clone)]
pub struct PackagerSettings {
    pub project: String,
    pub source_dir: PathBuf,
    pub work_dir: PathBuf,
    /// Glob patterns relative to `source_dir`.
    pub resources: Vec<String>,
    pub native_package: bool,
}

/// Collects build outputs into a bundle.
pub struct ArtifactPackager {
    build_system: Arc<dyn BuildSystem>,
    settings: PackagerSettings,
}

impl ArtifactPackager {
    pub fn new(build_system: Arc<dyn BuildSystem>, settings: PackagerSettings) -> Self {
        ArtifactPackager {
            build_system,
            settings,
        }
    }

    /// `<project>-<target>`.
    pub fn bundle_name(&self, target: &TargetId) -> String {
        format!("{}-{}", self.settings.project, target)
    }

    pub fn package(
        &self,
        profile: &TargetProfile,
        outputs: &BuildOutputs,
        reporter: &StepReporter,
    ) -> Result<PackageBundle, PipelineError> {
        let failed = |e: anyhow::Error| PipelineError::PackagingFailed {
            target: profile.id.clone(),
            message: format!("{:#}", e),
        };

        if !outputs.primary.is_file() {
            tracing::error!(
                "build reported success but {} does not exist",
                outputs.primary.display()
            );
            return Err(PipelineError::PackagingFailed {
                target: profile.id.clone(),
                message: format!("primary binary {} is missing", outputs.primary.display()),
            });
        }

        let name = self.bundle_name(&profile.id);
        let bundle_root = self.settings.work_dir.join(profile.id.as_str()).join("bundle");
        let dir = bundle_root.join(&name);
        remove_dir_all_if_exists(&dir).map_err(failed)?;
        ensure_dir(&dir).map_err(failed)?;

        let primary = dir.join(file_name(&outputs.primary));
        copy_file(&outputs.primary, &primary).map_err(failed)?;

        let mut warnings = Vec::new();
        let mut warn = |message: String| {
            reporter.warning(&message);
            warnings.push(message);
        };

        let secondary = match &outputs.secondary.value {
            Some(path) if path.is_file() => {
                let dest = dir.join(file_name(path));
                match copy_file(path, &dest) {
                    Ok(_) => Some(dest),
                    Err(e) => {
                        warn(format!("failed to copy secondary binary: {:#}", e));
                        None
                    }
                }
            }
            _ => None,
        };

        let resources = self.copy_resources(&dir, &mut warn);

        let native_package = if self.settings.native_package {
            self.copy_native_package(&outputs.build_dir, &dir, &mut warn)
        } else {
            None
        };

        let contents = ReadmeContents {
            primary: file_name(&primary),
            secondary: secondary.as_deref().map(file_name),
            resources: resources
                .iter()
                .filter_map(|p| p.strip_prefix(&dir).ok())
                .map(|p| p.display().to_string())
                .collect(),
            native_package: native_package.as_deref().map(file_name),
        };
        let readme = dir.join("README.md");
        write_bytes(
            &readme,
            readme::generate(&self.settings.project, profile, &contents).as_bytes(),
        )
        .map_err(failed)?;

        let archive = bundle_root.join(format!("{}.tar.gz", name));
        let bytes = pack_dir(&dir, Some(Path::new(&name))).map_err(failed)?;
        write_bytes(&archive, &bytes).map_err(failed)?;

        tracing::info!("Packaged {} ({} bytes)", archive.display(), bytes.len());

        Ok(PackageBundle {
            target: profile.id.clone(),
            dir,
            primary,
            secondary,
            resources,
            native_package,
            readme,
            archive,
            warnings,
        })
    }

    /// Copy every file matched by each resource pattern, keeping its path
    /// relative to the source tree. One warning per pattern that matched nothing.
    fn copy_resources(&self, dir: &Path, warn: &mut impl FnMut(String)) -> Vec<PathBuf> {
        let source = &self.settings.source_dir;
        let mut copied = Vec::new();

        for pattern in &self.settings.resources {
            let matches = match glob_files(source, pattern) {
                Ok(matches) => matches,
                Err(e) => {
                    warn(format!("resource pattern `{}` is invalid: {:#}", pattern, e));
                    continue;
                }
            };
            if matches.is_empty() {
                warn(format!("resource pattern `{}` matched nothing", pattern));
                continue;
            }

            for path in matches {
                let dest = match path.strip_prefix(source) {
                    Ok(rel) => dir.join(rel),
                    Err(_) => dir.join(file_name(&path)),
                };
                if copied.contains(&dest) {
                    continue;
                }
                match copy_file(&path, &dest) {
                    Ok(_) => copied.push(dest),
                    Err(e) => warn(format!("failed to copy resource: {:#}", e)),
                }
            }
        }

        copied.sort();
        copied
    }

    fn copy_native_package(
        &self,
        build_dir: &Path,
        dir: &Path,
        warn: &mut impl FnMut(String),
    ) -> Option<PathBuf> {
        let copy = |path: &Path| -> Result<PathBuf> {
            let dest = dir.join(file_name(path));
            copy_file(path, &dest)
                .with_context(|| format!("failed to copy {}", path.display()))?;
            Ok(dest)
        };

        match self.build_system.package(build_dir) {
            Ok(Some(path)) => match copy(&path) {
                Ok(dest) => Some(dest),
                Err(e) => {
                    warn(format!("native package: {:#}", e));
                    None
                }
            },
            Ok(None) => {
                warn("native packaging produced no package file".to_string());
                None
            }
            Err(e) => {
                warn(format!("native packaging failed: {:#}", e));
                None
            }
        }
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
