//! `Fleet.toml` configuration.
//!
//! The file is found by walking up from the current directory, or given with
//! `--config`. Every section is optional. Relative paths are resolved against
//! the directory holding the file.
//!
//! Environment overrides:
//! - `FLEET_CACHE_DIR` replaces `[build] cache_dir`
//! - `FLEET_DIST_DIR` replaces `[build] dist_dir`

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::core::profile::{ProfileRegistry, TargetProfile};

pub const CONFIG_FILE: &str = "Fleet.toml";

static PROJECT_DIRS: LazyLock<Option<ProjectDirs>> =
    LazyLock::new(|| ProjectDirs::from("org", "fleet", "fleet"));

/// Fleet configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    /// The wrapped project
    pub project: ProjectConfig,

    /// Build tree and output locations
    pub build: BuildConfig,

    /// Packages installed for every target
    pub dependencies: DependencyConfig,

    /// Per-step timeouts
    pub timeouts: TimeoutConfig,

    /// Replaces the built-in profiles when non-empty
    #[serde(rename = "profile", skip_serializing_if = "Vec::is_empty")]
    pub profiles: Vec<TargetProfile>,

    /// Directory holding the config file; relative paths resolve against it.
    #[serde(skip)]
    pub root: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    /// Used in bundle and archive names
    pub name: String,

    /// CMake source tree
    pub source: PathBuf,

    /// Primary CMake target; defaults to the project name
    pub primary: Option<String>,

    /// Optional secondary CMake target (best-effort)
    pub secondary: Option<String>,

    /// Glob patterns, relative to `source`, copied into each bundle
    pub resources: Vec<String>,

    /// Run the CPack `package` target and bundle the `.deb`
    pub native_package: bool,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        ProjectConfig {
            name: "v4l2rtspserver".to_string(),
            source: PathBuf::from("."),
            primary: None,
            secondary: None,
            resources: Vec::new(),
            native_package: true,
        }
    }
}

impl ProjectConfig {
    pub fn primary_target(&self) -> &str {
        self.primary.as_deref().unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Scratch tree: `<work_dir>/<target>/{probe,deps,build,bundle}`
    pub work_dir: PathBuf,

    /// Published archives and `summary.json`
    pub dist_dir: PathBuf,

    /// Dependency cache root; defaults to the user cache directory
    pub cache_dir: Option<PathBuf>,

    /// `CMAKE_BUILD_TYPE`
    pub build_type: String,

    /// CMake options for every target; profile `options` override these
    pub options: BTreeMap<String, String>,
}

impl Default for BuildConfig {
    fn default() -> Self {
        BuildConfig {
            work_dir: PathBuf::from("target/fleet"),
            dist_dir: PathBuf::from("dist"),
            cache_dir: None,
            build_type: "Release".to_string(),
            options: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DependencyConfig {
    pub packages: Vec<String>,

    /// Refresh the package index before installing
    pub update_index: bool,
}

impl Default for DependencyConfig {
    fn default() -> Self {
        DependencyConfig {
            packages: Vec::new(),
            update_index: true,
        }
    }
}

/// Timeouts in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub probe: u64,
    pub install: u64,
    pub configure: u64,
    pub build: u64,
    pub package: u64,
    pub verify: u64,
    /// Waiting for another run that holds the same target
    pub lock: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        TimeoutConfig {
            probe: 120,
            install: 1800,
            configure: 600,
            build: 5400,
            package: 600,
            verify: 60,
            lock: 3600,
        }
    }
}

impl TimeoutConfig {
    pub fn probe(&self) -> Duration {
        Duration::from_secs(self.probe)
    }

    pub fn install(&self) -> Duration {
        Duration::from_secs(self.install)
    }

    pub fn configure(&self) -> Duration {
        Duration::from_secs(self.configure)
    }

    pub fn build(&self) -> Duration {
        Duration::from_secs(self.build)
    }

    pub fn package(&self) -> Duration {
        Duration::from_secs(self.package)
    }

    pub fn verify(&self) -> Duration {
        Duration::from_secs(self.verify)
    }

    pub fn lock(&self) -> Duration {
        Duration::from_secs(self.lock)
    }
}

impl FleetConfig {
    /// Load a config file, resolve its paths and apply environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config: {}", path.display()))?;

        let mut config: FleetConfig = toml::from_str(&contents)
            .with_context(|| format!("failed to parse config: {}", path.display()))?;

        let root = path
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));
        config.resolve_paths(&root);
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Make relative paths absolute against `root`.
    pub fn resolve_paths(&mut self, root: &Path) {
        self.root = root.to_path_buf();
        self.project.source = root.join(&self.project.source);
        self.build.work_dir = root.join(&self.build.work_dir);
        self.build.dist_dir = root.join(&self.build.dist_dir);
        if let Some(cache) = &self.build.cache_dir {
            self.build.cache_dir = Some(root.join(cache));
        }
    }

    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(dir) = var("FLEET_CACHE_DIR").filter(|v| !v.is_empty()) {
            self.build.cache_dir = Some(PathBuf::from(dir));
        }
        if let Some(dir) = var("FLEET_DIST_DIR").filter(|v| !v.is_empty()) {
            self.build.dist_dir = PathBuf::from(dir);
        }
    }

    /// Dependency cache root.
    pub fn cache_dir(&self) -> PathBuf {
        if let Some(dir) = &self.build.cache_dir {
            return dir.clone();
        }
        if let Some(dirs) = PROJECT_DIRS.as_ref() {
            return dirs.cache_dir().to_path_buf();
        }
        self.build.work_dir.join("cache")
    }

    /// Lock files live beside the cache so concurrent runs sharing a cache
    /// also share locks.
    pub fn lock_dir(&self) -> PathBuf {
        self.cache_dir().join("locks")
    }

    /// Configured profiles, or the built-in set when none are declared.
    pub fn registry(&self) -> Result<ProfileRegistry> {
        let registry = if self.profiles.is_empty() {
            ProfileRegistry::builtin()?
        } else {
            ProfileRegistry::from_profiles(self.profiles.clone())?
        };
        Ok(registry)
    }
}

/// Walk up from `start` looking for `Fleet.toml`.
pub fn find_config(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .map(|dir| dir.join(CONFIG_FILE))
        .find(|path| path.is_file())
}
