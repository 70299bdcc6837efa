//! Test utilities and fakes for Fleet unit tests.
//!
//! Every external collaborator of a pipeline has an in-process stand-in here:
//! toolchain probing, the CMake build, the package manager, cache storage and
//! publication. The fakes share a [`CallLog`] so tests can assert on the order
//! in which steps touched the outside world.
//!
//! # Example
//!
//! ```rust,ignore
//! let harness = Harness::new().with_toolchains(FakeToolchains::new().unavailable("pi-zero"));
//! let summary = harness.run(&[pi_zero(), arm64()]);
//! assert_eq!(summary.statuses()["arm64"], BuildStatus::Success);
//! ```

pub mod fixtures;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};
use tempfile::TempDir;

use crate::builder::cmake::{BuildSystem, ConfigureRequest};
use crate::builder::executor::{ExecutorSettings, TargetBuildExecutor};
use crate::builder::toolchain::{ToolchainProbe, ToolchainSpec};
use crate::cache::{CacheBackend, CacheKey, DependencyCacheManager, EntryPart, InstallRequest, PackageManager};
use crate::core::error::PipelineError;
use crate::core::profile::{Architecture, FloatAbi, TargetProfile};
use crate::core::result::Summary;
use crate::ops::matrix::MatrixOrchestrator;
use crate::ops::pipeline::PipelineContext;
use crate::package::{ArtifactPackager, PackagerSettings};
use crate::publish::{PublicationHandle, Publisher};
use crate::util::cancel::CancelToken;
use crate::util::hash::sha256_bytes;
use crate::verify::VerificationStage;

// Re-export fixtures for convenience
pub use fixtures::*;

/// Ordered record of calls made to the fakes.
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    entries: Arc<Mutex<Vec<String>>>,
}

impl CallLog {
    pub fn record(&self, entry: impl Into<String>) {
        self.entries.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().unwrap().clone()
    }

    /// Index of the first entry equal to `entry`.
    pub fn position(&self, entry: &str) -> Option<usize> {
        self.entries.lock().unwrap().iter().position(|e| e == entry)
    }

    pub fn contains(&self, entry: &str) -> bool {
        self.position(entry).is_some()
    }

    pub fn any_starts_with(&self, prefix: &str) -> bool {
        self.entries.lock().unwrap().iter().any(|e| e.starts_with(prefix))
    }
}

/// Toolchain probe that succeeds unless a target is marked unavailable.
#[derive(Debug, Default)]
pub struct FakeToolchains {
    unavailable: HashSet<String>,
    strip: Option<PathBuf>,
    log: CallLog,
}

impl FakeToolchains {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unavailable(mut self, target: &str) -> Self {
        self.unavailable.insert(target.to_string());
        self
    }

    /// Use this strip tool instead of `echo`.
    pub fn strip(mut self, strip: impl Into<PathBuf>) -> Self {
        self.strip = Some(strip.into());
        self
    }

    fn with_log(mut self, log: CallLog) -> Self {
        self.log = log;
        self
    }
}

impl ToolchainProbe for FakeToolchains {
    fn resolve(&self, profile: &TargetProfile) -> Result<ToolchainSpec, PipelineError> {
        self.log.record(format!("resolve {}", profile.id));
        if self.unavailable.contains(profile.id.as_str()) {
            return Err(PipelineError::ToolchainUnresolvable {
                profile: profile.id.clone(),
                command: format!("{} -x c -", profile.compiler.c),
                stderr: format!("{}: command not found", profile.compiler.c),
            });
        }
        let mut spec = fake_toolchain(profile);
        if let Some(strip) = &self.strip {
            spec.strip = strip.clone();
        }
        Ok(spec)
    }
}

#[derive(Debug, Clone)]
struct ConfiguredTree {
    target: String,
    architecture: Architecture,
    float_abi: Option<FloatAbi>,
}

/// Build system that writes fake ELF headers instead of compiling.
///
/// The first `build` call for a tree is the primary target; later ones are
/// secondary targets.
#[derive(Debug, Default)]
pub struct FakeBuildSystem {
    log: CallLog,
    trees: Mutex<HashMap<PathBuf, ConfiguredTree>>,
    builds: Mutex<HashMap<String, Vec<(String, usize)>>>,
    fail_configure: HashSet<String>,
    fail_build: HashSet<String>,
    fail_secondary: HashSet<String>,
    skip_primary: HashSet<String>,
    wrong_arch: HashSet<String>,
    no_native: bool,
}

impl FakeBuildSystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_configure(mut self, target: &str) -> Self {
        self.fail_configure.insert(target.to_string());
        self
    }

    pub fn fail_build(mut self, target: &str) -> Self {
        self.fail_build.insert(target.to_string());
        self
    }

    pub fn fail_secondary(mut self, target: &str) -> Self {
        self.fail_secondary.insert(target.to_string());
        self
    }

    /// Report primary build success without producing the binary.
    pub fn skip_primary(mut self, target: &str) -> Self {
        self.skip_primary.insert(target.to_string());
        self
    }

    /// Produce an x86-64 binary regardless of the target.
    pub fn wrong_arch(mut self, target: &str) -> Self {
        self.wrong_arch.insert(target.to_string());
        self
    }

    pub fn without_native_package(mut self) -> Self {
        self.no_native = true;
        self
    }

    fn with_log(mut self, log: CallLog) -> Self {
        self.log = log;
        self
    }

    /// Parallelism passed to the primary build of `target`.
    pub fn parallelism_for(&self, target: &str) -> Option<usize> {
        self.builds
            .lock()
            .unwrap()
            .get(target)
            .and_then(|b| b.first())
            .map(|(_, jobs)| *jobs)
    }

    fn tree(&self, build_dir: &Path) -> Result<ConfiguredTree> {
        match self.trees.lock().unwrap().get(build_dir) {
            Some(tree) => Ok(tree.clone()),
            None => bail!("{} has not been configured", build_dir.display()),
        }
    }
}

impl BuildSystem for FakeBuildSystem {
    fn configure(&self, request: &ConfigureRequest) -> Result<()> {
        let target = request.toolchain.target.to_string();
        self.log.record(format!("configure {}", target));
        if self.fail_configure.contains(&target) {
            bail!("CMake Error: could not find ALSA");
        }
        std::fs::create_dir_all(&request.build_dir)?;
        self.builds.lock().unwrap().remove(&target);
        self.trees.lock().unwrap().insert(
            request.build_dir.clone(),
            ConfiguredTree {
                target,
                architecture: request.toolchain.architecture,
                float_abi: request.toolchain.float_abi,
            },
        );
        Ok(())
    }

    fn build(&self, build_dir: &Path, target: &str, parallelism: usize) -> Result<()> {
        let tree = self.tree(build_dir)?;
        self.log.record(format!("build {} {}", tree.target, target));

        let is_primary = {
            let mut builds = self.builds.lock().unwrap();
            let calls = builds.entry(tree.target.clone()).or_default();
            calls.push((target.to_string(), parallelism));
            calls.len() == 1
        };

        if is_primary && self.fail_build.contains(&tree.target) {
            bail!("make: *** [all] Error 2");
        }
        if !is_primary && self.fail_secondary.contains(&tree.target) {
            bail!("make: *** No rule to make target '{}'", target);
        }
        if is_primary && self.skip_primary.contains(&tree.target) {
            return Ok(());
        }

        let header = if self.wrong_arch.contains(&tree.target) {
            fake_elf_header(Architecture::X86_64, None)
        } else {
            fake_elf_header(tree.architecture, tree.float_abi)
        };
        std::fs::write(build_dir.join(target), header)?;
        Ok(())
    }

    fn package(&self, build_dir: &Path) -> Result<Option<PathBuf>> {
        let target = build_dir
            .parent()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.log.record(format!("package {}", target));
        if self.no_native {
            return Ok(None);
        }
        std::fs::create_dir_all(build_dir)?;
        let path = build_dir.join(format!("v4l2rtspserver-{}.deb", target));
        std::fs::write(&path, format!("!<arch>\n{}\n", target))?;
        Ok(Some(path))
    }
}

/// Package manager that writes one fake `.deb` per package.
#[derive(Debug, Default)]
pub struct RecordingPackageManager {
    log: CallLog,
    fail: HashSet<String>,
}

impl RecordingPackageManager {
    pub fn new(log: CallLog) -> Self {
        RecordingPackageManager {
            log,
            fail: HashSet::new(),
        }
    }

    pub fn fail_for(mut self, target: &str) -> Self {
        self.fail.insert(target.to_string());
        self
    }
}

impl PackageManager for RecordingPackageManager {
    fn install(&self, request: &InstallRequest) -> Result<()> {
        self.log.record(format!("install {}", request.target));
        if self.fail.contains(request.target.as_str()) {
            bail!("E: Unable to locate package {}", request.packages.join(" "));
        }
        std::fs::create_dir_all(&request.archives_dir)?;
        std::fs::create_dir_all(&request.lists_dir)?;
        for package in &request.packages {
            std::fs::write(
                request.archives_dir.join(format!("{}_1.0_all.deb", package)),
                package.as_bytes(),
            )?;
        }
        std::fs::write(
            request.lists_dir.join("Packages"),
            request.packages.join("\n"),
        )?;
        Ok(())
    }
}

/// In-memory cache storage.
#[derive(Debug, Default)]
pub struct MemoryCacheBackend {
    log: CallLog,
    entries: Mutex<BTreeMap<(String, String, &'static str), Vec<u8>>>,
}

impl MemoryCacheBackend {
    pub fn new(log: CallLog) -> Self {
        MemoryCacheBackend {
            log,
            entries: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn targets(&self) -> Vec<String> {
        let mut targets: Vec<String> = self
            .entries
            .lock()
            .unwrap()
            .keys()
            .map(|(t, _, _)| t.clone())
            .collect();
        targets.dedup();
        targets
    }
}

impl CacheBackend for MemoryCacheBackend {
    fn get(&self, key: &CacheKey, part: EntryPart) -> Result<Option<Vec<u8>>> {
        self.log.record(format!("cache-get {}", key.target));
        Ok(self
            .entries
            .lock()
            .unwrap()
            .get(&(key.target.to_string(), key.fingerprint.clone(), part.file_name()))
            .cloned())
    }

    fn put(&self, key: &CacheKey, part: EntryPart, bytes: &[u8]) -> Result<()> {
        self.log.record(format!("cache-put {}", key.target));
        self.entries.lock().unwrap().insert(
            (key.target.to_string(), key.fingerprint.clone(), part.file_name()),
            bytes.to_vec(),
        );
        Ok(())
    }
}

/// In-memory publication backend.
#[derive(Debug, Default)]
pub struct MemoryPublisher {
    log: CallLog,
    uploads: Mutex<Vec<(String, Vec<u8>)>>,
    reject: HashSet<String>,
}

impl MemoryPublisher {
    pub fn new(log: CallLog) -> Self {
        MemoryPublisher {
            log,
            uploads: Mutex::new(Vec::new()),
            reject: HashSet::new(),
        }
    }

    /// Refuse uploads named `name`.
    pub fn reject(mut self, name: &str) -> Self {
        self.reject.insert(name.to_string());
        self
    }

    fn with_log(mut self, log: CallLog) -> Self {
        self.log = log;
        self
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .uploads
            .lock()
            .unwrap()
            .iter()
            .map(|(n, _)| n.clone())
            .collect();
        names.sort();
        names
    }

    /// Bytes of the most recent upload under `name`.
    pub fn bytes(&self, name: &str) -> Option<Vec<u8>> {
        self.uploads
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, b)| b.clone())
    }
}

impl Publisher for MemoryPublisher {
    fn upload(&self, name: &str, bytes: &[u8]) -> Result<PublicationHandle> {
        self.log.record(format!("publish {}", name));
        if self.reject.contains(name) {
            bail!("storage quota exceeded");
        }
        self.uploads
            .lock()
            .unwrap()
            .push((name.to_string(), bytes.to_vec()));
        Ok(PublicationHandle {
            name: name.to_string(),
            location: format!("memory://{}", name),
            sha256: sha256_bytes(bytes),
            size_bytes: bytes.len() as u64,
        })
    }
}

/// A complete matrix wired to fakes inside a temp directory.
///
/// Storage and publication outlive individual runs, so running the same
/// harness twice exercises a warm cache.
pub struct Harness {
    pub tmp: TempDir,
    pub log: CallLog,
    pub toolchains: Arc<FakeToolchains>,
    pub build_system: Arc<FakeBuildSystem>,
    pub package_manager: Arc<RecordingPackageManager>,
    pub backend: Arc<MemoryCacheBackend>,
    pub publisher: Arc<MemoryPublisher>,
    pub cancel: CancelToken,
    pub secondary: Option<String>,
}

impl Harness {
    pub fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        let source = tmp.path().join("src");
        std::fs::create_dir_all(source.join("webroot")).unwrap();
        std::fs::write(source.join("webroot/index.html"), "<html></html>").unwrap();

        let log = CallLog::default();
        Harness {
            tmp,
            toolchains: Arc::new(FakeToolchains::new().with_log(log.clone())),
            build_system: Arc::new(FakeBuildSystem::new().with_log(log.clone())),
            package_manager: Arc::new(RecordingPackageManager::new(log.clone())),
            backend: Arc::new(MemoryCacheBackend::new(log.clone())),
            publisher: Arc::new(MemoryPublisher::new(log.clone())),
            cancel: CancelToken::new(),
            secondary: Some("v4l2wrapper".to_string()),
            log,
        }
    }

    pub fn with_toolchains(mut self, toolchains: FakeToolchains) -> Self {
        self.toolchains = Arc::new(toolchains.with_log(self.log.clone()));
        self
    }

    pub fn with_build_system(mut self, build_system: FakeBuildSystem) -> Self {
        self.build_system = Arc::new(build_system.with_log(self.log.clone()));
        self
    }

    pub fn with_package_manager(mut self, package_manager: RecordingPackageManager) -> Self {
        self.package_manager = Arc::new(package_manager);
        self
    }

    pub fn with_publisher(mut self, publisher: MemoryPublisher) -> Self {
        self.publisher = Arc::new(publisher.with_log(self.log.clone()));
        self
    }

    pub fn without_secondary(mut self) -> Self {
        self.secondary = None;
        self
    }

    pub fn work_dir(&self) -> PathBuf {
        self.tmp.path().join("work")
    }

    pub fn lock_dir(&self) -> PathBuf {
        self.tmp.path().join("cache/locks")
    }

    pub fn context(&self) -> PipelineContext {
        let source_dir = self.tmp.path().join("src");
        let work_dir = self.work_dir();
        PipelineContext {
            project: "v4l2rtspserver".to_string(),
            probe: self.toolchains.clone(),
            executor: TargetBuildExecutor::new(
                self.build_system.clone(),
                ExecutorSettings {
                    source_dir: source_dir.clone(),
                    work_dir: work_dir.clone(),
                    primary_target: "v4l2rtspserver".to_string(),
                    secondary_target: self.secondary.clone(),
                    build_type: "Release".to_string(),
                    options: BTreeMap::from([("ALSA".to_string(), "OFF".to_string())]),
                },
            ),
            packager: ArtifactPackager::new(
                self.build_system.clone(),
                PackagerSettings {
                    project: "v4l2rtspserver".to_string(),
                    source_dir,
                    work_dir: work_dir.clone(),
                    resources: vec!["webroot/*.html".to_string()],
                    native_package: true,
                },
            ),
            cache: DependencyCacheManager::new(
                self.backend.clone(),
                self.package_manager.clone(),
                work_dir,
            ),
            verifier: VerificationStage::new(std::time::Duration::from_secs(10), self.cancel.clone()),
            publisher: self.publisher.clone(),
            common_packages: vec!["cmake".to_string()],
            lock_dir: self.lock_dir(),
            lock_timeout: std::time::Duration::from_secs(30),
            cancel: self.cancel.clone(),
            events: None,
        }
    }

    pub fn run(&self, profiles: &[TargetProfile]) -> Summary {
        MatrixOrchestrator::new(self.context())
            .run(profiles, false)
            .unwrap()
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}
