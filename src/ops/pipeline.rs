//! One target's pipeline.
//!
//! Steps run strictly in order:
//!
//! lock -> resolve -> restore -> install -> persist -> configure/build ->
//! package -> verify -> publish
//!
//! Persist depends only on install; a later failure never undoes it. A
//! verification failure is recorded but the bundle is still published.
//! Cancellation is checked at every step boundary.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::builder::cmake::{BuildSystem, CMakeProject};
use crate::builder::events::{BuildEvent, EventSink, Step, StepReporter};
use crate::builder::executor::{ExecutorSettings, TargetBuildExecutor};
use crate::builder::toolchain::{ToolchainProbe, ToolchainResolver};
use crate::cache::{
    install_list, AptGet, CacheKey, DependencyCacheManager, FsCacheBackend, LockError,
    RestoreOutcome, TargetLock,
};
use crate::core::error::PipelineError;
use crate::core::profile::TargetProfile;
use crate::core::result::{BuildResult, BuildStatus};
use crate::package::{ArtifactPackager, PackagerSettings};
use crate::publish::{DirectoryPublisher, PublicationHandle, Publisher};
use crate::util::cancel::CancelToken;
use crate::util::config::FleetConfig;
use crate::util::fs::read_bytes;
use crate::verify::VerificationStage;

/// Per-invocation options from the command line.
#[derive(Clone, Default)]
pub struct RunOptions {
    /// Target ids to run (empty = all)
    pub targets: Vec<String>,

    /// Skip cache restore and persist
    pub no_cache: bool,

    /// Receives step events
    pub events: Option<EventSink>,

    /// Show the matrix progress bar
    pub progress: bool,

    pub cancel: CancelToken,
}

/// Everything a pipeline needs. Shared read-only by every target.
pub struct PipelineContext {
    pub project: String,
    pub probe: Arc<dyn ToolchainProbe>,
    pub executor: TargetBuildExecutor,
    pub packager: ArtifactPackager,
    pub cache: DependencyCacheManager,
    pub verifier: VerificationStage,
    pub publisher: Arc<dyn Publisher>,
    /// Installed for every target, before profile packages
    pub common_packages: Vec<String>,
    pub lock_dir: PathBuf,
    /// Longest wait for another run holding the same target
    pub lock_timeout: Duration,
    pub cancel: CancelToken,
    pub events: Option<EventSink>,
}

impl PipelineContext {
    /// Wire the real collaborators from configuration.
    pub fn from_config(config: &FleetConfig, options: &RunOptions) -> Self {
        let cancel = options.cancel.clone();
        let timeouts = &config.timeouts;
        let work_dir = config.build.work_dir.clone();

        let build_system: Arc<dyn BuildSystem> = Arc::new(CMakeProject::new(
            timeouts.configure(),
            timeouts.build(),
            timeouts.package(),
            cancel.clone(),
        ));

        let cache = DependencyCacheManager::new(
            Arc::new(FsCacheBackend::new(config.cache_dir())),
            Arc::new(AptGet::new(
                config.dependencies.update_index,
                timeouts.install(),
                cancel.clone(),
            )),
            work_dir.clone(),
        )
        .enabled(!options.no_cache);

        PipelineContext {
            project: config.project.name.clone(),
            probe: Arc::new(ToolchainResolver::new(
                work_dir.clone(),
                timeouts.probe(),
                cancel.clone(),
            )),
            executor: TargetBuildExecutor::new(
                Arc::clone(&build_system),
                ExecutorSettings {
                    source_dir: config.project.source.clone(),
                    work_dir: work_dir.clone(),
                    primary_target: config.project.primary_target().to_string(),
                    secondary_target: config.project.secondary.clone(),
                    build_type: config.build.build_type.clone(),
                    options: config.build.options.clone(),
                },
            ),
            packager: ArtifactPackager::new(
                build_system,
                PackagerSettings {
                    project: config.project.name.clone(),
                    source_dir: config.project.source.clone(),
                    work_dir,
                    resources: config.project.resources.clone(),
                    native_package: config.project.native_package,
                },
            ),
            cache,
            verifier: VerificationStage::new(timeouts.verify(), cancel.clone()),
            publisher: Arc::new(DirectoryPublisher::new(config.build.dist_dir.clone())),
            common_packages: config.dependencies.packages.clone(),
            lock_dir: config.lock_dir(),
            lock_timeout: timeouts.lock(),
            cancel,
            events: options.events.clone(),
        }
    }
}

/// Fields of the result filled in as the pipeline advances.
#[derive(Default)]
struct Progress {
    binary_paths: Vec<PathBuf>,
    binary_size_bytes: u64,
    warnings: Vec<String>,
    publication: Option<PublicationHandle>,
}

struct TargetPipeline<'a> {
    ctx: &'a PipelineContext,
    profile: &'a TargetProfile,
    reporter: StepReporter,
}

impl<'a> TargetPipeline<'a> {
    fn checkpoint(&self) -> Result<(), PipelineError> {
        if self.ctx.cancel.is_cancelled() {
            return Err(PipelineError::Cancelled {
                target: self.profile.id.clone(),
            });
        }
        Ok(())
    }

    /// Run one step between event markers.
    fn step<T>(
        &self,
        step: Step,
        f: impl FnOnce() -> Result<T, PipelineError>,
    ) -> Result<T, PipelineError> {
        self.checkpoint()?;
        self.reporter.started(step);
        let start = Instant::now();
        let result = f();
        self.reporter.finished(step, result.is_ok(), start.elapsed());
        result
    }

    fn warn(&self, progress: &mut Progress, message: String) {
        self.reporter.warning(&message);
        progress.warnings.push(message);
    }

    fn run(&self, progress: &mut Progress) -> Result<(), PipelineError> {
        let profile = self.profile;
        let ctx = self.ctx;

        self.checkpoint()?;
        let _lock = TargetLock::acquire(&ctx.lock_dir, &profile.id, ctx.lock_timeout, &ctx.cancel)
            .map_err(|e| match e {
                LockError::Cancelled { .. } => PipelineError::Cancelled {
                    target: profile.id.clone(),
                },
                other => PipelineError::BuildFailed {
                    target: profile.id.clone(),
                    message: format!("{:#}", other),
                },
            })?;

        let toolchain = self.step(Step::Resolve, || ctx.probe.resolve(profile))?;

        let packages = install_list(&ctx.common_packages, profile);
        let key = CacheKey::for_profile(profile, &packages);

        let restored = self.step(Step::Restore, || Ok(ctx.cache.restore(&key)))?;
        if restored == RestoreOutcome::Corrupt {
            self.warn(progress, "discarded a corrupt dependency cache entry".to_string());
        }

        self.step(Step::Install, || {
            ctx.cache.fetch_and_install(&profile.id, &packages)
        })?;

        let persisted = self.step(Step::Persist, || Ok(ctx.cache.persist(&key)))?;
        if !persisted && restored != RestoreOutcome::Skipped {
            self.warn(progress, "dependency cache was not persisted".to_string());
        }

        self.checkpoint()?;
        let outputs = ctx.executor.build(profile, &toolchain, &self.reporter)?;
        progress
            .warnings
            .extend(outputs.secondary.warnings.iter().cloned());

        let bundle = self.step(Step::Package, || {
            ctx.packager.package(profile, &outputs, &self.reporter)
        })?;
        progress.warnings.extend(bundle.warnings().iter().cloned());
        progress.binary_paths.push(bundle.primary().to_path_buf());
        if let Some(secondary) = bundle.secondary() {
            progress.binary_paths.push(secondary.to_path_buf());
        }
        progress.binary_size_bytes = std::fs::metadata(bundle.primary())
            .map(|m| m.len())
            .unwrap_or(0);

        // Verification failure is reported after publishing.
        let verified = self.step(Step::Verify, || {
            ctx.verifier.verify(profile, &toolchain, &bundle)
        });

        let handle = self.step(Step::Publish, || {
            let name = bundle.archive_name();
            let publish_failed = |e: anyhow::Error| PipelineError::PublishFailed {
                name: name.clone(),
                message: format!("{:#}", e),
            };
            let bytes = read_bytes(bundle.archive()).map_err(publish_failed)?;
            ctx.publisher.upload(&name, &bytes).map_err(publish_failed)
        })?;
        progress.publication = Some(handle);

        verified.map(|_| ())
    }
}

/// Run one target's pipeline to completion. Never fails: every error becomes
/// the result's status.
pub fn run_target(ctx: &PipelineContext, profile: &TargetProfile) -> BuildResult {
    let start = Instant::now();
    let reporter = StepReporter::new(profile.id.as_str(), ctx.events.clone());
    reporter.emit(BuildEvent::TargetStarted {
        target: profile.id.to_string(),
        display_name: profile.display_name.clone(),
    });

    let pipeline = TargetPipeline {
        ctx,
        profile,
        reporter: reporter.clone(),
    };
    let mut progress = Progress::default();
    let outcome = pipeline.run(&mut progress);

    let (status, error) = match outcome {
        Ok(()) => (BuildStatus::Success, None),
        Err(e) if ctx.cancel.is_cancelled() && !matches!(e, PipelineError::Cancelled { .. }) => {
            // A step killed by cancellation reports its own failure.
            tracing::warn!("{}", e);
            (
                BuildStatus::Cancelled,
                Some(format!("cancelled during: {}", e)),
            )
        }
        Err(e) => {
            if e.is_terminal() {
                tracing::error!("{}", e);
            } else {
                tracing::warn!("{}", e);
            }
            (e.status(), Some(e.to_string()))
        }
    };

    let duration = start.elapsed();
    reporter.emit(BuildEvent::TargetFinished {
        target: profile.id.to_string(),
        status,
        duration_ms: duration.as_millis() as u64,
    });
    tracing::info!("Finished with status {} in {:.1}s", status, duration.as_secs_f64());

    BuildResult {
        target: profile.id.clone(),
        status,
        binary_paths: progress.binary_paths,
        duration_seconds: round_seconds(duration),
        binary_size_bytes: progress.binary_size_bytes,
        warnings: progress.warnings,
        error,
        publication: progress.publication,
    }
}

fn round_seconds(duration: Duration) -> f64 {
    (duration.as_secs_f64() * 1000.0).round() / 1000.0
}
