//! Fan-out over target profiles.

use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use rayon::ThreadPoolBuilder;

use crate::core::profile::TargetProfile;
use crate::core::result::{BuildResult, BuildStatus, Summary};
use crate::ops::pipeline::{run_target, PipelineContext, RunOptions};
use crate::util::config::FleetConfig;
use crate::util::fs::write_atomic;

pub const SUMMARY_FILE: &str = "summary.json";

/// Runs one isolated pipeline per profile and joins on all of them.
pub struct MatrixOrchestrator {
    ctx: PipelineContext,
}

impl MatrixOrchestrator {
    pub fn new(ctx: PipelineContext) -> Self {
        MatrixOrchestrator { ctx }
    }

    pub fn context(&self) -> &PipelineContext {
        &self.ctx
    }

    /// Run every profile concurrently, one pool thread per profile.
    ///
    /// A failing or panicking pipeline only affects its own result. Results
    /// are returned in profile order.
    pub fn run(&self, profiles: &[TargetProfile], show_progress: bool) -> Result<Summary> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(profiles.len().max(1))
            .thread_name(|i| format!("fleet-target-{}", i))
            .build()
            .context("failed to start target thread pool")?;

        let bar = if show_progress {
            progress_bar(profiles.len() as u64)
        } else {
            ProgressBar::hidden()
        };

        let results: Vec<BuildResult> = pool.install(|| {
            profiles
                .par_iter()
                .map(|profile| {
                    let result = self.run_isolated(profile);
                    bar.inc(1);
                    bar.set_message(format!("{} {}", result.target, result.status));
                    result
                })
                .collect()
        });

        bar.finish_and_clear();
        Ok(Summary::new(self.ctx.project.clone(), results))
    }

    fn run_isolated(&self, profile: &TargetProfile) -> BuildResult {
        let span = tracing::info_span!("target", id = %profile.id);
        let _enter = span.enter();

        panic::catch_unwind(AssertUnwindSafe(|| run_target(&self.ctx, profile))).unwrap_or_else(
            |payload| {
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                tracing::error!("pipeline panicked: {}", message);
                BuildResult::failed(
                    profile.id.clone(),
                    BuildStatus::BuildFailed,
                    format!("pipeline panicked: {}", message),
                )
            },
        )
    }
}

fn progress_bar(len: u64) -> ProgressBar {
    let bar = ProgressBar::new(len);
    if let Ok(style) =
        ProgressStyle::with_template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
    {
        bar.set_style(style.progress_chars("#>-"));
    }
    bar
}

/// Write `summary.json` into `dist_dir`.
pub fn write_summary(summary: &Summary, dist_dir: &Path) -> Result<PathBuf> {
    let path = dist_dir.join(SUMMARY_FILE);
    write_atomic(&path, summary.to_json()?.as_bytes())?;
    Ok(path)
}

/// Run the matrix described by `config`.
pub fn run(config: &FleetConfig, options: &RunOptions) -> Result<Summary> {
    let registry = config.registry()?;
    let profiles = registry.select(&options.targets)?;

    tracing::info!(
        "Building {} for {} target(s): {}",
        config.project.name,
        profiles.len(),
        profiles
            .iter()
            .map(|p| p.id.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );

    let orchestrator = MatrixOrchestrator::new(PipelineContext::from_config(config, options));
    let summary = orchestrator.run(&profiles, options.progress)?;
    let path = write_summary(&summary, &config.build.dist_dir)?;
    tracing::info!("Wrote {}", path.display());
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::elf::ElfIdentity;
    use crate::builder::toolchain::{ToolchainProbe, ToolchainSpec};
    use crate::cache::{install_list, CacheBackend, CacheKey, EntryPart};
    use crate::core::error::PipelineError;
    use crate::test_support::fixtures::{arm64, fake_toolchain, pi_zero};
    use crate::test_support::{FakeBuildSystem, FakeToolchains, Harness, MemoryPublisher};
    use goblin::elf::header::EM_AARCH64;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[test]
    fn test_unavailable_compiler_does_not_stop_other_targets() {
        let harness =
            Harness::new().with_toolchains(FakeToolchains::new().unavailable("pi-zero"));
        let summary = harness.run(&[pi_zero(), arm64()]);

        let statuses = summary.statuses();
        assert_eq!(statuses["pi-zero"], BuildStatus::CompilerUnavailable);
        assert_eq!(statuses["arm64"], BuildStatus::Success);
        assert_eq!(
            harness.publisher.names(),
            ["v4l2rtspserver-arm64.tar.gz"]
        );
        assert!(!harness.log.contains("install pi-zero"));

        let failed = summary.get("pi-zero").unwrap();
        assert!(failed.error.as_deref().unwrap().contains("arm-linux-gnueabi-gcc"));
        assert!(failed.binary_paths.is_empty());
    }

    #[test]
    fn test_results_follow_profile_order() {
        let harness = Harness::new();
        let summary = harness.run(&[pi_zero(), arm64()]);

        let order: Vec<&str> = summary.results.iter().map(|r| r.target.as_str()).collect();
        assert_eq!(order, ["pi-zero", "arm64"]);
        assert_eq!(summary.succeeded_count(), 2);
    }

    #[test]
    fn test_missing_primary_is_not_published_but_cache_persists() {
        let harness = Harness::new().with_build_system(FakeBuildSystem::new().skip_primary("arm64"));
        let summary = harness.run(&[arm64()]);

        assert_eq!(summary.statuses()["arm64"], BuildStatus::PackagingFailed);
        assert!(harness.publisher.names().is_empty());

        let install = harness.log.position("install arm64").unwrap();
        let put = harness.log.position("cache-put arm64").unwrap();
        let configure = harness.log.position("configure arm64").unwrap();
        assert!(install < put);
        assert!(put < configure);
        assert_eq!(harness.backend.targets(), ["arm64"]);
    }

    #[test]
    fn test_primary_build_failure_does_not_stop_other_targets() {
        let harness = Harness::new().with_build_system(FakeBuildSystem::new().fail_build("pi-zero"));
        let summary = harness.run(&[pi_zero(), arm64()]);

        let failed = summary.get("pi-zero").unwrap();
        assert_eq!(failed.status, BuildStatus::BuildFailed);
        assert!(failed.error.as_deref().unwrap().contains("Error 2"));
        assert!(failed.publication.is_none());
        assert_eq!(summary.statuses()["arm64"], BuildStatus::Success);
        assert_eq!(harness.publisher.names(), ["v4l2rtspserver-arm64.tar.gz"]);
    }

    #[test]
    fn test_missing_native_package_is_a_warning() {
        let harness =
            Harness::new().with_build_system(FakeBuildSystem::new().without_native_package());
        let summary = harness.run(&[arm64()]);

        let result = summary.get("arm64").unwrap();
        assert_eq!(result.status, BuildStatus::Success);
        assert_eq!(
            result.warnings,
            ["native packaging produced no package file"]
        );
        assert!(result.publication.is_some());
    }

    #[test]
    fn test_without_secondary_target() {
        let harness = Harness::new().without_secondary();
        let summary = harness.run(&[arm64()]);

        let result = summary.get("arm64").unwrap();
        assert_eq!(result.status, BuildStatus::Success);
        assert_eq!(result.binary_paths.len(), 1);
        assert!(result.warnings.is_empty());
        assert!(harness.log.contains("build arm64 v4l2rtspserver"));
        assert!(!harness.log.contains("build arm64 v4l2wrapper"));
    }

    #[test]
    fn test_rejected_upload_is_publish_failure() {
        let harness = Harness::new().with_publisher(
            MemoryPublisher::new(Default::default()).reject("v4l2rtspserver-arm64.tar.gz"),
        );
        let summary = harness.run(&[pi_zero(), arm64()]);

        let failed = summary.get("arm64").unwrap();
        assert_eq!(failed.status, BuildStatus::PublishFailed);
        let error = failed.error.as_deref().unwrap();
        assert!(error.contains("v4l2rtspserver-arm64.tar.gz"));
        assert!(error.contains("storage quota exceeded"));
        assert!(failed.publication.is_none());

        assert_eq!(summary.statuses()["pi-zero"], BuildStatus::Success);
        assert_eq!(harness.publisher.names(), ["v4l2rtspserver-pi-zero.tar.gz"]);
        assert!(summary.any_produced_artifact());
    }

    #[test]
    fn test_unusable_strip_tool_fails_verification() {
        let harness =
            Harness::new().with_toolchains(FakeToolchains::new().strip("fleet-test-no-such-strip"));
        let summary = harness.run(&[arm64()]);

        let result = summary.get("arm64").unwrap();
        assert_eq!(result.status, BuildStatus::VerificationFailed);
        assert!(result
            .error
            .as_deref()
            .unwrap()
            .contains("strip tool is not usable"));
    }

    #[test]
    fn test_rerun_is_idempotent() {
        let harness = Harness::new();
        let name = "v4l2rtspserver-arm64.tar.gz";

        let first = harness.run(&[arm64()]);
        let first_bytes = harness.publisher.bytes(name).unwrap();
        let second = harness.run(&[arm64()]);
        let second_bytes = harness.publisher.bytes(name).unwrap();

        assert_eq!(first.statuses(), second.statuses());
        assert_eq!(first_bytes, second_bytes);
        // The second run starts from the persisted cache entry.
        assert!(second.get("arm64").unwrap().warnings.is_empty());
    }

    #[test]
    fn test_secondary_failure_keeps_success() {
        let harness =
            Harness::new().with_build_system(FakeBuildSystem::new().fail_secondary("arm64"));
        let summary = harness.run(&[arm64()]);

        let result = summary.get("arm64").unwrap();
        assert_eq!(result.status, BuildStatus::Success);
        assert_eq!(result.binary_paths.len(), 1);
        assert!(result.warnings.iter().any(|w| w.contains("secondary build")));
        assert!(result.publication.is_some());
    }

    #[test]
    fn test_targets_only_touch_their_own_cache_entries() {
        let harness = Harness::new();
        let zero = pi_zero();
        let key = CacheKey::for_profile(&zero, &install_list(&["cmake".to_string()], &zero));
        for part in EntryPart::ALL {
            harness.backend.put(&key, part, b"seed").unwrap();
        }

        let summary = harness.run(&[arm64()]);

        assert!(!harness.log.contains("cache-get pi-zero"));
        let result = summary.get("arm64").unwrap();
        let identity = ElfIdentity::read(&result.binary_paths[0]).unwrap();
        assert_eq!(identity.machine, EM_AARCH64);
        assert!(harness.work_dir().join("arm64/deps").is_dir());
        assert!(!harness.work_dir().join("pi-zero").exists());
    }

    #[test]
    fn test_cancelled_before_start() {
        let harness = Harness::new();
        harness.cancel.cancel();
        let summary = harness.run(&[pi_zero(), arm64()]);

        assert!(summary
            .results
            .iter()
            .all(|r| r.status == BuildStatus::Cancelled));
        assert!(harness.publisher.names().is_empty());
        assert!(!harness.log.any_starts_with("install"));
        assert!(!summary.any_produced_artifact());
    }

    #[test]
    fn test_verification_failure_is_still_published() {
        let harness = Harness::new().with_build_system(FakeBuildSystem::new().wrong_arch("arm64"));
        let summary = harness.run(&[arm64()]);

        let result = summary.get("arm64").unwrap();
        assert_eq!(result.status, BuildStatus::VerificationFailed);
        assert!(result.error.as_deref().unwrap().contains("x86-64"));
        assert!(result.publication.is_some());
        assert_eq!(harness.publisher.names(), ["v4l2rtspserver-arm64.tar.gz"]);
    }

    struct PanicsOn(&'static str);

    impl ToolchainProbe for PanicsOn {
        fn resolve(&self, profile: &TargetProfile) -> Result<ToolchainSpec, PipelineError> {
            if profile.id.as_str() == self.0 {
                panic!("probe exploded");
            }
            Ok(fake_toolchain(profile))
        }
    }

    #[test]
    fn test_panicking_pipeline_is_isolated() {
        let harness = Harness::new();
        let mut ctx = harness.context();
        ctx.probe = Arc::new(PanicsOn("pi-zero"));

        let summary = MatrixOrchestrator::new(ctx)
            .run(&[pi_zero(), arm64()], false)
            .unwrap();

        let crashed = summary.get("pi-zero").unwrap();
        assert_eq!(crashed.status, BuildStatus::BuildFailed);
        assert!(crashed.error.as_deref().unwrap().contains("probe exploded"));
        assert_eq!(summary.statuses()["arm64"], BuildStatus::Success);
    }

    #[test]
    fn test_profile_parallelism_reaches_the_build() {
        let harness = Harness::new();
        harness.run(&[pi_zero(), arm64()]);

        assert_eq!(harness.build_system.parallelism_for("pi-zero"), Some(2));
        assert_eq!(harness.build_system.parallelism_for("arm64"), Some(4));
    }

    #[test]
    fn test_write_summary() {
        let harness = Harness::new();
        let summary = harness.run(&[arm64()]);
        let dist = TempDir::new().unwrap();

        let path = write_summary(&summary, dist.path()).unwrap();
        assert_eq!(path, dist.path().join(SUMMARY_FILE));

        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(json["project"], "v4l2rtspserver");
        assert_eq!(json["results"][0]["target"], "arm64");
        assert_eq!(json["results"][0]["status"], "Success");
    }
}
