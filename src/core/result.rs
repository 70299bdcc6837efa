//! Per-target build results and the matrix summary.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::core::profile::TargetId;
use crate::publish::PublicationHandle;
use crate::util::fs::format_size;

/// Final status of one target pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum BuildStatus {
    Success,
    CompilerUnavailable,
    InstallFailed,
    ConfigureFailed,
    BuildFailed,
    PackagingFailed,
    /// The bundle was published, but a binary sanity check did not pass.
    VerificationFailed,
    PublishFailed,
    Cancelled,
}

impl BuildStatus {
    /// Whether the target produced a published archive.
    pub fn produced_artifact(&self) -> bool {
        matches!(self, BuildStatus::Success | BuildStatus::VerificationFailed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BuildStatus::Success => "success",
            BuildStatus::CompilerUnavailable => "compiler-unavailable",
            BuildStatus::InstallFailed => "install-failed",
            BuildStatus::ConfigureFailed => "configure-failed",
            BuildStatus::BuildFailed => "build-failed",
            BuildStatus::PackagingFailed => "packaging-failed",
            BuildStatus::VerificationFailed => "verification-failed",
            BuildStatus::PublishFailed => "publish-failed",
            BuildStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one target pipeline.
#[derive(Debug, Clone, Serialize)]
pub struct BuildResult {
    pub target: TargetId,
    pub status: BuildStatus,
    /// Primary binary first, then the secondary binary if it was built.
    pub binary_paths: Vec<PathBuf>,
    pub duration_seconds: f64,
    pub binary_size_bytes: u64,
    pub warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publication: Option<PublicationHandle>,
}

impl BuildResult {
    /// A result for a pipeline that ended before producing anything.
    pub fn failed(target: TargetId, status: BuildStatus, error: impl Into<String>) -> Self {
        BuildResult {
            target,
            status,
            binary_paths: Vec::new(),
            duration_seconds: 0.0,
            binary_size_bytes: 0,
            warnings: Vec::new(),
            error: Some(error.into()),
            publication: None,
        }
    }
}

/// Aggregate of every target's result, in profile order.
#[derive(Debug, Clone, Serialize)]
pub struct Summary {
    pub project: String,
    pub results: Vec<BuildResult>,
}

impl Summary {
    pub fn new(project: impl Into<String>, results: Vec<BuildResult>) -> Self {
        Summary {
            project: project.into(),
            results,
        }
    }

    pub fn get(&self, target: &str) -> Option<&BuildResult> {
        self.results.iter().find(|r| r.target.as_str() == target)
    }

    pub fn statuses(&self) -> BTreeMap<String, BuildStatus> {
        self.results
            .iter()
            .map(|r| (r.target.to_string(), r.status))
            .collect()
    }

    /// Partial success counts as success for the run as a whole.
    pub fn any_produced_artifact(&self) -> bool {
        self.results.iter().any(|r| r.status.produced_artifact())
    }

    pub fn succeeded_count(&self) -> usize {
        self.results
            .iter()
            .filter(|r| r.status.produced_artifact())
            .count()
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("failed to serialize summary")
    }

    /// Fixed-width table for terminal output.
    pub fn render_table(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "{:<12} {:<20} {:>10} {:>8}  {}\n",
            "TARGET", "STATUS", "SIZE", "TIME", "ARTIFACT"
        ));

        for r in &self.results {
            let size = if r.binary_size_bytes > 0 {
                format_size(r.binary_size_bytes)
            } else {
                "-".to_string()
            };
            let artifact = r
                .publication
                .as_ref()
                .map(|p| p.location.clone())
                .unwrap_or_else(|| "-".to_string());
            out.push_str(&format!(
                "{:<12} {:<20} {:>10} {:>7.1}s  {}\n",
                r.target.as_str(),
                r.status.as_str(),
                size,
                r.duration_seconds,
                artifact
            ));
        }

        out.push_str(&format!(
            "\n{}/{} target(s) produced an artifact\n",
            self.succeeded_count(),
            self.results.len()
        ));
        out
    }
}
