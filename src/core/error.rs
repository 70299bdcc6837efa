//! Pipeline error taxonomy.

use thiserror::Error;

use crate::core::profile::TargetId;
use crate::core::result::BuildStatus;

/// An error raised by one step of a target pipeline.
///
/// Terminal variants end that target's pipeline; they never cross into
/// another target's pipeline. `VerificationFailed` and `SecondaryBuildFailed`
/// are reported but leave the pipeline running.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("toolchain for `{profile}` is unavailable: `{command}` failed\n{stderr}")]
    ToolchainUnresolvable {
        profile: TargetId,
        command: String,
        stderr: String,
    },

    #[error("dependency install for `{target}` failed: {message}")]
    InstallFailed { target: TargetId, message: String },

    #[error("configure for `{target}` failed: {message}")]
    ConfigureFailed { target: TargetId, message: String },

    #[error("build for `{target}` failed: {message}")]
    BuildFailed { target: TargetId, message: String },

    #[error("secondary build for `{target}` failed: {message}")]
    SecondaryBuildFailed { target: TargetId, message: String },

    #[error("packaging for `{target}` failed: {message}")]
    PackagingFailed { target: TargetId, message: String },

    #[error("verification for `{target}` failed: {}", .issues.join("; "))]
    VerificationFailed { target: TargetId, issues: Vec<String> },

    #[error("publishing `{name}` failed: {message}")]
    PublishFailed { name: String, message: String },

    #[error("pipeline for `{target}` was cancelled")]
    Cancelled { target: TargetId },
}

impl PipelineError {
    /// Status recorded for a target whose pipeline ended with this error.
    pub fn status(&self) -> BuildStatus {
        match self {
            PipelineError::ToolchainUnresolvable { .. } => BuildStatus::CompilerUnavailable,
            PipelineError::InstallFailed { .. } => BuildStatus::InstallFailed,
            PipelineError::ConfigureFailed { .. } => BuildStatus::ConfigureFailed,
            PipelineError::BuildFailed { .. } => BuildStatus::BuildFailed,
            // Best-effort: the primary build already succeeded.
            PipelineError::SecondaryBuildFailed { .. } => BuildStatus::Success,
            PipelineError::PackagingFailed { .. } => BuildStatus::PackagingFailed,
            PipelineError::VerificationFailed { .. } => BuildStatus::VerificationFailed,
            PipelineError::PublishFailed { .. } => BuildStatus::PublishFailed,
            PipelineError::Cancelled { .. } => BuildStatus::Cancelled,
        }
    }

    /// Whether this error stops the pipeline.
    pub fn is_terminal(&self) -> bool {
        !matches!(
            self,
            PipelineError::VerificationFailed { .. } | PipelineError::SecondaryBuildFailed { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> TargetId {
        TargetId::new("pi-zero").unwrap()
    }

    #[test]
    fn test_toolchain_unresolvable_maps_to_compiler_unavailable() {
        let err = PipelineError::ToolchainUnresolvable {
            profile: target(),
            command: "arm-linux-gnueabi-gcc -x c -".to_string(),
            stderr: "not found".to_string(),
        };
        assert_eq!(err.status(), BuildStatus::CompilerUnavailable);
        assert!(err.is_terminal());
        assert!(err.to_string().contains("arm-linux-gnueabi-gcc"));
    }

    #[test]
    fn test_soft_errors_are_not_terminal() {
        let verify = PipelineError::VerificationFailed {
            target: target(),
            issues: vec!["strip missing".into(), "empty binary".into()],
        };
        assert!(!verify.is_terminal());
        assert!(verify.to_string().contains("strip missing; empty binary"));

        let secondary = PipelineError::SecondaryBuildFailed {
            target: target(),
            message: "no rule".into(),
        };
        assert!(!secondary.is_terminal());
        assert_eq!(secondary.status(), BuildStatus::Success);
    }
}
