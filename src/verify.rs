//! Post-package binary checks.

use std::time::Duration;

use crate::builder::elf::ElfIdentity;
use crate::builder::toolchain::ToolchainSpec;
use crate::core::error::PipelineError;
use crate::core::profile::TargetProfile;
use crate::package::PackageBundle;
use crate::util::cancel::CancelToken;
use crate::util::process::ProcessBuilder;

/// What verification established about a bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verified {
    pub identity: ElfIdentity,
    pub binary_size: u64,
}

/// Sanity checks on a packaged primary binary.
///
/// All checks run; every failure is collected into one
/// [`PipelineError::VerificationFailed`].
#[derive(Debug, Clone)]
pub struct VerificationStage {
    timeout: Duration,
    cancel: CancelToken,
}

impl VerificationStage {
    pub fn new(timeout: Duration, cancel: CancelToken) -> Self {
        VerificationStage { timeout, cancel }
    }

    pub fn verify(
        &self,
        profile: &TargetProfile,
        toolchain: &ToolchainSpec,
        bundle: &PackageBundle,
    ) -> Result<Verified, PipelineError> {
        let mut issues = Vec::new();
        let binary = bundle.primary();

        let binary_size = match std::fs::metadata(binary) {
            Ok(meta) => meta.len(),
            Err(e) => {
                issues.push(format!("cannot stat {}: {}", binary.display(), e));
                0
            }
        };
        if binary_size == 0 {
            issues.push(format!("{} is empty", binary.display()));
        }

        let identity = match ElfIdentity::read(binary) {
            Ok(identity) => {
                if let Err(mismatch) = identity.check(profile.architecture, profile.float_abi) {
                    issues.push(mismatch);
                }
                Some(identity)
            }
            Err(e) => {
                issues.push(format!("{:#}", e));
                None
            }
        };

        let strip = ProcessBuilder::new(&toolchain.strip)
            .arg("--version")
            .timeout(self.timeout)
            .cancel_on(&self.cancel);
        if let Err(e) = strip.exec_and_check() {
            issues.push(format!("strip tool is not usable: {:#}", e));
        }

        match identity {
            Some(identity) if issues.is_empty() => {
                tracing::info!("Verified {} ({} bytes)", binary.display(), binary_size);
                Ok(Verified {
                    identity,
                    binary_size,
                })
            }
            _ => {
                for issue in &issues {
                    tracing::warn!("verification: {}", issue);
                }
                Err(PipelineError::VerificationFailed {
                    target: profile.id.clone(),
                    issues,
                })
            }
        }
    }
}
