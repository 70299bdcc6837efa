//! OS package manager integration.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;

use crate::core::profile::TargetId;
use crate::util::cancel::CancelToken;
use crate::util::fs::ensure_dir;
use crate::util::process::ProcessBuilder;

/// One install call, with the package manager's caches redirected into the
/// target's own dependency directory.
#[derive(Debug, Clone)]
pub struct InstallRequest {
    pub target: TargetId,
    pub packages: Vec<String>,
    pub archives_dir: PathBuf,
    pub lists_dir: PathBuf,
}

/// Installs packages. Must be idempotent: installing what is already
/// installed succeeds.
pub trait PackageManager: Send + Sync {
    fn install(&self, request: &InstallRequest) -> Result<()>;
}

/// `apt-get` on Debian-family build hosts.
#[derive(Debug, Clone)]
pub struct AptGet {
    update_index: bool,
    timeout: Duration,
    cancel: CancelToken,
}

impl AptGet {
    pub fn new(update_index: bool, timeout: Duration, cancel: CancelToken) -> Self {
        AptGet {
            update_index,
            timeout,
            cancel,
        }
    }

    fn command(&self, request: &InstallRequest) -> ProcessBuilder {
        ProcessBuilder::new("apt-get")
            .arg("-o")
            .arg(format!("Dir::Cache::Archives={}", request.archives_dir.display()))
            .arg("-o")
            .arg(format!("Dir::State::Lists={}", request.lists_dir.display()))
            .arg("-o")
            .arg("DPkg::Lock::Timeout=600")
            .env("DEBIAN_FRONTEND", "noninteractive")
            .timeout(self.timeout)
            .cancel_on(&self.cancel)
    }
}

impl PackageManager for AptGet {
    fn install(&self, request: &InstallRequest) -> Result<()> {
        if request.packages.is_empty() {
            tracing::debug!("no packages to install");
            return Ok(());
        }

        // apt refuses to run without these.
        ensure_dir(&request.archives_dir.join("partial"))?;
        ensure_dir(&request.lists_dir.join("partial"))?;

        if self.update_index {
            self.command(request).arg("update").exec_and_check()?;
        }

        tracing::info!("Installing {}", request.packages.join(" "));
        self.command(request)
            .args(["install", "-y", "--no-install-recommends"])
            .args(&request.packages)
            .exec_and_check()?;
        Ok(())
    }
}
