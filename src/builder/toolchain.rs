//! Cross toolchain resolution.
//!
//! A profile names its compilers; resolving it proves they work. Both
//! compilers must be on PATH, must compile and link a trivial translation
//! unit with the profile's flags, and the output must be an ELF binary for
//! the declared architecture. Anything less is
//! [`PipelineError::ToolchainUnresolvable`] for that target only.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::builder::elf::ElfIdentity;
use crate::core::error::PipelineError;
use crate::core::profile::{Architecture, FloatAbi, TargetId, TargetProfile};
use crate::util::cancel::CancelToken;
use crate::util::fs::ensure_dir;
use crate::util::process::{find_executable, ProcessBuilder};

const PROBE_SOURCE: &str = "int main(void) { return 0; }\n";

/// A cross toolchain proven to produce binaries for one profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolchainSpec {
    pub target: TargetId,
    pub cc: PathBuf,
    pub cxx: PathBuf,
    /// Strip tool. Resolved to a path when found on PATH; verification
    /// reports it if it does not run.
    pub strip: PathBuf,
    pub architecture: Architecture,
    pub float_abi: Option<FloatAbi>,
    pub compile_flags: Vec<String>,
    pub link_flags: Vec<String>,
}

/// Maps a profile to a working toolchain.
pub trait ToolchainProbe: Send + Sync {
    fn resolve(&self, profile: &TargetProfile) -> Result<ToolchainSpec, PipelineError>;
}

/// Probes real compilers by compiling a trivial program.
#[derive(Debug, Clone)]
pub struct ToolchainResolver {
    scratch_dir: PathBuf,
    timeout: Duration,
    cancel: CancelToken,
}

impl ToolchainResolver {
    /// Probe outputs are written under `scratch_dir/<target-id>/probe`.
    pub fn new(scratch_dir: impl Into<PathBuf>, timeout: Duration, cancel: CancelToken) -> Self {
        ToolchainResolver {
            scratch_dir: scratch_dir.into(),
            timeout,
            cancel,
        }
    }

    fn locate(&self, profile: &TargetProfile, name: &str) -> Result<PathBuf, PipelineError> {
        find_executable(name).ok_or_else(|| PipelineError::ToolchainUnresolvable {
            profile: profile.id.clone(),
            command: name.to_string(),
            stderr: format!("`{}` not found in PATH", name),
        })
    }

    /// Compile and link the probe program with `compiler`, then check its header.
    fn probe(
        &self,
        profile: &TargetProfile,
        compiler: &Path,
        language: &str,
        out_dir: &Path,
    ) -> Result<(), PipelineError> {
        let output_path = out_dir.join(format!("probe-{}", language.replace('+', "x")));
        let _ = std::fs::remove_file(&output_path);

        let cmd = ProcessBuilder::new(compiler)
            .args(&profile.compile_flags)
            .args(&profile.link_flags)
            .arg("-o")
            .arg(&output_path)
            .args(["-x", language, "-"])
            .stdin(PROBE_SOURCE)
            .timeout(self.timeout)
            .cancel_on(&self.cancel);

        let unresolvable = |stderr: String| PipelineError::ToolchainUnresolvable {
            profile: profile.id.clone(),
            command: cmd.display_command(),
            stderr,
        };

        let output = cmd.exec().map_err(|e| unresolvable(format!("{:#}", e)))?;
        if !output.status.success() {
            return Err(unresolvable(
                String::from_utf8_lossy(&output.stderr).trim_end().to_string(),
            ));
        }

        let identity =
            ElfIdentity::read(&output_path).map_err(|e| unresolvable(format!("{:#}", e)))?;
        identity
            .check(profile.architecture, profile.float_abi)
            .map_err(unresolvable)?;

        tracing::debug!("{} produces {} binaries", compiler.display(), profile.architecture);
        Ok(())
    }
}

impl ToolchainProbe for ToolchainResolver {
    fn resolve(&self, profile: &TargetProfile) -> Result<ToolchainSpec, PipelineError> {
        let cc = self.locate(profile, &profile.compiler.c)?;
        let cxx = self.locate(profile, &profile.compiler.cxx)?;

        let out_dir = self.scratch_dir.join(profile.id.as_str()).join("probe");
        ensure_dir(&out_dir).map_err(|e| PipelineError::ToolchainUnresolvable {
            profile: profile.id.clone(),
            command: format!("mkdir {}", out_dir.display()),
            stderr: format!("{:#}", e),
        })?;

        self.probe(profile, &cc, "c", &out_dir)?;
        self.probe(profile, &cxx, "c++", &out_dir)?;

        let strip_name = profile
            .strip
            .clone()
            .unwrap_or_else(|| infer_strip(&profile.compiler.c));
        let strip = find_executable(&strip_name).unwrap_or_else(|| PathBuf::from(&strip_name));

        tracing::info!(
            "Resolved toolchain: cc={}, cxx={}, strip={}",
            cc.display(),
            cxx.display(),
            strip.display()
        );

        Ok(ToolchainSpec {
            target: profile.id.clone(),
            cc,
            cxx,
            strip,
            architecture: profile.architecture,
            float_abi: profile.float_abi,
            compile_flags: profile.compile_flags.clone(),
            link_flags: profile.link_flags.clone(),
        })
    }
}

/// Infer the strip tool from a C compiler name.
///
/// - arm-linux-gnueabihf-gcc -> arm-linux-gnueabihf-strip
/// - aarch64-linux-gnu-clang -> aarch64-linux-gnu-strip
/// - gcc, cc -> strip
pub fn infer_strip(cc: &str) -> String {
    for suffix in ["-gcc", "-g++", "-cc", "-clang"] {
        if let Some(prefix) = cc.strip_suffix(suffix) {
            return format!("{}-strip", prefix);
        }
    }
    "strip".to_string()
}
