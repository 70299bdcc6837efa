//! CMake adapter for the wrapped project.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Result};

use crate::builder::toolchain::ToolchainSpec;
use crate::util::cancel::CancelToken;
use crate::util::fs::{ensure_dir, glob_files};
use crate::util::process::{find_cmake, ProcessBuilder};

/// Everything needed to configure one target's build tree.
#[derive(Debug, Clone)]
pub struct ConfigureRequest {
    pub source_dir: PathBuf,
    pub build_dir: PathBuf,
    pub toolchain: ToolchainSpec,
    pub build_type: String,
    /// Merged option map, passed as `-DKEY=VALUE` in key order.
    pub options: BTreeMap<String, String>,
    pub find_root: Option<String>,
}

impl ConfigureRequest {
    /// Arguments for `cmake` configure, cross-compilation markers included.
    pub fn cmake_args(&self) -> Vec<String> {
        let tc = &self.toolchain;
        let mut args = vec![
            "-S".to_string(),
            self.source_dir.display().to_string(),
            "-B".to_string(),
            self.build_dir.display().to_string(),
            format!("-DCMAKE_BUILD_TYPE={}", self.build_type),
            "-DCMAKE_SYSTEM_NAME=Linux".to_string(),
            format!(
                "-DCMAKE_SYSTEM_PROCESSOR={}",
                tc.architecture.cmake_processor()
            ),
            format!("-DCMAKE_C_COMPILER={}", tc.cc.display()),
            format!("-DCMAKE_CXX_COMPILER={}", tc.cxx.display()),
            format!("-DCMAKE_C_FLAGS={}", tc.compile_flags.join(" ")),
            format!("-DCMAKE_CXX_FLAGS={}", tc.compile_flags.join(" ")),
            format!("-DCMAKE_EXE_LINKER_FLAGS={}", tc.link_flags.join(" ")),
            format!("-DCMAKE_STRIP={}", tc.strip.display()),
        ];

        if let Some(root) = &self.find_root {
            args.push(format!("-DCMAKE_FIND_ROOT_PATH={}", root));
        }

        // Host programs, target libraries and headers.
        args.push("-DCMAKE_FIND_ROOT_PATH_MODE_PROGRAM=NEVER".to_string());
        args.push("-DCMAKE_FIND_ROOT_PATH_MODE_LIBRARY=ONLY".to_string());
        args.push("-DCMAKE_FIND_ROOT_PATH_MODE_INCLUDE=ONLY".to_string());

        for (key, value) in &self.options {
            args.push(format!("-D{}={}", key, value));
        }

        args
    }
}

/// The wrapped project's build system.
pub trait BuildSystem: Send + Sync {
    fn configure(&self, request: &ConfigureRequest) -> Result<()>;

    /// Build one named target with at most `parallelism` jobs.
    fn build(&self, build_dir: &Path, target: &str, parallelism: usize) -> Result<()>;

    /// Produce a native package, returning its path if one was generated.
    fn package(&self, build_dir: &Path) -> Result<Option<PathBuf>>;
}

/// CMake-driven build system.
#[derive(Debug, Clone)]
pub struct CMakeProject {
    configure_timeout: Duration,
    build_timeout: Duration,
    package_timeout: Duration,
    cancel: CancelToken,
}

impl CMakeProject {
    pub fn new(
        configure_timeout: Duration,
        build_timeout: Duration,
        package_timeout: Duration,
        cancel: CancelToken,
    ) -> Self {
        CMakeProject {
            configure_timeout,
            build_timeout,
            package_timeout,
            cancel,
        }
    }

    fn cmake(&self) -> Result<ProcessBuilder> {
        let Some(cmake) = find_cmake() else {
            bail!(
                "CMake not found\n\
                 \n\
                 CMake is required to build the project.\n\
                 Install CMake and ensure it's in your PATH."
            );
        };
        Ok(ProcessBuilder::new(cmake).cancel_on(&self.cancel))
    }
}

impl BuildSystem for CMakeProject {
    fn configure(&self, request: &ConfigureRequest) -> Result<()> {
        ensure_dir(&request.build_dir)?;

        tracing::info!("Configuring {}", request.source_dir.display());

        self.cmake()?
            .args(request.cmake_args())
            .timeout(self.configure_timeout)
            .exec_and_check()?;
        Ok(())
    }

    fn build(&self, build_dir: &Path, target: &str, parallelism: usize) -> Result<()> {
        tracing::info!("Building `{}` with {} job(s)", target, parallelism);

        self.cmake()?
            .arg("--build")
            .arg(build_dir)
            .arg("--parallel")
            .arg(parallelism.to_string())
            .args(["--target", target])
            .timeout(self.build_timeout)
            .exec_and_check()?;
        Ok(())
    }

    fn package(&self, build_dir: &Path) -> Result<Option<PathBuf>> {
        self.cmake()?
            .arg("--build")
            .arg(build_dir)
            .args(["--target", "package"])
            .timeout(self.package_timeout)
            .exec_and_check()?;

        Ok(glob_files(build_dir, "*.deb")?.into_iter().next())
    }
}
