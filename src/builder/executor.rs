//! Per-target configure and build.
//!
//! [`TargetBuildExecutor`] walks one target through a validated state machine:
//!
//! ```text
//! Init -> ConfigurePending -> Configuring -> Configured | ConfigureFailed
//!      -> BuildPending -> Building -> Built | BuildFailed
//!      -> [SecondaryBuildAttempted] -> Done
//! ```
//!
//! The secondary target is best-effort; its failure is a warning on the
//! returned [`BuildOutputs`].

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use crate::builder::cmake::{BuildSystem, ConfigureRequest};
use crate::builder::events::{Step, StepReporter};
use crate::builder::toolchain::ToolchainSpec;
use crate::core::best_effort::BestEffort;
use crate::core::error::PipelineError;
use crate::core::profile::{TargetId, TargetProfile};

/// Lifecycle of one target's build tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildState {
    Init,
    ConfigurePending,
    Configuring,
    Configured,
    ConfigureFailed,
    BuildPending,
    Building,
    Built,
    BuildFailed,
    SecondaryBuildAttempted,
    Done,
}

impl BuildState {
    pub fn can_transition_to(self, next: BuildState) -> bool {
        use BuildState::*;
        matches!(
            (self, next),
            (Init, ConfigurePending)
                | (ConfigurePending, Configuring)
                | (Configuring, Configured)
                | (Configuring, ConfigureFailed)
                | (Configured, BuildPending)
                | (BuildPending, Building)
                | (Building, Built)
                | (Building, BuildFailed)
                | (Built, SecondaryBuildAttempted)
                | (Built, Done)
                | (SecondaryBuildAttempted, Done)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            BuildState::ConfigureFailed | BuildState::BuildFailed | BuildState::Done
        )
    }
}

impl fmt::Display for BuildState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Tracks the current state and refuses illegal transitions.
#[derive(Debug)]
struct StateMachine {
    target: TargetId,
    state: BuildState,
    history: Vec<BuildState>,
}

impl StateMachine {
    fn new(target: TargetId) -> Self {
        StateMachine {
            target,
            state: BuildState::Init,
            history: vec![BuildState::Init],
        }
    }

    fn advance(&mut self, next: BuildState) -> Result<(), PipelineError> {
        if !self.state.can_transition_to(next) {
            return Err(PipelineError::BuildFailed {
                target: self.target.clone(),
                message: format!("illegal build state transition {} -> {}", self.state, next),
            });
        }
        tracing::debug!("{} -> {}", self.state, next);
        self.state = next;
        self.history.push(next);
        Ok(())
    }
}

/// Project-level build settings shared by every target.
#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    pub source_dir: PathBuf,
    pub work_dir: PathBuf,
    pub primary_target: String,
    pub secondary_target: Option<String>,
    pub build_type: String,
    /// Global option map; profile options override entries here.
    pub options: BTreeMap<String, String>,
}

/// What a finished build left behind.
#[derive(Debug, Clone)]
pub struct BuildOutputs {
    pub build_dir: PathBuf,
    /// Where the primary binary is expected. The build system reporting
    /// success does not guarantee the file exists; packaging checks.
    pub primary: PathBuf,
    pub secondary: BestEffort<PathBuf>,
    pub states: Vec<BuildState>,
}

/// Drives configure and build for one target.
pub struct TargetBuildExecutor {
    build_system: Arc<dyn BuildSystem>,
    settings: ExecutorSettings,
}

impl TargetBuildExecutor {
    pub fn new(build_system: Arc<dyn BuildSystem>, settings: ExecutorSettings) -> Self {
        TargetBuildExecutor {
            build_system,
            settings,
        }
    }

    pub fn build_dir(&self, target: &TargetId) -> PathBuf {
        self.settings.work_dir.join(target.as_str()).join("build")
    }

    /// Global options overridden by the profile's.
    pub fn merged_options(&self, profile: &TargetProfile) -> BTreeMap<String, String> {
        let mut options = self.settings.options.clone();
        options.extend(profile.options.clone());
        options
    }

    pub fn build(
        &self,
        profile: &TargetProfile,
        toolchain: &ToolchainSpec,
        reporter: &StepReporter,
    ) -> Result<BuildOutputs, PipelineError> {
        let mut machine = StateMachine::new(profile.id.clone());
        let build_dir = self.build_dir(&profile.id);

        // Configure
        machine.advance(BuildState::ConfigurePending)?;
        let request = ConfigureRequest {
            source_dir: self.settings.source_dir.clone(),
            build_dir: build_dir.clone(),
            toolchain: toolchain.clone(),
            build_type: self.settings.build_type.clone(),
            options: self.merged_options(profile),
            find_root: profile.find_root.clone(),
        };

        reporter.started(Step::Configure);
        let start = Instant::now();
        machine.advance(BuildState::Configuring)?;
        match self.build_system.configure(&request) {
            Ok(()) => {
                machine.advance(BuildState::Configured)?;
                reporter.finished(Step::Configure, true, start.elapsed());
            }
            Err(e) => {
                machine.advance(BuildState::ConfigureFailed)?;
                reporter.finished(Step::Configure, false, start.elapsed());
                return Err(PipelineError::ConfigureFailed {
                    target: profile.id.clone(),
                    message: format!("{:#}", e),
                });
            }
        }

        // Primary build
        machine.advance(BuildState::BuildPending)?;
        reporter.started(Step::Build);
        let start = Instant::now();
        machine.advance(BuildState::Building)?;
        let primary_target = &self.settings.primary_target;
        if let Err(e) = self
            .build_system
            .build(&build_dir, primary_target, profile.parallelism)
        {
            machine.advance(BuildState::BuildFailed)?;
            reporter.finished(Step::Build, false, start.elapsed());
            return Err(PipelineError::BuildFailed {
                target: profile.id.clone(),
                message: format!("{:#}", e),
            });
        }
        machine.advance(BuildState::Built)?;

        // Secondary build
        let secondary = match &self.settings.secondary_target {
            Some(name) => {
                machine.advance(BuildState::SecondaryBuildAttempted)?;
                self.build_secondary(profile, &build_dir, name, reporter)
            }
            None => BestEffort::absent(),
        };
        reporter.finished(Step::Build, true, start.elapsed());
        machine.advance(BuildState::Done)?;

        Ok(BuildOutputs {
            primary: locate_binary(&build_dir, primary_target),
            build_dir,
            secondary,
            states: machine.history,
        })
    }

    fn build_secondary(
        &self,
        profile: &TargetProfile,
        build_dir: &Path,
        name: &str,
        reporter: &StepReporter,
    ) -> BestEffort<PathBuf> {
        if let Err(e) = self.build_system.build(build_dir, name, profile.parallelism) {
            let err = PipelineError::SecondaryBuildFailed {
                target: profile.id.clone(),
                message: format!("{:#}", e),
            };
            let warning = err.to_string();
            reporter.warning(&warning);
            return BestEffort::failed(warning);
        }

        let path = locate_binary(build_dir, name);
        if path.is_file() {
            BestEffort::ok(path)
        } else {
            let warning = format!("secondary binary `{}` was not produced", name);
            reporter.warning(&warning);
            BestEffort::failed(warning)
        }
    }
}

/// CMake places executables at the top of the build tree unless the project
/// sets `RUNTIME_OUTPUT_DIRECTORY`; `bin/` is the common alternative.
fn locate_binary(build_dir: &Path, name: &str) -> PathBuf {
    let candidates = [build_dir.join(name), build_dir.join("bin").join(name)];
    candidates
        .iter()
        .find(|p| p.is_file())
        .cloned()
        .unwrap_or_else(|| build_dir.join(name))
}
