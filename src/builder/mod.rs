//! Cross build driving.
//!
//! This module resolves cross toolchains and drives the wrapped CMake project
//! through configure and build for one target at a time.

pub mod cmake;
pub mod elf;
pub mod events;
pub mod executor;
pub mod toolchain;

pub use cmake::{BuildSystem, CMakeProject, ConfigureRequest};
pub use elf::ElfIdentity;
pub use events::{BuildEvent, EventSink, Step, StepReporter};
pub use executor::{BuildOutputs, BuildState, ExecutorSettings, TargetBuildExecutor};
pub use toolchain::{ToolchainProbe, ToolchainResolver, ToolchainSpec};
