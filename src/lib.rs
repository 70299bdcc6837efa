//! Fleet - parallel cross-compilation of one CMake project for many ARM boards
//!
//! This crate provides the core library functionality for Fleet: target
//! profiles, toolchain probing, the per-target dependency cache, the
//! configure/build/package/verify/publish pipeline, and the matrix that runs
//! one pipeline per target.

pub mod builder;
pub mod cache;
pub mod core;
pub mod ops;
pub mod package;
pub mod publish;
pub mod util;
pub mod verify;

/// Fakes for every external seam of the pipeline.
///
/// This module is only available when compiling with `--cfg test` or
/// running tests.
#[cfg(test)]
pub mod test_support;

pub use core::{BuildResult, BuildStatus, PipelineError, ProfileRegistry, Summary, TargetProfile};
pub use util::config::FleetConfig;
