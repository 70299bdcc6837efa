//! Core data types: target profiles, results, and the error taxonomy.

pub mod best_effort;
pub mod error;
pub mod profile;
pub mod result;

pub use best_effort::BestEffort;
pub use error::PipelineError;
pub use profile::{
    Architecture, CompilerPair, FloatAbi, ProfileError, ProfileRegistry, TargetClass, TargetId,
    TargetProfile,
};
pub use result::{BuildResult, BuildStatus, Summary};
