//! High-level operations.
//!
//! This module wires the pipeline steps together and fans them out over the
//! selected targets.

pub mod matrix;
pub mod pipeline;

pub use matrix::{run, write_summary, MatrixOrchestrator};
pub use pipeline::{run_target, PipelineContext, RunOptions};
