//! Utility modules.

pub mod archive;
pub mod cancel;
pub mod config;
pub mod fs;
pub mod hash;
pub mod process;

pub use cancel::CancelToken;
pub use config::FleetConfig;
pub use process::ProcessBuilder;
