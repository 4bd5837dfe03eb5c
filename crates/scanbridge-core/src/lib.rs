//! Core vocabulary for the scanbridge enrollment bridge.
//!
//! This crate holds everything the other crates agree on without doing any
//! I/O: the error taxonomy, validated request parameters, session identity,
//! and the progress snapshot that pollers read.

pub mod constants;
pub mod error;
pub mod snapshot;
pub mod types;

pub use error::{Error, Result};
pub use snapshot::{FailureKind, Phase, ProgressSnapshot, percent_complete};
pub use types::*;

/// Version info
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
