//! Core types and utilities shared across the fast-convolution DSP stack.
//!
//! This crate has no knowledge of any particular hardware front end or
//! network transport; it only defines the sample types, error taxonomy and
//! logging setup that the rest of the workspace builds on.

/// Git version string, set at compile time.
pub const GIT_VERSION: &str = git_version::git_version!(fallback = "unknown");
/// Crate version followed by the git version string, e.g. "0.1.0-aabbccdd".
pub const BUILD_VERSION: &str = const_format::formatcp!("{}-{}", env!("CARGO_PKG_VERSION"), GIT_VERSION);

pub mod debug;
pub mod error;
pub mod types;

pub use error::CoreError;
pub use types::{BlockCount, ComplexSample, DemodKind, PlanningLevel, RealSample, SampleCount, ND};
