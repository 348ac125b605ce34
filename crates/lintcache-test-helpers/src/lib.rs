//! Test utilities for lintcache
//!
//! [`VirtualProgram`] is an in-memory [`lintcache_core::ProgramHost`] built
//! from `(path, text)` pairs, so cache scenarios can be written without
//! touching the filesystem.

pub mod program;

pub use program::{options, VirtualProgram, PROJECT_ROOT};
