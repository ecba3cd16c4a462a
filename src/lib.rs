//! presetbuild - Preset-driven build orchestration
//!
//! This library resolves layered build presets through a sandboxed template
//! and expression engine and turns the result into build plans for CMake,
//! Meson, Bazel, Cargo and Make projects.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`cli`] - Command-line interface parsing and output formatting
//! - [`core`] - Business logic (resolution engine, configuration, planning)
//! - [`config`] - Configuration constants
//! - [`error`] - Error types and handling

pub mod cli;
pub mod config;
pub mod core;
pub mod error;

#[cfg(test)]
pub mod test_utils;
