//! Core business logic module
//!
//! This module contains all business logic for presetbuild. It performs no
//! terminal output; reading configuration files and probing build
//! directories are the only filesystem access.
//!
//! # Submodules
//!
//! - [`value`] - Dynamic value tree shared by configuration and templates
//! - [`context`] - Resolution context and its standard namespaces
//! - [`placeholder`] - `{{path}}` and `[[ expression ]]` syntax helpers
//! - [`expression`] - Sandboxed expression language
//! - [`template`] - Template resolution with memoization and cycle detection
//! - [`resolver`] - Dependency graphs and topological ordering
//! - [`environment`] - Ordered resolution of environment blocks
//! - [`preset`] - Preset inheritance, conditions and merging
//! - [`manifest`] - Configuration store (global, shared and project files)
//! - [`toolchain`] - Compiler toolchains and their selection
//! - [`check`] - Configuration validation
//! - [`plan`] - Build planning and build-step generation

pub mod check;
pub mod context;
pub mod environment;
pub mod expression;
pub mod manifest;
pub mod placeholder;
pub mod plan;
pub mod preset;
pub mod resolver;
pub mod template;
pub mod toolchain;
pub mod value;
