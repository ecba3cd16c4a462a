//! Error types for presetbuild
//!
//! Domain-specific error types using thiserror.

use std::path::PathBuf;
use thiserror::Error;

/// Template, expression and preset resolution errors
///
/// Every failure inside the resolution engine surfaces as one of these
/// variants. The engine never recovers from them internally.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TemplateError {
    /// A placeholder path does not exist in the context
    #[error("Cannot resolve path '{path}' in template context")]
    UnresolvablePath { path: String },

    /// A list segment of a path is not a valid index
    #[error("List index must be an integer for path '{path}'")]
    InvalidIndex { path: String },

    /// A list segment of a path is out of range
    #[error("Index {index} out of range for path '{path}'")]
    IndexOutOfRange { path: String, index: usize },

    /// Circular reference detected while resolving
    #[error("Circular dependency detected: {}", cycle.join(" -> "))]
    CircularDependency { cycle: Vec<String> },

    /// Cycle reported by the topological sorter without a recoverable chain
    #[error("Circular dependency detected")]
    UnresolvedCycle,

    /// Expression text could not be parsed
    #[error("Invalid expression syntax: {message}")]
    Syntax { message: String },

    /// A syntax construct outside the whitelist
    #[error("Expression node '{node}' is not allowed")]
    NodeNotAllowed { node: String },

    /// A bare identifier other than True/False/None
    #[error("Name '{name}' is not allowed in expressions")]
    NameNotAllowed { name: String },

    /// A function outside the whitelist
    #[error("Function '{name}' is not allowed in expressions")]
    FunctionNotAllowed { name: String },

    /// Keyword arguments passed to a whitelisted function
    #[error("Keyword arguments are not allowed for function '{name}'")]
    KeywordArguments { name: String },

    /// Too few or too many arguments for a whitelisted function
    #[error("Function '{name}' expects {bound} {count} argument{}", if *count == 1 { "" } else { "s" })]
    Arity {
        name: String,
        bound: &'static str,
        count: usize,
    },

    /// A whitelisted function failed to convert its argument
    #[error("Function '{name}' could not convert value: {message}")]
    Conversion { name: String, message: String },

    /// Operator applied to unsupported operand types or values
    #[error("Unsupported operand for '{op}': {message}")]
    Operand { op: String, message: String },

    /// Placeholder outside the permitted prefixes
    #[error("Placeholder '{placeholder}' is not allowed")]
    PlaceholderNotAllowed { placeholder: String },

    /// Preset name not found
    #[error("Preset '{name}' not found. Available: {}", available.join(", "))]
    UnknownPreset { name: String, available: Vec<String> },

    /// Preset inheritance loops back on itself
    #[error("Circular preset dependency detected: {}", chain.join(" -> "))]
    CircularPreset { chain: Vec<String> },

    /// A failure with extra location information prepended
    #[error("{label}: {source}")]
    Located {
        label: String,
        #[source]
        source: Box<TemplateError>,
    },
}

impl TemplateError {
    /// Wrap the error with a human-readable location prefix
    #[must_use]
    pub fn located(self, label: impl Into<String>) -> Self {
        Self::Located {
            label: label.into(),
            source: Box::new(self),
        }
    }

    /// Return the innermost error, skipping location wrappers
    pub fn root(&self) -> &Self {
        match self {
            Self::Located { source, .. } => source.root(),
            other => other,
        }
    }

    pub(crate) fn operand(op: &str, message: impl Into<String>) -> Self {
        Self::Operand {
            op: op.to_string(),
            message: message.into(),
        }
    }
}

/// Configuration loading errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to read a configuration file
    #[error("Failed to read config file '{path}': {error}")]
    ReadError { path: PathBuf, error: String },

    /// Failed to parse a configuration file
    #[error("Failed to parse config file '{path}': {error}")]
    ParseError { path: PathBuf, error: String },

    /// Unsupported configuration file extension
    #[error("Unsupported config format for '{path}' (expected toml, json, yaml or yml)")]
    UnsupportedFormat { path: PathBuf },

    /// Configuration directory missing
    #[error("Configuration directory not found: {path}")]
    DirectoryNotFound { path: PathBuf },

    /// No project definitions were found
    #[error("No project configurations found in '{path}'")]
    NoProjects { path: PathBuf },

    /// A required field is missing or has the wrong type
    #[error("Invalid project configuration in '{path}': {message}")]
    InvalidProject { path: PathBuf, message: String },

    /// Project not found in the store
    #[error("Project '{name}' not found. Available projects: {}", display_available(available))]
    UnknownProject { name: String, available: Vec<String> },

    /// Dependency not found in the store
    #[error("Dependency '{name}' not found. Available projects: {}", display_available(available))]
    UnknownDependency { name: String, available: Vec<String> },

    /// A toolchain entry is malformed
    #[error("Invalid toolchain configuration in '{path}': {message}")]
    InvalidToolchain { path: PathBuf, message: String },

    /// Project dependency cycle
    #[error("Circular dependency detected: {}", cycle.join(" -> "))]
    CircularDependency { cycle: Vec<String> },
}

fn display_available(available: &[String]) -> String {
    if available.is_empty() {
        "<none>".to_string()
    } else {
        available.join(", ")
    }
}

/// Toolchain selection errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ToolchainError {
    /// Toolchain name given but blank
    #[error("Toolchain name cannot be empty")]
    EmptyName,

    /// Toolchain not defined by the built-ins or `toolchains` config
    #[error("Unknown toolchain '{name}'. Available toolchains: {}", display_available(available))]
    Unknown { name: String, available: Vec<String> },

    /// Toolchain does not list the project's build system
    #[error("Toolchain '{name}' is not compatible with build system '{build_system}'. Allowed systems: {}", allowed.join(", "))]
    Incompatible {
        name: String,
        build_system: String,
        allowed: Vec<String>,
    },
}

/// Build planning errors
#[derive(Error, Debug)]
pub enum PlanError {
    /// Template resolution failed while planning
    #[error(transparent)]
    Template(#[from] TemplateError),

    /// Configuration lookup failed while planning
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The selected toolchain cannot be used
    #[error(transparent)]
    Toolchain(#[from] ToolchainError),

    /// The project cannot be built with the requested options
    #[error("{message}")]
    Invalid { message: String },

    /// Build directory is required but not configured yet
    #[error("Build directory '{path}' is not configured; run configuration first or use auto mode")]
    NotConfigured { path: PathBuf },
}

impl PlanError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }
}
