//! Default configuration values

/// Directory under the workspace root holding configuration files
pub const CONFIG_DIR: &str = "config";

/// Subdirectory of [`CONFIG_DIR`] holding one file per project
pub const PROJECTS_DIR: &str = "projects";

/// File stem of the global settings file
pub const GLOBAL_CONFIG_STEM: &str = "config";

/// File stem of the toolchain definitions file
pub const TOOLCHAINS_STEM: &str = "toolchains";

/// Recognised configuration file extensions
pub const CONFIG_EXTENSIONS: &[&str] = &["toml", "json", "yaml", "yml"];

/// Build type used when neither the command line nor the global settings choose one
pub const DEFAULT_BUILD_TYPE: &str = "Debug";

/// Operation mode used when none is requested
pub const DEFAULT_OPERATION: &str = "auto";

/// Log level used when none is configured
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Branch used for projects without git settings
pub const DEFAULT_BRANCH: &str = "main";

/// Supported build systems
pub const BUILD_SYSTEMS: &[&str] = &["bazel", "cargo", "cmake", "make", "meson"];

/// Preset prefix for per-build-type defaults (`configs.debug`, `configs.release`)
pub const BUILD_TYPE_PRESET_PREFIX: &str = "configs.";

/// Generator name fragments (lowercase) marking multi-config generators
pub const MULTI_CONFIG_KEYWORDS: &[&str] = &["multi-config", "visual studio", "xcode"];

/// Literal substituted for placeholders when only syntax is checked
pub const NEUTRAL_PLACEHOLDER_LITERAL: &str = "0";
