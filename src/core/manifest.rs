//! Configuration store
//!
//! Loads the workspace configuration from `<root>/config/`:
//!
//! - `config.{toml,json,yaml,yml}`: global settings (`[global]`)
//! - `toolchains.{toml,json,yaml,yml}`: toolchains merged into the built-ins
//! - any other top-level file: a shared config whose `[presets]` are shared
//! - `projects/*.{toml,json,yaml,yml}`: one project per file

use std::collections::{BTreeMap, BTreeSet};
use std::ffi::OsStr;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{debug, warn};

use crate::config::defaults::{
    BUILD_SYSTEMS, CONFIG_DIR, CONFIG_EXTENSIONS, DEFAULT_BUILD_TYPE, DEFAULT_LOG_LEVEL,
    DEFAULT_OPERATION, GLOBAL_CONFIG_STEM, PROJECTS_DIR, TOOLCHAINS_STEM,
};
use crate::core::preset::PresetRepository;
use crate::core::toolchain::ToolchainRegistry;
use crate::core::value::{Map, Value};
use crate::error::ConfigError;

/// Global settings (`[global]` in `config.toml`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalConfig {
    /// Build type used when none is requested
    pub default_build_type: String,
    /// Operation mode used when none is requested
    pub default_operation: String,
    /// Log level for the command line
    pub log_level: String,
    /// Optional log file
    pub log_file: Option<String>,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            default_build_type: DEFAULT_BUILD_TYPE.to_string(),
            default_operation: DEFAULT_OPERATION.to_string(),
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            log_file: None,
        }
    }
}

impl GlobalConfig {
    /// Read only the global settings of `<root>/config`
    ///
    /// A missing directory or settings file yields the defaults.
    pub fn discover(root: &Path) -> Result<Self, ConfigError> {
        let config_dir = root.join(CONFIG_DIR);
        if !config_dir.is_dir() {
            return Ok(Self::default());
        }
        match collect_config_files(&config_dir)?.remove(GLOBAL_CONFIG_STEM) {
            Some(path) => Ok(load_document::<GlobalFile>(&path)?.global),
            None => Ok(Self::default()),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct GlobalFile {
    #[serde(default)]
    global: GlobalConfig,
}

/// A shared configuration file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SharedConfig {
    /// Presets available to every project
    #[serde(default)]
    pub presets: Map,
}

/// Build systems a project can use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildSystem {
    Cmake,
    Meson,
    Bazel,
    Cargo,
    Make,
}

impl BuildSystem {
    /// Lowercase name as written in configuration
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cmake => "cmake",
            Self::Meson => "meson",
            Self::Bazel => "bazel",
            Self::Cargo => "cargo",
            Self::Make => "make",
        }
    }

    /// Whether projects using this system must declare a build directory
    pub fn requires_build_dir(self) -> bool {
        !matches!(self, Self::Bazel)
    }

    /// Executable looked up on `PATH` for availability warnings
    pub fn executable(self) -> &'static str {
        self.as_str()
    }
}

impl FromStr for BuildSystem {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cmake" => Ok(Self::Cmake),
            "meson" => Ok(Self::Meson),
            "bazel" => Ok(Self::Bazel),
            "cargo" => Ok(Self::Cargo),
            "make" => Ok(Self::Make),
            other => Err(format!(
                "build system '{other}' is not supported (allowed: {})",
                BUILD_SYSTEMS.join(", ")
            )),
        }
    }
}

impl fmt::Display for BuildSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Git settings of a project (`[git]`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GitSettings {
    pub url: String,
    pub main_branch: String,
    #[serde(default)]
    pub component_branch: Option<String>,
    #[serde(default)]
    pub auto_stash: bool,
    #[serde(default)]
    pub clone_script: Option<String>,
    #[serde(default)]
    pub update_script: Option<String>,
    /// Raw environment block, resolved after presets
    #[serde(default)]
    pub environment: Map,
}

/// A dependency on another project, with the presets to build it with
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectDependency {
    pub name: String,
    pub presets: Vec<String>,
}

impl<'de> Deserialize<'de> for ProjectDependency {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Name(String),
            Table {
                #[serde(alias = "project")]
                name: String,
                #[serde(default, deserialize_with = "preset_list")]
                presets: Vec<String>,
            },
        }

        let (name, presets) = match Raw::deserialize(deserializer)? {
            Raw::Name(name) => (name, Vec::new()),
            Raw::Table { name, presets } => (name, presets),
        };
        let name = name.trim().to_string();
        if name.is_empty() {
            return Err(serde::de::Error::custom(
                "dependency entries must have a non-empty name",
            ));
        }
        Ok(Self { name, presets })
    }
}

/// Comma-separated string or list of preset names
fn preset_list<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    let raw = Value::deserialize(deserializer)?;
    let names: Vec<String> = match raw {
        Value::Null => Vec::new(),
        Value::String(text) => text.split(',').map(str::to_string).collect(),
        Value::List(items) => items
            .into_iter()
            .map(|item| match item {
                Value::String(name) => Ok(name),
                other => Err(serde::de::Error::custom(format!(
                    "dependency presets must be strings, got {}",
                    other.type_name()
                ))),
            })
            .collect::<Result<_, _>>()?,
        other => {
            return Err(serde::de::Error::custom(format!(
                "dependency presets must be a string or a list, got {}",
                other.type_name()
            )))
        }
    };
    Ok(names
        .into_iter()
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .collect())
}

/// Single value or list, every entry kept as its raw string form
fn one_or_many<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Null => Vec::new(),
        Value::List(items) => items.iter().map(Value::to_display_string).collect(),
        single => vec![single.to_display_string()],
    })
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct ProjectSection {
    name: String,
    source_dir: String,
    #[serde(default)]
    build_dir: Option<String>,
    #[serde(default)]
    install_dir: Option<String>,
    #[serde(default)]
    build_system: Option<String>,
    #[serde(default)]
    generator: Option<String>,
    #[serde(default)]
    toolchain: Option<String>,
    #[serde(default)]
    component_dir: Option<String>,
    #[serde(default = "default_true")]
    build_at_root: bool,
    #[serde(default)]
    source_at_root: Option<bool>,
    #[serde(default)]
    environment: Map,
    #[serde(default, deserialize_with = "one_or_many")]
    extra_config_args: Vec<String>,
    #[serde(default, deserialize_with = "one_or_many")]
    extra_build_args: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ProjectFile {
    project: ProjectSection,
    #[serde(default)]
    git: Option<GitSettings>,
    #[serde(default)]
    presets: Map,
    #[serde(default)]
    dependencies: Vec<ProjectDependency>,
}

/// A project loaded from `projects/<file>`
///
/// Path-like fields hold raw templates; they are resolved at planning time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProjectDefinition {
    pub name: String,
    pub source_dir: String,
    pub build_dir: Option<String>,
    pub install_dir: Option<String>,
    /// Lowercased build system name as configured
    pub build_system: Option<String>,
    pub generator: Option<String>,
    /// Toolchain used when none is requested
    pub toolchain: Option<String>,
    pub component_dir: Option<String>,
    /// Place the build directory under the source root rather than the component
    pub build_at_root: bool,
    /// Configure from the source root rather than the component
    pub source_at_root: bool,
    pub git: Option<GitSettings>,
    pub presets: Map,
    pub dependencies: Vec<ProjectDependency>,
    pub extra_config_args: Vec<String>,
    pub extra_build_args: Vec<String>,
    pub environment: Map,
    /// File the project was loaded from
    pub path: PathBuf,
}

impl ProjectDefinition {
    /// Load a project file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let file: ProjectFile = load_document(path)?;
        Self::from_file(path, file)
    }

    /// Parse a project document; the extension of `path` selects the format
    pub fn parse(path: &Path, text: &str) -> Result<Self, ConfigError> {
        let file: ProjectFile = parse_document(path, text)?;
        Self::from_file(path, file)
    }

    fn from_file(path: &Path, file: ProjectFile) -> Result<Self, ConfigError> {
        let invalid = |message: &str| ConfigError::InvalidProject {
            path: path.to_path_buf(),
            message: message.to_string(),
        };
        let section = file.project;

        let name = section.name.trim().to_string();
        if name.is_empty() {
            return Err(invalid("project.name must not be empty"));
        }
        if section.source_dir.trim().is_empty() {
            return Err(invalid("project.source_dir must not be empty"));
        }
        let build_system = non_empty(section.build_system).map(|s| s.to_ascii_lowercase());
        let build_dir = non_empty(section.build_dir);
        if build_dir.is_some() && build_system.is_none() {
            return Err(invalid(
                "project.build_system is required when project.build_dir is specified",
            ));
        }
        let component_dir = non_empty(section.component_dir);
        let source_at_root = section
            .source_at_root
            .unwrap_or(component_dir.is_none() || section.build_at_root);

        Ok(Self {
            name,
            source_dir: section.source_dir,
            build_dir,
            install_dir: non_empty(section.install_dir),
            build_system,
            generator: non_empty(section.generator),
            toolchain: non_empty(section.toolchain),
            component_dir,
            build_at_root: section.build_at_root,
            source_at_root,
            git: file.git,
            presets: file.presets,
            dependencies: file.dependencies,
            extra_config_args: section.extra_config_args,
            extra_build_args: section.extra_build_args,
            environment: section.environment,
            path: path.to_path_buf(),
        })
    }

    /// Parsed build system, `None` when absent
    pub fn build_system_kind(&self) -> Option<Result<BuildSystem, String>> {
        self.build_system.as_deref().map(BuildSystem::from_str)
    }

    /// Branch used when none is requested
    pub fn default_branch(&self) -> Option<&str> {
        let git = self.git.as_ref()?;
        match (&git.component_branch, &self.component_dir) {
            (Some(branch), Some(_)) => Some(branch),
            _ => Some(&git.main_branch),
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// A dependency together with the presets requested for it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedDependency<'a> {
    pub project: &'a ProjectDefinition,
    pub presets: Vec<String>,
}

/// Every configuration file of a workspace
#[derive(Debug, Clone)]
pub struct ConfigurationStore {
    root: PathBuf,
    config_dir: PathBuf,
    global: GlobalConfig,
    shared: BTreeMap<String, SharedConfig>,
    toolchains: ToolchainRegistry,
    projects: BTreeMap<String, ProjectDefinition>,
}

impl ConfigurationStore {
    /// Load `<root>/config`
    pub fn from_directory(root: &Path) -> Result<Self, ConfigError> {
        Self::from_config_dir(root, &root.join(CONFIG_DIR))
    }

    /// Load an explicit configuration directory for the workspace at `root`
    pub fn from_config_dir(root: &Path, config_dir: &Path) -> Result<Self, ConfigError> {
        if !config_dir.is_dir() {
            return Err(ConfigError::DirectoryNotFound {
                path: config_dir.to_path_buf(),
            });
        }
        debug!("Loading configuration from {}", config_dir.display());

        let mut top_level = collect_config_files(config_dir)?;
        let global = match top_level.remove(GLOBAL_CONFIG_STEM) {
            Some(path) => load_document::<GlobalFile>(&path)?.global,
            None => GlobalConfig::default(),
        };

        let mut toolchains = ToolchainRegistry::with_builtins();
        if let Some(path) = top_level.remove(TOOLCHAINS_STEM) {
            debug!("Loading toolchains from {}", path.display());
            let document: Map = load_document(&path)?;
            toolchains
                .merge_document(&document)
                .map_err(|message| ConfigError::InvalidToolchain {
                    path: path.clone(),
                    message,
                })?;
        }

        let mut shared = BTreeMap::new();
        for (stem, path) in top_level {
            debug!("Loading shared config '{}'", stem);
            shared.insert(stem, load_document::<SharedConfig>(&path)?);
        }

        let projects_dir = config_dir.join(PROJECTS_DIR);
        let mut projects = BTreeMap::new();
        if projects_dir.is_dir() {
            for path in collect_config_files(&projects_dir)?.into_values() {
                let project = ProjectDefinition::load(&path)?;
                debug!("Loaded project '{}' from {}", project.name, path.display());
                if let Some(previous) = projects.insert(project.name.clone(), project) {
                    warn!(
                        "Project '{}' from {} is overridden by a later file",
                        previous.name,
                        previous.path.display()
                    );
                }
            }
        }
        if projects.is_empty() {
            return Err(ConfigError::NoProjects {
                path: config_dir.to_path_buf(),
            });
        }

        Ok(Self {
            root: root.to_path_buf(),
            config_dir: config_dir.to_path_buf(),
            global,
            shared,
            toolchains,
            projects,
        })
    }

    /// Workspace root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Configuration directory
    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn global(&self) -> &GlobalConfig {
        &self.global
    }

    /// Shared configs by file stem
    pub fn shared_configs(&self) -> &BTreeMap<String, SharedConfig> {
        &self.shared
    }

    /// Built-in and configured toolchains
    pub fn toolchains(&self) -> &ToolchainRegistry {
        &self.toolchains
    }

    /// Projects by name
    pub fn projects(&self) -> &BTreeMap<String, ProjectDefinition> {
        &self.projects
    }

    /// Project names, sorted
    pub fn project_names(&self) -> Vec<String> {
        self.projects.keys().cloned().collect()
    }

    /// Look up a project by name
    pub fn get_project(&self, name: &str) -> Result<&ProjectDefinition, ConfigError> {
        self.projects
            .get(name)
            .ok_or_else(|| ConfigError::UnknownProject {
                name: name.to_string(),
                available: self.project_names(),
            })
    }

    /// Preset tables of all shared configs, in file-stem order
    pub fn shared_presets(&self) -> Vec<Map> {
        self.shared
            .values()
            .map(|config| config.presets.clone())
            .collect()
    }

    /// Presets visible to `project`
    pub fn preset_repository(&self, project: &ProjectDefinition) -> PresetRepository {
        PresetRepository::new(&project.presets, &self.shared_presets())
    }

    /// Every preset name defined anywhere in the workspace
    pub fn all_preset_names(&self) -> BTreeSet<String> {
        self.projects
            .values()
            .flat_map(|project| project.presets.keys())
            .chain(self.shared.values().flat_map(|config| config.presets.keys()))
            .cloned()
            .collect()
    }

    /// Dependencies of `name` in build order, excluding the project itself
    ///
    /// Each dependency carries the union of presets its dependents request.
    pub fn resolve_dependency_chain(
        &self,
        name: &str,
    ) -> Result<Vec<ResolvedDependency<'_>>, ConfigError> {
        self.get_project(name)?;

        let mut requested: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let mut visiting = Vec::new();
        let mut visited = BTreeSet::new();
        let mut order = Vec::new();
        self.visit_dependency(
            name,
            &mut requested,
            &mut visiting,
            &mut visited,
            &mut order,
        )?;

        Ok(order
            .into_iter()
            .filter(|project| project != name)
            .filter_map(|project| {
                let definition = self.projects.get(&project)?;
                Some(ResolvedDependency {
                    project: definition,
                    presets: requested.remove(&project).unwrap_or_default(),
                })
            })
            .collect())
    }

    fn visit_dependency(
        &self,
        name: &str,
        requested: &mut BTreeMap<String, Vec<String>>,
        visiting: &mut Vec<String>,
        visited: &mut BTreeSet<String>,
        order: &mut Vec<String>,
    ) -> Result<(), ConfigError> {
        if visiting.iter().any(|entry| entry == name) {
            let mut cycle = visiting.clone();
            cycle.push(name.to_string());
            return Err(ConfigError::CircularDependency { cycle });
        }
        if visited.contains(name) {
            return Ok(());
        }
        let project = self
            .projects
            .get(name)
            .ok_or_else(|| ConfigError::UnknownDependency {
                name: name.to_string(),
                available: self.project_names(),
            })?;

        visiting.push(name.to_string());
        for dependency in &project.dependencies {
            let bucket = requested.entry(dependency.name.clone()).or_default();
            for preset in &dependency.presets {
                if !bucket.contains(preset) {
                    bucket.push(preset.clone());
                }
            }
            self.visit_dependency(&dependency.name, requested, visiting, visited, order)?;
        }
        visiting.pop();

        visited.insert(name.to_string());
        order.push(name.to_string());
        Ok(())
    }
}

/// Configuration files directly inside `dir`, by file stem
///
/// When several files share a stem, the last one in path order wins.
pub fn collect_config_files(dir: &Path) -> Result<BTreeMap<String, PathBuf>, ConfigError> {
    let read_error = |error: std::io::Error| ConfigError::ReadError {
        path: dir.to_path_buf(),
        error: error.to_string(),
    };

    let mut paths = Vec::new();
    for entry in fs::read_dir(dir).map_err(read_error)? {
        let path = entry.map_err(read_error)?.path();
        if path.is_file() && has_config_extension(&path) {
            paths.push(path);
        }
    }
    paths.sort();

    Ok(paths
        .into_iter()
        .filter_map(|path| {
            let stem = path.file_stem().and_then(OsStr::to_str)?.to_string();
            Some((stem, path))
        })
        .collect())
}

fn has_config_extension(path: &Path) -> bool {
    path.extension()
        .and_then(OsStr::to_str)
        .is_some_and(|ext| CONFIG_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
}

/// Read and decode a configuration file
pub fn load_document<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let text = fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
        path: path.to_path_buf(),
        error: e.to_string(),
    })?;
    parse_document(path, &text)
}

/// Decode configuration text; the extension of `path` selects the format
pub fn parse_document<T: DeserializeOwned>(path: &Path, text: &str) -> Result<T, ConfigError> {
    let parse_error = |error: String| ConfigError::ParseError {
        path: path.to_path_buf(),
        error,
    };
    let extension = path
        .extension()
        .and_then(OsStr::to_str)
        .map(str::to_ascii_lowercase);

    match extension.as_deref() {
        Some("toml") => toml::from_str(text).map_err(|e| parse_error(e.to_string())),
        Some("json") => serde_json::from_str(text).map_err(|e| parse_error(e.to_string())),
        Some("yaml" | "yml") => serde_yaml::from_str(text).map_err(|e| parse_error(e.to_string())),
        _ => Err(ConfigError::UnsupportedFormat {
            path: path.to_path_buf(),
        }),
    }
}
