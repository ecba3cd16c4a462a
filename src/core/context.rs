//! Resolution context
//!
//! The context is a nested map of namespaces (`user`, `project`, `system`,
//! `env`, `preset`, `builder`, ...) that placeholders are resolved against.
//! [`ContextBuilder`] assembles the standard namespaces for a build.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::warn;

use crate::core::value::{Map, Value};
use crate::error::TemplateError;

/// Nested namespace map available to template resolution
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Context {
    root: Map,
}

impl Context {
    /// Create an empty context
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap an existing namespace map
    pub fn from_map(root: Map) -> Self {
        Self { root }
    }

    /// Borrow the namespace map
    pub fn as_map(&self) -> &Map {
        &self.root
    }

    /// Consume the context, returning the namespace map
    pub fn into_map(self) -> Map {
        self.root
    }

    /// Get a top-level namespace
    pub fn namespace(&self, name: &str) -> Option<&Value> {
        self.root.get(name)
    }

    /// Replace a top-level namespace
    pub fn set_namespace(&mut self, name: &str, value: Value) {
        self.root.insert(name.to_string(), value);
    }

    /// Builder-style variant of [`Context::set_namespace`]
    #[must_use]
    pub fn with_namespace(mut self, name: &str, value: Value) -> Self {
        self.set_namespace(name, value);
        self
    }

    /// Set a value at a dotted path, creating intermediate maps
    ///
    /// Non-map values along the way are replaced by maps.
    pub fn set_path(&mut self, path: &str, value: Value) {
        let mut segments: Vec<&str> = path.split('.').collect();
        let Some(last) = segments.pop() else {
            return;
        };
        let mut current = &mut self.root;
        for segment in segments {
            let entry = current
                .entry(segment.to_string())
                .or_insert_with(|| Value::Map(Map::new()));
            if !matches!(entry, Value::Map(_)) {
                *entry = Value::Map(Map::new());
            }
            let Value::Map(next) = entry else {
                return;
            };
            current = next;
        }
        current.insert(last.to_string(), value);
    }

    /// String entries of a namespace map (non-map namespaces yield nothing)
    ///
    /// Values are stringified the way environment variables are.
    pub fn string_entries(&self, path: &str) -> BTreeMap<String, String> {
        match lookup_path(&self.root, path) {
            Ok(Value::Map(map)) => map
                .iter()
                .map(|(k, v)| (k.clone(), v.to_display_string()))
                .collect(),
            _ => BTreeMap::new(),
        }
    }

    /// Map entries at a dotted path (missing or non-map yields an empty map)
    pub fn map_entries(&self, path: &str) -> Map {
        match lookup_path(&self.root, path) {
            Ok(Value::Map(map)) => map.clone(),
            _ => Map::new(),
        }
    }

    /// Look up the raw (unresolved) value at a dotted path
    pub fn get_path(&self, path: &str) -> Result<&Value, TemplateError> {
        lookup_path(&self.root, path)
    }
}

impl From<Map> for Context {
    fn from(root: Map) -> Self {
        Self::from_map(root)
    }
}

/// Walk a dotted path through maps (by key) and lists (by numeric index)
pub fn lookup_path<'a>(root: &'a Map, path: &str) -> Result<&'a Value, TemplateError> {
    let mut segments = path.split('.');
    let first = segments.next().unwrap_or_default();
    let mut current = root
        .get(first)
        .ok_or_else(|| TemplateError::UnresolvablePath {
            path: path.to_string(),
        })?;

    for segment in segments {
        current = match current {
            Value::Map(map) => map
                .get(segment)
                .ok_or_else(|| TemplateError::UnresolvablePath {
                    path: path.to_string(),
                })?,
            Value::List(items) => {
                let index: usize =
                    segment
                        .parse()
                        .map_err(|_| TemplateError::InvalidIndex {
                            path: path.to_string(),
                        })?;
                items
                    .get(index)
                    .ok_or_else(|| TemplateError::IndexOutOfRange {
                        path: path.to_string(),
                        index,
                    })?
            }
            _ => {
                return Err(TemplateError::UnresolvablePath {
                    path: path.to_string(),
                })
            }
        };
    }
    Ok(current)
}

/// User-selected build parameters
#[derive(Debug, Clone, PartialEq)]
pub struct UserContext {
    /// Branch name with `/` replaced by `_`
    pub branch: String,
    /// Branch name as given
    pub branch_raw: String,
    /// Filesystem-safe branch name
    pub branch_slug: String,
    /// Build type (Debug, Release, ...)
    pub build_type: String,
    /// Generator name, if any
    pub generator: Option<String>,
    /// Operation mode, if any
    pub operation: Option<String>,
    /// Selected toolchain and the tools it resolved to
    pub toolchain: Option<String>,
    pub cc: Option<String>,
    pub cxx: Option<String>,
    pub linker: Option<String>,
    pub launcher: Option<String>,
}

impl UserContext {
    /// Convert to a context namespace
    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        map.insert("branch".into(), self.branch.clone().into());
        map.insert("branch_raw".into(), self.branch_raw.clone().into());
        map.insert("branch_slug".into(), self.branch_slug.clone().into());
        map.insert("build_type".into(), self.build_type.clone().into());
        let optional = [
            ("generator", &self.generator),
            ("operation", &self.operation),
            ("toolchain", &self.toolchain),
            ("cc", &self.cc),
            ("cxx", &self.cxx),
            ("linker", &self.linker),
            ("launcher", &self.launcher),
        ];
        for (key, value) in optional {
            if let Some(value) = value {
                map.insert(key.into(), value.clone().into());
            }
        }
        Value::Map(map)
    }
}

/// Project paths and environment
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProjectContext {
    pub name: String,
    pub source_dir: PathBuf,
    pub build_dir: Option<PathBuf>,
    pub install_dir: Option<PathBuf>,
    pub component_dir: Option<PathBuf>,
    pub environment: BTreeMap<String, String>,
    pub definitions: Map,
}

impl ProjectContext {
    /// Convert to a context namespace
    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        map.insert("name".into(), self.name.clone().into());
        map.insert("source_dir".into(), path_value(&self.source_dir));
        for (key, path) in [
            ("build_dir", &self.build_dir),
            ("install_dir", &self.install_dir),
            ("component_dir", &self.component_dir),
        ] {
            if let Some(path) = path {
                map.insert(key.into(), path_value(path));
            }
        }
        map.insert("environment".into(), string_map(&self.environment));
        map.insert("definitions".into(), Value::Map(self.definitions.clone()));
        Value::Map(map)
    }
}

/// Host system facts
#[derive(Debug, Clone, PartialEq)]
pub struct SystemContext {
    pub os_name: String,
    pub architecture: String,
    pub cpu_count: usize,
}

impl SystemContext {
    /// Detect the current host
    pub fn detect() -> Self {
        Self {
            os_name: std::env::consts::OS.to_string(),
            architecture: std::env::consts::ARCH.to_string(),
            cpu_count: num_cpus::get(),
        }
    }

    /// Convert to a context namespace
    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        map.insert("os".into(), self.os_name.clone().into());
        map.insert("architecture".into(), self.architecture.clone().into());
        map.insert(
            "cpu_count".into(),
            Value::Integer(i64::try_from(self.cpu_count).unwrap_or(i64::MAX)),
        );
        Value::Map(map)
    }
}

/// Builds the variable context for templating and expressions
#[derive(Debug, Clone)]
pub struct ContextBuilder {
    builder_path: PathBuf,
    env: BTreeMap<String, String>,
}

impl ContextBuilder {
    /// Create a builder using the process environment
    pub fn new(builder_path: &Path) -> Self {
        Self::with_env(builder_path, unicode_environment(std::env::vars_os()))
    }

    /// Create a builder with an explicit environment
    pub fn with_env(builder_path: &Path, env: BTreeMap<String, String>) -> Self {
        Self {
            builder_path: builder_path.to_path_buf(),
            env,
        }
    }

    /// Build the user namespace; the branch is sanitized for paths
    pub fn user(
        &self,
        branch: &str,
        build_type: &str,
        generator: Option<&str>,
        operation: Option<&str>,
    ) -> UserContext {
        let sanitized = branch.replace('/', "_");
        UserContext {
            branch: sanitized.clone(),
            branch_raw: branch.to_string(),
            branch_slug: sanitized,
            build_type: build_type.to_string(),
            generator: generator.map(str::to_string),
            operation: operation.map(str::to_string),
            toolchain: None,
            cc: None,
            cxx: None,
            linker: None,
            launcher: None,
        }
    }

    /// Workspace root exposed as `builder.path`
    pub fn builder_path(&self) -> &Path {
        &self.builder_path
    }

    /// Environment visible to templates
    pub fn environment(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    /// Combine all namespaces into a context
    pub fn combined_context(
        &self,
        user: &UserContext,
        project: &ProjectContext,
        system: &SystemContext,
    ) -> Context {
        let mut builder = Map::new();
        builder.insert("path".into(), path_value(&self.builder_path));

        let mut preset = Map::new();
        preset.insert("environment".into(), Value::Map(Map::new()));
        preset.insert("definitions".into(), Value::Map(Map::new()));

        Context::new()
            .with_namespace("user", user.to_value())
            .with_namespace("project", project.to_value())
            .with_namespace("system", system.to_value())
            .with_namespace("env", string_map(&self.env))
            .with_namespace("builder", Value::Map(builder))
            .with_namespace("preset", Value::Map(preset))
    }
}

/// Keep the environment entries that are valid Unicode
///
/// Entries with a non-UTF-8 name or value are skipped with a warning.
pub fn unicode_environment<I>(vars: I) -> BTreeMap<String, String>
where
    I: IntoIterator<Item = (OsString, OsString)>,
{
    vars.into_iter()
        .filter_map(|(name, value)| match (name.into_string(), value.into_string()) {
            (Ok(name), Ok(value)) => Some((name, value)),
            (Ok(name), Err(_)) => {
                warn!("Skipping environment variable '{name}': value is not valid Unicode");
                None
            }
            (Err(name), _) => {
                warn!(
                    "Skipping environment variable '{}': name is not valid Unicode",
                    name.to_string_lossy()
                );
                None
            }
        })
        .collect()
}

/// Convert a string map into a map value
pub fn string_map(map: &BTreeMap<String, String>) -> Value {
    Value::Map(
        map.iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect(),
    )
}

fn path_value(path: &Path) -> Value {
    Value::String(path.display().to_string())
}
