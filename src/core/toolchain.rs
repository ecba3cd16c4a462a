//! Compiler toolchains
//!
//! The registry starts with the built-in `clang`, `gcc`, `msvc` and `rustc`
//! toolchains. A `config/toolchains.{toml,json,yaml,yml}` file adds new ones
//! or merges into the built-ins of the same name. Names are case-insensitive.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Deserializer};
use tracing::debug;

use crate::config::defaults::BUILD_SYSTEMS;
use crate::core::manifest::BuildSystem;
use crate::core::value::{Map, Value};
use crate::error::ToolchainError;

/// Settings a toolchain applies to one build system only
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolchainOverrides {
    pub environment: BTreeMap<String, String>,
    pub definitions: Map,
    pub launcher: Option<String>,
}

impl ToolchainOverrides {
    fn merge(&mut self, other: &Self) {
        self.environment.extend(other.environment.clone());
        self.definitions.extend(other.definitions.clone());
        if other.launcher.is_some() {
            self.launcher.clone_from(&other.launcher);
        }
    }
}

/// A named compiler toolchain
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolchainDefinition {
    pub name: String,
    pub description: Option<String>,
    pub cc: Option<String>,
    pub cxx: Option<String>,
    pub rustc: Option<String>,
    pub linker: Option<String>,
    /// Compiler launcher such as `ccache`
    pub launcher: Option<String>,
    pub environment: BTreeMap<String, String>,
    pub definitions: Map,
    /// Overrides keyed by lowercase build system name
    pub build_overrides: BTreeMap<String, ToolchainOverrides>,
    pub metadata: Map,
    /// Build systems the toolchain supports; empty means all
    pub supports: BTreeSet<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawOverrides {
    #[serde(default)]
    environment: Map,
    #[serde(default)]
    definitions: Map,
    #[serde(default)]
    launcher: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawToolchain {
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    cc: Option<String>,
    #[serde(default)]
    cxx: Option<String>,
    #[serde(default)]
    rustc: Option<String>,
    #[serde(default)]
    linker: Option<String>,
    #[serde(default)]
    launcher: Option<String>,
    #[serde(default)]
    environment: Map,
    #[serde(default)]
    definitions: Map,
    #[serde(default)]
    build_systems: BTreeMap<String, RawOverrides>,
    #[serde(default)]
    metadata: Map,
    #[serde(default, deserialize_with = "system_names")]
    supports: BTreeSet<String>,
}

/// A single build system name or a list of them, lowercased
fn system_names<'de, D: Deserializer<'de>>(deserializer: D) -> Result<BTreeSet<String>, D::Error> {
    let names = match Value::deserialize(deserializer)? {
        Value::Null => Vec::new(),
        Value::List(items) => items.iter().map(Value::to_display_string).collect(),
        single => vec![single.to_display_string()],
    };
    Ok(names
        .into_iter()
        .map(|name| name.trim().to_lowercase())
        .filter(|name| !name.is_empty())
        .collect())
}

fn stringify(map: Map) -> BTreeMap<String, String> {
    map.into_iter()
        .map(|(key, value)| (key, value.to_display_string()))
        .collect()
}

fn trimmed(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl ToolchainDefinition {
    /// Parse one toolchain entry; unknown keys are rejected
    pub fn from_value(name: &str, value: &Value) -> Result<Self, String> {
        let json = serde_json::to_value(value).map_err(|e| format!("toolchain '{name}': {e}"))?;
        let raw: RawToolchain =
            serde_json::from_value(json).map_err(|e| format!("toolchain '{name}': {e}"))?;

        let environment = stringify(raw.environment);
        let build_overrides = raw
            .build_systems
            .into_iter()
            .map(|(system, overrides)| (system.trim().to_lowercase(), overrides))
            .filter(|(system, _)| !system.is_empty())
            .map(|(system, overrides)| {
                (
                    system,
                    ToolchainOverrides {
                        environment: stringify(overrides.environment),
                        definitions: overrides.definitions,
                        launcher: trimmed(overrides.launcher),
                    },
                )
            })
            .collect();

        Ok(Self {
            name: name.to_string(),
            description: raw.description,
            cc: raw.cc.or_else(|| environment.get("CC").cloned()),
            cxx: raw.cxx.or_else(|| environment.get("CXX").cloned()),
            rustc: raw.rustc.or_else(|| environment.get("RUSTC").cloned()),
            linker: raw.linker,
            launcher: trimmed(raw.launcher),
            environment,
            definitions: raw.definitions,
            build_overrides,
            metadata: raw.metadata,
            supports: raw.supports,
        })
    }

    /// Layer `other` over this definition, keeping this name
    #[must_use]
    pub fn merge(&self, other: &Self) -> Self {
        let mut merged = self.clone();
        merged.environment.extend(other.environment.clone());
        merged.definitions.extend(other.definitions.clone());
        for (system, overrides) in &other.build_overrides {
            merged
                .build_overrides
                .entry(system.clone())
                .or_default()
                .merge(overrides);
        }
        merged.metadata.extend(other.metadata.clone());
        if !other.supports.is_empty() {
            merged.supports.clone_from(&other.supports);
        }
        let pick = |theirs: &Option<String>, ours: &Option<String>| {
            theirs.clone().filter(|v| !v.is_empty()).or_else(|| ours.clone())
        };
        merged.description = pick(&other.description, &self.description);
        merged.cc = pick(&other.cc, &self.cc);
        merged.cxx = pick(&other.cxx, &self.cxx);
        merged.rustc = pick(&other.rustc, &self.rustc);
        merged.linker = pick(&other.linker, &self.linker);
        merged.launcher = pick(&other.launcher, &self.launcher);
        merged
    }

    pub fn resolved_cc(&self) -> Option<&str> {
        self.cc.as_deref().or_else(|| self.environment.get("CC").map(String::as_str))
    }

    pub fn resolved_cxx(&self) -> Option<&str> {
        self.cxx.as_deref().or_else(|| self.environment.get("CXX").map(String::as_str))
    }

    pub fn resolved_linker(&self) -> Option<&str> {
        self.linker
            .as_deref()
            .or_else(|| self.environment.get("LINKER").map(String::as_str))
    }

    /// Launcher for `build_system`, preferring its override
    pub fn resolve_launcher(&self, build_system: Option<BuildSystem>) -> Option<&str> {
        build_system
            .and_then(|system| self.build_overrides.get(system.as_str()))
            .and_then(|overrides| overrides.launcher.as_deref())
            .or(self.launcher.as_deref())
    }

    /// Whether the toolchain can drive `build_system`
    pub fn supports(&self, build_system: BuildSystem) -> bool {
        self.supports.is_empty() || self.supports.contains(build_system.as_str())
    }
}

/// Toolchain resolved for one project build
#[derive(Debug, Clone, PartialEq)]
pub struct SelectedToolchain {
    pub name: String,
    pub cc: Option<String>,
    pub cxx: Option<String>,
    pub linker: Option<String>,
    pub launcher: Option<String>,
    build_system: Option<BuildSystem>,
    environment: BTreeMap<String, String>,
    definitions: Map,
}

impl SelectedToolchain {
    /// Apply the toolchain to a merged environment and definition set
    ///
    /// Toolchain entries replace existing ones. `CC`/`CXX` get the launcher
    /// prefix once, and CMake builds receive compiler, launcher and linker
    /// definitions that are not already set.
    pub fn apply(&self, environment: &mut BTreeMap<String, String>, definitions: &mut Map) {
        environment.extend(self.environment.clone());
        definitions.extend(self.definitions.clone());

        let mut set = |key: &str, value: &Option<String>| {
            if let Some(value) = value.as_deref().filter(|v| !v.is_empty()) {
                environment.insert(key.to_string(), value.to_string());
            }
        };
        set("CC", &self.cc);
        set("CXX", &self.cxx);
        if self.linker.is_some() {
            set("CC_LD", &self.linker);
            set("CXX_LD", &self.linker);
        }

        if let Some(launcher) = &self.launcher {
            let prefix = format!("{launcher} ");
            for key in ["CC", "CXX"] {
                if let Some(value) = environment.get_mut(key) {
                    if !value.is_empty() && !value.starts_with(&prefix) {
                        *value = format!("{prefix}{value}");
                    }
                }
            }
        }

        if self.build_system == Some(BuildSystem::Cmake) {
            let mut default = |key: &str, value: Option<Value>| {
                if let Some(value) = value {
                    definitions.entry(key.to_string()).or_insert(value);
                }
            };
            default("CMAKE_C_COMPILER", self.cc.clone().map(Value::String));
            default("CMAKE_CXX_COMPILER", self.cxx.clone().map(Value::String));
            default("CMAKE_C_COMPILER_LAUNCHER", self.launcher.clone().map(Value::String));
            default("CMAKE_CXX_COMPILER_LAUNCHER", self.launcher.clone().map(Value::String));
            let linker = self
                .linker
                .clone()
                .or_else(|| environment.get("CXX_LD").cloned())
                .or_else(|| environment.get("CC_LD").cloned());
            default("CMAKE_LINKER", linker.map(Value::String));
            default("CMAKE_EXPORT_COMPILE_COMMANDS", Some(Value::Bool(true)));
        }
    }
}

/// All toolchains known to a workspace
#[derive(Debug, Clone, PartialEq)]
pub struct ToolchainRegistry {
    definitions: BTreeMap<String, ToolchainDefinition>,
}

impl Default for ToolchainRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl ToolchainRegistry {
    /// Registry without any toolchain
    pub fn empty() -> Self {
        Self {
            definitions: BTreeMap::new(),
        }
    }

    /// Registry holding the built-in toolchains
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        for definition in builtin_toolchains() {
            registry
                .definitions
                .insert(definition.name.clone(), definition);
        }
        registry
    }

    /// Merge the entries of a `toolchains` document
    ///
    /// Entries live under a `toolchains` table, or at the top level when the
    /// document has none.
    pub fn merge_document(&mut self, document: &Map) -> Result<(), String> {
        let entries = match document.get("toolchains") {
            Some(Value::Map(entries)) => entries,
            _ => document,
        };
        for (raw_name, value) in entries {
            let name = raw_name.trim();
            if name.is_empty() || value.as_map().is_none() {
                continue;
            }
            let parsed = ToolchainDefinition::from_value(name, value)?;
            self.merge(parsed);
        }
        Ok(())
    }

    /// Add a definition, merging into an existing one of the same name
    pub fn merge(&mut self, definition: ToolchainDefinition) {
        let key = definition.name.to_lowercase();
        debug!("Registering toolchain '{}'", key);
        let merged = match self.definitions.get(&key) {
            Some(existing) => existing.merge(&definition),
            None => ToolchainDefinition {
                name: key.clone(),
                ..definition
            },
        };
        self.definitions.insert(key, merged);
    }

    pub fn get(&self, name: &str) -> Option<&ToolchainDefinition> {
        self.definitions.get(&name.trim().to_lowercase())
    }

    /// Toolchain names, sorted
    pub fn names(&self) -> Vec<String> {
        self.definitions.keys().cloned().collect()
    }

    /// Pick the toolchain `name` for a build with `build_system`
    pub fn select(
        &self,
        name: &str,
        build_system: Option<BuildSystem>,
    ) -> Result<SelectedToolchain, ToolchainError> {
        let key = name.trim().to_lowercase();
        if key.is_empty() {
            return Err(ToolchainError::EmptyName);
        }
        let definition = self.get(&key).ok_or_else(|| ToolchainError::Unknown {
            name: name.trim().to_string(),
            available: self.names(),
        })?;
        if let Some(system) = build_system {
            if !definition.supports(system) {
                return Err(ToolchainError::Incompatible {
                    name: key,
                    build_system: system.to_string(),
                    allowed: definition.supports.iter().cloned().collect(),
                });
            }
        }

        let mut environment = definition.environment.clone();
        let mut definitions = definition.definitions.clone();
        if let Some(overrides) = build_system.and_then(|s| definition.build_overrides.get(s.as_str())) {
            environment.extend(overrides.environment.clone());
            definitions.extend(overrides.definitions.clone());
        }

        Ok(SelectedToolchain {
            cc: environment
                .get("CC")
                .cloned()
                .or_else(|| definition.resolved_cc().map(str::to_string)),
            cxx: environment
                .get("CXX")
                .cloned()
                .or_else(|| definition.resolved_cxx().map(str::to_string)),
            linker: definition.resolved_linker().map(str::to_string),
            launcher: definition.resolve_launcher(build_system).map(str::to_string),
            name: key,
            build_system,
            environment,
            definitions,
        })
    }

    /// Structural problems of the registered toolchains
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        for (name, definition) in &self.definitions {
            if definition.resolved_cc().is_none()
                && definition.resolved_cxx().is_none()
                && definition.rustc.is_none()
            {
                errors.push(format!(
                    "Toolchain '{name}' must specify at least one compiler (cc/cxx/rustc)"
                ));
            }
            for system in definition.build_overrides.keys() {
                if !BUILD_SYSTEMS.contains(&system.as_str()) {
                    errors.push(format!(
                        "Toolchain '{name}' override references unsupported build system '{system}'"
                    ));
                }
            }
        }
        errors
    }
}

fn pairs(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
    entries
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect()
}

fn cmake_compilers(entries: &[(&str, &str)]) -> BTreeMap<String, ToolchainOverrides> {
    let definitions = entries
        .iter()
        .map(|(k, v)| ((*k).to_string(), Value::from(*v)))
        .collect();
    BTreeMap::from([(
        "cmake".to_string(),
        ToolchainOverrides {
            definitions,
            ..ToolchainOverrides::default()
        },
    )])
}

fn builtin(
    name: &str,
    description: &str,
    supports: &[&str],
    environment: BTreeMap<String, String>,
    build_overrides: BTreeMap<String, ToolchainOverrides>,
) -> ToolchainDefinition {
    ToolchainDefinition {
        name: name.to_string(),
        description: Some(description.to_string()),
        cc: environment.get("CC").cloned(),
        cxx: environment.get("CXX").cloned(),
        rustc: environment.get("RUSTC").cloned(),
        environment,
        build_overrides,
        supports: supports.iter().map(|s| (*s).to_string()).collect(),
        ..ToolchainDefinition::default()
    }
}

fn builtin_toolchains() -> Vec<ToolchainDefinition> {
    vec![
        builtin(
            "clang",
            "LLVM Clang toolchain",
            &["cmake", "meson", "bazel", "make"],
            pairs(&[
                ("CC", "clang"),
                ("CXX", "clang++"),
                ("CPP", "clang -E"),
                ("AR", "llvm-ar"),
                ("NM", "llvm-nm"),
                ("RANLIB", "llvm-ranlib"),
                ("STRIP", "llvm-strip"),
            ]),
            cmake_compilers(&[
                ("CMAKE_C_COMPILER", "clang"),
                ("CMAKE_CXX_COMPILER", "clang++"),
                ("CMAKE_AR", "llvm-ar"),
                ("CMAKE_RANLIB", "llvm-ranlib"),
            ]),
        ),
        builtin(
            "gcc",
            "GNU Compiler Collection",
            &["cmake", "meson", "bazel", "make"],
            pairs(&[
                ("CC", "gcc"),
                ("CXX", "g++"),
                ("CPP", "gcc -E"),
                ("AR", "gcc-ar"),
                ("NM", "gcc-nm"),
                ("RANLIB", "gcc-ranlib"),
                ("STRIP", "strip"),
            ]),
            cmake_compilers(&[
                ("CMAKE_C_COMPILER", "gcc"),
                ("CMAKE_CXX_COMPILER", "g++"),
                ("CMAKE_AR", "gcc-ar"),
                ("CMAKE_RANLIB", "gcc-ranlib"),
            ]),
        ),
        builtin(
            "msvc",
            "Microsoft Visual C++",
            &["cmake", "meson"],
            pairs(&[("CC", "cl"), ("CXX", "cl"), ("AR", "lib"), ("RC", "rc")]),
            cmake_compilers(&[
                ("CMAKE_C_COMPILER", "cl"),
                ("CMAKE_CXX_COMPILER", "cl"),
                ("CMAKE_RC_COMPILER", "rc"),
            ]),
        ),
        builtin(
            "rustc",
            "Rust toolchain",
            &["cargo"],
            pairs(&[("RUSTC", "rustc"), ("CARGO", "cargo")]),
            BTreeMap::from([(
                "cargo".to_string(),
                ToolchainOverrides {
                    environment: pairs(&[("RUSTC", "rustc")]),
                    ..ToolchainOverrides::default()
                },
            )]),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn document(toml_text: &str) -> Map {
        let value: Value = toml::from_str(toml_text).unwrap();
        value.as_map().cloned().unwrap()
    }

    fn registry(toml_text: &str) -> ToolchainRegistry {
        let mut registry = ToolchainRegistry::with_builtins();
        registry.merge_document(&document(toml_text)).unwrap();
        registry
    }

    #[test]
    fn test_builtins_are_registered() {
        let registry = ToolchainRegistry::with_builtins();
        assert_eq!(registry.names(), vec!["clang", "gcc", "msvc", "rustc"]);
        assert_eq!(registry.get("Clang").unwrap().resolved_cc(), Some("clang"));
        assert!(registry.validate().is_empty());
    }

    #[test]
    fn test_select_is_case_insensitive() {
        let registry = ToolchainRegistry::with_builtins();
        let selected = registry.select(" GCC ", Some(BuildSystem::Meson)).unwrap();
        assert_eq!(selected.name, "gcc");
        assert_eq!(selected.cc.as_deref(), Some("gcc"));
        assert_eq!(selected.cxx.as_deref(), Some("g++"));
        assert_eq!(selected.launcher, None);
    }

    #[test]
    fn test_select_unknown_and_empty() {
        let registry = ToolchainRegistry::with_builtins();
        assert_eq!(
            registry.select("icc", None).unwrap_err().to_string(),
            "Unknown toolchain 'icc'. Available toolchains: clang, gcc, msvc, rustc"
        );
        assert_eq!(registry.select("  ", None).unwrap_err(), ToolchainError::EmptyName);
    }

    #[test]
    fn test_select_rejects_incompatible_build_system() {
        let registry = ToolchainRegistry::with_builtins();
        let err = registry.select("rustc", Some(BuildSystem::Cmake)).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Toolchain 'rustc' is not compatible with build system 'cmake'. Allowed systems: cargo"
        );
        let err = registry.select("msvc", Some(BuildSystem::Make)).unwrap_err();
        assert!(matches!(err, ToolchainError::Incompatible { ref allowed, .. } if allowed == &["cmake", "meson"]));
        assert!(registry.select("rustc", None).is_ok());
    }

    #[test]
    fn test_apply_sets_compilers_and_cmake_definitions() {
        let registry = ToolchainRegistry::with_builtins();
        let selected = registry.select("clang", Some(BuildSystem::Cmake)).unwrap();
        let mut env = BTreeMap::from([("CC".to_string(), "gcc".to_string())]);
        let mut defs = Map::new();
        defs.insert("CMAKE_LINKER".into(), "lld".into());
        selected.apply(&mut env, &mut defs);

        assert_eq!(env["CC"], "clang");
        assert_eq!(env["CXX"], "clang++");
        assert_eq!(env["AR"], "llvm-ar");
        assert!(!env.contains_key("CC_LD"));
        assert_eq!(defs["CMAKE_C_COMPILER"], Value::from("clang"));
        assert_eq!(defs["CMAKE_AR"], Value::from("llvm-ar"));
        assert_eq!(defs["CMAKE_LINKER"], Value::from("lld"));
        assert_eq!(defs["CMAKE_EXPORT_COMPILE_COMMANDS"], Value::Bool(true));
    }

    #[test]
    fn test_apply_prefixes_launcher_once() {
        let registry = registry(
            r#"
[toolchains.clang]
linker = "mold"

[toolchains.clang.build_systems.cmake]
launcher = "ccache"
"#,
        );
        let selected = registry.select("clang", Some(BuildSystem::Cmake)).unwrap();
        assert_eq!(selected.launcher.as_deref(), Some("ccache"));

        let mut env = BTreeMap::new();
        let mut defs = Map::new();
        selected.apply(&mut env, &mut defs);
        selected.apply(&mut env, &mut defs);
        assert_eq!(env["CC"], "ccache clang");
        assert_eq!(env["CXX"], "ccache clang++");
        assert_eq!(env["CC_LD"], "mold");
        assert_eq!(env["CXX_LD"], "mold");
        assert_eq!(defs["CMAKE_C_COMPILER"], Value::from("clang"));
        assert_eq!(defs["CMAKE_CXX_COMPILER_LAUNCHER"], Value::from("ccache"));
        assert_eq!(defs["CMAKE_LINKER"], Value::from("mold"));

        // The launcher override is cmake-only.
        let meson = registry.select("clang", Some(BuildSystem::Meson)).unwrap();
        assert_eq!(meson.launcher, None);
        let mut env = BTreeMap::new();
        let mut defs = Map::new();
        meson.apply(&mut env, &mut defs);
        assert_eq!(env["CC"], "clang");
        assert!(defs.is_empty());
    }

    #[test]
    fn test_custom_toolchain_from_flat_document() {
        let registry = registry(
            r#"
[cross]
description = "ARM cross compiler"
supports = "CMake"
environment = { CC = "arm-none-eabi-gcc", SYSROOT = "/opt/arm" }
definitions = { CMAKE_SYSTEM_NAME = "Generic" }
"#,
        );
        let cross = registry.get("cross").unwrap();
        assert_eq!(cross.cc.as_deref(), Some("arm-none-eabi-gcc"));
        assert_eq!(cross.supports, BTreeSet::from(["cmake".to_string()]));
        assert!(registry.select("cross", Some(BuildSystem::Meson)).is_err());

        let selected = registry.select("cross", Some(BuildSystem::Cmake)).unwrap();
        let mut env = BTreeMap::new();
        let mut defs = Map::new();
        selected.apply(&mut env, &mut defs);
        assert_eq!(env["SYSROOT"], "/opt/arm");
        assert_eq!(defs["CMAKE_SYSTEM_NAME"], Value::from("Generic"));
        assert!(!defs.contains_key("CMAKE_CXX_COMPILER"));
    }

    #[test]
    fn test_merge_keeps_builtin_settings() {
        let registry = registry(
            r#"
[toolchains.gcc]
environment = { CC = "gcc-13" }
"#,
        );
        let gcc = registry.get("gcc").unwrap();
        assert_eq!(gcc.environment["CC"], "gcc-13");
        assert_eq!(gcc.cc.as_deref(), Some("gcc-13"));
        assert_eq!(gcc.environment["AR"], "gcc-ar");
        assert_eq!(gcc.supports.len(), 4);
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        let mut registry = ToolchainRegistry::with_builtins();
        let err = registry
            .merge_document(&document("[toolchains.odd]\ncompiler = \"x\"\n"))
            .unwrap_err();
        assert!(err.starts_with("toolchain 'odd':"), "{err}");
        assert!(err.contains("compiler"), "{err}");
    }

    #[test]
    fn test_validate_reports_problems() {
        let registry = registry(
            r#"
[toolchains.empty]
description = "nothing"

[toolchains.odd]
cc = "cc"

[toolchains.odd.build_systems.scons]
launcher = "ccache"
"#,
        );
        let errors = registry.validate();
        assert_eq!(
            errors,
            vec![
                "Toolchain 'empty' must specify at least one compiler (cc/cxx/rustc)".to_string(),
                "Toolchain 'odd' override references unsupported build system 'scons'".to_string(),
            ]
        );
    }
}
