//! Preset resolution
//!
//! A preset is a named bundle of environment variables, definitions and
//! extra arguments. Presets inherit from any number of parents (`extends`),
//! may be gated by a `condition`, and are merged key by key: later layers
//! override environment and definition entries and append to argument
//! lists without duplicates.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::Serialize;
use tracing::debug;

use crate::core::context::{string_map, Context};
use crate::core::environment::{
    resolve_environment_block, EnvironmentScope, PRESET_DEFINITION_PREFIXES, PRESET_ENV_PREFIXES,
};
use crate::core::resolver::build_dependency_map;
use crate::core::template::TemplateResolver;
use crate::core::value::{Map, Value};
use crate::error::TemplateError;

/// Presets resolved during one top-level resolution, by name
pub type PresetCache = HashMap<String, ResolvedPreset>;

/// Result of resolving one or more presets
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResolvedPreset {
    pub environment: BTreeMap<String, String>,
    pub definitions: Map,
    pub extra_config_args: Vec<String>,
    pub extra_build_args: Vec<String>,
}

impl ResolvedPreset {
    /// Merge `other` on top of `self`
    pub fn merge(&mut self, other: &ResolvedPreset) {
        self.environment.extend(
            other
                .environment
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        self.definitions.extend(
            other
                .definitions
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        extend_unique(&mut self.extra_config_args, &other.extra_config_args);
        extend_unique(&mut self.extra_build_args, &other.extra_build_args);
    }
}

/// Append values not already present, keeping first-seen order
pub fn extend_unique(target: &mut Vec<String>, values: &[String]) {
    let mut existing: BTreeSet<String> = target.iter().cloned().collect();
    for value in values {
        if existing.insert(value.clone()) {
            target.push(value.clone());
        }
    }
}

/// A preset as written in configuration
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PresetDefinition {
    /// Parent presets, possibly templated
    pub extends: Vec<String>,
    /// Optional gate; the preset's own layer applies only when truthy
    pub condition: Option<Value>,
    pub environment: Map,
    pub definitions: Map,
    pub extra_config_args: Vec<Value>,
    pub extra_build_args: Vec<Value>,
}

impl PresetDefinition {
    /// Normalize a raw preset table
    ///
    /// `extends` may be a string or a list; argument lists may be a single
    /// value. Fields of an unexpected type are ignored here and reported by
    /// validation.
    pub fn from_value(raw: &Value) -> Self {
        let Some(table) = raw.as_map() else {
            return Self::default();
        };

        let extends = match table.get("extends") {
            Some(Value::String(parent)) => vec![parent.trim().to_string()],
            Some(Value::List(parents)) => parents
                .iter()
                .map(|parent| parent.to_display_string().trim().to_string())
                .filter(|parent| !parent.is_empty())
                .collect(),
            _ => Vec::new(),
        };

        let args = |key: &str| match table.get(key) {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::List(items)) => items.clone(),
            Some(single) => vec![single.clone()],
        };
        let block = |key: &str| table.get(key).and_then(Value::as_map).cloned().unwrap_or_default();

        Self {
            extends,
            condition: table.get("condition").cloned(),
            environment: block("environment"),
            definitions: block("definitions"),
            extra_config_args: args("extra_config_args"),
            extra_build_args: args("extra_build_args"),
        }
    }
}

/// Presets available to a project
///
/// Project presets shadow shared presets of the same name.
#[derive(Debug, Clone, Default)]
pub struct PresetRepository {
    presets: BTreeMap<String, PresetDefinition>,
}

impl PresetRepository {
    /// Build a repository from raw preset tables
    pub fn new(project_presets: &Map, shared_presets: &[Map]) -> Self {
        let mut presets: BTreeMap<String, PresetDefinition> = project_presets
            .iter()
            .map(|(name, raw)| (name.clone(), PresetDefinition::from_value(raw)))
            .collect();
        for group in shared_presets {
            for (name, raw) in group {
                presets
                    .entry(name.clone())
                    .or_insert_with(|| PresetDefinition::from_value(raw));
            }
        }
        Self { presets }
    }

    /// Names of all presets, sorted
    pub fn available(&self) -> Vec<String> {
        self.presets.keys().cloned().collect()
    }

    /// Whether a preset exists
    pub fn contains(&self, name: &str) -> bool {
        self.presets.contains_key(name)
    }

    /// Look up a preset definition
    pub fn get(&self, name: &str) -> Option<&PresetDefinition> {
        self.presets.get(name)
    }

    /// Resolve the named presets in order and merge them
    ///
    /// Each preset is evaluated at most once, however many times it is
    /// requested or extended.
    pub fn resolve<S: AsRef<str>>(
        &self,
        names: &[S],
        context: &Context,
    ) -> Result<ResolvedPreset, TemplateError> {
        let mut cache = PresetCache::new();
        self.resolve_with_cache(names, context, &mut cache)
    }

    /// Like [`PresetRepository::resolve`], reusing a caller-owned cache
    pub fn resolve_with_cache<S: AsRef<str>>(
        &self,
        names: &[S],
        context: &Context,
        cache: &mut PresetCache,
    ) -> Result<ResolvedPreset, TemplateError> {
        let mut resolved = ResolvedPreset::default();
        for name in names {
            let name = name.as_ref().trim();
            if name.is_empty() {
                continue;
            }
            let preset = self.resolve_single(name, context, &[], cache)?;
            resolved.merge(&preset);
        }
        Ok(resolved)
    }

    fn resolve_single(
        &self,
        name: &str,
        context: &Context,
        seen: &[String],
        cache: &mut PresetCache,
    ) -> Result<ResolvedPreset, TemplateError> {
        if seen.iter().any(|entry| entry == name) {
            let mut chain = seen.to_vec();
            chain.push(name.to_string());
            return Err(TemplateError::CircularPreset { chain });
        }
        if let Some(cached) = cache.get(name) {
            return Ok(cached.clone());
        }
        let preset = self
            .presets
            .get(name)
            .ok_or_else(|| TemplateError::UnknownPreset {
                name: name.to_string(),
                available: self.available(),
            })?;
        debug!("Resolving preset '{}'", name);

        let mut next_seen = seen.to_vec();
        next_seen.push(name.to_string());
        let mut resolved = ResolvedPreset::default();

        for parent in &preset.extends {
            let mut resolver = TemplateResolver::new(layered_context(context, &resolved));
            let parent = resolver
                .resolve_to_string(parent)
                .map_err(|e| e.located(format!("Preset '{name}' extends")))?;
            let parent = parent.trim();
            if parent.is_empty() {
                continue;
            }
            let parent = self.resolve_single(parent, context, &next_seen, cache)?;
            resolved.merge(&parent);
        }

        if let Some(condition) = &preset.condition {
            let mut resolver = TemplateResolver::new(layered_context(context, &resolved));
            let value = resolver
                .resolve(condition)
                .map_err(|e| e.located(format!("Preset '{name}' condition")))?;
            if !value.is_truthy() {
                debug!("Preset '{}' condition is false; skipping its own layer", name);
                cache.insert(name.to_string(), resolved.clone());
                return Ok(resolved);
            }
        }

        if !preset.environment.is_empty() {
            let layered = layered_context(context, &resolved);
            let scope = EnvironmentScope::new("preset", PRESET_ENV_PREFIXES, context)
                .with_inherited(&resolved.environment)
                .with_label(format!("Preset '{name}' environment"));
            let environment = resolve_environment_block(&preset.environment, &scope, &layered)?;
            resolved.environment.extend(environment);
        }

        if !preset.definitions.is_empty() {
            let definitions = self.resolve_definitions(name, preset, context, &resolved)?;
            resolved.definitions.extend(definitions);
        }

        let mut resolver = TemplateResolver::new(layered_context(context, &resolved));
        let config_args = resolve_args(&mut resolver, &preset.extra_config_args)
            .map_err(|e| e.located(format!("Preset '{name}' extra_config_args")))?;
        extend_unique(&mut resolved.extra_config_args, &config_args);
        let build_args = resolve_args(&mut resolver, &preset.extra_build_args)
            .map_err(|e| e.located(format!("Preset '{name}' extra_build_args")))?;
        extend_unique(&mut resolved.extra_build_args, &build_args);

        cache.insert(name.to_string(), resolved.clone());
        Ok(resolved)
    }

    fn resolve_definitions(
        &self,
        name: &str,
        preset: &PresetDefinition,
        context: &Context,
        current: &ResolvedPreset,
    ) -> Result<Map, TemplateError> {
        let label = format!("Preset '{name}' definitions");
        let pre_resolved: BTreeSet<String> = current.definitions.keys().cloned().collect();
        let order = build_dependency_map(
            &preset.definitions,
            PRESET_DEFINITION_PREFIXES,
            &pre_resolved,
        )
        .topological_sort()
        .map_err(|e| e.located(label.clone()))?;

        let mut resolver = TemplateResolver::new(layered_context(context, current));
        let mut values = Map::new();
        for key in order {
            let mut visible = current.definitions.clone();
            visible.extend(values.iter().map(|(k, v)| (k.clone(), v.clone())));
            resolver.set_path("preset.definitions", Value::Map(visible));

            let Some(raw) = preset.definitions.get(&key) else {
                continue;
            };
            let value = resolver
                .resolve(raw)
                .map_err(|e| e.located(format!("{label} '{key}'")))?;
            values.insert(key, value);
        }
        Ok(values)
    }
}

/// Context with the accumulated preset state layered on top
fn layered_context(base: &Context, state: &ResolvedPreset) -> Context {
    let mut context = base.clone();
    let mut env = base.string_entries("env");
    env.extend(
        state
            .environment
            .iter()
            .map(|(k, v)| (k.clone(), v.clone())),
    );
    context.set_namespace("env", string_map(&env));
    context.set_path("preset.environment", string_map(&state.environment));
    context.set_path("preset.definitions", Value::Map(state.definitions.clone()));
    context
}

fn resolve_args(
    resolver: &mut TemplateResolver,
    raw: &[Value],
) -> Result<Vec<String>, TemplateError> {
    raw.iter()
        .map(|value| resolver.resolve(value).map(|v| v.to_display_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn presets(toml_text: &str) -> Map {
        let parsed: toml::Value = toml::from_str(toml_text).unwrap();
        Value::from(parsed).as_map().cloned().unwrap()
    }

    fn context() -> Context {
        let mut ctx = Context::new();
        ctx.set_path("env.HOME", "/home/dev".into());
        ctx.set_path("env.FLAVOR", "fast".into());
        ctx.set_path("user.build_type", "Release".into());
        ctx.set_path("system.os", "linux".into());
        ctx
    }

    const PRESETS: &str = r#"
[base]
environment = { CC = "gcc", CXX = "g++", OPT = "-O0" }
definitions = { USE_LTO = false, LEVEL = 1 }
extra_config_args = ["shared", "--base"]

[child]
extends = "base"
environment = { OPT = "-O2" }
definitions = { LEVEL = "[[ {{preset.definitions.LEVEL}} + 1 ]]" }
extra_config_args = ["shared", "--child"]

[windows]
extends = ["base"]
condition = "[[ '{{system.os}}' == 'windows' ]]"
environment = { CC = "cl" }
extra_build_args = ["/m"]

[flavor-fast]
environment = { FLAVOR_FLAGS = "-march=native" }

[flavored]
extends = ["flavor-{{env.FLAVOR}}"]

[loop-a]
extends = "loop-b"

[loop-b]
extends = "loop-a"

[diamond-left]
extends = "base"
environment = { LEFT = "1" }

[diamond-right]
extends = "base"
environment = { RIGHT = "{{preset.environment.CC}}" }

[diamond]
extends = ["diamond-left", "diamond-right"]
"#;

    fn repository() -> PresetRepository {
        PresetRepository::new(&presets(PRESETS), &[])
    }

    #[test]
    fn test_child_overrides_only_contended_key() {
        let resolved = repository().resolve(&["child"], &context()).unwrap();
        assert_eq!(resolved.environment["OPT"], "-O2");
        assert_eq!(resolved.environment["CC"], "gcc");
        assert_eq!(resolved.environment["CXX"], "g++");
        assert_eq!(resolved.definitions["LEVEL"], Value::Integer(2));
        assert_eq!(resolved.definitions["USE_LTO"], Value::Bool(false));
    }

    #[test]
    fn test_args_deduplicated_in_first_seen_order() {
        let resolved = repository().resolve(&["child"], &context()).unwrap();
        assert_eq!(
            resolved.extra_config_args,
            vec!["shared", "--base", "--child"]
        );
    }

    #[test]
    fn test_false_condition_keeps_parent_state_only() {
        let resolved = repository().resolve(&["windows"], &context()).unwrap();
        assert_eq!(resolved.environment["CC"], "gcc");
        assert!(resolved.extra_build_args.is_empty());
        assert_eq!(resolved.extra_config_args, vec!["shared", "--base"]);
    }

    #[test]
    fn test_true_condition_applies_layer() {
        let mut ctx = context();
        ctx.set_path("system.os", "windows".into());
        let resolved = repository().resolve(&["windows"], &ctx).unwrap();
        assert_eq!(resolved.environment["CC"], "cl");
        assert_eq!(resolved.extra_build_args, vec!["/m"]);
    }

    #[test]
    fn test_templated_extends() {
        let resolved = repository().resolve(&["flavored"], &context()).unwrap();
        assert_eq!(resolved.environment["FLAVOR_FLAGS"], "-march=native");
    }

    #[test]
    fn test_unknown_preset_lists_available() {
        let err = repository().resolve(&["nope"], &context()).unwrap_err();
        let TemplateError::UnknownPreset { name, available } = err else {
            panic!("expected unknown preset");
        };
        assert_eq!(name, "nope");
        assert!(available.contains(&"base".to_string()));
    }

    #[test]
    fn test_circular_extends() {
        let err = repository().resolve(&["loop-a"], &context()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Circular preset dependency detected: loop-a -> loop-b -> loop-a"
        );
    }

    #[test]
    fn test_diamond_resolves_base_once() {
        let mut cache = PresetCache::new();
        let resolved = repository()
            .resolve_with_cache(&["diamond"], &context(), &mut cache)
            .unwrap();
        assert_eq!(resolved.environment["LEFT"], "1");
        assert_eq!(resolved.environment["RIGHT"], "gcc");
        assert_eq!(resolved.extra_config_args, vec!["shared", "--base"]);
        let mut names: Vec<&str> = cache.keys().map(String::as_str).collect();
        names.sort_unstable();
        assert_eq!(names, vec!["base", "diamond", "diamond-left", "diamond-right"]);
    }

    #[test]
    fn test_multiple_presets_merge_in_order() {
        let resolved = repository()
            .resolve(&["child", " ", "flavor-fast"], &context())
            .unwrap();
        assert_eq!(resolved.environment["OPT"], "-O2");
        assert_eq!(resolved.environment["FLAVOR_FLAGS"], "-march=native");
    }

    #[test]
    fn test_project_presets_shadow_shared() {
        let project = presets("[base]\nenvironment = { CC = \"clang\" }\n");
        let repo = PresetRepository::new(&project, &[presets(PRESETS)]);
        let resolved = repo.resolve(&["child"], &context()).unwrap();
        assert_eq!(resolved.environment["CC"], "clang");
        assert!(!resolved.environment.contains_key("CXX"));
    }

    #[test]
    fn test_definition_failure_is_located() {
        let raw = presets("[bad]\ndefinitions = { X = \"{{user.missing}}\" }\n");
        let err = PresetRepository::new(&raw, &[])
            .resolve(&["bad"], &context())
            .unwrap_err();
        assert!(err.to_string().starts_with("Preset 'bad' definitions 'X': "));
        assert!(matches!(err.root(), TemplateError::UnresolvablePath { .. }));
    }
}
