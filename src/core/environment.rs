//! Ordered resolution of environment blocks
//!
//! An environment block is a map of variable name to raw value whose
//! entries may reference each other, e.g. `PATH = "{{env.ROOT}}/bin"` next to
//! `ROOT = "/opt/tool"`. Entries are resolved in dependency order and every
//! resolved entry is visible to the entries after it, both through `env.*`
//! and through `<namespace>.environment.*`.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::core::context::{string_map, Context};
use crate::core::resolver::build_dependency_map;
use crate::core::template::TemplateResolver;
use crate::core::value::Map;
use crate::error::TemplateError;

/// Placeholder prefixes for a preset environment block
pub const PRESET_ENV_PREFIXES: &[&str] = &["env.", "preset.environment."];

/// Placeholder prefixes for a preset definitions block
pub const PRESET_DEFINITION_PREFIXES: &[&str] = &["preset.definitions."];

/// Placeholder prefixes for the project environment block
pub const PROJECT_ENV_PREFIXES: &[&str] = &["env.", "project.environment."];

/// Placeholder prefixes for the git environment block
pub const GIT_ENV_PREFIXES: &[&str] = &["env.", "project.environment.", "git.environment."];

/// Where an environment block lives and what it can already see
#[derive(Debug, Clone)]
pub struct EnvironmentScope<'a> {
    /// Namespace whose `environment` map exposes the block (`preset`, `project`, `git`)
    pub namespace: &'a str,
    /// Placeholder prefixes that refer to entries of the block
    pub prefixes: &'a [&'a str],
    /// Variables visible under `env.` before the block is resolved
    pub base_env: BTreeMap<String, String>,
    /// Entries visible under `<namespace>.environment.` before the block is resolved
    pub namespace_base: BTreeMap<String, String>,
    /// Prefix for error messages
    pub label: String,
}

impl<'a> EnvironmentScope<'a> {
    /// Scope whose base environment is the context's `env` namespace
    pub fn new(namespace: &'a str, prefixes: &'a [&'a str], context: &Context) -> Self {
        Self {
            namespace,
            prefixes,
            base_env: context.string_entries("env"),
            namespace_base: BTreeMap::new(),
            label: format!("{namespace} environment"),
        }
    }

    /// Add variables to the base environment and the namespace view
    #[must_use]
    pub fn with_inherited(mut self, inherited: &BTreeMap<String, String>) -> Self {
        self.base_env
            .extend(inherited.iter().map(|(k, v)| (k.clone(), v.clone())));
        self.namespace_base
            .extend(inherited.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    /// Replace the error message prefix
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }
}

/// Resolve an environment block in dependency order
///
/// Names already present in the base environment are treated as resolved,
/// so `{{env.PATH}}` inside the block refers to the inherited `PATH` unless
/// the block's own `PATH` has been resolved earlier. Results are stringified.
pub fn resolve_environment_block(
    entries: &Map,
    scope: &EnvironmentScope<'_>,
    context: &Context,
) -> Result<BTreeMap<String, String>, TemplateError> {
    if entries.is_empty() {
        return Ok(BTreeMap::new());
    }

    let pre_resolved: BTreeSet<String> = scope.base_env.keys().cloned().collect();
    let graph = build_dependency_map(entries, scope.prefixes, &pre_resolved);
    let order = graph
        .topological_sort()
        .map_err(|e| e.located(scope.label.clone()))?;
    debug!("Resolving {} in order: {}", scope.label, order.join(", "));

    let env_path = format!("{}.environment", scope.namespace);
    let mut resolver = TemplateResolver::new(context.clone());
    let mut resolved: BTreeMap<String, String> = BTreeMap::new();

    for key in order {
        let mut env = scope.base_env.clone();
        env.extend(resolved.iter().map(|(k, v)| (k.clone(), v.clone())));
        let mut namespace_env = scope.namespace_base.clone();
        namespace_env.extend(resolved.iter().map(|(k, v)| (k.clone(), v.clone())));

        // Each step sees a fresh view; set_path invalidates the memo table.
        resolver.set_path("env", string_map(&env));
        resolver.set_path(&env_path, string_map(&namespace_env));

        let Some(raw) = entries.get(&key) else {
            continue;
        };
        let value = resolver
            .resolve(raw)
            .map_err(|e| e.located(format!("{} '{key}'", scope.label)))?;
        resolved.insert(key, value.to_display_string());
    }

    Ok(resolved)
}
