//! Configuration validation
//!
//! Lints project and shared configuration before any build is planned:
//! structural checks, preset schema checks, expression syntax checks with
//! placeholders neutralized, cycle checks inside environment/definition
//! blocks, and a dry template resolution with a default context.

use std::collections::BTreeSet;
use std::path::Path;
use std::str::FromStr;

use serde::Serialize;
use tracing::{debug, warn};

use crate::config::defaults::{BUILD_SYSTEMS, NEUTRAL_PLACEHOLDER_LITERAL};
use crate::core::context::{string_map, Context};
use crate::core::environment::{
    resolve_environment_block, EnvironmentScope, PRESET_DEFINITION_PREFIXES, PROJECT_ENV_PREFIXES,
};
use crate::core::manifest::{BuildSystem, ConfigurationStore, ProjectDefinition};
use crate::core::placeholder::{expression_body, extract_placeholders, looks_like_template, neutralize};
use crate::core::plan::Planner;
use crate::core::resolver::build_dependency_map;
use crate::core::template::TemplateResolver;
use crate::core::value::{Map, Value};
use crate::error::{ConfigError, TemplateError};

pub use crate::core::expression::validate_expression_syntax;

/// Placeholder prefixes usable in project path templates
pub const PROJECT_PATH_PREFIXES: &[&str] = &["builder.", "user.", "system.", "env.", "project."];

/// Placeholder prefixes usable in project extra arguments
pub const PROJECT_ARG_PREFIXES: &[&str] =
    &["builder.", "user.", "system.", "env.", "project.", "preset."];

/// Cycle-check prefixes for a preset environment block
///
/// `env.X` is left out since it may name an inherited variable.
const PRESET_NAMESPACE_ENV_PREFIXES: &[&str] = &["preset.environment."];

/// Result of validating one project (or the shared configuration)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CheckReport {
    /// Project name, or `shared` for workspace-wide checks
    pub subject: String,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    /// Dependencies in build order
    pub dependency_order: Vec<String>,
}

impl CheckReport {
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            ..Self::default()
        }
    }

    /// Check if all validations passed
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Reject placeholders outside `usable_prefixes`
///
/// An empty prefix list allows every placeholder.
pub fn validate_placeholder_prefixes(
    values: &Value,
    usable_prefixes: &[&str],
) -> Result<(), TemplateError> {
    if usable_prefixes.is_empty() {
        return Ok(());
    }
    for placeholder in extract_placeholders(values) {
        if !usable_prefixes
            .iter()
            .any(|prefix| placeholder.starts_with(prefix))
        {
            return Err(TemplateError::PlaceholderNotAllowed { placeholder });
        }
    }
    Ok(())
}

/// Check placeholder prefixes, then dry-resolve every leaf of `values`
pub fn validate_variables(
    context: &Context,
    values: &Value,
    usable_prefixes: &[&str],
) -> Result<(), TemplateError> {
    validate_placeholder_prefixes(values, usable_prefixes)?;
    TemplateResolver::new(context.clone()).resolve(values)?;
    Ok(())
}

/// Validate a `[[ ... ]]` value: form, emptiness, then syntax with placeholders neutralized
fn validate_expression(value: &str, source: &str, errors: &mut Vec<String>) {
    let Some(body) = expression_body(value) else {
        errors.push(format!("{source} must use the form [[ expression ]]"));
        return;
    };
    let body = body.trim();
    if body.is_empty() {
        errors.push(format!("{source} must not be empty"));
        return;
    }
    let neutral = neutralize(body, NEUTRAL_PLACEHOLDER_LITERAL);
    if let Err(e) = validate_expression_syntax(&neutral) {
        errors.push(format!("{source} expression error: {e}"));
    }
}

fn validate_embedded_expressions(value: &Value, label: &str, errors: &mut Vec<String>) {
    match value {
        Value::Map(map) => {
            for (key, item) in map {
                validate_embedded_expressions(item, &format!("{label}.{key}"), errors);
            }
        }
        Value::List(items) => {
            for (index, item) in items.iter().enumerate() {
                validate_embedded_expressions(item, &format!("{label}[{index}]"), errors);
            }
        }
        Value::String(text) if expression_body(text).is_some() => {
            validate_expression(text, label, errors);
        }
        _ => {}
    }
}

fn ensure_no_cycles(entries: &Map, prefixes: &[&str], label: &str) -> Result<(), String> {
    if entries.is_empty() {
        return Ok(());
    }
    build_dependency_map(entries, prefixes, &BTreeSet::new())
        .topological_sort()
        .map(|_| ())
        .map_err(|e| format!("{label} circular dependency: {e}"))
}

fn parse_extends(value: Option<&Value>, label: &str, errors: &mut Vec<String>) -> Vec<String> {
    match value {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::String(text)) => {
            let candidate = text.trim();
            if candidate.is_empty() {
                Vec::new()
            } else {
                vec![candidate.to_string()]
            }
        }
        Some(Value::List(items)) => {
            let mut result = Vec::new();
            for item in items {
                match item {
                    Value::String(text) if !text.trim().is_empty() => {
                        result.push(text.trim().to_string());
                    }
                    Value::String(_) => {}
                    _ => errors.push(format!("{label} extends entries must be strings")),
                }
            }
            result
        }
        Some(_) => {
            errors.push(format!(
                "{label} extends must be a string or sequence of strings"
            ));
            Vec::new()
        }
    }
}

fn validate_preset_definition(
    name: &str,
    data: &Map,
    available: &BTreeSet<String>,
    label: &str,
    errors: &mut Vec<String>,
) {
    for target in parse_extends(data.get("extends"), label, errors) {
        if looks_like_template(&target) {
            continue;
        }
        if target != name && !available.contains(&target) {
            errors.push(format!("{label} extends unknown preset '{target}'"));
        }
    }

    match data.get("condition") {
        None | Some(Value::Null) => {}
        Some(Value::String(condition)) => {
            validate_expression(condition, &format!("{label} condition"), errors);
        }
        Some(_) => errors.push(format!("{label} condition must be a string expression")),
    }

    let blocks: [(&str, &[&str]); 2] = [
        ("environment", PRESET_NAMESPACE_ENV_PREFIXES),
        ("definitions", PRESET_DEFINITION_PREFIXES),
    ];
    for (field, prefixes) in blocks {
        if let Some(value @ Value::Map(block)) = data.get(field) {
            let block_label = format!("{label} {field}");
            if let Err(message) = ensure_no_cycles(block, prefixes, &block_label) {
                errors.push(message);
            }
            validate_embedded_expressions(value, &block_label, errors);
        }
    }

    for field in ["extra_config_args", "extra_build_args"] {
        if let Some(args @ Value::List(_)) = data.get(field) {
            validate_embedded_expressions(args, &format!("{label} {field}"), errors);
        }
    }
}

/// Validate a preset table; `origin` names where it is defined
pub fn validate_preset_collection(
    presets: &Map,
    available: &BTreeSet<String>,
    origin: &str,
) -> Vec<String> {
    let mut errors = Vec::new();
    for (name, definition) in presets {
        let label = format!("Preset '{name}' ({origin})");
        match definition {
            Value::Map(data) => {
                validate_preset_definition(name, data, available, &label, &mut errors);
            }
            _ => errors.push(format!("{label} must be a table/mapping")),
        }
    }
    errors
}

/// Validate workspace-wide configuration (shared presets and toolchains)
pub fn validate_store_structure(store: &ConfigurationStore) -> Vec<String> {
    let available = store.all_preset_names();
    let mut errors: Vec<String> = store
        .shared_configs()
        .iter()
        .flat_map(|(stem, shared)| {
            validate_preset_collection(
                &shared.presets,
                &available,
                &format!("shared config '{stem}'"),
            )
        })
        .collect();
    errors.extend(store.toolchains().validate());
    errors
}

/// Structural errors of a project definition
pub fn validate_project_structure(project: &ProjectDefinition) -> Vec<String> {
    let mut errors = Vec::new();

    if project.source_dir.trim().is_empty() {
        errors.push("project.source_dir must be defined".to_string());
    }

    let build_system = project.build_system.as_deref().map(|name| {
        BuildSystem::from_str(name).map_err(|_| {
            format!(
                "project.build_system '{name}' is not supported (allowed: {})",
                BUILD_SYSTEMS.join(", ")
            )
        })
    });
    if let Some(Err(message)) = &build_system {
        errors.push(message.clone());
    }

    if let Some(build_dir) = &project.build_dir {
        if Path::new(build_dir).is_absolute() {
            errors.push("project.build_dir must be a relative path".to_string());
        }
    }
    if let Some(Ok(system)) = build_system {
        if system.requires_build_dir() && project.build_dir.is_none() {
            errors.push(format!(
                "project.build_dir is required for build_system '{system}'"
            ));
        }
    }
    if let Some(component_dir) = &project.component_dir {
        if Path::new(component_dir).is_absolute() {
            errors.push("project.component_dir must be a relative path".to_string());
        }
    }

    if let Some(git) = &project.git {
        if git.url.trim().is_empty() {
            errors.push("git.url must not be empty".to_string());
        }
        if git.main_branch.trim().is_empty() {
            errors.push("git.main_branch must not be empty".to_string());
        }
    }

    errors
}

/// Preset schema errors of a project's own presets
pub fn validate_project_presets(
    project: &ProjectDefinition,
    store: &ConfigurationStore,
) -> Vec<String> {
    if project.presets.is_empty() {
        return Vec::new();
    }
    validate_preset_collection(
        &project.presets,
        &store.all_preset_names(),
        &format!("project '{}'", project.name),
    )
}

/// Dry-resolve a project's templates with its default context
///
/// Paths and the project environment are resolved first; a failure there
/// stops validation since every later block depends on them. Each of the
/// project's presets is then resolved on its own.
pub fn validate_project_templates(planner: &Planner<'_>, project: &ProjectDefinition) -> Vec<String> {
    let mut errors = Vec::new();
    let context = match project_context(planner, project) {
        Ok(context) => context,
        Err(e) => {
            errors.push(e.to_string());
            return errors;
        }
    };

    let args = Value::List(
        project
            .extra_config_args
            .iter()
            .chain(&project.extra_build_args)
            .map(|arg| Value::String(arg.clone()))
            .collect(),
    );
    if let Err(e) = validate_placeholder_prefixes(&args, PROJECT_ARG_PREFIXES) {
        errors.push(
            e.located(format!("Project '{}' extra arguments", project.name))
                .to_string(),
        );
    }

    let repository = planner.store().preset_repository(project);
    for name in project.presets.keys() {
        debug!("Validating preset '{}' of '{}'", name, project.name);
        if let Err(e) = repository.resolve(&[name], &context) {
            errors.push(e.to_string());
        }
    }
    errors
}

fn project_context(
    planner: &Planner<'_>,
    project: &ProjectDefinition,
) -> Result<Context, TemplateError> {
    let user = planner.default_user(project);
    let (mut context, _) =
        planner.base_context(project, &user, project.install_dir.as_deref())?;

    let paths: Map = [
        ("source_dir", Some(&project.source_dir)),
        ("build_dir", project.build_dir.as_ref()),
        ("install_dir", project.install_dir.as_ref()),
        ("component_dir", project.component_dir.as_ref()),
    ]
    .into_iter()
    .filter_map(|(key, value)| Some((key.to_string(), Value::String(value?.clone()))))
    .collect();
    validate_variables(&context, &Value::Map(paths), PROJECT_PATH_PREFIXES)
        .map_err(|e| e.located(format!("Project '{}' paths", project.name)))?;

    let scope = EnvironmentScope::new("project", PROJECT_ENV_PREFIXES, &context)
        .with_label(format!("Project '{}' environment", project.name));
    let environment = resolve_environment_block(&project.environment, &scope, &context)?;
    let mut env = context.string_entries("env");
    env.extend(environment.clone());
    context.set_namespace("env", string_map(&env));
    context.set_path("project.environment", string_map(&environment));
    Ok(context)
}

/// Validate one project: structure, presets, dependencies, templates and tools
pub fn check_project(planner: &Planner<'_>, name: &str) -> Result<CheckReport, ConfigError> {
    let store = planner.store();
    let project = store.get_project(name)?;
    let mut report = CheckReport::new(&project.name);

    report.errors.extend(validate_project_structure(project));
    report.errors.extend(validate_project_presets(project, store));
    match store.resolve_dependency_chain(name) {
        Ok(chain) => {
            report.dependency_order = chain
                .iter()
                .map(|dependency| dependency.project.name.clone())
                .collect();
        }
        Err(e) => report.errors.push(e.to_string()),
    }
    report
        .errors
        .extend(validate_project_templates(planner, project));
    if let Some(Err(e)) = planner.select_toolchain(project, None) {
        report.errors.push(e.to_string());
    }

    if let Some(Ok(system)) = project.build_system_kind() {
        let tool = system.executable();
        if which::which(tool).is_err() {
            warn!("Build tool '{}' for '{}' not found on PATH", tool, project.name);
            report
                .warnings
                .push(format!("Build tool '{tool}' not found on PATH"));
        }
    }
    if project.git.is_some() && which::which("git").is_err() {
        report
            .warnings
            .push("Tool 'git' not found on PATH".to_string());
    }

    Ok(report)
}

/// Validate the shared configuration and every project
///
/// The first report covers shared presets (subject `shared`).
pub fn check_workspace(planner: &Planner<'_>) -> Vec<CheckReport> {
    let store = planner.store();
    let mut shared = CheckReport::new("shared");
    shared.errors = validate_store_structure(store);

    let mut reports = vec![shared];
    for name in store.project_names() {
        match check_project(planner, &name) {
            Ok(report) => reports.push(report),
            Err(e) => {
                let mut report = CheckReport::new(name);
                report.errors.push(e.to_string());
                reports.push(report);
            }
        }
    }
    reports
}
