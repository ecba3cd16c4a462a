//! Build planning
//!
//! A [`BuildPlan`] is everything needed to configure, build and install a
//! project: resolved paths, the merged environment and definitions, extra
//! arguments and the ordered command steps. Planning never runs commands; it
//! only inspects the build directory to decide whether configuration is
//! needed.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

use serde::Serialize;
use tracing::{debug, info};

use crate::config::defaults::{BUILD_TYPE_PRESET_PREFIX, DEFAULT_BRANCH, MULTI_CONFIG_KEYWORDS};
use crate::core::context::{string_map, Context, ContextBuilder, ProjectContext, SystemContext, UserContext};
use crate::core::environment::{
    resolve_environment_block, EnvironmentScope, GIT_ENV_PREFIXES, PROJECT_ENV_PREFIXES,
};
use crate::core::manifest::{BuildSystem, ConfigurationStore, ProjectDefinition};
use crate::core::preset::{extend_unique, PresetRepository, ResolvedPreset};
use crate::core::template::TemplateResolver;
use crate::core::toolchain::SelectedToolchain;
use crate::core::value::{Map, Value};
use crate::error::{PlanError, TemplateError};

/// Which phases a build runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum BuildMode {
    /// Configure when needed, then build
    #[default]
    Auto,
    /// Configure only
    ConfigOnly,
    /// Build an already configured directory
    BuildOnly,
    /// Start from a clean build directory and configure
    Reconfig,
}

impl BuildMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::ConfigOnly => "config-only",
            Self::BuildOnly => "build-only",
            Self::Reconfig => "reconfig",
        }
    }

    fn forces_configure(self) -> bool {
        matches!(self, Self::ConfigOnly | Self::Reconfig)
    }

    fn builds(self) -> bool {
        matches!(self, Self::Auto | Self::BuildOnly)
    }
}

impl FromStr for BuildMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "config-only" | "config_only" => Ok(Self::ConfigOnly),
            "build-only" | "build_only" => Ok(Self::BuildOnly),
            "reconfig" => Ok(Self::Reconfig),
            other => Err(format!(
                "unknown operation '{other}' (expected auto, config-only, build-only or reconfig)"
            )),
        }
    }
}

impl fmt::Display for BuildMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// User-selected planning options
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BuildOptions {
    pub project: String,
    /// Requested presets; entries may be comma-separated lists
    pub presets: Vec<String>,
    pub branch: Option<String>,
    pub build_type: Option<String>,
    pub generator: Option<String>,
    /// Toolchain name; the project's default toolchain when unset
    pub toolchain: Option<String>,
    pub target: Option<String>,
    pub install: bool,
    pub install_dir: Option<String>,
    pub operation: BuildMode,
    /// Definitions overriding everything presets produce
    pub definitions: Map,
    pub extra_config_args: Vec<String>,
    pub extra_build_args: Vec<String>,
}

impl BuildOptions {
    /// Options for `project` with everything else defaulted
    pub fn new(project: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            ..Self::default()
        }
    }

    /// Options for building dependency `project` ahead of these options' project
    ///
    /// Branch, build type, generator, toolchain, operation and extra arguments
    /// carry over. Target, install settings and definition overrides do not.
    #[must_use]
    pub fn for_dependency(&self, project: &str, presets: Vec<String>) -> Self {
        Self {
            project: project.to_string(),
            presets,
            branch: self.branch.clone(),
            build_type: self.build_type.clone(),
            generator: self.generator.clone(),
            toolchain: self.toolchain.clone(),
            operation: self.operation,
            extra_config_args: self.extra_config_args.clone(),
            extra_build_args: self.extra_build_args.clone(),
            ..Self::default()
        }
    }
}

/// One command of a plan
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BuildStep {
    pub description: String,
    pub command: Vec<String>,
    pub cwd: PathBuf,
    /// Environment the command runs with (the plan's environment)
    #[serde(skip)]
    pub env: BTreeMap<String, String>,
}

impl BuildStep {
    fn new(
        description: &str,
        command: Vec<String>,
        cwd: &Path,
        env: &BTreeMap<String, String>,
    ) -> Self {
        Self {
            description: description.to_string(),
            command,
            cwd: cwd.to_path_buf(),
            env: env.clone(),
        }
    }

    /// Command rendered for display, quoting arguments with whitespace
    pub fn command_line(&self) -> String {
        self.command
            .iter()
            .map(|arg| {
                if arg.is_empty() || arg.chars().any(char::is_whitespace) {
                    format!("'{}'", arg.replace('\'', r"'\''"))
                } else {
                    arg.clone()
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Fully resolved build plan
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BuildPlan {
    pub project: String,
    pub build_system: Option<BuildSystem>,
    pub build_type: String,
    pub generator: Option<String>,
    /// Selected toolchain, if any
    pub toolchain: Option<String>,
    pub operation: BuildMode,
    /// Branch as requested
    pub branch: String,
    pub branch_slug: String,
    pub source_dir: PathBuf,
    /// Directory configuration runs against
    pub configure_source_dir: PathBuf,
    pub build_dir: Option<PathBuf>,
    pub install_dir: Option<PathBuf>,
    pub component_dir: Option<PathBuf>,
    /// The existing build directory must be removed before the steps run
    pub reset_build_dir: bool,
    pub presets: Vec<String>,
    pub environment: BTreeMap<String, String>,
    pub definitions: Map,
    pub extra_config_args: Vec<String>,
    pub extra_build_args: Vec<String>,
    pub git_environment: BTreeMap<String, String>,
    pub git_clone_script: Option<String>,
    pub git_update_script: Option<String>,
    pub steps: Vec<BuildStep>,
    /// Context the plan was resolved against
    pub context: Context,
}

impl BuildPlan {
    /// Pretty-printed JSON form
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Project paths after template resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPaths {
    pub source_dir: PathBuf,
    pub configure_source_dir: PathBuf,
    pub build_dir: Option<PathBuf>,
    pub install_dir: Option<PathBuf>,
    pub component_dir: Option<PathBuf>,
}

/// What is already on disk in a build directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BuildDirState {
    pub exists: bool,
    pub configured: bool,
}

impl BuildDirState {
    /// Inspect `build_dir` for the configuration marker of `system`
    pub fn inspect(system: BuildSystem, build_dir: &Path) -> Self {
        let exists = build_dir.is_dir();
        let configured = exists
            && match system {
                BuildSystem::Cmake => build_dir.join("CMakeCache.txt").is_file(),
                BuildSystem::Meson => build_dir
                    .join("meson-private")
                    .join("coredata.dat")
                    .is_file(),
                BuildSystem::Bazel | BuildSystem::Cargo | BuildSystem::Make => true,
            };
        Self { exists, configured }
    }
}

/// Plans builds for the projects of a configuration store
#[derive(Debug, Clone)]
pub struct Planner<'a> {
    store: &'a ConfigurationStore,
    builder: ContextBuilder,
    system: SystemContext,
}

impl<'a> Planner<'a> {
    /// Planner using the process environment and the detected host
    pub fn new(store: &'a ConfigurationStore) -> Self {
        Self::with_builder(store, ContextBuilder::new(store.root()))
    }

    /// Planner with an explicit context builder
    pub fn with_builder(store: &'a ConfigurationStore, builder: ContextBuilder) -> Self {
        Self {
            store,
            builder,
            system: SystemContext::detect(),
        }
    }

    /// Replace the detected host facts
    #[must_use]
    pub fn with_system(mut self, system: SystemContext) -> Self {
        self.system = system;
        self
    }

    pub fn store(&self) -> &ConfigurationStore {
        self.store
    }

    /// User namespace built from configured defaults
    ///
    /// The project's default toolchain is exposed when it can be selected.
    pub fn default_user(&self, project: &ProjectDefinition) -> UserContext {
        let global = self.store.global();
        let mut user = self.builder.user(
            project.default_branch().unwrap_or(DEFAULT_BRANCH),
            &global.default_build_type,
            project.generator.as_deref(),
            Some(&global.default_operation),
        );
        if let Some(Ok(toolchain)) = self.select_toolchain(project, None) {
            expose_toolchain(&mut user, &toolchain);
        }
        user
    }

    /// Toolchain requested by `requested`, else the project default
    pub fn select_toolchain(
        &self,
        project: &ProjectDefinition,
        requested: Option<&str>,
    ) -> Option<Result<SelectedToolchain, PlanError>> {
        let name = requested.or(project.toolchain.as_deref())?;
        let build_system = project.build_system_kind().and_then(Result::ok);
        Some(
            self.store
                .toolchains()
                .select(name, build_system)
                .map_err(PlanError::from),
        )
    }

    /// Context with resolved project paths, before any environment block
    pub fn base_context(
        &self,
        project: &ProjectDefinition,
        user: &UserContext,
        install_dir: Option<&str>,
    ) -> Result<(Context, ResolvedPaths), TemplateError> {
        let raw = ProjectContext {
            name: project.name.clone(),
            source_dir: PathBuf::from(&project.source_dir),
            build_dir: project.build_dir.as_ref().map(PathBuf::from),
            install_dir: install_dir.map(PathBuf::from),
            component_dir: project.component_dir.as_ref().map(PathBuf::from),
            ..ProjectContext::default()
        };
        let mut resolver =
            TemplateResolver::new(self.builder.combined_context(user, &raw, &self.system));
        let paths = self.resolve_paths(project, &mut resolver, install_dir)?;

        let resolved = ProjectContext {
            name: project.name.clone(),
            source_dir: paths.source_dir.clone(),
            build_dir: paths.build_dir.clone(),
            install_dir: paths.install_dir.clone(),
            component_dir: paths.component_dir.clone(),
            ..ProjectContext::default()
        };
        let context = self
            .builder
            .combined_context(user, &resolved, &self.system);
        Ok((context, paths))
    }

    fn resolve_paths(
        &self,
        project: &ProjectDefinition,
        resolver: &mut TemplateResolver,
        install_dir: Option<&str>,
    ) -> Result<ResolvedPaths, TemplateError> {
        let mut resolve = |label: &str, raw: &str| {
            resolver
                .resolve_to_string(raw)
                .map_err(|e| e.located(format!("Project '{}' {label}", project.name)))
        };

        let source_dir = resolve("source_dir", &project.source_dir)?;
        let source_dir = normalize_path(&self.absolute(&expand_home(
            &source_dir,
            self.builder.environment(),
        )));
        let build_dir = project
            .build_dir
            .as_deref()
            .map(|raw| resolve("build_dir", raw))
            .transpose()?;
        let install_dir = install_dir
            .map(|raw| resolve("install_dir", raw))
            .transpose()?;
        let component_dir = project
            .component_dir
            .as_deref()
            .map(|raw| resolve("component_dir", raw))
            .transpose()?
            .map(PathBuf::from);

        let component_root = component_dir
            .as_ref()
            .map(|component| normalize_path(&source_dir.join(component)));
        let configure_source_dir = match &component_root {
            Some(root) if !project.source_at_root => root.clone(),
            _ => source_dir.clone(),
        };

        let build_dir = build_dir
            .filter(|_| project.build_system.is_some())
            .map(|dir| {
                let root = match &component_root {
                    Some(root) if !project.build_at_root => root,
                    _ => &source_dir,
                };
                normalize_path(&root.join(dir))
            });
        let install_dir = install_dir.map(|dir| normalize_path(&source_dir.join(dir)));

        Ok(ResolvedPaths {
            source_dir,
            configure_source_dir,
            build_dir,
            install_dir,
            component_dir,
        })
    }

    fn absolute(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.builder.builder_path().join(path)
        }
    }

    /// Plan the project's dependencies in build order, then the project itself
    ///
    /// Each dependency is planned with the presets its dependents request.
    pub fn plan_with_dependencies(
        &self,
        options: &BuildOptions,
    ) -> Result<Vec<BuildPlan>, PlanError> {
        let chain = self.store.resolve_dependency_chain(&options.project)?;
        let mut plans = Vec::with_capacity(chain.len() + 1);
        for dependency in chain {
            info!(
                "Planning dependency '{}' of '{}'",
                dependency.project.name, options.project
            );
            let dependency_options =
                options.for_dependency(&dependency.project.name, dependency.presets);
            plans.push(self.plan(&dependency_options)?);
        }
        plans.push(self.plan(options)?);
        Ok(plans)
    }

    /// Plan a build
    pub fn plan(&self, options: &BuildOptions) -> Result<BuildPlan, PlanError> {
        let project = self.store.get_project(&options.project)?;
        let build_system = project
            .build_system_kind()
            .transpose()
            .map_err(PlanError::invalid)?;

        let branch = options
            .branch
            .clone()
            .or_else(|| project.default_branch().map(str::to_string))
            .unwrap_or_else(|| DEFAULT_BRANCH.to_string());
        let build_type = options
            .build_type
            .clone()
            .unwrap_or_else(|| self.store.global().default_build_type.clone());
        let generator = options
            .generator
            .clone()
            .or_else(|| project.generator.clone());
        info!(
            "Planning '{}' on branch '{}' ({}, {})",
            project.name, branch, build_type, options.operation
        );

        let toolchain = self
            .select_toolchain(project, options.toolchain.as_deref())
            .transpose()?;
        let mut user = self.builder.user(
            &branch,
            &build_type,
            generator.as_deref(),
            Some(options.operation.as_str()),
        );
        if let Some(toolchain) = &toolchain {
            debug!("Toolchain for '{}': {}", project.name, toolchain.name);
            expose_toolchain(&mut user, toolchain);
        }
        let install_dir = options
            .install_dir
            .as_deref()
            .or(project.install_dir.as_deref());
        let (mut context, paths) = self.base_context(project, &user, install_dir)?;

        let scope = EnvironmentScope::new("project", PROJECT_ENV_PREFIXES, &context)
            .with_label(format!("Project '{}' environment", project.name));
        let project_env = resolve_environment_block(&project.environment, &scope, &context)?;
        apply_state(&mut context, &project_env, &Map::new(), None);

        let repository = self.store.preset_repository(project);
        let presets = determine_presets(
            &options.presets,
            &build_type,
            generator.as_deref(),
            &repository,
        );
        debug!("Presets for '{}': [{}]", project.name, presets.join(", "));
        let resolved = repository.resolve(&presets, &context)?;

        let mut environment = project_env;
        environment.extend(resolved.environment.clone());
        let mut definitions = resolved.definitions.clone();
        definitions.extend(options.definitions.clone());
        apply_state(&mut context, &environment, &definitions, Some(&resolved));

        let mut resolver = TemplateResolver::new(context.clone());
        let label = |field: &str| format!("Project '{}' {field}", project.name);
        let project_config_args = resolve_args(&mut resolver, &project.extra_config_args)
            .map_err(|e| e.located(label("extra_config_args")))?;
        let project_build_args = resolve_args(&mut resolver, &project.extra_build_args)
            .map_err(|e| e.located(label("extra_build_args")))?;

        let mut extra_config_args = resolved.extra_config_args.clone();
        extend_unique(&mut extra_config_args, &project_config_args);
        extend_unique(&mut extra_config_args, &options.extra_config_args);
        let mut extra_build_args = resolved.extra_build_args.clone();
        extend_unique(&mut extra_build_args, &project_build_args);
        extend_unique(&mut extra_build_args, &options.extra_build_args);

        let mut steps = Vec::new();
        let mut reset_build_dir = false;
        if let Some(system) = build_system {
            if let Some(toolchain) = &toolchain {
                toolchain.apply(&mut environment, &mut definitions);
                definitions.extend(options.definitions.clone());
            }
            if system == BuildSystem::Cmake {
                apply_cmake_build_type(
                    &mut definitions,
                    &build_type,
                    options.build_type.is_some(),
                    generator.as_deref(),
                );
                if let Some(install) = &paths.install_dir {
                    definitions
                        .entry("CMAKE_INSTALL_PREFIX".to_string())
                        .or_insert_with(|| install.display().to_string().into());
                }
            }
            if let (BuildSystem::Cargo, Some(build_dir)) = (system, &paths.build_dir) {
                environment
                    .entry("CARGO_TARGET_DIR".to_string())
                    .or_insert_with(|| build_dir.display().to_string());
            }

            let state = paths
                .build_dir
                .as_deref()
                .map(|dir| BuildDirState::inspect(system, dir))
                .unwrap_or_default();
            reset_build_dir = options.operation == BuildMode::Reconfig && state.exists;

            let input = StepInput {
                source_dir: &paths.configure_source_dir,
                build_dir: paths.build_dir.as_deref(),
                install_dir: paths.install_dir.as_deref(),
                state,
                environment: &environment,
                definitions: &definitions,
                extra_config_args: &extra_config_args,
                extra_build_args: &extra_build_args,
                options,
                build_type: &build_type,
                generator: generator.as_deref(),
            };
            steps = input.steps(system)?;
        }
        apply_state(&mut context, &environment, &definitions, Some(&resolved));

        let mut git_environment = BTreeMap::new();
        let mut git_clone_script = None;
        let mut git_update_script = None;
        if let Some(git) = &project.git {
            let scope = EnvironmentScope::new("git", GIT_ENV_PREFIXES, &context)
                .with_label(format!("Project '{}' git environment", project.name));
            git_environment = resolve_environment_block(&git.environment, &scope, &context)?;
            if !git_environment.is_empty() {
                let mut env = context.string_entries("env");
                env.extend(git_environment.clone());
                context.set_namespace("env", string_map(&env));
                context.set_path("git.environment", string_map(&git_environment));
            }

            let mut resolver = TemplateResolver::new(context.clone());
            git_clone_script = git
                .clone_script
                .as_deref()
                .map(|script| resolver.resolve_to_string(script))
                .transpose()
                .map_err(|e| e.located(label("git clone_script")))?;
            git_update_script = git
                .update_script
                .as_deref()
                .map(|script| resolver.resolve_to_string(script))
                .transpose()
                .map_err(|e| e.located(label("git update_script")))?;
        }

        Ok(BuildPlan {
            project: project.name.clone(),
            build_system,
            build_type,
            generator,
            toolchain: toolchain.map(|toolchain| toolchain.name),
            operation: options.operation,
            branch: user.branch_raw,
            branch_slug: user.branch_slug,
            source_dir: paths.source_dir,
            configure_source_dir: paths.configure_source_dir,
            build_dir: paths.build_dir,
            install_dir: paths.install_dir,
            component_dir: paths.component_dir,
            reset_build_dir,
            presets,
            environment,
            definitions,
            extra_config_args,
            extra_build_args,
            git_environment,
            git_clone_script,
            git_update_script,
            steps,
            context,
        })
    }
}

/// Copy the selected toolchain into the user namespace
fn expose_toolchain(user: &mut UserContext, toolchain: &SelectedToolchain) {
    user.toolchain = Some(toolchain.name.clone());
    user.cc.clone_from(&toolchain.cc);
    user.cxx.clone_from(&toolchain.cxx);
    user.linker.clone_from(&toolchain.linker);
    user.launcher.clone_from(&toolchain.launcher);
}

/// Requested presets (comma-split, deduplicated) followed by build-type defaults
pub fn determine_presets(
    requested: &[String],
    build_type: &str,
    generator: Option<&str>,
    repository: &PresetRepository,
) -> Vec<String> {
    let mut presets: Vec<String> = Vec::new();
    let names = requested
        .iter()
        .flat_map(|entry| entry.split(','))
        .map(str::trim)
        .filter(|name| !name.is_empty());
    for name in names {
        if !presets.iter().any(|existing| existing == name) {
            presets.push(name.to_string());
        }
    }

    let defaults = if is_multi_config_generator(generator) {
        vec![
            format!("{BUILD_TYPE_PRESET_PREFIX}debug"),
            format!("{BUILD_TYPE_PRESET_PREFIX}release"),
        ]
    } else {
        vec![format!(
            "{BUILD_TYPE_PRESET_PREFIX}{}",
            build_type.to_lowercase()
        )]
    };
    for name in defaults {
        if repository.contains(&name) && !presets.contains(&name) {
            presets.push(name);
        }
    }
    presets
}

/// Whether a CMake generator holds several configurations in one build directory
pub fn is_multi_config_generator(generator: Option<&str>) -> bool {
    generator.is_some_and(|name| {
        let name = name.to_lowercase();
        MULTI_CONFIG_KEYWORDS
            .iter()
            .any(|keyword| name.contains(keyword))
    })
}

fn apply_cmake_build_type(
    definitions: &mut Map,
    build_type: &str,
    explicit: bool,
    generator: Option<&str>,
) {
    if is_multi_config_generator(generator) {
        return;
    }
    if explicit || !definitions.contains_key("CMAKE_BUILD_TYPE") {
        definitions.insert("CMAKE_BUILD_TYPE".to_string(), build_type.into());
    }
}

/// Layer the merged state into the context
///
/// `env` gains the environment, `project.environment`/`project.definitions`
/// mirror the merged state and `preset.*` exposes what presets produced.
fn apply_state(
    context: &mut Context,
    environment: &BTreeMap<String, String>,
    definitions: &Map,
    preset: Option<&ResolvedPreset>,
) {
    let mut env = context.string_entries("env");
    env.extend(environment.iter().map(|(k, v)| (k.clone(), v.clone())));
    context.set_namespace("env", string_map(&env));
    context.set_path("project.environment", string_map(environment));
    context.set_path("project.definitions", Value::Map(definitions.clone()));
    if let Some(preset) = preset {
        context.set_path("preset.environment", string_map(&preset.environment));
        context.set_path(
            "preset.definitions",
            Value::Map(preset.definitions.clone()),
        );
    }
}

fn resolve_args(
    resolver: &mut TemplateResolver,
    args: &[String],
) -> Result<Vec<String>, TemplateError> {
    args.iter()
        .map(|arg| resolver.resolve_to_string(arg))
        .collect()
}

fn expand_home(path: &str, env: &BTreeMap<String, String>) -> PathBuf {
    let home = env.get("HOME");
    match (path.strip_prefix('~'), home) {
        (Some(""), Some(home)) => PathBuf::from(home),
        (Some(rest), Some(home)) if rest.starts_with('/') => {
            Path::new(home).join(rest.trim_start_matches('/'))
        }
        _ => PathBuf::from(path),
    }
}

/// Lexically remove `.` and `..` components
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let popped = matches!(
                    normalized.components().next_back(),
                    Some(Component::Normal(_))
                ) && normalized.pop();
                if !popped && !normalized.has_root() {
                    normalized.push("..");
                }
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

/// CMake `-D` argument with a cache type
fn cmake_definition(name: &str, value: &Value) -> String {
    match value {
        Value::Bool(flag) => format!("{name}:BOOL={}", if *flag { "ON" } else { "OFF" }),
        Value::Integer(_) | Value::Float(_) | Value::String(_) => {
            format!("{name}:STRING={}", value.to_display_string())
        }
        Value::List(items) => format!(
            "{name}={}",
            items
                .iter()
                .map(Value::to_display_string)
                .collect::<Vec<_>>()
                .join(";")
        ),
        Value::Null | Value::Map(_) => format!("{name}={}", value.to_display_string()),
    }
}

/// Meson `-D` argument
fn meson_definition(name: &str, value: &Value) -> String {
    match value {
        Value::Bool(flag) => format!("-D{name}={flag}"),
        other => format!("-D{name}={}", other.to_display_string()),
    }
}

struct StepInput<'p> {
    source_dir: &'p Path,
    build_dir: Option<&'p Path>,
    install_dir: Option<&'p Path>,
    state: BuildDirState,
    environment: &'p BTreeMap<String, String>,
    definitions: &'p Map,
    extra_config_args: &'p [String],
    extra_build_args: &'p [String],
    options: &'p BuildOptions,
    build_type: &'p str,
    generator: Option<&'p str>,
}

impl StepInput<'_> {
    fn steps(&self, system: BuildSystem) -> Result<Vec<BuildStep>, PlanError> {
        match (system, self.build_dir) {
            (BuildSystem::Bazel, _) => self.bazel(),
            (_, None) => Ok(Vec::new()),
            (BuildSystem::Cmake, Some(build_dir)) => self.cmake(build_dir),
            (BuildSystem::Meson, Some(build_dir)) => self.meson(build_dir),
            (BuildSystem::Cargo, Some(build_dir)) => self.cargo(build_dir),
            (BuildSystem::Make, Some(build_dir)) => self.make(build_dir),
        }
    }

    fn step(&self, description: &str, command: Vec<String>) -> BuildStep {
        BuildStep::new(description, command, self.source_dir, self.environment)
    }

    fn mode(&self) -> BuildMode {
        self.options.operation
    }

    /// Whether configuration runs, failing when a build-only run has nothing to build
    fn should_configure(&self, build_dir: &Path) -> Result<bool, PlanError> {
        let configured = self.state.exists && self.state.configured;
        if self.mode() == BuildMode::BuildOnly && !configured {
            return Err(PlanError::NotConfigured {
                path: build_dir.to_path_buf(),
            });
        }
        Ok(self.mode().forces_configure() || !configured)
    }

    fn require_install_dir(&self) -> Result<&Path, PlanError> {
        self.install_dir
            .ok_or_else(|| PlanError::invalid("Install directory is not defined for this project"))
    }

    fn cmake(&self, build_dir: &Path) -> Result<Vec<BuildStep>, PlanError> {
        let mut steps = Vec::new();
        let multi_config = is_multi_config_generator(self.generator);
        let build_dir_arg = build_dir.display().to_string();

        if self.should_configure(build_dir)? {
            let mut command = vec!["cmake".to_string()];
            if let Some(generator) = self.generator {
                command.extend(["-G".to_string(), generator.to_string()]);
            }
            for (name, value) in self.definitions {
                if multi_config && name == "CMAKE_BUILD_TYPE" {
                    continue;
                }
                command.extend(["-D".to_string(), cmake_definition(name, value)]);
            }
            command.extend([
                "-B".to_string(),
                build_dir_arg.clone(),
                "-S".to_string(),
                self.source_dir.display().to_string(),
            ]);
            command.extend(self.extra_config_args.iter().cloned());
            steps.push(self.step("Configure project", command));
        }

        if self.mode().builds() {
            let mut command = vec!["cmake".to_string(), "--build".to_string(), build_dir_arg.clone()];
            if let Some(target) = &self.options.target {
                command.extend(["--target".to_string(), target.clone()]);
            }
            if multi_config {
                command.extend(["--config".to_string(), self.build_type.to_string()]);
            }
            command.extend(self.extra_build_args.iter().cloned());
            steps.push(self.step("Build project", command));
        }

        if self.options.install {
            self.require_install_dir()?;
            let mut command = vec!["cmake".to_string(), "--install".to_string(), build_dir_arg];
            if multi_config {
                command.extend(["--config".to_string(), self.build_type.to_string()]);
            }
            steps.push(self.step("Install project", command));
        }
        Ok(steps)
    }

    fn meson(&self, build_dir: &Path) -> Result<Vec<BuildStep>, PlanError> {
        let mut steps = Vec::new();
        let build_dir_arg = build_dir.display().to_string();

        if self.should_configure(build_dir)? {
            let mut command = vec![
                "meson".to_string(),
                "setup".to_string(),
                build_dir_arg.clone(),
                self.source_dir.display().to_string(),
            ];
            if let Some(install_dir) = self.install_dir {
                command.extend(["--prefix".to_string(), install_dir.display().to_string()]);
            }
            command.extend(
                self.definitions
                    .iter()
                    .map(|(name, value)| meson_definition(name, value)),
            );
            command.extend(self.extra_config_args.iter().cloned());
            steps.push(self.step("Configure project", command));
        }

        if self.mode().builds() {
            let mut command = vec![
                "meson".to_string(),
                "compile".to_string(),
                "-C".to_string(),
                build_dir_arg.clone(),
            ];
            if let Some(target) = &self.options.target {
                command.extend(["--target".to_string(), target.clone()]);
            }
            command.extend(self.extra_build_args.iter().cloned());
            steps.push(self.step("Build project", command));
        }

        if self.options.install {
            self.require_install_dir()?;
            let command = vec![
                "meson".to_string(),
                "install".to_string(),
                "-C".to_string(),
                build_dir_arg,
            ];
            steps.push(self.step("Install project", command));
        }
        Ok(steps)
    }

    fn bazel(&self) -> Result<Vec<BuildStep>, PlanError> {
        if self.options.install {
            return Err(PlanError::invalid(
                "Install mode is not supported for build system 'bazel'",
            ));
        }
        let target = self
            .options
            .target
            .clone()
            .or_else(|| self.definitions.get("TARGET").map(Value::to_display_string))
            .filter(|target| !target.trim().is_empty())
            .ok_or_else(|| {
                PlanError::invalid(
                    "Bazel builds require a target (use --target or preset definitions.TARGET)",
                )
            })?;

        let mut command = vec!["bazel".to_string(), "build".to_string(), target];
        if let Some(Value::String(opts)) = self.definitions.get("BUILD_OPTS") {
            command.push(opts.clone());
        }
        command.extend(self.extra_build_args.iter().cloned());
        Ok(vec![self.step("Build project", command)])
    }

    fn cargo(&self, build_dir: &Path) -> Result<Vec<BuildStep>, PlanError> {
        if self.options.target.is_some() {
            return Err(PlanError::invalid(
                "Cargo builds do not support --target; pass cargo flags as extra build arguments instead",
            ));
        }
        if self.options.install {
            return Err(PlanError::invalid(
                "Install mode is not supported for cargo projects",
            ));
        }
        let mut steps = Vec::new();
        let build_dir_arg = build_dir.display().to_string();

        if self.mode() == BuildMode::Reconfig {
            steps.push(self.step(
                "Clean cargo workspace",
                vec![
                    "cargo".to_string(),
                    "clean".to_string(),
                    "--target-dir".to_string(),
                    build_dir_arg.clone(),
                ],
            ));
        }
        if self.mode().forces_configure() {
            let mut command = vec!["cargo".to_string(), "fetch".to_string()];
            command.extend(self.extra_config_args.iter().cloned());
            steps.push(self.step("Fetch cargo dependencies", command));
        }
        if self.mode().builds() {
            let mut command = vec![
                "cargo".to_string(),
                "build".to_string(),
                "--target-dir".to_string(),
                build_dir_arg,
            ];
            match self.build_type.to_lowercase().as_str() {
                "debug" => {}
                "release" => command.push("--release".to_string()),
                profile => command.extend(["--profile".to_string(), profile.to_string()]),
            }
            command.extend(self.extra_build_args.iter().cloned());
            steps.push(self.step("Build cargo project", command));
        }
        Ok(steps)
    }

    fn make(&self, build_dir: &Path) -> Result<Vec<BuildStep>, PlanError> {
        let mut steps = Vec::new();
        let make = |extra: &[String]| {
            let mut command = vec![
                "make".to_string(),
                "-C".to_string(),
                build_dir.display().to_string(),
            ];
            command.extend(extra.iter().cloned());
            command
        };

        if self.mode() == BuildMode::Reconfig {
            steps.push(self.step("Clean build directory", make(&["clean".to_string()])));
        }
        if self.mode().builds() {
            let mut extra: Vec<String> = self.options.target.iter().cloned().collect();
            extra.extend(self.extra_build_args.iter().cloned());
            steps.push(self.step("Build project", make(&extra)));
        }
        if self.options.install {
            let install_dir = self.require_install_dir()?;
            steps.push(self.step(
                "Install project",
                make(&[
                    "install".to_string(),
                    format!("PREFIX={}", install_dir.display()),
                ]),
            ));
        }
        Ok(steps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const APP: &str = r#"
[project]
name = "app"
source_dir = "src/{{project.name}}"
build_dir = "_build/{{user.branch}}/{{user.build_type}}"
install_dir = "../install"
build_system = "cmake"
generator = "Ninja"
extra_config_args = ["-DCOMPILER={{env.CC}}"]
environment = { TOOLS = "{{env.HOME}}/tools", PATH = "{{env.TOOLS}}/bin:{{env.PATH}}" }

[git]
url = "https://example.com/app.git"
main_branch = "feature/x"
clone_script = "git clone {{project.name}} {{git.environment.DEST}}"
environment = { DEST = "{{project.source_dir}}" }

[presets.base]
environment = { CC = "gcc" }
definitions = { WITH_TESTS = true, JOBS = "[[ {{system.cpu_count}} * 2 ]]" }
extra_config_args = ["--warn-uninitialized"]

[presets.dev]
extends = "base"
environment = { CC = "clang" }
definitions = { CMAKE_BUILD_TYPE = "RelWithDebInfo" }

[presets."configs.debug"]
definitions = { DEBUG_CHECKS = true }
"#;

    const TOOL: &str = r#"
[project]
name = "tool"
source_dir = "src/tool"
build_dir = "target"
build_system = "cargo"
"#;

    const MONO: &str = r#"
[project]
name = "mono"
source_dir = "src/mono"
component_dir = "libs/core"
build_at_root = false
build_dir = "build"
build_system = "meson"
install_dir = "/opt/mono"
"#;

    const SVC: &str = r#"
[project]
name = "svc"
source_dir = "src/svc"
build_system = "bazel"

[presets.ci]
definitions = { TARGET = "//svc:all", BUILD_OPTS = "--config=ci" }
"#;

    fn workspace() -> TempDir {
        let dir = TempDir::new().unwrap();
        let files = [
            ("config/projects/app.toml", APP),
            ("config/projects/tool.toml", TOOL),
            ("config/projects/mono.toml", MONO),
            ("config/projects/svc.toml", SVC),
            (
                "config/shared.toml",
                "[presets.lto]\ndefinitions = { LTO = true }\n",
            ),
        ];
        for (name, content) in files {
            let path = dir.path().join(name);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, content).unwrap();
        }
        dir
    }

    fn plan_with(dir: &TempDir, options: &BuildOptions) -> Result<BuildPlan, PlanError> {
        with_planner(dir, |planner| planner.plan(options))
    }

    fn with_planner<T>(dir: &TempDir, f: impl FnOnce(&Planner<'_>) -> T) -> T {
        let store = ConfigurationStore::from_directory(dir.path()).unwrap();
        let mut env = BTreeMap::new();
        env.insert("HOME".to_string(), "/home/dev".to_string());
        env.insert("PATH".to_string(), "/usr/bin".to_string());
        let builder = ContextBuilder::with_env(dir.path(), env);
        let system = SystemContext {
            os_name: "linux".into(),
            architecture: "x86_64".into(),
            cpu_count: 4,
        };
        let planner = Planner::with_builder(&store, builder).with_system(system);
        f(&planner)
    }

    fn options(project: &str, presets: &[&str]) -> BuildOptions {
        BuildOptions {
            presets: presets.iter().map(|p| (*p).to_string()).collect(),
            ..BuildOptions::new(project)
        }
    }

    #[test]
    fn test_cmake_plan() {
        let dir = workspace();
        let plan = plan_with(&dir, &options("app", &["dev, lto", "dev"])).unwrap();
        let root = dir.path();

        assert_eq!(plan.presets, vec!["dev", "lto", "configs.debug"]);
        assert_eq!(plan.branch, "feature/x");
        assert_eq!(plan.branch_slug, "feature_x");
        assert_eq!(plan.source_dir, root.join("src/app"));
        assert_eq!(
            plan.build_dir.as_deref(),
            Some(root.join("src/app/_build/feature_x/Debug").as_path())
        );
        assert_eq!(plan.install_dir.as_deref(), Some(root.join("src/install").as_path()));

        assert_eq!(plan.environment["CC"], "clang");
        assert_eq!(plan.environment["TOOLS"], "/home/dev/tools");
        assert_eq!(plan.environment["PATH"], "/home/dev/tools/bin:/usr/bin");
        assert_eq!(plan.definitions["JOBS"], Value::Integer(8));
        // A preset value wins unless the build type is given explicitly.
        assert_eq!(
            plan.definitions["CMAKE_BUILD_TYPE"],
            Value::from("RelWithDebInfo")
        );
        assert_eq!(
            plan.extra_config_args,
            vec!["--warn-uninitialized", "-DCOMPILER=clang"]
        );

        assert_eq!(plan.steps.len(), 2);
        let configure = &plan.steps[0].command;
        assert_eq!(&configure[..3], ["cmake", "-G", "Ninja"]);
        assert!(configure.contains(&"LTO:BOOL=ON".to_string()));
        assert!(configure.contains(&"JOBS:STRING=8".to_string()));
        assert!(configure.contains(&format!(
            "CMAKE_INSTALL_PREFIX:STRING={}",
            root.join("src/install").display()
        )));
        assert_eq!(configure.last().unwrap(), "-DCOMPILER=clang");
        assert_eq!(plan.steps[1].command[..2], ["cmake", "--build"]);
        assert_eq!(plan.steps[1].cwd, root.join("src/app"));
        assert_eq!(plan.steps[1].env["CC"], "clang");
    }

    #[test]
    fn test_explicit_build_type_overrides_presets() {
        let dir = workspace();
        let mut opts = options("app", &["dev"]);
        opts.build_type = Some("Release".into());
        opts.definitions.insert("EXTRA".into(), Value::Integer(1));
        let plan = plan_with(&dir, &opts).unwrap();
        assert_eq!(plan.definitions["CMAKE_BUILD_TYPE"], Value::from("Release"));
        assert_eq!(plan.definitions["EXTRA"], Value::Integer(1));
        assert_eq!(plan.presets, vec!["dev"]);
    }

    #[test]
    fn test_multi_config_generator() {
        let dir = workspace();
        let mut opts = options("app", &[]);
        opts.generator = Some("Ninja Multi-Config".into());
        let plan = plan_with(&dir, &opts).unwrap();
        assert_eq!(plan.presets, vec!["configs.debug"]);
        assert!(!plan.steps[0]
            .command
            .iter()
            .any(|arg| arg.starts_with("CMAKE_BUILD_TYPE")));
        assert_eq!(
            plan.steps[1].command[plan.steps[1].command.len() - 2..],
            ["--config", "Debug"]
        );
    }

    #[test]
    fn test_git_environment_and_scripts() {
        let dir = workspace();
        let plan = plan_with(&dir, &options("app", &[])).unwrap();
        let source = dir.path().join("src/app").display().to_string();
        assert_eq!(plan.git_environment["DEST"], source);
        assert_eq!(
            plan.git_clone_script.as_deref(),
            Some(format!("git clone app {source}").as_str())
        );
        assert!(plan.git_update_script.is_none());
    }

    #[test]
    fn test_build_only_requires_configured_dir() {
        let dir = workspace();
        let mut opts = options("app", &[]);
        opts.operation = BuildMode::BuildOnly;
        assert!(matches!(
            plan_with(&dir, &opts).unwrap_err(),
            PlanError::NotConfigured { .. }
        ));

        let build_dir = dir.path().join("src/app/_build/feature_x/Debug");
        fs::create_dir_all(&build_dir).unwrap();
        fs::write(build_dir.join("CMakeCache.txt"), "").unwrap();
        let plan = plan_with(&dir, &opts).unwrap();
        assert_eq!(plan.steps.len(), 1);
        assert_eq!(plan.steps[0].description, "Build project");

        opts.operation = BuildMode::Auto;
        let plan = plan_with(&dir, &opts).unwrap();
        assert_eq!(plan.steps.len(), 1);

        opts.operation = BuildMode::Reconfig;
        let plan = plan_with(&dir, &opts).unwrap();
        assert!(plan.reset_build_dir);
        assert_eq!(plan.steps.len(), 1);
        assert_eq!(plan.steps[0].description, "Configure project");
    }

    #[test]
    fn test_install_steps() {
        let dir = workspace();
        let mut opts = options("app", &[]);
        opts.install = true;
        let plan = plan_with(&dir, &opts).unwrap();
        assert_eq!(plan.steps.last().unwrap().command[..2], ["cmake", "--install"]);

        let mut opts = options("tool", &[]);
        opts.install = true;
        assert!(matches!(
            plan_with(&dir, &opts).unwrap_err(),
            PlanError::Invalid { .. }
        ));
    }

    #[test]
    fn test_cargo_plan() {
        let dir = workspace();
        let mut opts = options("tool", &[]);
        opts.build_type = Some("Release".into());
        let plan = plan_with(&dir, &opts).unwrap();
        let target_dir = dir.path().join("src/tool/target").display().to_string();
        assert_eq!(plan.environment["CARGO_TARGET_DIR"], target_dir);
        assert_eq!(
            plan.steps[0].command,
            vec!["cargo", "build", "--target-dir", target_dir.as_str(), "--release"]
        );

        opts.build_type = Some("Bench".into());
        opts.operation = BuildMode::Reconfig;
        let plan = plan_with(&dir, &opts).unwrap();
        let descriptions: Vec<&str> = plan.steps.iter().map(|s| s.description.as_str()).collect();
        assert_eq!(descriptions, vec!["Clean cargo workspace", "Fetch cargo dependencies"]);

        opts.operation = BuildMode::Auto;
        let plan = plan_with(&dir, &opts).unwrap();
        assert_eq!(plan.steps[0].command[4..], ["--profile", "bench"]);
    }

    #[test]
    fn test_meson_component_layout() {
        let dir = workspace();
        let mut opts = options("mono", &["lto"]);
        opts.install = true;
        let plan = plan_with(&dir, &opts).unwrap();
        let component = dir.path().join("src/mono/libs/core");
        assert_eq!(plan.configure_source_dir, component);
        assert_eq!(plan.build_dir.as_deref(), Some(component.join("build").as_path()));
        assert_eq!(plan.install_dir.as_deref(), Some(Path::new("/opt/mono")));
        let setup = &plan.steps[0].command;
        assert_eq!(&setup[..2], ["meson", "setup"]);
        assert!(setup.contains(&"-DLTO=true".to_string()));
        assert!(setup.contains(&"--prefix".to_string()));
        assert_eq!(plan.steps[1].command[..2], ["meson", "compile"]);
        assert_eq!(plan.steps[2].command[..2], ["meson", "install"]);
    }

    #[test]
    fn test_bazel_target_from_definitions() {
        let dir = workspace();
        let plan = plan_with(&dir, &options("svc", &["ci"])).unwrap();
        assert!(plan.build_dir.is_none());
        assert_eq!(
            plan.steps[0].command,
            vec!["bazel", "build", "//svc:all", "--config=ci"]
        );
        let err = plan_with(&dir, &options("svc", &[])).unwrap_err();
        assert!(err.to_string().starts_with("Bazel builds require a target"));
    }

    #[test]
    fn test_unknown_preset_fails_plan() {
        let dir = workspace();
        let err = plan_with(&dir, &options("app", &["ghost"])).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Preset 'ghost' not found. Available: base, configs.debug, dev, lto"
        );
    }

    #[test]
    fn test_plan_serializes_to_json() {
        let dir = workspace();
        let plan = plan_with(&dir, &options("app", &[])).unwrap();
        let json: serde_json::Value = serde_json::from_str(&plan.to_json().unwrap()).unwrap();
        assert_eq!(json["project"], "app");
        assert_eq!(json["operation"], "auto");
        assert_eq!(json["build_system"], "cmake");
        assert_eq!(json["steps"][0]["description"], "Configure project");
        assert!(json["steps"][0].get("env").is_none());
        assert_eq!(json["context"]["user"]["branch"], "feature_x");
    }

    #[test]
    fn test_build_mode_parse() {
        assert_eq!("config-only".parse::<BuildMode>(), Ok(BuildMode::ConfigOnly));
        assert_eq!("BUILD_ONLY".parse::<BuildMode>(), Ok(BuildMode::BuildOnly));
        assert!("sometimes".parse::<BuildMode>().is_err());
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path(Path::new("/a/b/../c/./d")), PathBuf::from("/a/c/d"));
        assert_eq!(normalize_path(Path::new("../x/..")), PathBuf::from(".."));
        assert_eq!(normalize_path(Path::new("/..")), PathBuf::from("/"));
    }

    #[test]
    fn test_command_line_quoting() {
        let step = BuildStep::new(
            "x",
            vec!["cmake".into(), "-DNAME=a b".into(), String::new()],
            Path::new("/"),
            &BTreeMap::new(),
        );
        assert_eq!(step.command_line(), "cmake '-DNAME=a b' ''");
    }

    const TOOLCHAINS: &str = r#"
[cached]
cc = "cc-x"
cxx = "cxx-x"
linker = "mold"
launcher = "ccache"
supports = ["cmake"]
definitions = { WARN = "all", LEVEL = 2 }
"#;

    const FW: &str = r#"
dependencies = [{ name = "lib", presets = "fast" }]

[project]
name = "fw"
source_dir = "src/fw"
build_dir = "build"
build_system = "cmake"
toolchain = "cached"
extra_config_args = ["-DTOOL={{user.cc}}"]

[presets.base]
environment = { CC = "gcc" }
definitions = { WARN = "some" }
"#;

    const LIB: &str = r#"
[project]
name = "lib"
source_dir = "src/lib"
build_dir = "build"
build_system = "meson"

[presets.fast]
definitions = { optimization = "3" }
"#;

    fn toolchain_workspace() -> TempDir {
        let dir = workspace();
        for (name, content) in [
            ("config/toolchains.toml", TOOLCHAINS),
            ("config/projects/fw.toml", FW),
            ("config/projects/lib.toml", LIB),
        ] {
            fs::write(dir.path().join(name), content).unwrap();
        }
        dir
    }

    #[test]
    fn test_project_toolchain_applies_after_presets() {
        let dir = toolchain_workspace();
        let mut opts = options("fw", &["base"]);
        opts.definitions.insert("LEVEL".into(), Value::Integer(3));
        let plan = plan_with(&dir, &opts).unwrap();

        assert_eq!(plan.toolchain.as_deref(), Some("cached"));
        assert_eq!(plan.environment["CC"], "ccache cc-x");
        assert_eq!(plan.environment["CXX"], "ccache cxx-x");
        assert_eq!(plan.environment["CC_LD"], "mold");
        assert_eq!(plan.definitions["WARN"], Value::from("all"));
        assert_eq!(plan.definitions["LEVEL"], Value::Integer(3));
        assert_eq!(plan.definitions["CMAKE_C_COMPILER"], Value::from("cc-x"));
        assert_eq!(plan.definitions["CMAKE_CXX_COMPILER_LAUNCHER"], Value::from("ccache"));
        assert_eq!(plan.definitions["CMAKE_LINKER"], Value::from("mold"));
        assert_eq!(plan.definitions["CMAKE_EXPORT_COMPILE_COMMANDS"], Value::Bool(true));
        assert!(plan.extra_config_args.contains(&"-DTOOL=cc-x".to_string()));
    }

    #[test]
    fn test_toolchain_option_overrides_project_default() {
        let dir = toolchain_workspace();
        let opts = BuildOptions {
            toolchain: Some("Clang".into()),
            ..options("fw", &[])
        };
        let plan = plan_with(&dir, &opts).unwrap();
        assert_eq!(plan.toolchain.as_deref(), Some("clang"));
        assert_eq!(plan.environment["CC"], "clang");

        let opts = BuildOptions {
            toolchain: Some("rustc".into()),
            ..options("tool", &[])
        };
        let plan = plan_with(&dir, &opts).unwrap();
        assert_eq!(plan.environment["RUSTC"], "rustc");
    }

    #[test]
    fn test_toolchain_selection_errors() {
        let dir = toolchain_workspace();
        let incompatible = BuildOptions {
            toolchain: Some("rustc".into()),
            ..options("fw", &[])
        };
        let err = plan_with(&dir, &incompatible).unwrap_err();
        assert!(matches!(
            err,
            PlanError::Toolchain(crate::error::ToolchainError::Incompatible { .. })
        ));
        assert!(err.to_string().contains("build system 'cmake'"));

        let unknown = BuildOptions {
            toolchain: Some("ghost".into()),
            ..options("app", &[])
        };
        let err = plan_with(&dir, &unknown).unwrap_err();
        assert!(matches!(
            err,
            PlanError::Toolchain(crate::error::ToolchainError::Unknown { .. })
        ));
    }

    #[test]
    fn test_plan_without_toolchain_leaves_compilers_alone() {
        let dir = workspace();
        let plan = plan_with(&dir, &options("app", &["dev"])).unwrap();
        assert_eq!(plan.toolchain, None);
        assert_eq!(plan.environment["CC"], "clang");
        assert!(!plan.definitions.contains_key("CMAKE_C_COMPILER"));
    }

    #[test]
    fn test_plan_with_dependencies() {
        let dir = toolchain_workspace();
        let mut opts = BuildOptions {
            build_type: Some("Release".into()),
            target: Some("fw_app".into()),
            ..options("fw", &["base"])
        };
        opts.definitions.insert("LEVEL".into(), Value::Integer(3));
        let plans = with_planner(&dir, |planner| planner.plan_with_dependencies(&opts)).unwrap();

        let names: Vec<_> = plans.iter().map(|plan| plan.project.as_str()).collect();
        assert_eq!(names, vec!["lib", "fw"]);
        let lib = &plans[0];
        assert_eq!(lib.presets, vec!["fast"]);
        assert_eq!(lib.build_type, "Release");
        assert_eq!(lib.toolchain, None);
        assert_eq!(lib.definitions["optimization"], Value::from("3"));
        assert!(!lib.definitions.contains_key("LEVEL"));
        assert_eq!(plans[1].definitions["LEVEL"], Value::Integer(3));
    }

    #[test]
    fn test_dependency_options_inheritance() {
        let parent = BuildOptions {
            branch: Some("dev".into()),
            toolchain: Some("gcc".into()),
            target: Some("all".into()),
            install: true,
            install_dir: Some("/opt".into()),
            operation: BuildMode::Reconfig,
            extra_build_args: vec!["-v".into()],
            ..options("app", &["dev"])
        };
        let child = parent.for_dependency("lib", vec!["fast".into()]);
        assert_eq!(child.project, "lib");
        assert_eq!(child.presets, vec!["fast"]);
        assert_eq!(child.branch.as_deref(), Some("dev"));
        assert_eq!(child.toolchain.as_deref(), Some("gcc"));
        assert_eq!(child.operation, BuildMode::Reconfig);
        assert_eq!(child.extra_build_args, vec!["-v"]);
        assert_eq!(child.target, None);
        assert!(!child.install);
        assert_eq!(child.install_dir, None);
    }
}
