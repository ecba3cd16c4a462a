//! Integration tests for the resolution engine through the library API
//!
//! Exercises the configuration store, preset resolution and build planning
//! together on the sample workspace.

mod common;

use std::collections::BTreeMap;

use common::TestProject;
use presetbuild::core::check::check_workspace;
use presetbuild::core::context::{Context, ContextBuilder, SystemContext};
use presetbuild::core::manifest::ConfigurationStore;
use presetbuild::core::plan::{BuildMode, BuildOptions, Planner};
use presetbuild::core::template::TemplateResolver;
use presetbuild::core::value::Value;
use presetbuild::error::{PlanError, TemplateError};
use proptest::prelude::*;

fn planner_env() -> BTreeMap<String, String> {
    let mut env = BTreeMap::new();
    env.insert("HOME".to_string(), "/home/tester".to_string());
    env.insert("PATH".to_string(), "/usr/bin".to_string());
    env
}

fn system() -> SystemContext {
    SystemContext {
        os_name: "linux".into(),
        architecture: "aarch64".into(),
        cpu_count: 1,
    }
}

#[test]
fn test_plan_dependency_with_requested_presets() {
    let project = TestProject::sample();
    let store = ConfigurationStore::from_directory(&project.path()).unwrap();
    let planner = Planner::with_builder(&store, ContextBuilder::with_env(&project.path(), planner_env()))
        .with_system(system());

    let chain = store.resolve_dependency_chain("app").unwrap();
    assert_eq!(chain.len(), 1);
    assert_eq!(chain[0].project.name, "lib");

    let options = BuildOptions {
        presets: chain[0].presets.clone(),
        ..BuildOptions::new("lib")
    };
    let plan = planner.plan(&options).unwrap();
    assert_eq!(plan.presets, vec!["fast", "configs.release"]);
    assert_eq!(plan.definitions["buildtype"], Value::from("release"));
    assert_eq!(plan.definitions["OPTIMIZE"], Value::from("speed"));
    assert!(plan.steps[0].command.contains(&"-Dbuildtype=release".to_string()));
}

#[test]
fn test_plan_overrides_and_reconfig() {
    let project = TestProject::sample();
    project.create_file("src/app/_build/develop/Debug/CMakeCache.txt", "");
    let store = ConfigurationStore::from_directory(&project.path()).unwrap();
    let planner = Planner::with_builder(&store, ContextBuilder::with_env(&project.path(), planner_env()))
        .with_system(system());

    let mut options = BuildOptions::new("app");
    options.build_type = Some("Debug".into());
    options.operation = BuildMode::Reconfig;
    options.definitions.insert("WITH_TESTS".into(), Value::Bool(false));
    let plan = planner.plan(&options).unwrap();

    assert!(plan.reset_build_dir);
    assert!(plan.presets.is_empty());
    assert_eq!(plan.definitions["WITH_TESTS"], Value::Bool(false));
    assert_eq!(plan.definitions["CMAKE_BUILD_TYPE"], Value::from("Debug"));
    assert_eq!(plan.steps.len(), 1);
    assert!(plan.steps[0]
        .command
        .contains(&"CMAKE_BUILD_TYPE:STRING=Debug".to_string()));
}

#[test]
fn test_plan_errors_surface_template_failures() {
    let project = TestProject::sample();
    project.create_file(
        "config/projects/tool.toml",
        r#"
[project]
name = "tool"
source_dir = "src/tool"
environment = { A = "{{project.environment.B}}", B = "{{project.environment.A}}" }
"#,
    );
    let store = ConfigurationStore::from_directory(&project.path()).unwrap();
    let planner = Planner::with_builder(&store, ContextBuilder::with_env(&project.path(), planner_env()));

    let err = planner.plan(&BuildOptions::new("tool")).unwrap_err();
    let PlanError::Template(template) = err else {
        panic!("expected a template error, got {err}");
    };
    assert!(matches!(
        template.root(),
        TemplateError::CircularDependency { cycle } if cycle == &["A", "B", "A"]
    ));
    assert_eq!(
        template.to_string(),
        "Project 'tool' environment: Circular dependency detected: A -> B -> A"
    );

    let reports = check_workspace(&planner);
    let tool = reports.iter().find(|r| r.subject == "tool").unwrap();
    assert!(!tool.is_valid());
}

#[test]
fn test_template_cycle_in_context() {
    let mut ctx = Context::new();
    ctx.set_path("a.x", "{{b.y}}".into());
    ctx.set_path("b.y", "{{a.x}}".into());
    let err = TemplateResolver::new(ctx).resolve_str("{{a.x}}").unwrap_err();
    assert!(err.to_string().starts_with("Circular dependency detected"));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn plain_context_values_resolve_verbatim(
        values in prop::collection::btree_map("[a-z]{1,8}", "[^{\\[]{0,16}", 1..6)
    ) {
        let mut ctx = Context::new();
        for (key, value) in &values {
            ctx.set_path(&format!("user.{key}"), Value::from(value.as_str()));
        }
        let mut resolver = TemplateResolver::new(ctx);
        for (key, value) in &values {
            let resolved = resolver.resolve_str(&format!("{{{{user.{key}}}}}")).unwrap();
            prop_assert_eq!(resolved, Value::from(value.as_str()));
        }
    }
}
