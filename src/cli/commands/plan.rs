//! Plan command implementation
//!
//! Implements `presetbuild plan` to resolve presets and print the build
//! steps for a project and its dependencies without running them.

use std::path::Path;

use anyhow::{Context, Result};
use clap::Args;

use super::{load_store, parse_assignment};
use crate::cli::output::{print_json, status, OutputConfig};
use crate::core::plan::{BuildMode, BuildOptions, BuildPlan, Planner};

/// Arguments of `presetbuild plan`
#[derive(Args, Debug, Clone, Default)]
pub struct PlanArgs {
    /// Project to plan
    pub project: String,

    /// Preset to apply (repeatable, or comma-separated)
    #[arg(short, long = "preset", value_name = "PRESET")]
    pub presets: Vec<String>,

    /// Branch to build (defaults to the project's git branch)
    #[arg(short, long)]
    pub branch: Option<String>,

    /// Build type (defaults to the global setting)
    #[arg(short = 't', long)]
    pub build_type: Option<String>,

    /// Generator (defaults to the project setting)
    #[arg(short, long)]
    pub generator: Option<String>,

    /// Toolchain (defaults to the project setting)
    #[arg(short = 'T', long)]
    pub toolchain: Option<String>,

    /// Plan only the project, not its dependencies
    #[arg(long)]
    pub no_deps: bool,

    /// Build target
    #[arg(long)]
    pub target: Option<String>,

    /// Add an install step
    #[arg(long)]
    pub install: bool,

    /// Install directory (overrides the project setting)
    #[arg(long, value_name = "DIR")]
    pub install_dir: Option<String>,

    /// Operation mode: auto, config-only, build-only or reconfig
    #[arg(short, long)]
    pub operation: Option<BuildMode>,

    /// Definition override (repeatable)
    #[arg(short = 'D', value_name = "KEY=VALUE")]
    pub define: Vec<String>,

    /// Extra argument for the configure step (repeatable)
    #[arg(long = "extra-config-arg", value_name = "ARG", allow_hyphen_values = true)]
    pub extra_config_args: Vec<String>,

    /// Extra argument for the build step (repeatable)
    #[arg(long = "extra-build-arg", value_name = "ARG", allow_hyphen_values = true)]
    pub extra_build_args: Vec<String>,
}

impl PlanArgs {
    /// Convert to planner options; `default_operation` applies when none is given
    pub fn to_options(&self, default_operation: &str) -> Result<BuildOptions> {
        let operation = match self.operation {
            Some(operation) => operation,
            None => default_operation
                .parse()
                .map_err(anyhow::Error::msg)
                .context("Invalid default_operation in global settings")?,
        };

        let mut options = BuildOptions {
            presets: self.presets.clone(),
            branch: self.branch.clone(),
            build_type: self.build_type.clone(),
            generator: self.generator.clone(),
            toolchain: self.toolchain.clone(),
            target: self.target.clone(),
            install: self.install,
            install_dir: self.install_dir.clone(),
            operation,
            extra_config_args: self.extra_config_args.clone(),
            extra_build_args: self.extra_build_args.clone(),
            ..BuildOptions::new(&self.project)
        };
        for assignment in &self.define {
            let (key, value) = parse_assignment(assignment)?;
            options.definitions.insert(key, value);
        }
        Ok(options)
    }
}

/// Execute the plan command
pub fn execute(root: &Path, args: &PlanArgs, output: &OutputConfig) -> Result<()> {
    let store = load_store(root)?;
    let options = args.to_options(&store.global().default_operation)?;
    let planner = Planner::new(&store);
    let plans = if args.no_deps {
        planner.plan(&options).map(|plan| vec![plan])
    } else {
        planner.plan_with_dependencies(&options)
    }
    .with_context(|| format!("Failed to plan '{}'", args.project))?;

    if output.json {
        return print_json(&plans);
    }
    for (index, plan) in plans.iter().enumerate() {
        if index > 0 {
            output.info("");
        }
        print_plan(plan, output);
    }
    Ok(())
}

fn print_plan(plan: &BuildPlan, output: &OutputConfig) {
    let build_system = plan
        .build_system
        .map_or_else(|| "no build system".to_string(), |system| system.to_string());
    output.info(format!("{} {} ({build_system})", status::INFO, plan.project));
    output.info(format!("  branch:      {} ({})", plan.branch, plan.branch_slug));
    output.info(format!("  build type:  {}", plan.build_type));
    output.info(format!("  operation:   {}", plan.operation));
    if let Some(generator) = &plan.generator {
        output.info(format!("  generator:   {generator}"));
    }
    if let Some(toolchain) = &plan.toolchain {
        output.info(format!("  toolchain:   {toolchain}"));
    }
    output.info(format!("  source:      {}", plan.source_dir.display()));
    if let Some(build_dir) = &plan.build_dir {
        output.info(format!("  build dir:   {}", build_dir.display()));
    }
    if let Some(install_dir) = &plan.install_dir {
        output.info(format!("  install dir: {}", install_dir.display()));
    }
    if !plan.presets.is_empty() {
        output.info(format!("  presets:     {}", plan.presets.join(", ")));
    }

    if !plan.environment.is_empty() {
        output.info("\nEnvironment:");
        for (key, value) in &plan.environment {
            output.info(format!("  {key}={value}"));
        }
    }
    if !plan.definitions.is_empty() {
        output.info("\nDefinitions:");
        for (key, value) in &plan.definitions {
            output.info(format!("  {key}={}", value.to_display_string()));
        }
    }
    if let Some(script) = &plan.git_clone_script {
        output.info(format!("\nGit clone script: {script}"));
    }
    if let Some(script) = &plan.git_update_script {
        output.info(format!("\nGit update script: {script}"));
    }

    if plan.reset_build_dir {
        output.info(format!(
            "\n{} Build directory will be recreated before configuring",
            status::WARNING
        ));
    }
    if plan.steps.is_empty() {
        output.info("\nNo build steps");
        return;
    }
    output.info("\nSteps:");
    for (index, step) in plan.steps.iter().enumerate() {
        output.info(format!("  {}. {}", index + 1, step.description));
        // Quiet output keeps only the commands.
        if output.quiet {
            println!("{}", step.command_line());
        } else {
            output.info(format!("     {}", step.command_line()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::value::Value;

    #[test]
    fn test_to_options() {
        let args = PlanArgs {
            project: "app".into(),
            presets: vec!["dev,lto".into()],
            define: vec!["JOBS=8".into(), "NAME=demo".into()],
            toolchain: Some("gcc".into()),
            ..PlanArgs::default()
        };
        let options = args.to_options("config-only").unwrap();
        assert_eq!(options.project, "app");
        assert_eq!(options.operation, BuildMode::ConfigOnly);
        assert_eq!(options.presets, vec!["dev,lto"]);
        assert_eq!(options.toolchain.as_deref(), Some("gcc"));
        assert_eq!(options.definitions["JOBS"], Value::Integer(8));
        assert_eq!(options.definitions["NAME"], Value::from("demo"));

        let explicit = PlanArgs {
            operation: Some(BuildMode::Reconfig),
            ..args
        };
        assert_eq!(explicit.to_options("bogus").unwrap().operation, BuildMode::Reconfig);
    }

    #[test]
    fn test_invalid_default_operation() {
        let args = PlanArgs {
            project: "app".into(),
            ..PlanArgs::default()
        };
        assert!(args.to_options("sometimes").is_err());
    }
}
