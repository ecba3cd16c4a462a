//! List command implementation
//!
//! Implements `presetbuild list` to show projects and their presets.

use std::path::Path;

use anyhow::Result;
use serde::Serialize;

use super::load_store;
use crate::cli::output::{print_json, OutputConfig};

#[derive(Debug, Serialize)]
struct ProjectSummary {
    name: String,
    build_system: Option<String>,
    source_dir: String,
    presets: Vec<String>,
    dependencies: Vec<String>,
}

/// Execute the list command
pub fn execute(root: &Path, output: &OutputConfig) -> Result<()> {
    let store = load_store(root)?;

    let projects: Vec<ProjectSummary> = store
        .projects()
        .values()
        .map(|project| ProjectSummary {
            name: project.name.clone(),
            build_system: project.build_system.clone(),
            source_dir: project.source_dir.clone(),
            presets: store.preset_repository(project).available(),
            dependencies: project
                .dependencies
                .iter()
                .map(|dependency| dependency.name.clone())
                .collect(),
        })
        .collect();

    if output.json {
        return print_json(&projects);
    }

    for project in &projects {
        println!(
            "{} ({})",
            project.name,
            project.build_system.as_deref().unwrap_or("no build system")
        );
        println!("  source: {}", project.source_dir);
        if project.presets.is_empty() {
            println!("  presets: (none)");
        } else {
            println!("  presets: {}", project.presets.join(", "));
        }
        if !project.dependencies.is_empty() {
            println!("  depends on: {}", project.dependencies.join(", "));
        }
    }
    Ok(())
}
