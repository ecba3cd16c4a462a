//! Eval command implementation
//!
//! Implements `presetbuild eval` to resolve one template, which is handy
//! when debugging presets.

use std::path::Path;

use anyhow::{Context as _, Result};

use super::parse_assignment;
use crate::cli::output::{print_json, OutputConfig};
use crate::config::defaults::{DEFAULT_BRANCH, DEFAULT_BUILD_TYPE};
use crate::core::context::{Context, ContextBuilder, ProjectContext, SystemContext};
use crate::core::manifest::load_document;
use crate::core::template::TemplateResolver;
use crate::core::value::Map;

/// Execute the eval command
///
/// Without `--context` the standard namespaces of the workspace are used
/// (`user` on the default branch and build type, `system`, `env`, `builder`).
pub fn execute(
    root: &Path,
    template: &str,
    context_file: Option<&Path>,
    assignments: &[String],
    output: &OutputConfig,
) -> Result<()> {
    let mut context = match context_file {
        Some(path) => {
            let map: Map = load_document(path)
                .with_context(|| format!("Failed to load context from {}", path.display()))?;
            Context::from_map(map)
        }
        None => default_context(root),
    };
    for assignment in assignments {
        let (path, value) = parse_assignment(assignment)?;
        context.set_path(&path, value);
    }

    let value = TemplateResolver::new(context)
        .resolve_str(template)
        .with_context(|| format!("Failed to resolve '{template}'"))?;

    if output.json {
        print_json(&value)
    } else {
        println!("{}", value.to_display_string());
        Ok(())
    }
}

fn default_context(root: &Path) -> Context {
    let builder = ContextBuilder::new(root);
    let user = builder.user(DEFAULT_BRANCH, DEFAULT_BUILD_TYPE, None, None);
    let project = ProjectContext {
        source_dir: root.to_path_buf(),
        ..ProjectContext::default()
    };
    builder.combined_context(&user, &project, &SystemContext::detect())
}
