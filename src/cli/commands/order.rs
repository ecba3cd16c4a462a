//! Order command implementation
//!
//! Implements `presetbuild order` to show the evaluation order of a table
//! whose entries reference each other through placeholders.

use std::collections::BTreeSet;
use std::path::Path;

use anyhow::{Context as _, Result};

use crate::cli::output::{print_json, OutputConfig};
use crate::core::context::Context;
use crate::core::manifest::load_document;
use crate::core::resolver::build_dependency_map;
use crate::core::value::{Map, Value};

/// Execute the order command
pub fn execute(
    file: &Path,
    table: Option<&str>,
    prefixes: &[String],
    output: &OutputConfig,
) -> Result<()> {
    let document: Map = load_document(file)
        .with_context(|| format!("Failed to load {}", file.display()))?;
    let entries = match table {
        Some(path) => match Context::from_map(document).get_path(path)? {
            Value::Map(entries) => entries.clone(),
            other => anyhow::bail!(
                "'{path}' in {} is a {}, not a table",
                file.display(),
                other.type_name()
            ),
        },
        None => document,
    };

    let prefixes: Vec<&str> = prefixes.iter().map(String::as_str).collect();
    let order = build_dependency_map(&entries, &prefixes, &BTreeSet::new())
        .topological_sort()
        .with_context(|| format!("Cannot order entries of {}", file.display()))?;

    if output.json {
        return print_json(&order);
    }
    for name in &order {
        println!("{name}");
    }
    Ok(())
}
