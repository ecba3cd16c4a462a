//! Check command implementation
//!
//! Implements `presetbuild check` to validate configuration without
//! planning a build.

use std::path::Path;

use anyhow::{bail, Result};

use super::load_store;
use crate::cli::output::{print_json, status, OutputConfig};
use crate::core::check::{check_project, check_workspace, CheckReport};
use crate::core::plan::Planner;

/// Execute the check command
pub fn execute(root: &Path, project: Option<&str>, output: &OutputConfig) -> Result<()> {
    let store = load_store(root)?;
    let planner = Planner::new(&store);

    let reports = match project {
        Some(name) => vec![check_project(&planner, name)?],
        None => check_workspace(&planner),
    };
    let error_count: usize = reports.iter().map(|report| report.errors.len()).sum();

    if output.json {
        print_json(&reports)?;
    } else {
        for report in &reports {
            print_report(report, output);
        }
    }

    if error_count > 0 {
        bail!("Check failed: {error_count} error(s) found");
    }
    output.info(format!("\n{} Check passed - ready to build", status::SUCCESS));
    Ok(())
}

fn print_report(report: &CheckReport, output: &OutputConfig) {
    if report.is_valid() {
        output.info(format!("{} {}", status::SUCCESS, report.subject));
    } else {
        println!("{} {}", status::ERROR, report.subject);
        for error in &report.errors {
            println!("  - {error}");
        }
    }
    for warning in &report.warnings {
        output.info(format!("  {} {warning}", status::WARNING));
    }
    if !report.dependency_order.is_empty() {
        output.info(format!(
            "  {} dependencies: {}",
            status::INFO,
            report.dependency_order.join(" -> ")
        ));
    }
}
