//! CLI command implementations
//!
//! Each command is implemented in its own submodule.

pub mod check;
pub mod eval;
pub mod list;
pub mod order;
pub mod plan;

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Subcommand;

use crate::cli::output::OutputConfig;
use crate::core::manifest::ConfigurationStore;
use crate::core::value::Value;

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List projects and the presets available to them
    List,

    /// Validate configuration without planning a build
    Check {
        /// Project to check (checks every project when omitted)
        project: Option<String>,
    },

    /// Resolve presets and print the build plan for a project
    Plan(plan::PlanArgs),

    /// Resolve a single template and print the result
    Eval {
        /// Template text, e.g. "{{env.HOME}}/tools" or "[[ 2 * 3 ]]"
        template: String,

        /// Load the context from a TOML, JSON or YAML file
        #[arg(long, value_name = "FILE")]
        context: Option<PathBuf>,

        /// Set a context value (the value is read as a TOML literal when possible)
        #[arg(long = "set", value_name = "PATH=VALUE")]
        set: Vec<String>,
    },

    /// Print the evaluation order of a table whose entries reference each other
    Order {
        /// TOML, JSON or YAML document
        file: PathBuf,

        /// Dotted path of the table inside the document (the whole document when omitted)
        #[arg(long, value_name = "PATH")]
        table: Option<String>,

        /// Placeholder prefix that refers to entries of the table (repeatable)
        #[arg(long = "prefix", value_name = "PREFIX", required = true)]
        prefixes: Vec<String>,
    },
}

impl Commands {
    /// Execute the command
    pub fn run(self, root: &Path, output: &OutputConfig) -> Result<()> {
        match self {
            Self::List => {
                tracing::info!("Listing projects in {}", root.display());
                list::execute(root, output)
            }
            Self::Check { project } => {
                tracing::info!("Checking configuration in {}", root.display());
                check::execute(root, project.as_deref(), output)
            }
            Self::Plan(args) => {
                tracing::info!("Planning build for '{}'", args.project);
                plan::execute(root, &args, output)
            }
            Self::Eval {
                template,
                context,
                set,
            } => eval::execute(root, &template, context.as_deref(), &set, output),
            Self::Order {
                file,
                table,
                prefixes,
            } => order::execute(&file, table.as_deref(), &prefixes, output),
        }
    }
}

/// Load the configuration store of the workspace
pub(crate) fn load_store(root: &Path) -> Result<ConfigurationStore> {
    ConfigurationStore::from_directory(root)
        .with_context(|| format!("Failed to load configuration from {}", root.display()))
}

/// Parse a `KEY=VALUE` argument
///
/// The value is read as a TOML literal (`true`, `3`, `[1, 2]`, `"text"`) and
/// kept as a plain string when it is not one.
pub(crate) fn parse_assignment(text: &str) -> Result<(String, Value)> {
    let Some((key, raw)) = text.split_once('=') else {
        bail!("Invalid assignment '{text}': expected KEY=VALUE");
    };
    let key = key.trim();
    if key.is_empty() {
        bail!("Invalid assignment '{text}': the key must not be empty");
    }
    Ok((key.to_string(), parse_literal(raw)))
}

fn parse_literal(raw: &str) -> Value {
    toml::from_str::<toml::Table>(&format!("value = {raw}"))
        .ok()
        .and_then(|mut table| table.remove("value"))
        .map_or_else(|| Value::String(raw.to_string()), Value::from)
}
