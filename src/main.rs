//! presetbuild CLI - Preset-driven build orchestration
//!
//! Entry point for the presetbuild command-line application.

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

use clap::Parser;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use presetbuild::cli::output::{display_error, status, OutputConfig};
use presetbuild::cli::Cli;
use presetbuild::core::manifest::GlobalConfig;

fn main() {
    let cli = Cli::parse();
    init_tracing(&cli.output_config(), &cli.workspace_root());

    if let Err(e) = cli.run() {
        display_error(&e);
        std::process::exit(1);
    }
}

/// Console logging follows `-v`/`-q` (or `RUST_LOG`); the optional log file
/// from the global settings uses the configured `log_level`.
fn init_tracing(output: &OutputConfig, root: &Path) {
    let console_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(output.log_directive()));
    let console = fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(console_filter);

    let global = GlobalConfig::discover(root).unwrap_or_default();
    let file_layer = global.log_file.as_deref().and_then(|log_file| {
        let path = root.join(log_file);
        match OpenOptions::new().create(true).append(true).open(&path) {
            Ok(file) => Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file))
                    .with_filter(EnvFilter::new(&global.log_level)),
            ),
            Err(e) => {
                eprintln!(
                    "{} Cannot open log file {}: {e}",
                    status::WARNING,
                    path.display()
                );
                None
            }
        }
    });

    tracing_subscriber::registry()
        .with(console)
        .with(file_layer)
        .init();
}
