//! Common test utilities and helpers
//!
//! This module provides shared utilities for integration tests.

use std::path::PathBuf;
use std::process::{Command, Output};
use tempfile::TempDir;

/// Test workspace context
///
/// Creates a temporary directory for test workspaces and provides
/// utilities for setting up test scenarios.
pub struct TestProject {
    /// Temporary directory for the test workspace
    pub dir: TempDir,
}

impl TestProject {
    /// Create a new test workspace in a temporary directory
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("Failed to create temp directory"),
        }
    }

    /// Create a workspace with the sample configuration
    #[allow(dead_code)]
    pub fn sample() -> Self {
        let project = Self::new();
        project.create_file("config/config.toml", SAMPLE_GLOBAL);
        project.create_file("config/common.toml", SAMPLE_SHARED);
        project.create_file("config/projects/app.toml", SAMPLE_APP);
        project.create_file("config/projects/lib.yaml", SAMPLE_LIB);
        project
    }

    /// Get the path to the test workspace directory
    pub fn path(&self) -> PathBuf {
        self.dir.path().to_path_buf()
    }

    /// Create a file in the test workspace
    pub fn create_file(&self, name: &str, content: &str) {
        let path = self.dir.path().join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("Failed to create parent directories");
        }
        std::fs::write(path, content).expect("Failed to write file");
    }

    /// Create a directory in the test workspace
    #[allow(dead_code)]
    pub fn create_dir(&self, name: &str) {
        let path = self.dir.path().join(name);
        std::fs::create_dir_all(path).expect("Failed to create directory");
    }

    /// Run presetbuild in the workspace with a fixed environment
    #[allow(dead_code)]
    pub fn run(&self, args: &[&str]) -> Output {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_presetbuild"));
        cmd.current_dir(self.path())
            .env_remove("RUST_LOG")
            .env_remove("PRESETBUILD_ROOT")
            .env("HOME", "/home/tester");
        for arg in args {
            cmd.arg(arg);
        }
        cmd.output().expect("Failed to execute presetbuild")
    }
}

impl Default for TestProject {
    fn default() -> Self {
        Self::new()
    }
}

/// Stdout of a finished command as text
#[allow(dead_code)]
pub fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

/// Stderr of a finished command as text
#[allow(dead_code)]
pub fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

/// Sample global settings
#[allow(dead_code)]
pub const SAMPLE_GLOBAL: &str = r#"
[global]
default_build_type = "Release"
"#;

/// Sample shared presets
#[allow(dead_code)]
pub const SAMPLE_SHARED: &str = r#"
[presets.lto]
definitions = { ENABLE_LTO = true }

[presets."configs.release"]
definitions = { OPTIMIZE = "[[ 'speed' if {{system.cpu_count}} > 0 else 'size' ]]" }
"#;

/// Sample cmake project with git settings and layered presets
#[allow(dead_code)]
pub const SAMPLE_APP: &str = r#"
dependencies = [{ name = "lib", presets = "fast" }]

[project]
name = "app"
source_dir = "src/app"
build_dir = "_build/{{user.branch}}/{{user.build_type}}"
build_system = "cmake"
generator = "Ninja"
environment = { TOOLS = "{{env.HOME}}/tools", PATH = "{{env.TOOLS}}/bin:{{env.PATH}}" }

[git]
url = "https://example.com/app.git"
main_branch = "develop"

[presets.base]
environment = { CC = "gcc", CXX = "{{preset.environment.CC}}-c++" }
definitions = { WITH_TESTS = false }

[presets.dev]
extends = "base"
environment = { CC = "clang" }
definitions = { WITH_TESTS = true, OUT = "{{preset.definitions.NAME}}.bin", NAME = "{{project.name}}" }
extra_config_args = ["--warn-uninitialized"]
"#;

/// Sample meson project in YAML
#[allow(dead_code)]
pub const SAMPLE_LIB: &str = r#"
project:
  name: lib
  source_dir: src/lib
  build_dir: build
  build_system: meson
presets:
  fast:
    definitions:
      buildtype: release
"#;
