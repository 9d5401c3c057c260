//! Shared test helpers for CLI integration tests.

use std::path::PathBuf;

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use tempfile::TempDir;

/// Isolated test environment.
///
/// Each test gets its own project directory and its own cache directory.
pub struct TestEnv {
  pub temp: TempDir,
  pub cache: TempDir,
}

impl TestEnv {
  /// Create a project with the given `rulegraph.json`.
  pub fn with_rules(rules: &str) -> Self {
    let env = Self::empty();
    env.write_file("rulegraph.json", rules);
    env
  }

  /// Create an empty project.
  pub fn empty() -> Self {
    Self {
      temp: TempDir::new().unwrap(),
      cache: TempDir::new().unwrap(),
    }
  }

  /// Write a file relative to the project root.
  pub fn write_file(&self, relative_path: &str, content: &str) {
    let path = self.temp.path().join(relative_path);
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, content).unwrap();
  }

  /// Read a file relative to the project root.
  pub fn read_file(&self, relative_path: &str) -> String {
    std::fs::read_to_string(self.temp.path().join(relative_path)).unwrap()
  }

  /// Project root.
  pub fn root_path(&self) -> PathBuf {
    dunce::canonicalize(self.temp.path()).unwrap()
  }

  /// Get a pre-configured Command for the rulegraph binary.
  ///
  /// Sets environment variables for isolated testing:
  /// - `RULEGRAPH_CACHE`: Isolated cache directory
  /// - `RULEGRAPH_CACHE_MODE`, `RULEGRAPH_JOBS`: Cleared
  pub fn rulegraph_cmd(&self) -> Command {
    let mut cmd: Command = cargo_bin_cmd!("rulegraph");
    cmd.arg("--root").arg(self.root_path());
    cmd.env("RULEGRAPH_CACHE", self.cache.path());
    cmd.env_remove("RULEGRAPH_CACHE_MODE");
    cmd.env_remove("RULEGRAPH_JOBS");
    cmd.env_remove("RULEGRAPH_SANDBOX");
    cmd
  }
}
