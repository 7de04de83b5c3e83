//! Shared helpers for CLI integration tests.

// Each test binary includes this module; not every binary uses every helper.
#![allow(dead_code)]

use std::path::{Path, PathBuf};

use assert_cmd::Command;
use tempfile::TempDir;

/// Isolated test workspace: one configured project plus a CLI config file
/// pointed at by `ZEN_CONFIG`.
pub struct TestEnv {
  pub temp: TempDir,
  pub project: PathBuf,
  config: PathBuf,
}

impl TestEnv {
  pub fn new() -> Self {
    let temp = TempDir::new().unwrap();
    let project = temp.path().join("proj");
    std::fs::create_dir_all(&project).unwrap();
    std::fs::write(project.join(".zenconfig"), "{}").unwrap();

    let config = temp.path().join("conf.json");
    std::fs::write(
      &config,
      format!(
        r#"{{"global": [{{"projects": {{"p": "{}"}}}}]}}"#,
        project.display()
      ),
    )
    .unwrap();

    TestEnv { temp, project, config }
  }

  pub fn write_package(&self, pkg: &str, content: &str) {
    let dir = self.project.join(pkg);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("BUILD"), content).unwrap();
  }

  pub fn write_file(&self, rel: &str, content: &str) {
    let path = self.project.join(rel);
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, content).unwrap();
  }

  /// Engine state dir of the project.
  pub fn state(&self) -> PathBuf {
    self.project.join(".zen")
  }

  /// A `zen` command wired to this workspace.
  pub fn zen(&self) -> Command {
    let mut cmd = Command::cargo_bin("zen").unwrap();
    cmd.env("ZEN_CONFIG", &self.config);
    cmd.env("HOME", self.temp.path());
    cmd
  }
}

/// A one-target exec package producing `f.txt` from a staged source.
pub fn copy_package(run_log: bool) -> String {
  let mut commands = vec!["test -f f.txt".to_string()];
  if run_log {
    commands.push("echo ran >> {REPO_ROOT}/runs.log".to_string());
  }
  let commands: Vec<String> = commands.iter().map(|c| format!("{c:?}")).collect();

  format!(
    r#"{{"exec": [{{
      "name": "t",
      "srcs": {{"s": ["f.txt"]}},
      "outs": ["f.txt"],
      "scripts": {{"build": [{}]}}
    }}]}}"#,
    commands.join(",")
  )
}

pub fn read(path: &Path) -> String {
  std::fs::read_to_string(path).unwrap()
}
