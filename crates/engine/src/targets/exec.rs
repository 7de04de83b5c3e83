//! The `exec` target type.
//!
//! Runs a list of shell commands per script inside the sandbox, with the
//! step environment. `{KEY}` tokens in commands resolve against the step env
//! before the shell sees them.
//!
//! ```json
//! {
//!   "exec": [{
//!     "name": "site",
//!     "srcs": {"content": ["**/*.md"]},
//!     "outs": ["public/*"],
//!     "scripts": {
//!       "build": ["generate --out public"],
//!       "deploy": ["push public {DEPLOY_ENV}"]
//!     }
//!   }]
//! }
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Deserialize;
use tracing::debug;

use zen_core::interpolate::interpolate_known;
use zen_core::target::{RuntimeContext, ScriptSpec, StepError, StepFn, Target};
use zen_core::{Environment, BUILD_SCRIPT};

use crate::parser::frontend::Block;
use crate::parser::registry::{decode_block, TargetConfigContext, TargetFactory};
use crate::parser::ParseError;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ExecBlock {
  name: String,

  #[serde(default)]
  srcs: BTreeMap<String, Vec<String>>,
  #[serde(default)]
  outs: Vec<String>,
  #[serde(default)]
  deps: Vec<String>,

  #[serde(default)]
  labels: Vec<String>,
  #[serde(default)]
  env: BTreeMap<String, String>,
  #[serde(default)]
  secret_env: BTreeMap<String, String>,
  #[serde(default)]
  pass_env: Vec<String>,
  #[serde(default)]
  pass_secret_env: Vec<String>,
  #[serde(default)]
  environments: Vec<String>,
  #[serde(default)]
  tools: BTreeMap<String, String>,
  #[serde(default)]
  visibility: Vec<String>,

  #[serde(default)]
  external: bool,
  #[serde(default)]
  local: bool,

  /// script name -> shell commands, run in order.
  scripts: BTreeMap<String, Vec<String>>,
}

pub struct ExecFactory;

impl TargetFactory for ExecFactory {
  fn get_targets(&self, block: &Block, _ctx: &TargetConfigContext) -> Result<Vec<Target>, ParseError> {
    let block: ExecBlock = decode_block(block, "exec block")?;

    let mut target = Target::new(&block.name);
    target.srcs = block.srcs;
    target.outs = block.outs;
    target.labels = block.labels;
    target.env = block.env;
    target.secret_env = block.secret_env;
    target.pass_env = block.pass_env;
    target.pass_secret_env = block.pass_secret_env;
    target.tools = block.tools;
    target.visibility = block.visibility;
    target.external = block.external;
    for name in block.environments {
      target.environments.insert(name, Environment::default());
    }

    // Forwarded host vars join the public env at parse time.
    for name in target.pass_env.clone() {
      let value = std::env::var(&name).unwrap_or_default();
      target.env.insert(name, value);
    }

    for (script, commands) in block.scripts {
      let spec = ScriptSpec {
        deps: if script == BUILD_SCRIPT {
          block.deps.clone()
        } else {
          Vec::new()
        },
        run: Some(shell_run(commands)),
        local: block.local,
        ..Default::default()
      };
      target.scripts.insert(script, spec);
    }

    Ok(vec![target])
  }
}

/// Run each command through `sh -c` in the step's working directory.
fn shell_run(commands: Vec<String>) -> StepFn {
  Arc::new(move |target: &mut Target, _ctx: &RuntimeContext| {
    std::fs::create_dir_all(&target.cwd)?;

    for command in &commands {
      let rendered = interpolate_known(command, &target.env);
      debug!(cwd = %target.cwd.display(), cmd = %rendered, "exec");

      let output = std::process::Command::new("sh")
        .arg("-c")
        .arg(&rendered)
        .current_dir(&target.cwd)
        .env_clear()
        .envs(target.env_list())
        .output()?;

      if !output.stdout.is_empty() {
        debug!(stdout = %String::from_utf8_lossy(&output.stdout), "exec output");
      }
      if !output.stderr.is_empty() {
        debug!(stderr = %String::from_utf8_lossy(&output.stderr), "exec output");
      }

      if !output.status.success() {
        return Err(StepError::CmdFailed {
          cmd: rendered,
          code: output.status.code(),
        });
      }
    }

    Ok(())
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::Value;
  use tempfile::TempDir;

  fn block(json: &str) -> Block {
    match serde_json::from_str(json).unwrap() {
      Value::Object(map) => map,
      _ => unreachable!(),
    }
  }

  fn get_target(json: &str) -> Target {
    let targets = ExecFactory
      .get_targets(&block(json), &TargetConfigContext::default())
      .unwrap();
    targets.into_iter().next().unwrap()
  }

  #[test]
  fn decodes_full_block() {
    let target = get_target(
      r#"{
        "name": "site",
        "srcs": {"content": ["*.md"]},
        "outs": ["public"],
        "deps": ["//p/tools:gen"],
        "env": {"MODE": "release"},
        "scripts": {"build": ["generate"], "deploy": ["push"]}
      }"#,
    );

    assert_eq!(target.name, "site");
    assert_eq!(target.srcs["content"], vec!["*.md"]);
    assert_eq!(target.env["MODE"], "release");
    assert_eq!(target.scripts["build"].deps, vec!["//p/tools:gen"]);
    assert!(target.scripts["deploy"].deps.is_empty());
  }

  #[test]
  fn unknown_fields_are_rejected() {
    let result = ExecFactory.get_targets(
      &block(r#"{"name": "t", "bogus": 1, "scripts": {"build": []}}"#),
      &TargetConfigContext::default(),
    );
    assert!(matches!(result, Err(ParseError::Decode { .. })));
  }

  #[test]
  fn run_executes_commands_in_cwd() {
    let dir = TempDir::new().unwrap();
    let mut target = get_target(r#"{"name": "t", "scripts": {"build": ["echo made > made.txt"]}}"#);
    target.cwd = dir.path().to_path_buf();
    target.env.insert("PATH".to_string(), std::env::var("PATH").unwrap_or_default());

    let run = target.scripts["build"].run.clone().unwrap();
    run(&mut target.clone(), &RuntimeContext::default()).unwrap();

    assert!(dir.path().join("made.txt").exists());
  }

  #[test]
  fn run_interpolates_env_tokens() {
    let dir = TempDir::new().unwrap();
    let mut target = get_target(r#"{"name": "t", "scripts": {"build": ["echo x > {OUT_NAME}"]}}"#);
    target.cwd = dir.path().to_path_buf();
    target.env.insert("OUT_NAME".to_string(), "from-env.txt".to_string());
    target.env.insert("PATH".to_string(), std::env::var("PATH").unwrap_or_default());

    let run = target.scripts["build"].run.clone().unwrap();
    run(&mut target.clone(), &RuntimeContext::default()).unwrap();

    assert!(dir.path().join("from-env.txt").exists());
  }

  #[test]
  fn failing_command_surfaces_exit_code() {
    let dir = TempDir::new().unwrap();
    let mut target = get_target(r#"{"name": "t", "scripts": {"build": ["exit 3"]}}"#);
    target.cwd = dir.path().to_path_buf();
    target.env.insert("PATH".to_string(), std::env::var("PATH").unwrap_or_default());

    let run = target.scripts["build"].run.clone().unwrap();
    let err = run(&mut target.clone(), &RuntimeContext::default()).unwrap_err();
    assert!(matches!(err, StepError::CmdFailed { code: Some(3), .. }));
  }
}
