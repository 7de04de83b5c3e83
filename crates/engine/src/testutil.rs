//! Test utilities for zen-engine.
//!
//! Provides a `mock` target factory whose scripts run a tiny command
//! language instead of shelling out, plus run-count bookkeeping so tests can
//! assert whether a step actually executed:
//!
//! - `write <path> <content>` creates a file in the step's working directory
//! - `sleep_ms <n>` blocks the step
//! - `fail` fails the step

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use once_cell::sync::Lazy;
use serde::Deserialize;

use zen_core::target::{RuntimeContext, ScriptSpec, StepError, StepFn, Target};
use zen_core::Environment;

use crate::parser::frontend::Block;
use crate::parser::registry::{decode_block, TargetConfigContext, TargetFactory, TargetFactoryMap};
use crate::parser::ParseError;

/// Runs per step fqn, for cache-hit assertions.
static RUN_COUNTS: Lazy<Mutex<BTreeMap<String, usize>>> = Lazy::new(|| Mutex::new(BTreeMap::new()));

/// Steps currently executing, for parallelism-bound assertions.
static RUNNING: AtomicUsize = AtomicUsize::new(0);
static MAX_RUNNING: AtomicUsize = AtomicUsize::new(0);

pub fn run_count(fqn: &str) -> usize {
  RUN_COUNTS
    .lock()
    .unwrap_or_else(std::sync::PoisonError::into_inner)
    .get(fqn)
    .copied()
    .unwrap_or(0)
}

pub fn reset_run_counts() {
  RUN_COUNTS
    .lock()
    .unwrap_or_else(std::sync::PoisonError::into_inner)
    .clear();
  RUNNING.store(0, Ordering::SeqCst);
  MAX_RUNNING.store(0, Ordering::SeqCst);
}

pub fn max_observed_parallelism() -> usize {
  MAX_RUNNING.load(Ordering::SeqCst)
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct MockBlock {
  name: String,
  #[serde(default)]
  srcs: BTreeMap<String, Vec<String>>,
  #[serde(default)]
  outs: Vec<String>,
  #[serde(default)]
  deps: Vec<String>,
  #[serde(default)]
  env: BTreeMap<String, String>,
  #[serde(default)]
  labels: Vec<String>,
  #[serde(default)]
  environments: Vec<String>,
  #[serde(default)]
  external: bool,
  /// script name -> mock commands.
  scripts: BTreeMap<String, Vec<String>>,
}

pub struct MockFactory;

impl TargetFactory for MockFactory {
  fn get_targets(&self, block: &Block, _ctx: &TargetConfigContext) -> Result<Vec<Target>, ParseError> {
    let block: MockBlock = decode_block(block, "mock block")?;

    let mut target = Target::new(&block.name);
    target.srcs = block.srcs;
    target.outs = block.outs;
    target.env = block.env;
    target.labels = block.labels;
    target.external = block.external;
    for name in block.environments {
      target.environments.insert(name, Environment::default());
    }

    for (script, commands) in block.scripts {
      let spec = ScriptSpec {
        deps: if script == "build" { block.deps.clone() } else { Vec::new() },
        run: Some(mock_run(commands)),
        ..Default::default()
      };
      target.scripts.insert(script, spec);
    }

    Ok(vec![target])
  }
}

fn mock_run(commands: Vec<String>) -> StepFn {
  Arc::new(move |target: &mut Target, _ctx: &RuntimeContext| {
    let running = RUNNING.fetch_add(1, Ordering::SeqCst) + 1;
    MAX_RUNNING.fetch_max(running, Ordering::SeqCst);
    RUN_COUNTS
      .lock()
      .unwrap_or_else(std::sync::PoisonError::into_inner)
      .entry(target.fqn())
      .and_modify(|count| *count += 1)
      .or_insert(1);

    let result = run_commands(&commands, target);
    RUNNING.fetch_sub(1, Ordering::SeqCst);
    result
  })
}

fn run_commands(commands: &[String], target: &mut Target) -> Result<(), StepError> {
  for command in commands {
    let mut parts = command.splitn(3, ' ');
    match parts.next() {
      Some("write") => {
        let path = parts
          .next()
          .ok_or_else(|| StepError::Message(format!("write needs a path: {command:?}")))?;
        let content = parts.next().unwrap_or_default();
        let dest = target.cwd.join(path);
        if let Some(parent) = dest.parent() {
          std::fs::create_dir_all(parent)?;
        }
        std::fs::write(dest, content)?;
      }
      Some("sleep_ms") => {
        let millis: u64 = parts
          .next()
          .and_then(|raw| raw.parse().ok())
          .ok_or_else(|| StepError::Message(format!("sleep_ms needs a duration: {command:?}")))?;
        std::thread::sleep(std::time::Duration::from_millis(millis));
      }
      Some("fail") => {
        return Err(StepError::Message("mock step failed".to_string()));
      }
      other => {
        return Err(StepError::Message(format!("unknown mock command {other:?}")));
      }
    }
  }
  Ok(())
}

/// A registry with only the `mock` factory.
pub fn mock_registry() -> TargetFactoryMap {
  let mut registry = TargetFactoryMap::new();
  registry.insert("mock".to_string(), Arc::new(MockFactory) as Arc<dyn TargetFactory>);
  registry
}
