//! The per-step lifecycle.
//!
//! For every vertex the executor launches: expand tools, interpolate the
//! target against itself, load the cache, lay in the environment (secrets
//! merge after the cache key is computed so they never influence it), then
//! run engine pre-hook, target pre, target run, engine post-hook and target
//! post. Any stage may end the step successfully with
//! [`StepError::DoNotContinue`]; the metadata marker is written only when
//! the full lifecycle ran.

use std::collections::BTreeMap;

use tracing::{debug, error, info_span};

use zen_core::fqn::Fqn;
use zen_core::hash::merge_maps;
use zen_core::interpolate::interpolate_map_with_itself;
use zen_core::target::{is_target_reference, StepError};
use zen_core::BUILD_SCRIPT;

use super::{EngineContext, ExecutionStep};

enum Stage {
  Continue,
  Stop,
}

fn stage(script: &str, name: &str, result: Result<(), StepError>) -> Result<Stage, StepError> {
  match result {
    Ok(()) => Ok(Stage::Continue),
    Err(StepError::DoNotContinue) => Ok(Stage::Stop),
    Err(err) => Err(StepError::stage(script, name, err)),
  }
}

fn cache_err(err: crate::cache::CacheError) -> StepError {
  StepError::Cache(Box::new(err))
}

/// Execute one step. The caller holds the step exclusively.
pub(crate) fn run_step(ectx: &EngineContext, step: &mut ExecutionStep) -> Result<(), StepError> {
  let span = info_span!("step", fqn = %step.fqn());
  let _guard = span.enter();

  let script = step.target.script().to_string();
  let project = ectx
    .projects
    .get(step.target.project())
    .ok_or_else(|| StepError::Message(format!("project {} not configured", step.target.project())))?
    .clone();

  expand_tools(&project, step)?;

  step
    .target
    .interpolate_myself()
    .map_err(|e| StepError::stage(&script, "interpolating myself", e.into()))?;

  // Load cache: the build step computes the key; script steps derive from it.
  let cache = if script == BUILD_SCRIPT {
    let base_path = step.target.path().to_path_buf();
    let external = step.target.external;
    project
      .cache
      .load_target_cache(&mut step.target, external, &base_path)
      .map_err(|e| StepError::stage(&script, "loading cache", cache_err(e)))?
  } else {
    project
      .cache
      .to_script_cache(&mut step.target)
      .map_err(|e| StepError::stage(&script, "loading cache", cache_err(e)))?
  };
  step.target.cwd = cache.build_cache_path();
  step.cache = Some(cache.clone());

  // Secrets merge after the cache key is computed, so they never influence
  // the hash. PATH concatenates the target and secret paths.
  let mut project_secret = project.secret_env.clone();
  let secret_path = project_secret.remove("PATH").unwrap_or_default();
  let target_path = step.target.env.get("PATH").cloned().unwrap_or_default();
  let path = join_paths(&target_path, &secret_path);

  for name in step.pass_secret_env.clone() {
    let value = std::env::var(&name).unwrap_or_default();
    step.secret_env.insert(name, value);
  }

  let mut env = merge_maps(&project_secret, &step.target.env);
  env = merge_maps(&env, &step.secret_env);
  env.insert("CWD".to_string(), step.target.cwd.display().to_string());
  if !path.is_empty() {
    env.insert("PATH".to_string(), path);
  }

  let env = interpolate_map_with_itself(env)
    .map_err(|e| StepError::stage(&script, "interpolating env", e.into()))?;
  step.target.env = env;

  // Lifecycle. Each stage may stop the step successfully.
  if let Some(hooks) = ectx.hooks.get(&script) {
    if let Some(pre) = hooks.pre.clone() {
      if let Stage::Stop = stage(&script, "custom pre run", pre(ectx, step))? {
        return Ok(());
      }
    }
  }

  if let Some(pre) = step.pre.clone() {
    if let Stage::Stop = stage(&script, "target pre run", pre(&mut step.target, &ectx.ctx))? {
      return Ok(());
    }
  }

  if let Some(run) = step.run.clone() {
    match run(&mut step.target, &ectx.ctx) {
      Ok(()) => {}
      Err(StepError::DoNotContinue) => return Ok(()),
      Err(err) => {
        error!(error = %err, "executing run");
        return Err(err);
      }
    }
  }

  if let Some(hooks) = ectx.hooks.get(&script) {
    if let Some(post) = hooks.post.clone() {
      if let Stage::Stop = stage(&script, "custom post run", post(ectx, step))? {
        return Ok(());
      }
    }
  }

  if let Some(post) = step.post.clone() {
    if let Stage::Stop = stage(&script, "target post run", post(&mut step.target, &ectx.ctx))? {
      return Ok(());
    }
  }

  if let Some(cache) = &step.cache {
    cache
      .save_metadata()
      .map_err(|e| StepError::stage(&script, "writing metadata", cache_err(e)))?;
  }

  debug!("finished");
  Ok(())
}

/// Resolve tool references to their built outputs and surface them in the
/// step env as `TOOL_<NAME>`.
fn expand_tools(project: &super::Project, step: &mut ExecutionStep) -> Result<(), StepError> {
  let tools: BTreeMap<String, String> = step.target.tools.clone();

  for (name, reference) in tools {
    if !is_target_reference(&reference) {
      continue;
    }

    let fqn = Fqn::parse(&reference)
      .map_err(|e| StepError::Message(format!("expanding tool {name}: {e}")))?;
    let step_key = format!("{}:{}", fqn.qn(), fqn.script());

    let outs = project.cache.target_outs(&step_key).map_err(cache_err)?;
    let path = outs
      .values()
      .next()
      .ok_or_else(|| StepError::Message(format!("tool {name} ({reference}) has no outputs")))?
      .display()
      .to_string();

    step.target.env.insert(format!("TOOL_{}", name.to_uppercase()), path.clone());
    step.target.tools.insert(name, path);
  }

  Ok(())
}

fn join_paths(first: &str, second: &str) -> String {
  match (first.is_empty(), second.is_empty()) {
    (true, true) => String::new(),
    (false, true) => first.to_string(),
    (true, false) => second.to_string(),
    (false, false) => format!("{first}:{second}"),
  }
}
