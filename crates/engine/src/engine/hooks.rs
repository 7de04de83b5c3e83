//! Default script hooks.
//!
//! The build command installs these around every build step:
//!
//! - pre: handle `--clean`, short-circuit on a cache hit (metadata marker +
//!   backend output check + optional per-target override), else stage
//!   sources into the sandbox
//! - post: expand outputs, materialize them into the out tree, pack the
//!   artifact and hand it to the backend

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info};

use zen_core::target::StepError;
use zen_core::BUILD_SCRIPT;

use super::{EngineContext, ExecutionStep, HookFn, RunFnMap};

fn cache_err(err: crate::cache::CacheError) -> StepError {
  StepError::Cache(Box::new(err))
}

fn build_pre(_ectx: &EngineContext, step: &mut ExecutionStep) -> Result<(), StepError> {
  let Some(cache) = step.cache.clone() else {
    return Ok(());
  };

  if step.clean {
    debug!(fqn = %step.fqn(), "cleaning cache before run");
    cache.delete_cache().map_err(cache_err)?;
  } else if cache.check_cache_hits() {
    let outputs_ok = cache.check_outputs_exist().map_err(cache_err)?;
    let target_ok = match &step.check_cache {
      Some(check) => check(&step.target)?,
      None => true,
    };

    if outputs_ok && target_ok {
      // Repopulate the output mappings from the existing sandbox so
      // dependents can resolve this target's outputs.
      let declared = step.target.outs.clone();
      cache
        .expand_outs(&mut step.target, &declared, step.transform_out.as_ref())
        .map_err(cache_err)?;

      let expected = step.target.outs.clone();
      if cache.verify_outputs(&expected).map_err(cache_err)? {
        info!(fqn = %step.fqn(), hash = %cache.hash(), "cache hit");
        return Err(StepError::DoNotContinue);
      }

      // Stale hit: the marker exists but outputs are gone. Put the declared
      // outs back and rebuild.
      step.target.outs = declared;
    }
  }

  cache.copy_srcs_to_cache().map_err(cache_err)
}

fn build_post(_ectx: &EngineContext, step: &mut ExecutionStep) -> Result<(), StepError> {
  let Some(cache) = step.cache.clone() else {
    return Ok(());
  };

  let declared = step.target.outs.clone();
  cache
    .expand_outs(&mut step.target, &declared, step.transform_out.as_ref())
    .map_err(cache_err)?;
  cache.copy_outs_into_out().map_err(cache_err)?;

  if let Some(artifact) = cache.artifact_path().map(|p| p.to_path_buf()) {
    cache.compress(&artifact).map_err(cache_err)?;
    cache.save().map_err(cache_err)?;
  }

  Ok(())
}

/// The hook set for the build command.
pub fn default_run_fns() -> BTreeMap<String, RunFnMap> {
  let mut fns = BTreeMap::new();
  fns.insert(
    BUILD_SCRIPT.to_string(),
    RunFnMap {
      pre: Some(Arc::new(build_pre) as HookFn),
      post: Some(Arc::new(build_post) as HookFn),
    },
  );
  fns
}
