//! The per-script run command (`zen build`, `zen deploy`, `zen test`).

use std::sync::Arc;

use anyhow::{Context, Result};

use zen_core::target::RuntimeContext;
use zen_core::BUILD_SCRIPT;
use zen_engine::engine::hooks::default_run_fns;
use zen_engine::engine::RunOptions;
use zen_engine::targets::builtin_registry;
use zen_engine::{CliConfig, Engine, JsonFrontend};

use crate::output;
use crate::RunFlags;

pub async fn cmd_run(script: &str, flags: &RunFlags) -> Result<()> {
  // Without the task UI, keeping output means keeping step logs visible.
  let verbosity = if flags.keep_output {
    flags.verbosity.max(1)
  } else {
    flags.verbosity
  };
  super::init_tracing(verbosity, flags.raw_output);

  let frontend = Arc::new(JsonFrontend);
  let config = CliConfig::load(frontend.as_ref()).context("loading config")?;

  let ctx = RuntimeContext {
    env: flags.env.clone(),
    with_deps: flags.with_deps,
    use_environments: script != BUILD_SCRIPT,
    variables: Default::default(),
  };

  let mut engine = Engine::new(config, frontend, builtin_registry(), ctx)?;
  engine.register_command_functions(default_run_fns());

  let opts = RunOptions {
    clean: flags.clean,
    shell: flags.shell,
  };

  match engine.run(&flags.targets, script, &opts).await {
    Ok(()) => {
      output::print_success(&format!("{script} complete"));
      Ok(())
    }
    Err(err) => {
      if let Some(step_errors) = err.step_errors() {
        for (fqn, message) in step_errors {
          output::print_step_error(fqn, message);
        }
      }
      Err(err.into())
    }
  }
}
