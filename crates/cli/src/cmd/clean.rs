//! `zen clean`: remove cached state for every configured project.

use std::sync::Arc;

use anyhow::{Context, Result};

use zen_core::target::RuntimeContext;
use zen_engine::targets::builtin_registry;
use zen_engine::{CliConfig, Engine, JsonFrontend};

use crate::output;

pub fn cmd_clean(verbosity: u8) -> Result<()> {
  super::init_tracing(verbosity, false);

  let frontend = Arc::new(JsonFrontend);
  let config = CliConfig::load(frontend.as_ref()).context("loading config")?;

  let engine = Engine::new(config, frontend, builtin_registry(), RuntimeContext::default())?;
  engine.clean_cache()?;

  output::print_success("cache cleaned");
  Ok(())
}
