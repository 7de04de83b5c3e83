//! Engine-level errors.

use std::collections::BTreeMap;

use zen_core::fqn::FqnError;
use zen_core::target::StepError;

use crate::cache::CacheError;
use crate::config::ConfigError;
use crate::parser::resolver::ResolutionError;

/// Graph validation failures. Both abort before any step runs.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
  #[error("missing vertex: {vertex} (edge from {from})")]
  MissingVertex { vertex: String, from: String },

  #[error("dependency cycle detected")]
  CycleDetected,
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
  #[error(transparent)]
  Config(#[from] ConfigError),

  #[error(transparent)]
  Resolution(#[from] ResolutionError),

  #[error(transparent)]
  Fqn(#[from] FqnError),

  #[error(transparent)]
  Graph(#[from] GraphError),

  #[error(transparent)]
  Step(#[from] StepError),

  #[error(transparent)]
  Cache(#[from] CacheError),

  /// One or more steps failed while traversing the graph. The map is keyed
  /// by step fqn.
  #[error("{} step(s) failed while traversing the graph", errors.len())]
  GraphExec { errors: BTreeMap<String, String> },

  #[error("when using --shell, you can pass only one target")]
  ShellSingleTarget,
}

impl EngineError {
  /// Per-step errors of a graph execution failure, keyed by fqn.
  pub fn step_errors(&self) -> Option<&BTreeMap<String, String>> {
    match self {
      EngineError::GraphExec { errors } => Some(errors),
      _ => None,
    }
  }
}
