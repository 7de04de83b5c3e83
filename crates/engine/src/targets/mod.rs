//! Built-in target factories.
//!
//! The full plugin suite (docker, go, node, k8s, s3, terraform, ...) lives
//! out of tree; `exec` ships here as the reference implementation of the
//! factory interface.

pub mod exec;

use std::sync::Arc;

use crate::parser::registry::{TargetFactory, TargetFactoryMap};

/// The registry of built-in block types.
pub fn builtin_registry() -> TargetFactoryMap {
  let mut registry = TargetFactoryMap::new();
  registry.insert(
    "exec".to_string(),
    Arc::new(exec::ExecFactory) as Arc<dyn TargetFactory>,
  );
  registry
}
