//! Target factory registry.
//!
//! Block types are open-ended. Each registered block type maps to a factory
//! that decodes the raw block against its own schema (strictly: unknown
//! fields are an error) and produces one or more targets. Factories are the
//! plugin seam; the engine only sees the produced [`Target`]s.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use zen_core::{Environment, Target};

use super::frontend::Block;
use super::ParseError;

/// Context handed to factories when producing targets.
#[derive(Debug, Clone, Default)]
pub struct TargetConfigContext {
  /// Variables visible to the package (CLI, project, and `variables` blocks).
  pub variables: BTreeMap<String, String>,

  /// Toolchain targets configured for the project (`name -> //address`).
  pub known_toolchains: BTreeMap<String, String>,

  /// Deployment environments known to the project.
  pub environments: BTreeMap<String, Environment>,
}

/// Produces targets from a raw block.
pub trait TargetFactory: Send + Sync {
  fn get_targets(&self, block: &Block, ctx: &TargetConfigContext) -> Result<Vec<Target>, ParseError>;
}

/// Registry of block type -> factory.
pub type TargetFactoryMap = BTreeMap<String, Arc<dyn TargetFactory>>;

/// Strictly decode a block into a factory schema. Unknown fields are an
/// error when the schema is marked `deny_unknown_fields`.
pub fn decode_block<T: DeserializeOwned>(block: &Block, context: &str) -> Result<T, ParseError> {
  serde_json::from_value(Value::Object(block.clone())).map_err(|source| ParseError::Decode {
    context: context.to_string(),
    source,
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde::Deserialize;

  #[derive(Debug, Deserialize)]
  #[serde(deny_unknown_fields)]
  struct Schema {
    name: String,
    #[serde(default)]
    outs: Vec<String>,
  }

  fn block(json: &str) -> Block {
    match serde_json::from_str(json).unwrap() {
      Value::Object(map) => map,
      _ => unreachable!(),
    }
  }

  #[test]
  fn decodes_known_fields() {
    let decoded: Schema = decode_block(&block(r#"{"name": "t", "outs": ["a"]}"#), "test").unwrap();
    assert_eq!(decoded.name, "t");
    assert_eq!(decoded.outs, vec!["a"]);
  }

  #[test]
  fn unknown_fields_are_an_error() {
    let result: Result<Schema, _> = decode_block(&block(r#"{"name": "t", "bogus": 1}"#), "test");
    assert!(matches!(result, Err(ParseError::Decode { .. })));
  }
}
