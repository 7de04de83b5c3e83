//! Package-file frontends.
//!
//! The engine never touches concrete surface syntax. A [`Frontend`] turns a
//! file into a [`BlockTable`]: block type -> ordered sequence of block
//! dictionaries. The shipped [`JsonFrontend`] reads JSON documents of that
//! shape; an HCL frontend plugs in through the same trait.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde_json::Value;

/// One block dictionary, e.g. a single `exec { ... }` stanza.
pub type Block = serde_json::Map<String, Value>;

/// Parsed package file: block type -> ordered sequence of blocks.
pub type BlockTable = BTreeMap<String, Vec<Block>>;

#[derive(Debug, thiserror::Error)]
pub enum FrontendError {
  #[error("reading {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("parsing {filename}: {source}")]
  Syntax {
    filename: String,
    #[source]
    source: serde_json::Error,
  },

  #[error("parsing {filename}: expected an object of blocks, found {found}")]
  NotATable { filename: String, found: String },
}

/// A parser from file bytes to a [`BlockTable`].
pub trait Frontend: Send + Sync {
  fn parse_bytes(&self, content: &[u8], filename: &str) -> Result<BlockTable, FrontendError>;

  fn parse_file(&self, path: &Path) -> Result<BlockTable, FrontendError> {
    let content = std::fs::read(path).map_err(|source| FrontendError::Io {
      path: path.to_path_buf(),
      source,
    })?;
    let filename = path.display().to_string();
    self.parse_bytes(&content, &filename)
  }
}

/// JSON block-table frontend.
///
/// A package file is a JSON object keyed by block type. Each value is either
/// a single block object or an array of block objects:
///
/// ```json
/// {
///   "variables": [{"VERSION": "1.2.3"}],
///   "exec": [
///     {"name": "tool", "outs": ["tool.sh"], "scripts": {"build": ["..."]}}
///   ]
/// }
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonFrontend;

impl Frontend for JsonFrontend {
  fn parse_bytes(&self, content: &[u8], filename: &str) -> Result<BlockTable, FrontendError> {
    let value: Value = serde_json::from_slice(content).map_err(|source| FrontendError::Syntax {
      filename: filename.to_string(),
      source,
    })?;

    let Value::Object(table) = value else {
      return Err(FrontendError::NotATable {
        filename: filename.to_string(),
        found: json_kind(&value).to_string(),
      });
    };

    let mut blocks = BlockTable::new();
    for (block_type, entry) in table {
      let list = match entry {
        Value::Array(items) => {
          let mut list = Vec::with_capacity(items.len());
          for item in items {
            match item {
              Value::Object(block) => list.push(block),
              other => {
                return Err(FrontendError::NotATable {
                  filename: filename.to_string(),
                  found: json_kind(&other).to_string(),
                })
              }
            }
          }
          list
        }
        Value::Object(block) => vec![block],
        other => {
          return Err(FrontendError::NotATable {
            filename: filename.to_string(),
            found: json_kind(&other).to_string(),
          })
        }
      };
      blocks.insert(block_type, list);
    }

    Ok(blocks)
  }
}

fn json_kind(value: &Value) -> &'static str {
  match value {
    Value::Null => "null",
    Value::Bool(_) => "a bool",
    Value::Number(_) => "a number",
    Value::String(_) => "a string",
    Value::Array(_) => "an array",
    Value::Object(_) => "an object",
  }
}
