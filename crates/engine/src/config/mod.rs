//! Engine configuration.
//!
//! The CLI-level config lives at `$ZEN_CONFIG` (default
//! `$HOME/.zen/conf.hcl`) and names the known projects plus base build and
//! deploy settings. Each project then carries its own config file (see
//! [`project`]).

pub mod project;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::Value;

use zen_core::Environment;

use crate::parser::frontend::{BlockTable, Frontend, FrontendError};

pub use project::ProjectConfig;

/// Environment variable overriding the CLI config file location.
pub const ZEN_CONFIG_ENV: &str = "ZEN_CONFIG";

/// Fallback PATH entries appended to every step's secret PATH.
const HOST_PATHS: &str = "/usr/local/bin:/usr/bin:/bin:/usr/sbin:/sbin";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
  #[error("config {0} does not exist")]
  NotFound(PathBuf),

  #[error("loading {path}: {source}")]
  Frontend {
    path: PathBuf,
    #[source]
    source: FrontendError,
  },

  #[error("only one {block} block allowed in {path}")]
  DuplicateBlock { path: PathBuf, block: String },

  #[error("decoding {block} block in {path}: {source}")]
  Decode {
    path: PathBuf,
    block: String,
    #[source]
    source: serde_json::Error,
  },

  #[error("loading project {name}: {source}")]
  Project {
    name: String,
    #[source]
    source: Box<ConfigError>,
  },
}

/// `build` block of the CLI config: base environment for every project.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BuildDefaults {
  #[serde(default)]
  pub env: BTreeMap<String, String>,

  #[serde(default)]
  pub pass_env: Vec<String>,

  #[serde(default)]
  pub pass_secret_env: Vec<String>,

  #[serde(default)]
  pub variables: BTreeMap<String, String>,

  /// Additional PATH prepended to the host fallback paths.
  #[serde(default)]
  pub path: Option<String>,
}

/// `deploy` block of the CLI config.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeployDefaults {
  #[serde(default)]
  pub pass_env: Vec<String>,

  #[serde(default)]
  pub variables: BTreeMap<String, String>,
}

/// The CLI-level configuration.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
  /// Project name -> project root directory.
  pub projects: BTreeMap<String, PathBuf>,

  pub build: BuildDefaults,
  pub deploy: DeployDefaults,
  pub environments: BTreeMap<String, Environment>,
}

impl CliConfig {
  /// Resolve the config file location: `$ZEN_CONFIG`, else
  /// `$HOME/.zen/conf.hcl`.
  pub fn default_path() -> PathBuf {
    if let Ok(path) = std::env::var(ZEN_CONFIG_ENV) {
      return PathBuf::from(path);
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    Path::new(&home).join(".zen").join("conf.hcl")
  }

  pub fn load(frontend: &dyn Frontend) -> Result<Self, ConfigError> {
    Self::load_from(frontend, &Self::default_path())
  }

  pub fn load_from(frontend: &dyn Frontend, path: &Path) -> Result<Self, ConfigError> {
    if !path.exists() {
      return Err(ConfigError::NotFound(path.to_path_buf()));
    }

    let table = frontend.parse_file(path).map_err(|source| ConfigError::Frontend {
      path: path.to_path_buf(),
      source,
    })?;

    #[derive(Debug, Default, Deserialize)]
    #[serde(deny_unknown_fields)]
    struct GlobalBlock {
      #[serde(default)]
      projects: BTreeMap<String, PathBuf>,
    }

    let global: GlobalBlock = decode_single_block(&table, "global", path)?.unwrap_or_default();
    let build = decode_single_block(&table, "build", path)?.unwrap_or_default();
    let deploy = decode_single_block(&table, "deploy", path)?.unwrap_or_default();
    let environments = decode_single_block(&table, "environments", path)?.unwrap_or_default();

    Ok(CliConfig {
      projects: global.projects,
      build,
      deploy,
      environments,
    })
  }

  /// The secret PATH every step sees: configured extra path entries followed
  /// by the host fallback paths.
  pub fn secret_path(&self) -> String {
    match &self.build.path {
      Some(extra) if !extra.is_empty() => format!("{extra}:{HOST_PATHS}"),
      _ => HOST_PATHS.to_string(),
    }
  }
}

/// Decode the single allowed block of a type; more than one is an error.
pub(crate) fn decode_single_block<T: serde::de::DeserializeOwned>(
  table: &BlockTable,
  block: &str,
  path: &Path,
) -> Result<Option<T>, ConfigError> {
  let Some(blocks) = table.get(block) else {
    return Ok(None);
  };
  if blocks.len() > 1 {
    return Err(ConfigError::DuplicateBlock {
      path: path.to_path_buf(),
      block: block.to_string(),
    });
  }
  let Some(first) = blocks.first() else {
    return Ok(None);
  };

  serde_json::from_value(Value::Object(first.clone()))
    .map(Some)
    .map_err(|source| ConfigError::Decode {
      path: path.to_path_buf(),
      block: block.to_string(),
      source,
    })
}
