//! Per-project configuration.
//!
//! Each project root carries a `.zenconfig` file declaring how packages are
//! found (`parse`), the project build environment (`build`), its deployment
//! environments, and optional cache root overrides. Persisted engine state
//! lives under `<project>/.zen/`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use zen_core::Environment;

use crate::cache::CacheRoots;
use crate::parser::frontend::Frontend;

use super::{decode_single_block, ConfigError};

/// Project config file name, relative to the project root.
pub const PROJECT_CONFIG_FILENAME: &str = ".zenconfig";

/// Directory under the project root holding all persisted engine state.
const STATE_DIR: &str = ".zen";

/// `parse` block: how package files are located.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ParseConfig {
  /// Package file name inside each package directory.
  #[serde(default = "default_filename")]
  pub filename: String,

  /// Patterns locating package directories; `{PKG}` is replaced by the
  /// requested package path during expansion.
  #[serde(default)]
  pub placement: Vec<String>,
}

fn default_filename() -> String {
  "BUILD".to_string()
}

impl Default for ParseConfig {
  fn default() -> Self {
    ParseConfig {
      filename: default_filename(),
      placement: Vec::new(),
    }
  }
}

/// `build` block: project-level build environment.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProjectBuildConfig {
  #[serde(default)]
  pub toolchains: BTreeMap<String, String>,

  #[serde(default)]
  pub env: BTreeMap<String, String>,

  #[serde(default)]
  pub variables: BTreeMap<String, String>,

  /// Host variables forwarded into the public project env.
  #[serde(default)]
  pub pass_env: Vec<String>,

  /// Host variables forwarded into the secret project env (never hashed).
  #[serde(default)]
  pub secret_env: Vec<String>,
}

/// Optional cache root overrides in the project config.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct CacheOverrides {
  gen: Option<PathBuf>,
  out: Option<PathBuf>,
  metadata: Option<PathBuf>,
  artifacts: Option<PathBuf>,
  logs: Option<PathBuf>,
}

/// A loaded project configuration.
#[derive(Debug, Clone)]
pub struct ProjectConfig {
  /// Project root directory.
  pub path: PathBuf,

  pub parse: ParseConfig,
  pub build: ProjectBuildConfig,
  pub environments: BTreeMap<String, Environment>,
  pub cache: CacheRoots,
}

impl ProjectConfig {
  /// Load `<project_root>/.zenconfig`.
  pub fn load(frontend: &dyn Frontend, project_root: &Path) -> Result<Self, ConfigError> {
    let config_path = project_root.join(PROJECT_CONFIG_FILENAME);
    if !config_path.exists() {
      return Err(ConfigError::NotFound(config_path));
    }

    let table = frontend
      .parse_file(&config_path)
      .map_err(|source| ConfigError::Frontend {
        path: config_path.clone(),
        source,
      })?;

    let mut parse: ParseConfig = decode_single_block(&table, "parse", &config_path)?.unwrap_or_default();
    if parse.placement.is_empty() {
      parse.placement = vec!["{PKG}".to_string()];
    }

    let mut build: ProjectBuildConfig =
      decode_single_block(&table, "build", &config_path)?.unwrap_or_default();
    build
      .env
      .entry("REPO_ROOT".to_string())
      .or_insert_with(|| project_root.display().to_string());

    let environments = decode_single_block(&table, "environments", &config_path)?.unwrap_or_default();

    let state_root = project_root.join(STATE_DIR);
    let overrides: CacheOverrides = decode_single_block(&table, "cache", &config_path)?.unwrap_or_default();
    let cache = CacheRoots {
      gen: overrides.gen.unwrap_or_else(|| state_root.join("cache")),
      out: overrides.out.unwrap_or_else(|| state_root.join("out")),
      metadata: overrides.metadata.unwrap_or_else(|| state_root.join("metadata")),
      artifacts: overrides.artifacts.unwrap_or_else(|| state_root.join("artifacts")),
      logs: overrides.logs.unwrap_or_else(|| state_root.join("logs")),
    };

    Ok(ProjectConfig {
      path: project_root.to_path_buf(),
      parse,
      build,
      environments,
      cache,
    })
  }

  /// The package file path for a package of this project.
  pub fn path_for_package(&self, pkg: &str) -> PathBuf {
    self.path.join(pkg).join(&self.parse.filename)
  }
}
