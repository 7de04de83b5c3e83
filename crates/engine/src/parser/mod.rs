//! Package loading.
//!
//! The [`PackageLoader`] reads a package file through the configured
//! [`Frontend`], harvests `variables` blocks into the per-read variable
//! scope, processes `include` blocks in order (plain files and rendered
//! templates), and returns the remaining blocks grouped by type.

pub mod frontend;
pub mod include;
pub mod registry;
pub mod resolver;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use zen_core::interpolate::{self, InterpolateError};
use zen_core::target::TargetError;

use frontend::{BlockTable, Frontend, FrontendError};
use include::IncludeConfig;

/// Errors from reading and decoding package files.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
  #[error(transparent)]
  Frontend(#[from] FrontendError),

  #[error("{block_type:?} is not a known block type")]
  UnknownBlockType { block_type: String },

  #[error("decoding {context}: {source}")]
  Decode {
    context: String,
    #[source]
    source: serde_json::Error,
  },

  #[error("include block in {path} must set exactly one of `path` or `template`")]
  IncludeChoice { path: String },

  #[error("including {include} in {path}: {source}")]
  Include {
    path: String,
    include: String,
    #[source]
    source: Box<ParseError>,
  },

  #[error("input {input:?} not provided but mandatory, at {path}")]
  MissingInput { input: String, path: String },

  #[error("template file {0} has no template body")]
  TemplateBody(String),

  #[error(transparent)]
  Interpolate(#[from] InterpolateError),

  #[error(transparent)]
  Target(#[from] TargetError),

  #[error("target {name:?} declared more than once in package {package}")]
  DuplicateTarget { name: String, package: String },
}

/// Reads package files and resolves their `variables` and `include` blocks.
#[derive(Clone)]
pub struct PackageLoader {
  frontend: Arc<dyn Frontend>,
}

impl PackageLoader {
  pub fn new(frontend: Arc<dyn Frontend>) -> Self {
    PackageLoader { frontend }
  }

  pub fn frontend(&self) -> &Arc<dyn Frontend> {
    &self.frontend
  }

  /// Read a package file, resolving variables and includes.
  ///
  /// `vars` is the per-read variable scope: harvested `variables` blocks are
  /// merged into it (upper-cased keys) and it feeds `{KEY}` interpolation of
  /// include paths and template inputs.
  pub fn read_package_file(
    &self,
    path: &Path,
    vars: &mut BTreeMap<String, String>,
  ) -> Result<BlockTable, ParseError> {
    let mut table = self.frontend.parse_file(path)?;

    if let Some(blocks) = table.remove("variables") {
      for block in &blocks {
        for (key, value) in block {
          vars.insert(key.to_uppercase(), scalar_to_string(value));
        }
      }
    }

    if let Some(blocks) = table.remove("include") {
      for block in blocks {
        let include: IncludeConfig =
          serde_json::from_value(Value::Object(block)).map_err(|source| ParseError::Decode {
            context: format!("include block in {}", path.display()),
            source,
          })?;

        let included = self.read_include(path, &include, vars)?;
        for (block_type, mut included_blocks) in included {
          table.entry(block_type).or_default().append(&mut included_blocks);
        }
      }
    }

    Ok(table)
  }

  fn read_include(
    &self,
    path: &Path,
    include: &IncludeConfig,
    vars: &mut BTreeMap<String, String>,
  ) -> Result<BlockTable, ParseError> {
    match (&include.path, &include.template) {
      (Some(include_path), None) => {
        let interpolated = interpolate::interpolate(include_path, vars)?;
        let resolved = path.parent().unwrap_or(Path::new(".")).join(&interpolated);
        debug!(from = %path.display(), include = %resolved.display(), "reading include");

        self
          .read_package_file(&resolved, vars)
          .map_err(|source| ParseError::Include {
            path: path.display().to_string(),
            include: interpolated,
            source: Box::new(source),
          })
      }
      (None, Some(template_path)) => self.read_template(path, include, template_path, vars),
      _ => Err(ParseError::IncludeChoice {
        path: path.display().to_string(),
      }),
    }
  }

  fn read_template(
    &self,
    path: &Path,
    include: &IncludeConfig,
    template_path: &str,
    vars: &BTreeMap<String, String>,
  ) -> Result<BlockTable, ParseError> {
    let interpolated_path = interpolate::interpolate(template_path, vars)?;
    let resolved = resolve_template_path(path, &interpolated_path);
    debug!(from = %path.display(), template = %resolved.display(), "rendering template include");

    let template_table = self.frontend.parse_file(&resolved)?;
    let template = include::decode_template(&template_table, &interpolated_path)?;

    let mut declared = Vec::new();
    for (input, schema) in &template.inputs {
      if schema.mandatory && !include.inputs.contains_key(input) {
        return Err(ParseError::MissingInput {
          input: input.clone(),
          path: path.display().to_string(),
        });
      }
      declared.push(input.clone());
    }

    let mut input_vars = include.inputs_as_vars(&declared);
    for value in input_vars.values_mut() {
      *value = interpolate::interpolate(value, vars)?;
    }

    let rendered = interpolate::interpolate_known(&template.body, &input_vars);
    Ok(self.frontend.parse_bytes(rendered.as_bytes(), &interpolated_path)?)
  }
}

fn resolve_template_path(from: &Path, template: &str) -> PathBuf {
  let template = Path::new(template);
  if template.is_absolute() {
    template.to_path_buf()
  } else {
    from.parent().unwrap_or(Path::new(".")).join(template)
  }
}

fn scalar_to_string(value: &Value) -> String {
  match value {
    Value::String(s) => s.clone(),
    other => other.to_string(),
  }
}
