//! `include` block handling.
//!
//! A package file can pull in other files verbatim (`path`) or render a
//! parameterized template (`template` + `inputs`). Templates declare their
//! own input schema; mandatory inputs must be supplied by the including
//! block.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;

use super::ParseError;

/// A decoded `include` block. Exactly one of `path` or `template` must be
/// set.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IncludeConfig {
  pub path: Option<String>,
  pub template: Option<String>,

  /// Inputs supplied to a template include.
  #[serde(default)]
  pub inputs: BTreeMap<String, Value>,
}

/// Input schema entry of a template file.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IncludeInput {
  #[serde(default)]
  pub mandatory: bool,
}

/// A decoded template file: an input schema plus the body to render.
#[derive(Debug, Default)]
pub struct IncludeTemplate {
  pub inputs: BTreeMap<String, IncludeInput>,
  pub body: String,
}

impl IncludeConfig {
  /// Render the supplied inputs as interpolation variables.
  ///
  /// Strings pass through; sequences render as quoted comma-separated lists;
  /// maps flat-print as `key = "value"` lines. Declared inputs that were not
  /// supplied render as the empty string (missing mandatory inputs are
  /// rejected before this runs).
  pub fn inputs_as_vars(&self, declared: &[String]) -> BTreeMap<String, String> {
    let mut vars = BTreeMap::new();

    for (key, value) in &self.inputs {
      vars.insert(key.clone(), render_input(value));
    }
    for key in declared {
      vars.entry(key.clone()).or_default();
    }

    vars
  }
}

fn render_input(value: &Value) -> String {
  match value {
    Value::String(s) => s.clone(),
    Value::Array(items) => {
      let quoted: Vec<String> = items.iter().map(|item| format!("{:?}", render_scalar(item))).collect();
      quoted.join(",")
    }
    Value::Object(map) => {
      let lines: Vec<String> = map
        .iter()
        .map(|(k, v)| format!("{} = {:?}", k, render_scalar(v)))
        .collect();
      lines.join("\n")
    }
    other => render_scalar(other),
  }
}

fn render_scalar(value: &Value) -> String {
  match value {
    Value::String(s) => s.clone(),
    Value::Bool(b) => b.to_string(),
    Value::Number(n) => n.to_string(),
    Value::Null => String::new(),
    other => other.to_string(),
  }
}

/// Decode a parsed template file into its schema and body.
///
/// The template file carries an `inputs` block (input name -> schema) and a
/// `template` block whose `body` field holds the text to render.
pub fn decode_template(table: &super::frontend::BlockTable, path: &str) -> Result<IncludeTemplate, ParseError> {
  let mut template = IncludeTemplate::default();

  if let Some(blocks) = table.get("inputs") {
    for block in blocks {
      for (name, schema) in block {
        let input: IncludeInput =
          serde_json::from_value(schema.clone()).map_err(|source| ParseError::Decode {
            context: format!("template input {name:?} in {path}"),
            source,
          })?;
        template.inputs.insert(name.clone(), input);
      }
    }
  }

  let body_block = table
    .get("template")
    .and_then(|blocks| blocks.first())
    .ok_or_else(|| ParseError::TemplateBody(path.to_string()))?;
  template.body = body_block
    .get("body")
    .and_then(Value::as_str)
    .ok_or_else(|| ParseError::TemplateBody(path.to_string()))?
    .to_string();

  Ok(template)
}
