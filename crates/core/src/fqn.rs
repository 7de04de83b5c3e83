//! Fully qualified target names.
//!
//! A target address is a four-tuple `(project, package, name, script)` with
//! the canonical textual form `//<project>/<package>:<name>:<script>`. The
//! script segment is optional in the textual form and defaults to `build`.

use serde::{Deserialize, Serialize};

use crate::{ALL_TARGETS, BUILD_SCRIPT};

/// Errors produced while parsing a target address.
#[derive(Debug, thiserror::Error)]
pub enum FqnError {
  /// The address does not match `//<project>/<package>:<name>[:<script>]`.
  #[error("target address {0:?} is not valid")]
  Invalid(String),

  /// The address is missing the `:<name>` segment.
  #[error("target address {0:?} has no target name")]
  MissingName(String),
}

/// A fully qualified target name.
///
/// `name == "all"` is a wildcard meaning every target in the package.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Fqn {
  project: String,
  package: String,
  name: String,
  script: String,
}

impl Fqn {
  pub fn new(project: &str, package: &str, name: &str, script: &str) -> Self {
    Fqn {
      project: project.to_string(),
      package: package.to_string(),
      name: name.to_string(),
      script: script.to_string(),
    }
  }

  /// Parse an address, defaulting the script to `build`.
  pub fn parse(input: &str) -> Result<Self, FqnError> {
    Self::parse_with_default(input, BUILD_SCRIPT)
  }

  /// Parse an address, defaulting the script to `default_script` when the
  /// textual form does not carry one.
  pub fn parse_with_default(input: &str, default_script: &str) -> Result<Self, FqnError> {
    let rest = input
      .strip_prefix("//")
      .ok_or_else(|| FqnError::Invalid(input.to_string()))?;

    let (path, target) = match rest.split_once(':') {
      Some((path, target)) => (path, target),
      None => return Err(FqnError::MissingName(input.to_string())),
    };

    let (project, package) = path
      .split_once('/')
      .ok_or_else(|| FqnError::Invalid(input.to_string()))?;

    let (name, script) = match target.split_once(':') {
      Some((name, script)) => (name, script),
      None => (target, default_script),
    };

    if project.is_empty() || package.is_empty() || name.is_empty() || script.is_empty() {
      return Err(FqnError::Invalid(input.to_string()));
    }
    let segment_ok = |s: &str| {
      s.chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
    };
    let package_ok = package
      .split('/')
      .all(|seg| !seg.is_empty() && segment_ok(seg));
    if !segment_ok(project) || !package_ok || !segment_ok(name) || !segment_ok(script) {
      return Err(FqnError::Invalid(input.to_string()));
    }

    Ok(Fqn::new(project, package, name, script))
  }

  pub fn project(&self) -> &str {
    &self.project
  }

  pub fn package(&self) -> &str {
    &self.package
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn script(&self) -> &str {
    &self.script
  }

  /// Qualified name without the script: `//project/package:name`.
  pub fn qn(&self) -> String {
    format!("//{}/{}:{}", self.project, self.package, self.name)
  }

  /// Full form including the script: `//project/package:name:script`.
  pub fn fqn(&self) -> String {
    format!("{}:{}", self.qn(), self.script)
  }

  /// True when the name is the `all` package wildcard.
  pub fn is_all(&self) -> bool {
    self.name == ALL_TARGETS
  }
}

impl std::fmt::Display for Fqn {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.fqn())
  }
}
