//! Named deployment environments.
//!
//! Projects and the global config declare environments (`dev`, `staging`,
//! `prod`, ...) carrying environment variables that get layered onto a step
//! when a non-`build` script runs with `-e <name>`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A named deployment environment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Environment {
  /// Variables layered onto the step env when this environment is selected.
  #[serde(default)]
  pub env: BTreeMap<String, String>,

  /// Host variables forwarded into the step env when this environment is
  /// selected.
  #[serde(default)]
  pub pass_env: Vec<String>,
}

impl Environment {
  /// The concrete variables for this environment, with `pass_env` names
  /// resolved against the host environment.
  pub fn variables(&self) -> BTreeMap<String, String> {
    let mut vars = self.env.clone();
    for name in &self.pass_env {
      if let Ok(value) = std::env::var(name) {
        vars.insert(name.clone(), value);
      }
    }
    vars
  }
}

/// Merge two environment maps. Environments in `overrides` replace same-named
/// entries in `base`.
pub fn merge_environment_maps(
  base: &BTreeMap<String, Environment>,
  overrides: &BTreeMap<String, Environment>,
) -> BTreeMap<String, Environment> {
  let mut merged = base.clone();
  for (name, env) in overrides {
    merged.insert(name.clone(), env.clone());
  }
  merged
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn merge_prefers_overrides() {
    let mut base = BTreeMap::new();
    base.insert(
      "dev".to_string(),
      Environment {
        env: [("A".to_string(), "1".to_string())].into(),
        pass_env: vec![],
      },
    );
    let mut over = BTreeMap::new();
    over.insert(
      "dev".to_string(),
      Environment {
        env: [("A".to_string(), "2".to_string())].into(),
        pass_env: vec![],
      },
    );

    let merged = merge_environment_maps(&base, &over);
    assert_eq!(merged["dev"].env["A"], "2");
  }
}
