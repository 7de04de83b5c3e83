//! `{KEY}` token interpolation.
//!
//! Package variables, template inputs and step environments all use the same
//! brace token syntax. A token is `{` followed by `[A-Za-z0-9_]+` and `}`;
//! any other brace is literal text. Self-interpolation of an environment map
//! is a true fixed-point walk with an iteration cap, so `A={B}` / `B={A}`
//! surfaces an error instead of looping forever.

use std::collections::BTreeMap;

/// Substitution rounds allowed before a map is declared non-convergent.
const MAX_INTERPOLATION_ROUNDS: usize = 16;

#[derive(Debug, thiserror::Error)]
pub enum InterpolateError {
  #[error("unknown variable {key:?} in {input:?}")]
  UnknownKey { key: String, input: String },

  #[error("interpolation did not converge after {MAX_INTERPOLATION_ROUNDS} rounds (cycle through {key:?}?)")]
  NonConvergent { key: String },
}

fn is_key_char(c: u8) -> bool {
  c.is_ascii_alphanumeric() || c == b'_'
}

fn substitute(
  input: &str,
  vars: &BTreeMap<String, String>,
  strict: bool,
) -> Result<String, InterpolateError> {
  let mut out = String::with_capacity(input.len());
  let mut rest = input;

  while let Some(start) = rest.find('{') {
    out.push_str(&rest[..start]);
    let after = &rest[start + 1..];

    // A token is a run of key characters immediately closed by '}'. Anything
    // else keeps the brace literal, so JSON-ish text passes through.
    let key_len = after.bytes().take_while(|&b| is_key_char(b)).count();
    if key_len == 0 || after.as_bytes().get(key_len) != Some(&b'}') {
      out.push('{');
      rest = after;
      continue;
    }

    let key = &after[..key_len];
    match vars.get(key) {
      Some(value) => out.push_str(value),
      None if strict => {
        return Err(InterpolateError::UnknownKey {
          key: key.to_string(),
          input: input.to_string(),
        })
      }
      // Lenient mode leaves unknown tokens for a later pass.
      None => {
        out.push('{');
        out.push_str(key);
        out.push('}');
      }
    }

    rest = &after[key_len + 1..];
  }

  out.push_str(rest);
  Ok(out)
}

/// Replace every `{KEY}` token from `vars`. An unknown key is an error.
pub fn interpolate(input: &str, vars: &BTreeMap<String, String>) -> Result<String, InterpolateError> {
  substitute(input, vars, true)
}

/// Replace the `{KEY}` tokens present in `vars`, leaving unknown tokens
/// untouched. Used for template rendering where the template body may carry
/// tokens owned by a later interpolation pass.
pub fn interpolate_known(input: &str, vars: &BTreeMap<String, String>) -> String {
  match substitute(input, vars, false) {
    Ok(out) => out,
    // Lenient substitution cannot fail; keep the input if it ever does.
    Err(_) => input.to_string(),
  }
}

/// Fixed-point substitution of a map against itself.
///
/// Every value is repeatedly interpolated against the full map until no value
/// changes. An unknown key or a failure to converge within
/// [`MAX_INTERPOLATION_ROUNDS`] rounds is an error.
pub fn interpolate_map_with_itself(
  map: BTreeMap<String, String>,
) -> Result<BTreeMap<String, String>, InterpolateError> {
  let mut current = map;

  for _ in 0..MAX_INTERPOLATION_ROUNDS {
    let mut next = BTreeMap::new();
    let mut changed = false;

    for (key, value) in &current {
      let substituted = interpolate(value, &current)?;
      if substituted != *value {
        changed = true;
      }
      next.insert(key.clone(), substituted);
    }

    if !changed {
      return Ok(next);
    }
    current = next;
  }

  let key = current
    .iter()
    .find(|(_, v)| v.contains('{'))
    .map(|(k, _)| k.clone())
    .unwrap_or_default();
  Err(InterpolateError::NonConvergent { key })
}

#[cfg(test)]
mod tests {
  use super::*;

  fn vars(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
  }

  #[test]
  fn interpolate_replaces_tokens() {
    let v = vars(&[("NAME", "world"), ("GREETING", "hello")]);
    assert_eq!(interpolate("{GREETING} {NAME}!", &v).unwrap(), "hello world!");
  }

  #[test]
  fn interpolate_unknown_key_errors() {
    let v = vars(&[]);
    assert!(matches!(
      interpolate("{MISSING}", &v),
      Err(InterpolateError::UnknownKey { .. })
    ));
  }

  #[test]
  fn non_token_braces_are_literal() {
    let v = vars(&[("A", "x")]);
    assert_eq!(interpolate("json {\"a\": 1} and {A}", &v).unwrap(), "json {\"a\": 1} and x");
    assert_eq!(interpolate("lone { brace", &v).unwrap(), "lone { brace");
  }

  #[test]
  fn tokens_inside_literal_braces_still_resolve() {
    let v = vars(&[("NAME", "tool")]);
    assert_eq!(
      interpolate(r#"{"exec": [{"name": "{NAME}"}]}"#, &v).unwrap(),
      r#"{"exec": [{"name": "tool"}]}"#
    );
  }

  #[test]
  fn interpolate_known_keeps_unknown_tokens() {
    let v = vars(&[("A", "x")]);
    assert_eq!(interpolate_known("{A} {B}", &v), "x {B}");
  }

  #[test]
  fn map_self_interpolation_reaches_fixed_point() {
    let map = vars(&[("ROOT", "/repo"), ("BIN", "{ROOT}/bin"), ("TOOL", "{BIN}/tool")]);
    let resolved = interpolate_map_with_itself(map).unwrap();
    assert_eq!(resolved["TOOL"], "/repo/bin/tool");
    assert_eq!(resolved["BIN"], "/repo/bin");
  }

  #[test]
  fn map_self_interpolation_detects_cycles() {
    let map = vars(&[("A", "{B}"), ("B", "{A}")]);
    assert!(matches!(
      interpolate_map_with_itself(map),
      Err(InterpolateError::NonConvergent { .. })
    ));
  }

  #[test]
  fn map_self_interpolation_unknown_key_errors() {
    let map = vars(&[("A", "{NOPE}")]);
    assert!(matches!(
      interpolate_map_with_itself(map),
      Err(InterpolateError::UnknownKey { .. })
    ));
  }
}
