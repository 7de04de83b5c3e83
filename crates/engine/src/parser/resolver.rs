//! Target resolution.
//!
//! The resolver memoizes package parses per `(project, package)` and rewrites
//! symbolic target references into concrete fully-qualified names:
//!
//! - `//proj/pkg/...` (spread): every package under the prefix, as `:all`
//! - `//proj/pkg:all[:script]`: every target in the package
//! - `//proj/pkg` (no colon): rewritten to `:all`
//! - anything else: parsed as a fully-qualified target, defaulting the script

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::path::Path;

use tracing::debug;

use zen_core::fqn::{Fqn, FqnError};
use zen_core::hash;
use zen_core::target::Target;

use crate::config::ProjectConfig;

use super::registry::{TargetConfigContext, TargetFactoryMap};
use super::{PackageLoader, ParseError};

#[derive(Debug, thiserror::Error)]
pub enum ResolutionError {
  #[error(transparent)]
  Fqn(#[from] FqnError),

  #[error("project {name} not configured. known projects are: {known}")]
  UnknownProject { name: String, known: String },

  #[error("{name} is not a valid target inside //{project}/{pkg}")]
  UnknownTarget {
    project: String,
    pkg: String,
    name: String,
  },

  #[error("parsing package //{project}/{pkg}: {source}")]
  Parse {
    project: String,
    pkg: String,
    #[source]
    source: ParseError,
  },

  #[error(transparent)]
  Glob(#[from] zen_core::hash::HashError),
}

/// Lazily parses packages and expands target references.
pub struct Resolver {
  loader: PackageLoader,
  registry: TargetFactoryMap,
  projects: HashMap<String, ProjectConfig>,
  contexts: HashMap<String, TargetConfigContext>,
  packages: HashMap<(String, String), Vec<Target>>,
}

impl Resolver {
  pub fn new(loader: PackageLoader, registry: TargetFactoryMap) -> Self {
    Resolver {
      loader,
      registry,
      projects: HashMap::new(),
      contexts: HashMap::new(),
      packages: HashMap::new(),
    }
  }

  pub fn add_project(&mut self, name: &str, config: ProjectConfig, context: TargetConfigContext) {
    self.projects.insert(name.to_string(), config);
    self.contexts.insert(name.to_string(), context);
  }

  pub fn is_project_configured(&self, name: &str) -> bool {
    self.projects.contains_key(name)
  }

  fn known_projects(&self) -> String {
    let mut names: Vec<&str> = self.projects.keys().map(String::as_str).collect();
    names.sort_unstable();
    names.join(", ")
  }

  fn require_project(&self, name: &str) -> Result<&ProjectConfig, ResolutionError> {
    self.projects.get(name).ok_or_else(|| ResolutionError::UnknownProject {
      name: name.to_string(),
      known: self.known_projects(),
    })
  }

  /// Parse a package on first request; subsequent requests hit the table.
  pub fn parse_package_targets(&mut self, project: &str, pkg: &str) -> Result<(), ResolutionError> {
    let key = (project.to_string(), pkg.to_string());
    if self.packages.contains_key(&key) {
      return Ok(());
    }

    let config = self.require_project(project)?;
    let package_file = config.path_for_package(pkg);
    let package_dir = config.path.join(pkg);
    debug!(%project, %pkg, file = %package_file.display(), "parsing package");

    let parse_err = |source: ParseError| ResolutionError::Parse {
      project: project.to_string(),
      pkg: pkg.to_string(),
      source,
    };

    let mut context = self
      .contexts
      .get(project)
      .cloned()
      .unwrap_or_default();
    let table = self
      .loader
      .read_package_file(&package_file, &mut context.variables)
      .map_err(parse_err)?;

    let mut targets: Vec<Target> = Vec::new();
    for (block_type, blocks) in &table {
      let factory = self
        .registry
        .get(block_type)
        .ok_or_else(|| {
          parse_err(ParseError::UnknownBlockType {
            block_type: block_type.clone(),
          })
        })?
        .clone();

      for block in blocks {
        for mut target in factory.get_targets(block, &context).map_err(parse_err)? {
          target.set_fqn(project, pkg);
          target.set_original_path(&package_dir);
          target
            .expand_environments(&context.environments)
            .map_err(|e| parse_err(ParseError::Target(e)))?;
          target.ensure_valid().map_err(|e| parse_err(ParseError::Target(e)))?;

          if targets.iter().any(|t| t.name == target.name) {
            return Err(parse_err(ParseError::DuplicateTarget {
              name: target.name.clone(),
              package: format!("//{project}/{pkg}"),
            }));
          }
          targets.push(target);
        }
      }
    }

    targets.sort_by(|a, b| a.name.cmp(&b.name));
    self.packages.insert(key, targets);
    Ok(())
  }

  /// A single named target.
  pub fn get_target(&mut self, fqn: &Fqn) -> Result<Target, ResolutionError> {
    self.parse_package_targets(fqn.project(), fqn.package())?;

    let key = (fqn.project().to_string(), fqn.package().to_string());
    self
      .packages
      .get(&key)
      .and_then(|targets| targets.iter().find(|t| t.name == fqn.name()))
      .cloned()
      .ok_or_else(|| ResolutionError::UnknownTarget {
        project: fqn.project().to_string(),
        pkg: fqn.package().to_string(),
        name: fqn.name().to_string(),
      })
  }

  /// Every target in a package, sorted by name.
  pub fn get_all_targets_in_package(
    &mut self,
    project: &str,
    pkg: &str,
  ) -> Result<Vec<Target>, ResolutionError> {
    self.parse_package_targets(project, pkg)?;
    let key = (project.to_string(), pkg.to_string());
    Ok(self.packages.get(&key).cloned().unwrap_or_default())
  }

  /// Targets addressed by an fqn: the named target, or all targets in the
  /// package for the `all` wildcard.
  pub fn targets_for(&mut self, fqn: &Fqn) -> Result<Vec<Target>, ResolutionError> {
    if fqn.is_all() {
      self.get_all_targets_in_package(fqn.project(), fqn.package())
    } else {
      Ok(vec![self.get_target(fqn)?])
    }
  }

  /// Rewrite an argument list into concrete `//proj/pkg:name:script` forms.
  pub fn expand_targets(
    &mut self,
    args: &[String],
    default_script: &str,
  ) -> Result<Vec<String>, ResolutionError> {
    let mut queue: VecDeque<String> = args.iter().cloned().collect();
    let mut finals = Vec::new();
    let mut seen = BTreeSet::new();

    while let Some(item) = queue.pop_front() {
      if let Some((project, prefix, script)) = split_spread(&item) {
        self.require_project(&project)?;
        let script = script.unwrap_or_else(|| default_script.to_string());

        for pkg in self.search_packages(&project, &prefix)? {
          queue.push_back(format!("//{project}/{pkg}:all:{script}"));
        }
        continue;
      }

      if !item.trim_start_matches("//").contains(':') {
        queue.push_back(format!("{item}:all"));
        continue;
      }

      let fqn = Fqn::parse_with_default(&item, default_script)?;
      self.require_project(fqn.project())?;

      if fqn.is_all() {
        for target in self.get_all_targets_in_package(fqn.project(), fqn.package())? {
          let expanded = format!("{}:{}", target.qn(), fqn.script());
          if seen.insert(expanded.clone()) {
            finals.push(expanded);
          }
        }
      } else if seen.insert(fqn.fqn()) {
        finals.push(fqn.fqn());
      }
    }

    Ok(finals)
  }

  /// Enumerate packages under a prefix by glob-walking the project's
  /// placement patterns.
  pub fn search_packages(&self, project: &str, prefix: &str) -> Result<Vec<String>, ResolutionError> {
    let config = self.require_project(project)?;
    let filename = &config.parse.filename;

    let mut found = BTreeSet::new();
    for placement in &config.parse.placement {
      let with_prefix = placement.replace("{PKG}", &format!("{prefix}*"));
      let pattern = format!("{with_prefix}/**/{filename}");

      for rel in hash::glob(&config.path, &pattern)?.keys() {
        let rel_path = Path::new(rel);
        if rel_path
          .components()
          .any(|c| c.as_os_str().to_string_lossy().starts_with('.'))
        {
          // State and VCS directories are not packages.
          continue;
        }
        if let Some(dir) = rel_path.parent() {
          found.insert(dir.display().to_string());
        }
      }
    }

    Ok(found.into_iter().collect())
  }

  /// Complete a partial target address: project names, then package paths,
  /// then target names.
  pub fn autocomplete(&mut self, input: &str) -> Result<Vec<String>, ResolutionError> {
    if input.len() < 2 {
      return Ok(vec!["//".to_string()]);
    }
    let Some(rest) = input.strip_prefix("//") else {
      return Ok(Vec::new());
    };

    let mut options = Vec::new();
    match rest.split_once(':') {
      Some((path, partial)) => {
        let Some((project, pkg)) = path.split_once('/') else {
          return Ok(Vec::new());
        };
        if self.parse_package_targets(project, pkg).is_ok() {
          let key = (project.to_string(), pkg.to_string());
          if let Some(targets) = self.packages.get(&key) {
            for target in targets {
              if target.name.starts_with(partial) {
                options.push(format!("//{project}/{pkg}:{}", target.name));
              }
            }
          }
        }
      }
      None => match rest.split_once('/') {
        Some((project, partial_pkg)) => {
          if self.is_project_configured(project) {
            for pkg in self.search_packages(project, partial_pkg)? {
              options.push(format!("//{project}/{pkg}"));
            }
          }
        }
        None => {
          let mut names: Vec<&String> = self.projects.keys().collect();
          names.sort_unstable();
          for name in names {
            if name.starts_with(rest) {
              options.push(format!("//{name}"));
            }
          }
        }
      },
    }

    options.sort();
    Ok(options)
  }
}

/// Split a spread form `//proj[/pkg]/...[:script]` into its parts.
fn split_spread(item: &str) -> Option<(String, String, Option<String>)> {
  let rest = item.strip_prefix("//")?;
  let idx = rest.find("/...")?;
  let after = &rest[idx + 4..];

  let script = match after {
    "" => None,
    _ => Some(after.strip_prefix(':')?.to_string()),
  };

  let body = &rest[..idx];
  let (project, prefix) = match body.split_once('/') {
    Some((project, prefix)) => (project.to_string(), prefix.to_string()),
    None => (body.to_string(), String::new()),
  };
  if project.is_empty() {
    return None;
  }

  Some((project, prefix, script))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::parser::frontend::JsonFrontend;
  use crate::testutil;
  use std::sync::Arc;
  use tempfile::TempDir;

  fn resolver_with_project(dir: &TempDir) -> Resolver {
    std::fs::write(dir.path().join(".zenconfig"), "{}").unwrap();
    let config = ProjectConfig::load(&JsonFrontend, dir.path()).unwrap();

    let mut resolver = Resolver::new(
      PackageLoader::new(Arc::new(JsonFrontend)),
      testutil::mock_registry(),
    );
    resolver.add_project("p", config, TargetConfigContext::default());
    resolver
  }

  fn write_package(dir: &TempDir, pkg: &str, names: &[&str]) {
    let pkg_dir = dir.path().join(pkg);
    std::fs::create_dir_all(&pkg_dir).unwrap();
    let blocks: Vec<String> = names
      .iter()
      .map(|name| format!(r#"{{"name": "{name}", "scripts": {{"build": []}}}}"#))
      .collect();
    std::fs::write(
      pkg_dir.join("BUILD"),
      format!(r#"{{"mock": [{}]}}"#, blocks.join(",")),
    )
    .unwrap();
  }

  #[test]
  fn parse_is_memoized() {
    let dir = TempDir::new().unwrap();
    write_package(&dir, "a", &["t"]);

    let mut resolver = resolver_with_project(&dir);
    resolver.parse_package_targets("p", "a").unwrap();

    // A second parse must not re-read the file.
    std::fs::remove_file(dir.path().join("a/BUILD")).unwrap();
    resolver.parse_package_targets("p", "a").unwrap();
    assert!(resolver.get_target(&Fqn::parse("//p/a:t").unwrap()).is_ok());
  }

  #[test]
  fn unknown_target_errors() {
    let dir = TempDir::new().unwrap();
    write_package(&dir, "a", &["t"]);

    let mut resolver = resolver_with_project(&dir);
    assert!(matches!(
      resolver.get_target(&Fqn::parse("//p/a:ghost").unwrap()),
      Err(ResolutionError::UnknownTarget { .. })
    ));
  }

  #[test]
  fn unknown_block_type_errors() {
    let dir = TempDir::new().unwrap();
    let pkg_dir = dir.path().join("a");
    std::fs::create_dir_all(&pkg_dir).unwrap();
    std::fs::write(pkg_dir.join("BUILD"), r#"{"alien": [{"name": "t"}]}"#).unwrap();

    let mut resolver = resolver_with_project(&dir);
    assert!(matches!(
      resolver.parse_package_targets("p", "a"),
      Err(ResolutionError::Parse { .. })
    ));
  }

  #[test]
  fn expand_plain_fqn_defaults_script() {
    let dir = TempDir::new().unwrap();
    write_package(&dir, "a", &["t"]);

    let mut resolver = resolver_with_project(&dir);
    let expanded = resolver
      .expand_targets(&["//p/a:t".to_string()], "build")
      .unwrap();
    assert_eq!(expanded, vec!["//p/a:t:build"]);
  }

  #[test]
  fn expand_all_equals_explicit_enumeration() {
    let dir = TempDir::new().unwrap();
    write_package(&dir, "a", &["one", "two"]);

    let mut resolver = resolver_with_project(&dir);
    let via_all = resolver
      .expand_targets(&["//p/a:all".to_string()], "build")
      .unwrap();
    let explicit = resolver
      .expand_targets(&["//p/a:one".to_string(), "//p/a:two".to_string()], "build")
      .unwrap();
    assert_eq!(via_all, explicit);
  }

  #[test]
  fn expand_bare_package_becomes_all() {
    let dir = TempDir::new().unwrap();
    write_package(&dir, "a", &["t"]);

    let mut resolver = resolver_with_project(&dir);
    let expanded = resolver
      .expand_targets(&["//p/a".to_string()], "build")
      .unwrap();
    assert_eq!(expanded, vec!["//p/a:t:build"]);
  }

  #[test]
  fn expand_spread_covers_subpackages_once() {
    let dir = TempDir::new().unwrap();
    write_package(&dir, "a", &["root"]);
    write_package(&dir, "a/sub1", &["one"]);
    write_package(&dir, "a/sub2", &["two"]);

    let mut resolver = resolver_with_project(&dir);
    let expanded = resolver
      .expand_targets(&["//p/a/...".to_string()], "build")
      .unwrap();
    assert_eq!(
      expanded,
      vec!["//p/a:root:build", "//p/a/sub1:one:build", "//p/a/sub2:two:build"]
    );
  }

  #[test]
  fn expand_spread_with_explicit_script() {
    let dir = TempDir::new().unwrap();
    write_package(&dir, "a", &["t"]);

    let mut resolver = resolver_with_project(&dir);
    let expanded = resolver
      .expand_targets(&["//p/a/...:deploy".to_string()], "build")
      .unwrap();
    assert_eq!(expanded, vec!["//p/a:t:deploy"]);
  }

  #[test]
  fn expand_unknown_project_errors() {
    let dir = TempDir::new().unwrap();
    let mut resolver = resolver_with_project(&dir);
    assert!(matches!(
      resolver.expand_targets(&["//ghost/a:t".to_string()], "build"),
      Err(ResolutionError::UnknownProject { .. })
    ));
  }

  #[test]
  fn search_packages_respects_placement() {
    let dir = TempDir::new().unwrap();
    write_package(&dir, "services/api", &["t"]);
    write_package(&dir, "other", &["t"]);

    std::fs::write(
      dir.path().join(".zenconfig"),
      r#"{"parse": [{"placement": ["services/{PKG}"]}]}"#,
    )
    .unwrap();
    let config = ProjectConfig::load(&JsonFrontend, dir.path()).unwrap();
    let mut resolver = Resolver::new(
      PackageLoader::new(Arc::new(JsonFrontend)),
      testutil::mock_registry(),
    );
    resolver.add_project("p", config, TargetConfigContext::default());

    let found = resolver.search_packages("p", "").unwrap();
    assert_eq!(found, vec!["services/api"]);
  }

  #[test]
  fn autocomplete_projects_packages_targets() {
    let dir = TempDir::new().unwrap();
    write_package(&dir, "a", &["tool", "test"]);

    let mut resolver = resolver_with_project(&dir);
    assert_eq!(resolver.autocomplete("//").unwrap(), vec!["//p"]);
    assert_eq!(resolver.autocomplete("//p/").unwrap(), vec!["//p/a"]);
    assert_eq!(
      resolver.autocomplete("//p/a:t").unwrap(),
      vec!["//p/a:test", "//p/a:tool"]
    );
  }

  #[test]
  fn split_spread_forms() {
    assert_eq!(
      split_spread("//p/a/..."),
      Some(("p".to_string(), "a".to_string(), None))
    );
    assert_eq!(
      split_spread("//p/a/sub/...:deploy"),
      Some(("p".to_string(), "a/sub".to_string(), Some("deploy".to_string())))
    );
    assert_eq!(
      split_spread("//p/..."),
      Some(("p".to_string(), String::new(), None))
    );
    assert_eq!(split_spread("//p/a:t"), None);
  }
}
