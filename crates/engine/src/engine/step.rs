//! Execution steps.
//!
//! An [`ExecutionStep`] is a target specialized to one script: the merged
//! step environment, the script's lifecycle hooks and deps, and the cache
//! item slot the runner fills once the cache is laid out.

use std::collections::BTreeMap;
use std::sync::Arc;

use zen_core::hash::merge_maps;
use zen_core::target::{CheckCacheFn, RuntimeContext, StepError, StepFn, Target, TransformOutFn};
use zen_core::BUILD_SCRIPT;

use crate::cache::item::CacheItem;

use super::Project;

/// A target specialized to one script; the unit of graph scheduling.
pub struct ExecutionStep {
  pub target: Target,

  /// Dependencies of this step, as target address strings.
  pub deps: Vec<String>,

  pub pre: Option<StepFn>,
  pub run: Option<StepFn>,
  pub post: Option<StepFn>,
  pub transform_out: Option<TransformOutFn>,
  pub check_cache: Option<CheckCacheFn>,
  pub local: bool,

  pub secret_env: BTreeMap<String, String>,
  pub pass_secret_env: Vec<String>,

  /// Delete this step's cache before running.
  pub clean: bool,

  /// Populated by the runner once the cache is loaded.
  pub cache: Option<Arc<CacheItem>>,
}

impl std::fmt::Debug for ExecutionStep {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ExecutionStep")
      .field("fqn", &self.target.fqn())
      .field("deps", &self.deps)
      .field("clean", &self.clean)
      .field("local", &self.local)
      .finish()
  }
}

impl ExecutionStep {
  pub fn fqn(&self) -> String {
    self.target.fqn()
  }

  /// Build the step for one script of a target.
  ///
  /// Layers the environment as project env -> target env -> script env, and
  /// for non-build scripts under `use_environments` also the selected
  /// deployment environment plus `DEPLOY_ENV`. Non-build steps get an
  /// implicit dependency on their own build step.
  ///
  /// Returns [`StepError::ScriptNotSupported`] when the target does not
  /// declare the script; callers skip the target silently.
  pub fn from_target(
    project: &Project,
    target: &Target,
    script: &str,
    ctx: &RuntimeContext,
  ) -> Result<ExecutionStep, StepError> {
    let Some(spec) = target.scripts.get(script) else {
      return Err(StepError::ScriptNotSupported);
    };

    let mut env = merge_maps(&project.env, &target.env);
    env = merge_maps(&env, &spec.env);

    if ctx.use_environments && script != BUILD_SCRIPT {
      let (name, deploy_env) = select_environment(target, ctx)?;
      env = merge_maps(&env, &deploy_env);
      if let Some(name) = name {
        env.insert("DEPLOY_ENV".to_string(), name);
      }
    }

    let mut deps = spec.deps.clone();
    if script != BUILD_SCRIPT {
      deps.push(target.qn());
    }

    Ok(ExecutionStep {
      target: target.specialize(script, env),
      deps,
      pre: spec.pre.clone(),
      run: spec.run.clone(),
      post: spec.post.clone(),
      transform_out: spec.transform_out.clone(),
      check_cache: spec.check_cache.clone(),
      local: spec.local,
      secret_env: target.secret_env.clone(),
      pass_secret_env: target.pass_secret_env.clone(),
      clean: false,
      cache: None,
    })
  }
}

/// Pick the deployment environment for a step: the `-e` selection, or the
/// single declared environment, or none when the target declares none.
fn select_environment(
  target: &Target,
  ctx: &RuntimeContext,
) -> Result<(Option<String>, BTreeMap<String, String>), StepError> {
  let known: Vec<String> = target.environments.keys().cloned().collect();

  match &ctx.env {
    Some(name) => match target.environments.get(name) {
      Some(environment) => Ok((Some(name.clone()), environment.variables())),
      None => Err(StepError::UnknownEnvironment {
        name: name.clone(),
        known,
      }),
    },
    None => match target.environments.len() {
      0 => Ok((None, BTreeMap::new())),
      1 => {
        let (name, environment) = target
          .environments
          .iter()
          .next()
          .map(|(n, e)| (n.clone(), e.variables()))
          .unwrap_or_default();
        Ok((Some(name), environment))
      }
      _ => Err(StepError::EnvironmentRequired { known }),
    },
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{CacheManager, CacheRoots};
  use crate::config::ProjectConfig;
  use zen_core::target::ScriptSpec;
  use zen_core::Environment;

  fn project(dir: &std::path::Path) -> Project {
    let roots = CacheRoots {
      gen: dir.join("gen"),
      out: dir.join("out"),
      metadata: dir.join("metadata"),
      artifacts: dir.join("artifacts"),
      logs: dir.join("logs"),
    };
    Project {
      name: "p".to_string(),
      config: ProjectConfig {
        path: dir.to_path_buf(),
        parse: Default::default(),
        build: Default::default(),
        environments: BTreeMap::new(),
        cache: roots.clone(),
      },
      cache: CacheManager::local(roots),
      env: [("FROM_PROJECT".to_string(), "1".to_string())].into(),
      secret_env: BTreeMap::new(),
    }
  }

  fn target_with_scripts(scripts: &[&str]) -> Target {
    let mut t = Target::new("t");
    t.set_fqn("p", "pkg");
    t.env.insert("FROM_TARGET".to_string(), "1".to_string());
    for script in scripts {
      let spec = ScriptSpec {
        env: [(format!("FROM_{}", script.to_uppercase()), "1".to_string())].into(),
        ..Default::default()
      };
      t.scripts.insert(script.to_string(), spec);
    }
    t
  }

  #[test]
  fn env_layers_project_target_script() {
    let dir = tempfile::TempDir::new().unwrap();
    let step = ExecutionStep::from_target(
      &project(dir.path()),
      &target_with_scripts(&["build"]),
      "build",
      &RuntimeContext::default(),
    )
    .unwrap();

    assert_eq!(step.target.env["FROM_PROJECT"], "1");
    assert_eq!(step.target.env["FROM_TARGET"], "1");
    assert_eq!(step.target.env["FROM_BUILD"], "1");
    assert_eq!(step.target.script(), "build");
  }

  #[test]
  fn unsupported_script_is_sentinel() {
    let dir = tempfile::TempDir::new().unwrap();
    let result = ExecutionStep::from_target(
      &project(dir.path()),
      &target_with_scripts(&["build"]),
      "deploy",
      &RuntimeContext::default(),
    );
    assert!(matches!(result, Err(StepError::ScriptNotSupported)));
  }

  #[test]
  fn non_build_steps_depend_on_own_build() {
    let dir = tempfile::TempDir::new().unwrap();
    let step = ExecutionStep::from_target(
      &project(dir.path()),
      &target_with_scripts(&["build", "deploy"]),
      "deploy",
      &RuntimeContext::default(),
    )
    .unwrap();
    assert_eq!(step.deps, vec!["//p/pkg:t"]);
  }

  #[test]
  fn single_environment_is_selected_implicitly() {
    let dir = tempfile::TempDir::new().unwrap();
    let mut target = target_with_scripts(&["build", "deploy"]);
    target.environments.insert(
      "dev".to_string(),
      Environment {
        env: [("STAGE".to_string(), "dev".to_string())].into(),
        pass_env: vec![],
      },
    );

    let ctx = RuntimeContext {
      use_environments: true,
      ..Default::default()
    };
    let step = ExecutionStep::from_target(&project(dir.path()), &target, "deploy", &ctx).unwrap();
    assert_eq!(step.target.env["STAGE"], "dev");
    assert_eq!(step.target.env["DEPLOY_ENV"], "dev");
  }

  #[test]
  fn ambiguous_environment_requires_selection() {
    let dir = tempfile::TempDir::new().unwrap();
    let mut target = target_with_scripts(&["build", "deploy"]);
    target.environments.insert("dev".to_string(), Environment::default());
    target.environments.insert("prod".to_string(), Environment::default());

    let ctx = RuntimeContext {
      use_environments: true,
      ..Default::default()
    };
    assert!(matches!(
      ExecutionStep::from_target(&project(dir.path()), &target, "deploy", &ctx),
      Err(StepError::EnvironmentRequired { .. })
    ));
  }

  #[test]
  fn unknown_environment_selection_errors() {
    let dir = tempfile::TempDir::new().unwrap();
    let mut target = target_with_scripts(&["build", "deploy"]);
    target.environments.insert("dev".to_string(), Environment::default());

    let ctx = RuntimeContext {
      use_environments: true,
      env: Some("staging".to_string()),
      ..Default::default()
    };
    assert!(matches!(
      ExecutionStep::from_target(&project(dir.path()), &target, "deploy", &ctx),
      Err(StepError::UnknownEnvironment { .. })
    ));
  }

  #[test]
  fn build_script_ignores_environments() {
    let dir = tempfile::TempDir::new().unwrap();
    let mut target = target_with_scripts(&["build"]);
    target.environments.insert("dev".to_string(), Environment::default());
    target.environments.insert("prod".to_string(), Environment::default());

    let ctx = RuntimeContext {
      use_environments: true,
      ..Default::default()
    };
    assert!(ExecutionStep::from_target(&project(dir.path()), &target, "build", &ctx).is_ok());
  }
}
