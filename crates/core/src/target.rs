//! The target model.
//!
//! A [`Target`] is a declared unit of work: sources grouped by category,
//! outputs, and a set of named scripts (`build`, `deploy`, `test`, ...) each
//! carrying its own dependencies, environment and lifecycle hooks. The engine
//! specializes a target to one script per execution step.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::environments::Environment;
use crate::interpolate::{self, InterpolateError};
use crate::BUILD_SCRIPT;

/// Lifecycle hook on a script. Runs with the step's target held exclusively.
pub type StepFn = Arc<dyn Fn(&mut Target, &RuntimeContext) -> Result<(), StepError> + Send + Sync>;

/// Maps a raw output path to its final form; returning `false` drops the
/// output from the mappings.
pub type TransformOutFn = Arc<dyn Fn(&Target, &str) -> (String, bool) + Send + Sync>;

/// Overrides the metadata-file cache check for a script.
pub type CheckCacheFn = Arc<dyn Fn(&Target) -> Result<bool, StepError> + Send + Sync>;

/// Errors surfaced by step hooks and the step lifecycle.
#[derive(Debug, thiserror::Error)]
pub enum StepError {
  /// Control flow sentinel: a pre hook ends the step successfully without
  /// running the remaining stages. Never surfaced as a failure.
  #[error("do not continue")]
  DoNotContinue,

  /// Control flow sentinel: the target does not implement the requested
  /// script. The step factory skips the target silently.
  #[error("script not supported")]
  ScriptNotSupported,

  #[error("command failed with exit code {code:?}: {cmd}")]
  CmdFailed { cmd: String, code: Option<i32> },

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),

  #[error(transparent)]
  Interpolate(#[from] InterpolateError),

  #[error("cache: {0}")]
  Cache(#[source] Box<dyn std::error::Error + Send + Sync>),

  /// A deploy script needs an environment but none could be selected.
  #[error("please provide an environment; known environments are {known:?}")]
  EnvironmentRequired { known: Vec<String> },

  #[error("environment {name:?} not supported; known environments are {known:?}")]
  UnknownEnvironment { name: String, known: Vec<String> },

  /// A lifecycle stage failed; carries the script and stage for reporting.
  #[error("{script} {stage}: {source}")]
  Stage {
    script: String,
    stage: String,
    #[source]
    source: Box<StepError>,
  },

  #[error("{0}")]
  Message(String),
}

impl StepError {
  pub fn stage(script: &str, stage: &str, source: StepError) -> Self {
    StepError::Stage {
      script: script.to_string(),
      stage: stage.to_string(),
      source: Box::new(source),
    }
  }
}

/// Per-invocation flags and variables shared with step hooks.
#[derive(Debug, Clone, Default)]
pub struct RuntimeContext {
  /// Selected deployment environment (`-e <name>`).
  pub env: Option<String>,

  /// Include transitive deps across package boundaries for non-build scripts.
  pub with_deps: bool,

  /// Whether non-build scripts layer a deployment environment onto the step.
  pub use_environments: bool,

  /// CLI-level variables visible to package parsing.
  pub variables: BTreeMap<String, String>,
}

/// One named lifecycle on a target.
#[derive(Clone, Default)]
pub struct ScriptSpec {
  /// Dependencies of this script, as target address strings.
  pub deps: Vec<String>,

  /// Script-level environment, layered over the target environment.
  pub env: BTreeMap<String, String>,

  pub pre: Option<StepFn>,
  pub run: Option<StepFn>,
  pub post: Option<StepFn>,

  /// Rewrites raw output paths during output expansion.
  pub transform_out: Option<TransformOutFn>,

  /// Overrides the metadata-file cache check.
  pub check_cache: Option<CheckCacheFn>,

  /// Marks the script as local-only.
  pub local: bool,
}

impl std::fmt::Debug for ScriptSpec {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ScriptSpec")
      .field("deps", &self.deps)
      .field("env", &self.env)
      .field("pre", &self.pre.as_ref().map(|_| "<fn>"))
      .field("run", &self.run.as_ref().map(|_| "<fn>"))
      .field("post", &self.post.as_ref().map(|_| "<fn>"))
      .field("local", &self.local)
      .finish()
  }
}

/// Errors from target validation.
#[derive(Debug, thiserror::Error)]
pub enum TargetError {
  #[error("target has no name")]
  MissingName,

  #[error("target {0} declares no scripts")]
  NoScripts(String),

  #[error("target {qn} declares output {out:?} more than once")]
  DuplicateOut { qn: String, out: String },

  #[error("target {qn} declares unknown environment {name:?}")]
  UnknownEnvironment { qn: String, name: String },
}

/// A declared unit of work.
#[derive(Debug, Clone, Default)]
pub struct Target {
  pub name: String,
  project: String,
  package: String,

  /// The script this instance is specialized to. `build` until the engine
  /// derives per-script execution steps.
  script: String,

  /// Sources by category. Each spec is a literal path, a glob, or a
  /// `//`-prefixed reference to another target's outputs.
  pub srcs: BTreeMap<String, Vec<String>>,

  /// Declared outputs, relative to the sandbox.
  pub outs: Vec<String>,

  /// Named lifecycles.
  pub scripts: BTreeMap<String, ScriptSpec>,

  pub labels: Vec<String>,
  pub visibility: Vec<String>,

  /// Deployment environments this target supports, resolved against the
  /// project's environment table by [`Target::expand_environments`].
  pub environments: BTreeMap<String, Environment>,

  pub env: BTreeMap<String, String>,
  pub secret_env: BTreeMap<String, String>,
  pub pass_env: Vec<String>,
  pub pass_secret_env: Vec<String>,

  /// Tool references (`name -> //project/pkg:target`), resolved to output
  /// paths before the step runs.
  pub tools: BTreeMap<String, String>,

  /// External targets run in their original source path; no sandbox is
  /// created for them.
  pub external: bool,

  /// Directory of the package file that declared this target.
  original_path: PathBuf,

  /// Working directory, assigned by the runner once the cache is laid out.
  pub cwd: PathBuf,
}

impl Target {
  pub fn new(name: &str) -> Self {
    Target {
      name: name.to_string(),
      script: BUILD_SCRIPT.to_string(),
      ..Default::default()
    }
  }

  pub fn set_fqn(&mut self, project: &str, package: &str) {
    self.project = project.to_string();
    self.package = package.to_string();
  }

  pub fn set_original_path(&mut self, path: &Path) {
    self.original_path = path.to_path_buf();
  }

  pub fn project(&self) -> &str {
    &self.project
  }

  pub fn package(&self) -> &str {
    &self.package
  }

  pub fn script(&self) -> &str {
    &self.script
  }

  /// The directory this target was declared in.
  pub fn path(&self) -> &Path {
    &self.original_path
  }

  /// Qualified name without a script.
  pub fn qn(&self) -> String {
    format!("//{}/{}:{}", self.project, self.package, self.name)
  }

  /// Full address of this instance, including its script.
  pub fn fqn(&self) -> String {
    format!("{}:{}", self.qn(), self.script)
  }

  /// Clone this target specialized to one script, with the step environment
  /// already merged.
  pub fn specialize(&self, script: &str, env: BTreeMap<String, String>) -> Target {
    let mut specialized = self.clone();
    specialized.script = script.to_string();
    specialized.env = env;
    specialized
  }

  /// A target is valid iff it has a non-empty name, at least one script, and
  /// its outputs do not collide inside a single sandbox.
  pub fn ensure_valid(&self) -> Result<(), TargetError> {
    if self.name.is_empty() {
      return Err(TargetError::MissingName);
    }
    if self.scripts.is_empty() {
      return Err(TargetError::NoScripts(self.qn()));
    }

    let mut seen = std::collections::BTreeSet::new();
    for out in &self.outs {
      if !seen.insert(out) {
        return Err(TargetError::DuplicateOut {
          qn: self.qn(),
          out: out.clone(),
        });
      }
    }

    Ok(())
  }

  /// Resolve declared environment names against the project's environment
  /// table. Entries already carrying variables are kept as declared.
  pub fn expand_environments(
    &mut self,
    known: &BTreeMap<String, Environment>,
  ) -> Result<(), TargetError> {
    for (name, environment) in self.environments.iter_mut() {
      if environment.env.is_empty() && environment.pass_env.is_empty() {
        match known.get(name) {
          Some(resolved) => *environment = resolved.clone(),
          None => {
            return Err(TargetError::UnknownEnvironment {
              qn: format!("//{}/{}:{}", self.project, self.package, self.name),
              name: name.clone(),
            })
          }
        }
      }
    }
    Ok(())
  }

  /// Interpolate the target's own fields (sources, outputs, tools, labels)
  /// against its current environment.
  pub fn interpolate_myself(&mut self) -> Result<(), InterpolateError> {
    for specs in self.srcs.values_mut() {
      for spec in specs.iter_mut() {
        *spec = interpolate::interpolate(spec, &self.env)?;
      }
    }
    for out in self.outs.iter_mut() {
      *out = interpolate::interpolate(out, &self.env)?;
    }
    for tool in self.tools.values_mut() {
      *tool = interpolate::interpolate(tool, &self.env)?;
    }
    for label in self.labels.iter_mut() {
      *label = interpolate::interpolate(label, &self.env)?;
    }
    Ok(())
  }

  /// The full process environment for this step: public env layered with
  /// secrets. Secrets never participate in cache hashing.
  pub fn env_list(&self) -> Vec<(String, String)> {
    let mut env: BTreeMap<String, String> = self.env.clone();
    for (k, v) in &self.secret_env {
      env.insert(k.clone(), v.clone());
    }
    env.into_iter().collect()
  }
}

/// True when a source spec names another target's outputs.
pub fn is_target_reference(spec: &str) -> bool {
  spec.starts_with("//")
}
