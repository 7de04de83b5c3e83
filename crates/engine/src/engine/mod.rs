//! The engine: wiring and the parallel graph executor.
//!
//! The engine owns per-project state (config, cache manager, env layers),
//! expands requested targets through the resolver, grows the step graph with
//! the dependency-admission rules, and executes it: ready vertices launch on
//! their own blocking task under a parallelism bound, results funnel through
//! one channel, and the first error stops new work while in-flight steps
//! drain.

pub mod dag;
pub mod errors;
pub mod hooks;
pub mod runner;
pub mod shell;
pub mod step;

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;
use tracing::{debug, info};

use zen_core::environments::merge_environment_maps;
use zen_core::fqn::Fqn;
use zen_core::hash::merge_maps;
use zen_core::target::{RuntimeContext, StepError};
use zen_core::BUILD_SCRIPT;

use crate::cache::CacheManager;
use crate::config::{CliConfig, ConfigError, ProjectConfig};
use crate::parser::frontend::Frontend;
use crate::parser::registry::{TargetConfigContext, TargetFactoryMap};
use crate::parser::resolver::Resolver;
use crate::parser::PackageLoader;

use dag::StepGraph;
pub use errors::{EngineError, GraphError};
pub use step::ExecutionStep;

/// Default worker ceiling for graph execution; `0` means unbounded.
pub const DEFAULT_MAX_PARALLEL: usize = 20;

/// One configured project.
pub struct Project {
  pub name: String,
  pub config: ProjectConfig,
  pub cache: CacheManager,

  /// Public project env; participates in cache hashing.
  pub env: BTreeMap<String, String>,

  /// Secret project env; merged after the cache key is computed.
  pub secret_env: BTreeMap<String, String>,
}

/// A script-level pre or post hook installed by a command.
pub type HookFn = Arc<dyn Fn(&EngineContext, &mut ExecutionStep) -> Result<(), StepError> + Send + Sync>;

#[derive(Clone, Default)]
pub struct RunFnMap {
  pub pre: Option<HookFn>,
  pub post: Option<HookFn>,
}

/// Shared state handed to every step runner.
pub struct EngineContext {
  pub projects: BTreeMap<String, Arc<Project>>,
  pub hooks: BTreeMap<String, RunFnMap>,
  pub ctx: RuntimeContext,
}

/// Flags of one engine invocation.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
  /// Delete the requested targets' caches before running.
  pub clean: bool,

  /// Open an interactive shell in the (single) target's sandbox instead of
  /// its run hook.
  pub shell: bool,
}

struct StepResult {
  fqn: String,
  result: Result<(), StepError>,
}

pub struct Engine {
  projects: BTreeMap<String, Arc<Project>>,
  resolver: Resolver,
  hooks: BTreeMap<String, RunFnMap>,
  ctx: RuntimeContext,
  max_parallel: usize,

  steps: HashMap<String, Arc<Mutex<ExecutionStep>>>,
  graph: StepGraph,
  errors: BTreeMap<String, String>,
}

impl Engine {
  /// Wire up projects, caches and the resolver from the CLI config.
  ///
  /// Env layering: CLI build env (+ forwarded host vars) seeds every
  /// project's public env; the secret env carries PATH and the forwarded
  /// secret host vars and never reaches the cache hash.
  pub fn new(
    cli_config: CliConfig,
    frontend: Arc<dyn Frontend>,
    registry: TargetFactoryMap,
    ctx: RuntimeContext,
  ) -> Result<Self, EngineError> {
    let mut base_env = cli_config.build.env.clone();
    for name in &cli_config.build.pass_env {
      base_env.insert(name.clone(), std::env::var(name).unwrap_or_default());
    }

    let mut base_secret_env = BTreeMap::new();
    base_secret_env.insert("PATH".to_string(), cli_config.secret_path());
    for name in &cli_config.build.pass_secret_env {
      base_secret_env.insert(name.clone(), std::env::var(name).unwrap_or_default());
    }

    let loader = PackageLoader::new(Arc::clone(&frontend));
    let mut resolver = Resolver::new(loader, registry);
    let mut projects = BTreeMap::new();

    for (name, path) in &cli_config.projects {
      let mut config =
        ProjectConfig::load(frontend.as_ref(), path).map_err(|source| ConfigError::Project {
          name: name.clone(),
          source: Box::new(source),
        })?;
      config.environments = merge_environment_maps(&cli_config.environments, &config.environments);

      let mut env = merge_maps(&config.build.env, &base_env);
      for pass in &config.build.pass_env {
        env.insert(pass.clone(), std::env::var(pass).unwrap_or_default());
      }

      let mut secret_env = base_secret_env.clone();
      for pass in &config.build.secret_env {
        secret_env.insert(pass.clone(), std::env::var(pass).unwrap_or_default());
      }

      let mut variables = merge_maps(&ctx.variables, &config.build.variables);
      variables.insert("REPO_ROOT".to_string(), config.path.display().to_string());
      for pass in config.build.pass_env.iter().chain(&config.build.secret_env) {
        variables.insert(pass.clone(), std::env::var(pass).unwrap_or_default());
      }

      resolver.add_project(
        name,
        config.clone(),
        TargetConfigContext {
          variables,
          known_toolchains: config.build.toolchains.clone(),
          environments: config.environments.clone(),
        },
      );

      let cache = CacheManager::local(config.cache.clone());
      projects.insert(
        name.clone(),
        Arc::new(Project {
          name: name.clone(),
          config,
          cache,
          env,
          secret_env,
        }),
      );
    }

    Ok(Engine {
      projects,
      resolver,
      hooks: BTreeMap::new(),
      ctx,
      max_parallel: DEFAULT_MAX_PARALLEL,
      steps: HashMap::new(),
      graph: StepGraph::new(),
      errors: BTreeMap::new(),
    })
  }

  pub fn set_max_parallel(&mut self, max_parallel: usize) {
    self.max_parallel = max_parallel;
  }

  pub fn resolver(&mut self) -> &mut Resolver {
    &mut self.resolver
  }

  /// Install script-level pre/post hooks.
  pub fn register_command_functions(&mut self, fns: BTreeMap<String, RunFnMap>) {
    for (script, hooks) in fns {
      self.hooks.insert(script, hooks);
    }
  }

  /// Remove the gen, metadata and out roots of every project.
  pub fn clean_cache(&self) -> Result<(), EngineError> {
    for project in self.projects.values() {
      info!(project = %project.name, "cleaning cache");
      project.cache.clean()?;
    }
    Ok(())
  }

  /// The top-level entry point: expand the requested targets, grow the step
  /// graph, and execute it.
  pub async fn run(
    &mut self,
    args: &[String],
    default_script: &str,
    opts: &RunOptions,
  ) -> Result<(), EngineError> {
    if opts.shell && args.len() != 1 {
      return Err(EngineError::ShellSingleTarget);
    }

    let expanded = self.resolver.expand_targets(args, default_script)?;
    debug!(targets = expanded.len(), "expanded requested targets");

    self.add_targets_to_graph(&expanded)?;

    if opts.clean {
      self.mark_clean(&expanded)?;
    }
    if opts.shell {
      self.install_shell(&args[0], default_script)?;
    }

    self.run_graph().await
  }

  /// Grow the graph from the requested fqns, following admitted deps.
  fn add_targets_to_graph(&mut self, targets: &[String]) -> Result<(), EngineError> {
    let mut queue: VecDeque<String> = targets.iter().cloned().collect();

    while let Some(fqn_str) = queue.pop_front() {
      if self.graph.has_vertex(&fqn_str) {
        continue;
      }

      let fqn = Fqn::parse(&fqn_str)?;
      let step_fqns = self.resolve_execution_steps(&fqn)?;

      for step_fqn in step_fqns {
        if !self.graph.add_vertex(&step_fqn) {
          continue;
        }

        for dep in self.deps_to_add(&step_fqn, &queue)? {
          self.graph.add_edge(&dep, &step_fqn);
          queue.push_back(dep);
        }
      }
    }

    Ok(())
  }

  /// Resolve the execution steps an fqn addresses and intern them.
  ///
  /// Every target contributes its build step plus, for non-build scripts,
  /// the script step. Targets that do not support the requested script are
  /// skipped silently.
  fn resolve_execution_steps(&mut self, fqn: &Fqn) -> Result<Vec<String>, EngineError> {
    let targets = self.resolver.targets_for(fqn)?;
    let Some(project) = self.projects.get(fqn.project()).cloned() else {
      return Err(EngineError::Step(StepError::Message(format!(
        "project {} not configured",
        fqn.project()
      ))));
    };

    let mut scripts = vec![BUILD_SCRIPT.to_string()];
    if fqn.script() != BUILD_SCRIPT {
      scripts.push(fqn.script().to_string());
    }

    let mut resolved = Vec::new();
    for target in &targets {
      for script in &scripts {
        let key = format!("{}:{}", target.qn(), script);
        if self.steps.contains_key(&key) {
          if !resolved.contains(&key) {
            resolved.push(key);
          }
          continue;
        }

        match ExecutionStep::from_target(&project, target, script, &self.ctx) {
          Ok(step) => {
            self.steps.insert(key.clone(), Arc::new(Mutex::new(step)));
            resolved.push(key);
          }
          Err(StepError::ScriptNotSupported) => continue,
          Err(err) => return Err(EngineError::Step(err)),
        }
      }
    }

    Ok(resolved)
  }

  /// The deps of a step that get edges in the graph.
  ///
  /// A dep is admitted iff the current script is `build`, the dep lives in
  /// the same `(project, package)`, its vertex is already present, it is
  /// still pending in the input list, or `--with-deps` was passed.
  fn deps_to_add(&mut self, step_fqn: &str, pending: &VecDeque<String>) -> Result<Vec<String>, EngineError> {
    let (deps, script, project, package) = {
      let Some(step) = self.steps.get(step_fqn) else {
        return Ok(Vec::new());
      };
      let guard = step.lock().unwrap_or_else(PoisonError::into_inner);
      (
        guard.deps.clone(),
        guard.target.script().to_string(),
        guard.target.project().to_string(),
        guard.target.package().to_string(),
      )
    };

    let mut candidates = Vec::new();
    for dep in deps {
      let dep_fqn = Fqn::parse(&dep)?;

      for dep_step in self.resolve_execution_steps(&dep_fqn)? {
        let resolved = Fqn::parse(&dep_step)?;
        let candidate = format!("{}:{}", resolved.qn(), dep_fqn.script());
        if !candidates.contains(&candidate) {
          candidates.push(candidate);
        }
      }
    }

    let mut admitted = Vec::new();
    for candidate in candidates {
      let cand_fqn = Fqn::parse(&candidate)?;
      let same_package = cand_fqn.project() == project && cand_fqn.package() == package;

      if script == BUILD_SCRIPT
        || same_package
        || self.graph.has_vertex(&candidate)
        || pending.contains(&candidate)
        || self.ctx.with_deps
      {
        admitted.push(candidate);
      }
    }

    Ok(admitted)
  }

  /// Mark the requested steps for cache deletion before they run.
  fn mark_clean(&mut self, expanded: &[String]) -> Result<(), EngineError> {
    for fqn_str in expanded {
      let fqn = Fqn::parse(fqn_str)?;

      let mut scripts = vec![BUILD_SCRIPT.to_string()];
      if fqn.script() != BUILD_SCRIPT {
        scripts.push(fqn.script().to_string());
      }

      for script in scripts {
        let key = format!("{}:{}", fqn.qn(), script);
        if let Some(step) = self.steps.get(&key) {
          let mut guard = step.lock().unwrap_or_else(PoisonError::into_inner);
          guard.clean = true;
          guard
            .secret_env
            .insert("ZEN_OPT_CLEAN".to_string(), "true".to_string());
        }
      }
    }
    Ok(())
  }

  /// Swap the single requested step's run hook for an interactive shell.
  fn install_shell(&mut self, arg: &str, default_script: &str) -> Result<(), EngineError> {
    let fqn = Fqn::parse_with_default(arg, default_script)?;
    let key = fqn.fqn();

    let Some(step) = self.steps.get(&key) else {
      return Err(EngineError::Step(StepError::Message(format!(
        "{key} is not a step in the graph"
      ))));
    };

    let mut guard = step.lock().unwrap_or_else(PoisonError::into_inner);
    guard.run = Some(shell::interactive_shell_run());
    Ok(())
  }

  /// Execute the graph in parallel topological order.
  async fn run_graph(&mut self) -> Result<(), EngineError> {
    self.graph.finalize()?;
    if self.graph.is_empty() {
      return Ok(());
    }

    let total = self.graph.len();
    info!(steps = total, max_parallel = self.max_parallel, "executing graph");

    let ectx = Arc::new(EngineContext {
      projects: self.projects.clone(),
      hooks: self.hooks.clone(),
      ctx: self.ctx.clone(),
    });
    let (tx, mut rx) = mpsc::channel::<StepResult>(total);

    let mut deps = self.graph.in_degrees();
    let mut run_queue: Vec<String> = self
      .graph
      .vertices()
      .into_iter()
      .filter(|vertex| deps[vertex] == 0)
      .collect();

    let mut running = 0usize;
    let mut done = 0usize;

    while done < total {
      let mut deferred = Vec::new();
      for fqn in run_queue.drain(..) {
        if self.max_parallel == 0 || running < self.max_parallel {
          running += 1;
          self.spawn_step(&fqn, Arc::clone(&ectx), tx.clone());
        } else {
          deferred.push(fqn);
        }
      }

      let Some(result) = rx.recv().await else {
        break;
      };
      running -= 1;
      done += 1;

      match result.result {
        Err(err) => {
          debug!(fqn = %result.fqn, "finished with error");
          self.errors.insert(result.fqn, err.to_string());
          // Stop enqueueing; in-flight steps drain below.
          break;
        }
        Ok(()) => {
          debug!(fqn = %result.fqn, "finished");
          for successor in self.graph.successors(&result.fqn) {
            if let Some(remaining) = deps.get_mut(&successor) {
              *remaining -= 1;
              if *remaining == 0 {
                deferred.push(successor);
              }
            }
          }
        }
      }

      run_queue = deferred;
    }

    while running > 0 {
      if rx.recv().await.is_none() {
        break;
      }
      running -= 1;
    }

    if self.errors.is_empty() {
      Ok(())
    } else {
      Err(EngineError::GraphExec {
        errors: std::mem::take(&mut self.errors),
      })
    }
  }

  fn spawn_step(&self, fqn: &str, ectx: Arc<EngineContext>, tx: mpsc::Sender<StepResult>) {
    let fqn = fqn.to_string();
    let Some(step) = self.steps.get(&fqn).cloned() else {
      let result = Err(StepError::Message(format!("{fqn} has no execution step")));
      let _ = tx.try_send(StepResult { fqn, result });
      return;
    };

    tokio::task::spawn_blocking(move || {
      let result = {
        let mut guard = step.lock().unwrap_or_else(PoisonError::into_inner);
        runner::run_step(&ectx, &mut guard)
      };
      let _ = tx.blocking_send(StepResult { fqn, result });
    });
  }
}
