//! The content-addressed cache.
//!
//! [`CacheManager`] interns one [`CacheItem`] per `(target, script)` pair and
//! resolves target-to-outputs and target-to-hash queries for dependents.
//! Interning is a concurrent get-or-create: two concurrent loads for the
//! same target collapse to one initialization and return the same instance.
//!
//! # Layout (per project, under `<project>/.zen/`)
//!
//! ```text
//! cache/<pkg>/<name>/<hash>/      # sandbox: staged sources + produced outputs
//! out/<pkg>/<name>/               # materialized outputs (hash-free)
//! metadata/<pkg>/<name>/<hash>.json   # presence = "built at this hash"
//! artifacts/<pkg>/<name>/<hash>.tar   # tar+zstd bundle for the IO backend
//! logs/                           # reserved for task logs
//! ```

pub mod archive;
pub mod backend;
pub mod item;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use once_cell::sync::OnceCell;
use tracing::debug;

use zen_core::fqn::{Fqn, FqnError};
use zen_core::hash;
use zen_core::target::{is_target_reference, Target};
use zen_core::BUILD_SCRIPT;

use backend::{CacheBackend, CacheOp};
use item::{CacheItem, CacheItemMappings, SrcHashes};

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
  #[error(transparent)]
  Hash(#[from] zen_core::hash::HashError),

  #[error("{context}: {source}")]
  Io {
    context: String,
    #[source]
    source: std::io::Error,
  },

  #[error("walking {path}: {source}")]
  Walk {
    path: PathBuf,
    #[source]
    source: walkdir::Error,
  },

  #[error("{context}: {source}")]
  Encode {
    context: String,
    #[source]
    source: serde_json::Error,
  },

  #[error("{0} not found in cache")]
  NotInCache(String),

  #[error("cache for target {0} not initialized")]
  NotInitialized(String),

  #[error("source reference {spec:?} is not a valid target address: {source}")]
  InvalidReference {
    spec: String,
    #[source]
    source: FqnError,
  },

  #[error("out {out} does not exist at {path}")]
  MissingOut { out: String, path: PathBuf },
}

/// On-disk roots of one project's cache state.
#[derive(Debug, Clone)]
pub struct CacheRoots {
  /// Sandbox root (`cache/` under the project state dir).
  pub gen: PathBuf,
  pub out: PathBuf,
  pub metadata: PathBuf,
  pub artifacts: PathBuf,
  pub logs: PathBuf,
}

/// Registry of cache items for one project.
pub struct CacheManager {
  roots: CacheRoots,
  backend: Arc<dyn CacheBackend>,
  items: DashMap<String, Arc<OnceCell<Arc<CacheItem>>>>,
}

impl CacheManager {
  pub fn new(roots: CacheRoots, backend: Arc<dyn CacheBackend>) -> Self {
    CacheManager {
      roots,
      backend,
      items: DashMap::new(),
    }
  }

  /// A manager with the default local backend.
  pub fn local(roots: CacheRoots) -> Self {
    let backend = Arc::new(backend::LocalCacheBackend::new(roots.out.clone()));
    Self::new(roots, backend)
  }

  pub fn roots(&self) -> &CacheRoots {
    &self.roots
  }

  /// Get or create the `:build` cache item for a target.
  ///
  /// On create: lay out the sandbox from config, resolve and hash the
  /// target's sources, compute the cache key, rewrite the target's sources
  /// to their sandbox paths, and bind the backend operations under
  /// `<pkg>/<name>/<hash>`.
  pub fn load_target_cache(
    &self,
    target: &mut Target,
    external: bool,
    base_path: &Path,
  ) -> Result<Arc<CacheItem>, CacheError> {
    let key = format!("{}:{}", target.qn(), BUILD_SCRIPT);
    let cell = Arc::clone(&*self.items.entry(key).or_default());

    let item = cell.get_or_try_init(|| self.init_build_item(target, external, base_path))?;
    Ok(Arc::clone(item))
  }

  fn init_build_item(
    &self,
    target: &mut Target,
    external: bool,
    base_path: &Path,
  ) -> Result<Arc<CacheItem>, CacheError> {
    let external = external || target.external;
    let pkg_path = format!("{}/{}", target.package(), target.name);

    let (src_mappings, src_hashes) = self.map_target_srcs(target, base_path)?;
    let hash = CacheItem::calculate_hash(target, &src_hashes);
    debug!(qn = %target.qn(), %hash, "computed target cache key");

    let (cache_path, out_dest, artifact_path) = if external {
      (None, None, None)
    } else {
      (
        Some(self.roots.gen.join(&pkg_path).join(&hash)),
        Some(self.roots.out.join(&pkg_path)),
        Some(self.roots.artifacts.join(&pkg_path).join(format!("{hash}.tar"))),
      )
    };
    let metadata_path = self.roots.metadata.join(&pkg_path).join(format!("{hash}.json"));

    let backend_key = format!("{pkg_path}/{hash}");
    let save_op: CacheOp = match &artifact_path {
      Some(artifact) => self.backend.save(&backend_key, artifact),
      None => Box::new(|| Ok(())),
    };

    let item = CacheItem {
      qn: target.qn(),
      script: BUILD_SCRIPT.to_string(),
      external,
      original_path: target.path().to_path_buf(),
      hash,
      cache_path,
      out_dest,
      metadata_path,
      artifact_path,
      mappings: Mutex::new(CacheItemMappings {
        srcs: src_mappings,
        outs: BTreeMap::new(),
      }),
      save_op,
      restore_op: self.backend.restore(&backend_key),
      delete_op: self.backend.delete(&backend_key),
      check_outputs_op: self.backend.check_outputs_exist(&backend_key),
    };

    item.expand_srcs(target);
    Ok(Arc::new(item))
  }

  /// Derive the cache item for a non-`build` script step.
  ///
  /// The script item's sandbox is the build step's out destination and its
  /// sources are the build step's outputs; the build step must have been
  /// loaded already.
  pub fn to_script_cache(&self, target: &mut Target) -> Result<Arc<CacheItem>, CacheError> {
    let script = target.script().to_string();
    let build_key = format!("{}:{}", target.qn(), BUILD_SCRIPT);
    let build_item = self.loaded_item(&build_key)?;

    let key = format!("{}:{}", target.qn(), script);
    let cell = Arc::clone(&*self.items.entry(key).or_default());

    let item = cell.get_or_try_init(|| {
      let pkg_path = format!("{}/{}", target.package(), target.name);
      let hash = build_item.hash().to_string();
      let backend_key = format!("{pkg_path}/{hash}");

      let mut srcs = BTreeMap::new();
      srcs.insert("outs".to_string(), build_item.outs_mapping());

      Ok::<_, CacheError>(Arc::new(CacheItem {
        qn: target.qn(),
        script: script.clone(),
        external: build_item.external,
        original_path: target.path().to_path_buf(),
        hash: hash.clone(),
        cache_path: Some(build_item.build_out_path()),
        out_dest: None,
        metadata_path: self
          .roots
          .metadata
          .join(&pkg_path)
          .join(format!("{hash}.{script}.json")),
        artifact_path: None,
        mappings: Mutex::new(CacheItemMappings {
          srcs,
          outs: BTreeMap::new(),
        }),
        save_op: Box::new(|| Ok(())),
        restore_op: self.backend.restore(&backend_key),
        delete_op: self.backend.delete(&backend_key),
        check_outputs_op: self.backend.check_outputs_exist(&backend_key),
      }))
    })?;

    item.expand_srcs(target);
    Ok(Arc::clone(item))
  }

  /// The cache key of a loaded step (`<qn>:<script>`).
  pub fn target_hash(&self, step_qn: &str) -> Result<String, CacheError> {
    let item = self.loaded_item(step_qn)?;
    if item.hash().is_empty() {
      return Err(CacheError::NotInitialized(step_qn.to_string()));
    }
    Ok(item.hash().to_string())
  }

  /// The output mappings of a loaded step (`<qn>:<script>`).
  pub fn target_outs(&self, step_qn: &str) -> Result<BTreeMap<String, PathBuf>, CacheError> {
    Ok(self.loaded_item(step_qn)?.outs_mapping())
  }

  fn loaded_item(&self, step_qn: &str) -> Result<Arc<CacheItem>, CacheError> {
    let Some(cell) = self.items.get(step_qn) else {
      return Err(CacheError::NotInCache(step_qn.to_string()));
    };
    cell
      .get()
      .cloned()
      .ok_or_else(|| CacheError::NotInitialized(step_qn.to_string()))
  }

  /// Resolve each source spec of the target and hash it.
  ///
  /// Target references pull the referenced step's output mappings and record
  /// its hash; globs resolve under `base` and hash every matched file;
  /// literal paths join `base` and hash the file. The target's sources are
  /// rewritten to the resolved absolute paths.
  fn map_target_srcs(
    &self,
    target: &mut Target,
    base: &Path,
  ) -> Result<(BTreeMap<String, BTreeMap<String, PathBuf>>, SrcHashes), CacheError> {
    let mut mappings: BTreeMap<String, BTreeMap<String, PathBuf>> = BTreeMap::new();
    let mut hashes = SrcHashes::new();
    let mut expanded: BTreeMap<String, Vec<String>> = BTreeMap::new();

    for (category, specs) in &target.srcs {
      let cat_mappings = mappings.entry(category.clone()).or_default();
      let cat_hashes = hashes.entry(category.clone()).or_default();
      let cat_expanded = expanded.entry(category.clone()).or_default();

      for spec in specs {
        if is_target_reference(spec) {
          let fqn = Fqn::parse(spec).map_err(|source| CacheError::InvalidReference {
            spec: spec.clone(),
            source,
          })?;
          let step_key = format!("{}:{}", fqn.qn(), fqn.script());

          for (logical, path) in self.target_outs(&step_key)? {
            cat_expanded.push(path.display().to_string());
            cat_mappings.insert(logical, path);
          }
          cat_hashes.insert(spec.clone(), self.target_hash(&step_key)?);
        } else if hash::is_glob(spec) {
          for (logical, path) in hash::glob(base, spec)? {
            cat_expanded.push(path.display().to_string());
            cat_hashes.insert(logical.clone(), hash::file_hash(&path)?);
            cat_mappings.insert(logical, path);
          }
        } else {
          let fullpath = if Path::new(spec).is_absolute() {
            PathBuf::from(spec)
          } else {
            base.join(spec)
          };

          cat_expanded.push(fullpath.display().to_string());
          cat_hashes.insert(spec.clone(), hash::file_hash(&fullpath)?);
          cat_mappings.insert(spec.clone(), fullpath);
        }
      }
    }

    target.srcs = expanded;
    Ok((mappings, hashes))
  }

  /// Remove the gen, metadata and out roots of this project.
  pub fn clean(&self) -> Result<(), CacheError> {
    for root in [&self.roots.gen, &self.roots.metadata, &self.roots.out] {
      match std::fs::remove_dir_all(root) {
        Ok(()) => {}
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(source) => {
          return Err(CacheError::Io {
            context: format!("cleaning {}", root.display()),
            source,
          })
        }
      }
    }
    Ok(())
  }
}
