//! Per-target cache items.
//!
//! A [`CacheItem`] owns the on-disk layout for one `(target, script)` pair:
//! the sandbox where sources are staged and the build runs, the materialized
//! output directory, the metadata marker whose presence means "built at this
//! hash", and the packed artifact. Backend IO is bound as deferred
//! operations at load time.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use sha2::{Digest, Sha256};
use tracing::trace;

use zen_core::hash;
use zen_core::target::{Target, TransformOutFn};

use super::backend::{CacheCheckOp, CacheOp};
use super::{archive, CacheError};

/// Transitive source hashes: category -> logical name -> content hash.
pub type SrcHashes = BTreeMap<String, BTreeMap<String, String>>;

/// Resolved path mappings of a cache item.
#[derive(Debug, Clone, Default)]
pub struct CacheItemMappings {
  /// category -> logical src name -> resolved absolute source path.
  pub srcs: BTreeMap<String, BTreeMap<String, PathBuf>>,

  /// logical out path -> absolute in-sandbox path where it is produced.
  pub outs: BTreeMap<String, PathBuf>,
}

pub struct CacheItem {
  pub(crate) qn: String,
  pub(crate) script: String,
  pub(crate) external: bool,
  pub(crate) original_path: PathBuf,

  /// Lowercase hex SHA-256 over the canonical encoding of transitive source
  /// hashes, env, labels and environment names.
  pub(crate) hash: String,

  /// Sandbox directory (`<gen>/<pkg>/<name>/<hash>`); `None` for external
  /// targets, which run in their original source path.
  pub(crate) cache_path: Option<PathBuf>,

  /// Materialized output directory (`<out>/<pkg>/<name>`).
  pub(crate) out_dest: Option<PathBuf>,

  pub(crate) metadata_path: PathBuf,
  pub(crate) artifact_path: Option<PathBuf>,

  pub(crate) mappings: Mutex<CacheItemMappings>,

  pub(crate) save_op: CacheOp,
  pub(crate) restore_op: CacheOp,
  pub(crate) delete_op: CacheOp,
  pub(crate) check_outputs_op: CacheCheckOp,
}

impl std::fmt::Debug for CacheItem {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("CacheItem")
      .field("qn", &self.qn)
      .field("script", &self.script)
      .field("hash", &self.hash)
      .field("external", &self.external)
      .field("cache_path", &self.cache_path)
      .field("out_dest", &self.out_dest)
      .field("metadata_path", &self.metadata_path)
      .finish()
  }
}

impl CacheItem {
  pub fn hash(&self) -> &str {
    &self.hash
  }

  pub fn script(&self) -> &str {
    &self.script
  }

  pub fn metadata_path(&self) -> &Path {
    &self.metadata_path
  }

  pub fn artifact_path(&self) -> Option<&Path> {
    self.artifact_path.as_deref()
  }

  /// The sandbox this step runs in: the original target path for external
  /// targets, else the per-hash cache directory.
  pub fn build_cache_path(&self) -> PathBuf {
    match &self.cache_path {
      Some(path) if !self.external => path.clone(),
      _ => self.original_path.clone(),
    }
  }

  /// Where outputs materialize: the original target path when no out
  /// destination is configured.
  pub fn build_out_path(&self) -> PathBuf {
    match &self.out_dest {
      Some(path) => path.clone(),
      None => self.original_path.clone(),
    }
  }

  /// A snapshot of the current output mappings.
  pub fn outs_mapping(&self) -> BTreeMap<String, PathBuf> {
    self.lock_mappings().outs.clone()
  }

  /// True iff the metadata marker for this hash exists.
  pub fn check_cache_hits(&self) -> bool {
    self.metadata_path.exists()
  }

  /// Write the metadata marker. The payload is an empty JSON document;
  /// existence is the signal.
  pub fn save_metadata(&self) -> Result<(), CacheError> {
    if let Some(parent) = self.metadata_path.parent() {
      std::fs::create_dir_all(parent).map_err(|source| CacheError::Io {
        context: "creating metadata folder".to_string(),
        source,
      })?;
    }

    let empty = serde_json::Map::new();
    let data = serde_json::to_vec(&empty).map_err(|source| CacheError::Encode {
      context: "encoding metadata".to_string(),
      source,
    })?;
    std::fs::write(&self.metadata_path, data).map_err(|source| CacheError::Io {
      context: format!("writing metadata {}", self.metadata_path.display()),
      source,
    })
  }

  /// Remove metadata dir, sandbox dir (unless external) and out dir, in that
  /// order.
  pub fn delete_cache(&self) -> Result<(), CacheError> {
    if let Some(metadata_dir) = self.metadata_path.parent() {
      remove_tree(metadata_dir, "clean metadata")?;
    }

    if !self.external {
      if let Some(cache_path) = &self.cache_path {
        remove_tree(cache_path, "clean build")?;
      }
    }

    if let Some(out_dest) = &self.out_dest {
      remove_tree(out_dest, "clean outs")?;
    }

    Ok(())
  }

  /// Check that every output spec is present under the out tree. Globs
  /// accept any match; literal paths are stat'ed. Returns false on the first
  /// missing output.
  pub fn verify_outputs(&self, outs: &[String]) -> Result<bool, CacheError> {
    let out_root = self.build_out_path();

    for out in outs {
      if hash::is_glob(out) {
        if hash::glob(&out_root, out)?.is_empty() {
          return Ok(false);
        }
        continue;
      }

      let path = if Path::new(out).is_absolute() {
        PathBuf::from(out)
      } else {
        out_root.join(out)
      };
      match std::fs::metadata(&path) {
        Ok(_) => {}
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(source) => {
          return Err(CacheError::Io {
            context: format!("checking output {}", path.display()),
            source,
          })
        }
      }
    }

    Ok(true)
  }

  /// Stage every mapped source into the sandbox.
  pub fn copy_srcs_to_cache(&self) -> Result<(), CacheError> {
    if self.external || self.cache_path.is_none() {
      return Ok(());
    }

    let sandbox = self.build_cache_path();
    let mappings = self.lock_mappings();
    for src_map in mappings.srcs.values() {
      for (src_name, src_path) in src_map {
        let to = sandbox.join(src_name);
        trace!(from = %src_path.display(), to = %to.display(), "staging src into cache");
        zen_core::fs::copy_recursive(src_path, &to).map_err(|source| CacheError::Io {
          context: format!("copying src {} to cache", src_path.display()),
          source,
        })?;
      }
    }

    Ok(())
  }

  /// Materialize outputs: recreate the out dir, then copy each mapped output
  /// from its sandbox path into `<out_dest>/<logical>`.
  pub fn copy_outs_into_out(&self) -> Result<(), CacheError> {
    let out_root = self.build_out_path();
    if self.out_dest.is_some() {
      remove_tree(&out_root, "removing preexisting out dir")?;
    }
    std::fs::create_dir_all(&out_root).map_err(|source| CacheError::Io {
      context: "creating out dir".to_string(),
      source,
    })?;

    if self.out_dest.is_none() {
      return Ok(());
    }

    let mappings = self.lock_mappings();
    for (logical, from) in &mappings.outs {
      let to = out_root.join(logical);
      if let Some(parent) = to.parent() {
        std::fs::create_dir_all(parent).map_err(|source| CacheError::Io {
          context: "creating directory for output".to_string(),
          source,
        })?;
      }

      trace!(from = %from.display(), to = %to.display(), "materializing out");
      zen_core::fs::copy_recursive(from, &to).map_err(|source| match source.kind() {
        std::io::ErrorKind::NotFound => CacheError::MissingOut {
          out: logical.clone(),
          path: from.clone(),
        },
        _ => CacheError::Io {
          context: format!("copying out {logical}"),
          source,
        },
      })?;
    }

    Ok(())
  }

  /// Copy each materialized output back to the original target path. Used by
  /// targets that persist outputs into the source tree.
  pub fn export_outs_to_path(&self) -> Result<(), CacheError> {
    let out_root = self.build_out_path();
    let mappings = self.lock_mappings();

    for logical in mappings.outs.keys() {
      let from = out_root.join(logical);
      let to = self.original_path.join(logical);

      zen_core::fs::copy_recursive(&from, &to).map_err(|source| match source.kind() {
        std::io::ErrorKind::NotFound => CacheError::MissingOut {
          out: logical.clone(),
          path: from.clone(),
        },
        _ => CacheError::Io {
          context: format!("exporting out {logical}"),
          source,
        },
      })?;
    }

    Ok(())
  }

  /// Expand declared output specs against the sandbox.
  ///
  /// Globs populate the mappings from matching sandbox files; literal specs
  /// map to `<cache_path>/<spec>`. Each entry runs through the script's
  /// `transform_out`; entries it rejects are dropped. The target's out list
  /// is replaced by the final expected output paths under the out dir.
  pub fn expand_outs(
    &self,
    target: &mut Target,
    outs: &[String],
    transform: Option<&TransformOutFn>,
  ) -> Result<(), CacheError> {
    let sandbox = self.build_cache_path();
    let out_root = self.build_out_path();
    let apply = |raw: &str, target: &Target| -> (String, bool) {
      match transform {
        Some(f) => f(target, raw),
        None => (raw.to_string(), true),
      }
    };

    let mut expanded = Vec::new();
    let mut mappings = self.lock_mappings();

    for out in outs {
      if hash::is_glob(out) {
        for (logical, path) in hash::glob(&sandbox, out)? {
          let (transformed, keep) = apply(&path.display().to_string(), target);
          if keep {
            mappings.outs.insert(logical.clone(), PathBuf::from(transformed));
            expanded.push(out_root.join(&logical).display().to_string());
          }
        }
      } else {
        let (transformed, keep) = apply(out, target);
        if keep {
          mappings.outs.insert(out.clone(), sandbox.join(&transformed));
          expanded.push(out_root.join(out).display().to_string());
        }
      }
    }

    target.outs = expanded;
    Ok(())
  }

  /// Rewrite the target's sources to their staged sandbox paths.
  pub fn expand_srcs(&self, target: &mut Target) {
    let sandbox = self.build_cache_path();
    let mappings = self.lock_mappings();

    let mut expanded = BTreeMap::new();
    for (category, srcs) in &mappings.srcs {
      let paths: Vec<String> = srcs
        .keys()
        .map(|logical| sandbox.join(logical).display().to_string())
        .collect();
      expanded.insert(category.clone(), paths);
    }

    target.srcs = expanded;
  }

  /// Fold transitive source hashes, the target env, labels and environment
  /// names into the cache key. All maps iterate in sorted key order, so the
  /// digest is reproducible.
  pub fn calculate_hash(target: &Target, src_hashes: &SrcHashes) -> String {
    let mut hasher = Sha256::new();

    for (category, hashes) in src_hashes {
      hasher.update(category.as_bytes());
      for (logical, content_hash) in hashes {
        hasher.update(logical.as_bytes());
        hasher.update(content_hash.as_bytes());
      }
    }

    for (key, value) in &target.env {
      hasher.update(key.as_bytes());
      hasher.update(value.as_bytes());
    }

    for label in &target.labels {
      hasher.update(label.as_bytes());
    }

    for environment in target.environments.keys() {
      hasher.update(environment.as_bytes());
    }

    format!("{:x}", hasher.finalize())
  }

  /// Pack the materialized out tree into `out_tar`.
  pub fn compress(&self, out_tar: &Path) -> Result<(), CacheError> {
    archive::pack_dir(&self.build_out_path(), out_tar)
  }

  /// Unpack `in_tar` into the out tree.
  pub fn decompress(&self, in_tar: &Path) -> Result<(), CacheError> {
    archive::unpack_dir(in_tar, &self.build_out_path())
  }

  /// Execute the backend-bound save operation.
  pub fn save(&self) -> Result<(), CacheError> {
    (self.save_op)()
  }

  /// Execute the backend-bound restore operation.
  pub fn restore(&self) -> Result<(), CacheError> {
    (self.restore_op)()
  }

  /// Execute the backend-bound delete operation.
  pub fn delete(&self) -> Result<(), CacheError> {
    (self.delete_op)()
  }

  /// Execute the backend-bound output existence check.
  pub fn check_outputs_exist(&self) -> Result<bool, CacheError> {
    (self.check_outputs_op)()
  }

  pub(crate) fn lock_mappings(&self) -> std::sync::MutexGuard<'_, CacheItemMappings> {
    self.mappings.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
  }
}

fn remove_tree(path: &Path, context: &str) -> Result<(), CacheError> {
  match std::fs::remove_dir_all(path) {
    Ok(()) => Ok(()),
    Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
    Err(source) => Err(CacheError::Io {
      context: context.to_string(),
      source,
    }),
  }
}
