//! Cache IO backends.
//!
//! A backend hands out deferred operations: the manager binds
//! `save`/`restore`/`delete`/`check_outputs_exist` to a cache key at
//! load time and the step lifecycle executes them later. The local backend
//! is the default; remote backends (S3, HTTP) implement the same trait out
//! of tree.

use std::path::{Path, PathBuf};

use super::CacheError;

/// A deferred cache operation.
pub type CacheOp = Box<dyn Fn() -> Result<(), CacheError> + Send + Sync>;

/// A deferred existence check.
pub type CacheCheckOp = Box<dyn Fn() -> Result<bool, CacheError> + Send + Sync>;

/// Cache IO capabilities, bound per key (`<pkg>/<name>/<hash>`).
pub trait CacheBackend: Send + Sync {
  /// Persist the packed artifact for `key`.
  fn save(&self, key: &str, artifact: &Path) -> CacheOp;

  /// Fetch the packed artifact for `key` into the local tree.
  fn restore(&self, key: &str) -> CacheOp;

  /// Drop the remote artifact for `key`.
  fn delete(&self, key: &str) -> CacheOp;

  /// Whether materialized outputs for `key` already exist.
  fn check_outputs_exist(&self, key: &str) -> CacheCheckOp;
}

/// The local filesystem backend.
///
/// Outputs already live in the out tree, so `save`/`restore`/`delete` are
/// no-ops; the existence check stats the materialized output directory.
pub struct LocalCacheBackend {
  out_root: PathBuf,
}

impl LocalCacheBackend {
  pub fn new(out_root: PathBuf) -> Self {
    LocalCacheBackend { out_root }
  }
}

impl CacheBackend for LocalCacheBackend {
  fn save(&self, _key: &str, _artifact: &Path) -> CacheOp {
    Box::new(|| Ok(()))
  }

  fn restore(&self, _key: &str) -> CacheOp {
    Box::new(|| Ok(()))
  }

  fn delete(&self, _key: &str) -> CacheOp {
    Box::new(|| Ok(()))
  }

  fn check_outputs_exist(&self, key: &str) -> CacheCheckOp {
    // Outputs materialize at <out>/<pkg>/<name>, without the hash segment
    // the full key carries.
    let key_path = Path::new(key);
    let out_dir = match key_path.parent() {
      Some(parent) => self.out_root.join(parent),
      None => self.out_root.join(key_path),
    };

    Box::new(move || match std::fs::metadata(&out_dir) {
      Ok(_) => Ok(true),
      Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
      Err(err) => Err(CacheError::Io {
        context: format!("checking outputs at {}", out_dir.display()),
        source: err,
      }),
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  #[test]
  fn local_save_restore_delete_are_noops() {
    let dir = TempDir::new().unwrap();
    let backend = LocalCacheBackend::new(dir.path().to_path_buf());

    assert!((backend.save("pkg/t/abc", Path::new("/tmp/a.tar")))().is_ok());
    assert!((backend.restore("pkg/t/abc"))().is_ok());
    assert!((backend.delete("pkg/t/abc"))().is_ok());
  }

  #[test]
  fn check_outputs_exist_drops_hash_segment() {
    let dir = TempDir::new().unwrap();
    let backend = LocalCacheBackend::new(dir.path().to_path_buf());

    let check = backend.check_outputs_exist("pkg/t/abc123");
    assert!(!check().unwrap());

    std::fs::create_dir_all(dir.path().join("pkg/t")).unwrap();
    assert!(check().unwrap());
  }
}
