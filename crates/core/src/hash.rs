//! File hashing and path globbing.
//!
//! Cache keys are folded over maps of file hashes. Every map involved in
//! hashing is a `BTreeMap`, so iteration is always in sorted key order and
//! the resulting digests are reproducible across runs and machines.

use std::collections::BTreeMap;
use std::io::Read;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

/// Errors from hashing or globbing the filesystem.
#[derive(Debug, thiserror::Error)]
pub enum HashError {
  #[error("hashing {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("invalid glob pattern {pattern:?}: {source}")]
  Pattern {
    pattern: String,
    #[source]
    source: globset::Error,
  },

  #[error("walking {path}: {source}")]
  Walk {
    path: PathBuf,
    #[source]
    source: walkdir::Error,
  },
}

/// SHA-256 of the file contents as a lowercase hex string.
pub fn file_hash(path: &Path) -> Result<String, HashError> {
  let mut file = std::fs::File::open(path).map_err(|source| HashError::Io {
    path: path.to_path_buf(),
    source,
  })?;

  let mut hasher = Sha256::new();
  let mut buffer = [0u8; 64 * 1024];
  loop {
    let read = file.read(&mut buffer).map_err(|source| HashError::Io {
      path: path.to_path_buf(),
      source,
    })?;
    if read == 0 {
      break;
    }
    hasher.update(&buffer[..read]);
  }

  Ok(format!("{:x}", hasher.finalize()))
}

/// Glob for files under `root`.
///
/// Supports shell-style `*` and `**`. Returns a map from logical name (the
/// path relative to `root`) to the absolute path of each matched file. A
/// pattern that matches nothing yields an empty map, not an error; so does a
/// missing `root`.
pub fn glob(root: &Path, pattern: &str) -> Result<BTreeMap<String, PathBuf>, HashError> {
  // `*` stays within a path component; `**` crosses directories.
  let matcher = globset::GlobBuilder::new(pattern)
    .literal_separator(true)
    .build()
    .map_err(|source| HashError::Pattern {
      pattern: pattern.to_string(),
      source,
    })?
    .compile_matcher();

  let mut matches = BTreeMap::new();
  if !root.exists() {
    return Ok(matches);
  }

  for entry in walkdir::WalkDir::new(root) {
    let entry = entry.map_err(|source| HashError::Walk {
      path: root.to_path_buf(),
      source,
    })?;
    if !entry.file_type().is_file() {
      continue;
    }

    let rel = entry
      .path()
      .strip_prefix(root)
      .unwrap_or(entry.path())
      .to_string_lossy()
      .to_string();
    if matcher.is_match(&rel) {
      matches.insert(rel, entry.path().to_path_buf());
    }
  }

  Ok(matches)
}

/// True when a source or output spec contains glob metacharacters.
pub fn is_glob(spec: &str) -> bool {
  spec.contains('*')
}

/// Right-biased merge of two maps.
pub fn merge_maps<K: Ord + Clone, V: Clone>(a: &BTreeMap<K, V>, b: &BTreeMap<K, V>) -> BTreeMap<K, V> {
  let mut merged = a.clone();
  for (k, v) in b {
    merged.insert(k.clone(), v.clone());
  }
  merged
}
