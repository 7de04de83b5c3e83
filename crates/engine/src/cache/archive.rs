//! Artifact packing: tar + zstd over a directory tree.
//!
//! Only regular files are archived; entry names are paths relative to the
//! packed root and file modes survive the round trip.

use std::path::Path;

use super::CacheError;

/// Pack the regular files under `src_dir` into a zstd-compressed tar at
/// `out_tar`.
pub fn pack_dir(src_dir: &Path, out_tar: &Path) -> Result<(), CacheError> {
  let io_err = |context: &str, source: std::io::Error| CacheError::Io {
    context: context.to_string(),
    source,
  };

  if let Some(parent) = out_tar.parent() {
    std::fs::create_dir_all(parent).map_err(|e| io_err("creating artifact dir", e))?;
  }
  let out_file =
    std::fs::File::create(out_tar).map_err(|e| io_err(&format!("creating {}", out_tar.display()), e))?;
  let encoder = zstd::stream::Encoder::new(out_file, 0).map_err(|e| io_err("starting zstd stream", e))?;
  let mut builder = tar::Builder::new(encoder);

  for entry in walkdir::WalkDir::new(src_dir) {
    let entry = entry.map_err(|source| CacheError::Walk {
      path: src_dir.to_path_buf(),
      source,
    })?;
    if !entry.file_type().is_file() {
      continue;
    }

    let rel = entry.path().strip_prefix(src_dir).unwrap_or(entry.path());
    builder
      .append_path_with_name(entry.path(), rel)
      .map_err(|e| io_err(&format!("archiving {}", rel.display()), e))?;
  }

  let encoder = builder
    .into_inner()
    .map_err(|e| io_err("finishing tar stream", e))?;
  encoder.finish().map_err(|e| io_err("finishing zstd stream", e))?;
  Ok(())
}

/// Unpack a zstd-compressed tar into `dest_dir`.
pub fn unpack_dir(in_tar: &Path, dest_dir: &Path) -> Result<(), CacheError> {
  let io_err = |context: &str, source: std::io::Error| CacheError::Io {
    context: context.to_string(),
    source,
  };

  let in_file =
    std::fs::File::open(in_tar).map_err(|e| io_err(&format!("opening {}", in_tar.display()), e))?;
  let decoder = zstd::stream::Decoder::new(in_file).map_err(|e| io_err("starting zstd stream", e))?;
  let mut archive = tar::Archive::new(decoder);

  std::fs::create_dir_all(dest_dir).map_err(|e| io_err("creating unpack dir", e))?;
  archive
    .unpack(dest_dir)
    .map_err(|e| io_err(&format!("unpacking into {}", dest_dir.display()), e))?;
  Ok(())
}
