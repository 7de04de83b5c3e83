//! Recursive copy helpers shared by cache staging and materialization.

use std::path::Path;

/// Copy a file or directory tree from `from` to `to`, creating parent
/// directories as needed. Regular files keep their permissions.
pub fn copy_recursive(from: &Path, to: &Path) -> std::io::Result<()> {
  let meta = std::fs::metadata(from)?;

  if meta.is_dir() {
    std::fs::create_dir_all(to)?;
    for entry in std::fs::read_dir(from)? {
      let entry = entry?;
      copy_recursive(&entry.path(), &to.join(entry.file_name()))?;
    }
    return Ok(());
  }

  if let Some(parent) = to.parent() {
    std::fs::create_dir_all(parent)?;
  }
  std::fs::copy(from, to)?;
  Ok(())
}
