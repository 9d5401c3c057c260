//! Source tree listing.
//!
//! Directory listings drive three things: synthetic copy rules for source
//! files, the subdirectories a recursive alias descends into, and file
//! selectors over source directories.

use std::collections::BTreeSet;
use std::io;

use tokio::fs;

use super::{Layout, RelPath};
use crate::error::BuildError;

/// Entries of one source directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceDir {
  pub files: BTreeSet<String>,
  pub subdirs: BTreeSet<String>,
}

/// List a source directory.
///
/// A missing directory lists as empty. Hidden entries and the build root
/// (when it lives inside the source tree) are skipped.
pub async fn list_source_dir(layout: &Layout, dir: &RelPath) -> Result<SourceDir, BuildError> {
  let mut path = layout.source_root.clone();
  for component in dir.components() {
    path.push(component);
  }

  let mut entries = match fs::read_dir(&path).await {
    Ok(entries) => entries,
    Err(e) if e.kind() == io::ErrorKind::NotFound || e.kind() == io::ErrorKind::NotADirectory => {
      return Ok(SourceDir::default());
    }
    Err(e) => return Err(BuildError::io(&path, e)),
  };

  let mut listing = SourceDir::default();
  while let Some(entry) = entries.next_entry().await.map_err(|e| BuildError::io(&path, e))? {
    let name = entry.file_name().to_string_lossy().to_string();
    if name.starts_with('.') || entry.path() == layout.build_root {
      continue;
    }
    let file_type = entry.file_type().await.map_err(|e| BuildError::io(entry.path(), e))?;
    if file_type.is_dir() {
      listing.subdirs.insert(name);
    } else if file_type.is_file() || file_type.is_symlink() {
      listing.files.insert(name);
    }
  }

  Ok(listing)
}
