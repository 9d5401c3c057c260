//! Dependencies.
//!
//! A [`Dep`] names one thing a computation needs before it can run: a
//! concrete file, the listing of a directory filtered by a glob, an alias,
//! or the value of an environment variable. A [`DepSet`] has set semantics.
//!
//! # Submodules
//!
//! - [`glob`] - file-name patterns used by file selectors

pub mod glob;

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::alias::Alias;
use crate::path::Path;

pub use glob::Glob;

/// A glob over one directory's contents.
///
/// For build directories the selector sees the targets of the loaded rules;
/// for source directories it sees the source listing.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FileSelector {
  pub dir: Path,
  pub glob: Glob,
}

impl FileSelector {
  pub fn new(dir: Path, glob: Glob) -> Self {
    Self { dir, glob }
  }
}

impl fmt::Display for FileSelector {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}/{}", self.dir, self.glob)
  }
}

/// One dependency.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Dep {
  File(Path),
  /// The listing matched by a selector (not the contents of the matched files).
  FileSelector(FileSelector),
  Alias(Alias),
  Env(String),
}

impl fmt::Display for Dep {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Dep::File(p) => write!(f, "{}", p),
      Dep::FileSelector(sel) => write!(f, "glob {}", sel),
      Dep::Alias(alias) => write!(f, "alias {}", alias),
      Dep::Env(var) => write!(f, "env {}", var),
    }
  }
}

/// An unordered, duplicate-free collection of dependencies.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepSet(BTreeSet<Dep>);

impl DepSet {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn singleton(dep: Dep) -> Self {
    Self(BTreeSet::from([dep]))
  }

  pub fn insert(&mut self, dep: Dep) -> bool {
    self.0.insert(dep)
  }

  pub fn extend(&mut self, other: &DepSet) {
    self.0.extend(other.0.iter().cloned());
  }

  pub fn union(&self, other: &DepSet) -> DepSet {
    DepSet(self.0.union(&other.0).cloned().collect())
  }

  pub fn contains(&self, dep: &Dep) -> bool {
    self.0.contains(dep)
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn iter(&self) -> impl Iterator<Item = &Dep> {
    self.0.iter()
  }

  /// The concrete file paths in this set.
  pub fn paths(&self) -> impl Iterator<Item = &Path> {
    self.0.iter().filter_map(|dep| match dep {
      Dep::File(p) => Some(p),
      _ => None,
    })
  }
}

impl FromIterator<Dep> for DepSet {
  fn from_iter<I: IntoIterator<Item = Dep>>(iter: I) -> Self {
    DepSet(iter.into_iter().collect())
  }
}

impl IntoIterator for DepSet {
  type Item = Dep;
  type IntoIter = std::collections::btree_set::IntoIter<Dep>;

  fn into_iter(self) -> Self::IntoIter {
    self.0.into_iter()
  }
}

impl<'a> IntoIterator for &'a DepSet {
  type Item = &'a Dep;
  type IntoIter = std::collections::btree_set::Iter<'a, Dep>;

  fn into_iter(self) -> Self::IntoIter {
    self.0.iter()
  }
}
