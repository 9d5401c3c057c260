//! Sets of subdirectory names a generator asks to keep.

use std::collections::BTreeSet;

/// Either every subdirectory or an explicit set of names.
///
/// `union` is a join: associative, commutative, idempotent, with
/// `These(∅)` as identity and `All` absorbing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubdirSet {
  All,
  These(BTreeSet<String>),
}

impl Default for SubdirSet {
  fn default() -> Self {
    SubdirSet::empty()
  }
}

impl SubdirSet {
  pub fn empty() -> Self {
    SubdirSet::These(BTreeSet::new())
  }

  pub fn these<I, S>(names: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    SubdirSet::These(names.into_iter().map(Into::into).collect())
  }

  pub fn union(&self, other: &SubdirSet) -> SubdirSet {
    match (self, other) {
      (SubdirSet::All, _) | (_, SubdirSet::All) => SubdirSet::All,
      (SubdirSet::These(a), SubdirSet::These(b)) => SubdirSet::These(a.union(b).cloned().collect()),
    }
  }

  pub fn mem(&self, name: &str) -> bool {
    match self {
      SubdirSet::All => true,
      SubdirSet::These(names) => names.contains(name),
    }
  }
}
