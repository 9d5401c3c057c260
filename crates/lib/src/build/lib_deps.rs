//! Library dependency records.
//!
//! Dependency descriptions can record which libraries a rule needs, and
//! whether each is required or optional. The engine never interprets these;
//! it only aggregates them for introspection.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// How strongly a library is needed. `Required` absorbs `Optional`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum LibDepKind {
  Optional,
  Required,
}

impl LibDepKind {
  pub fn merge(self, other: LibDepKind) -> LibDepKind {
    self.max(other)
  }
}

/// Library name -> kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibDeps(BTreeMap<String, LibDepKind>);

impl LibDeps {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with(mut self, lib: &str, kind: LibDepKind) -> Self {
    self.add(lib, kind);
    self
  }

  pub fn add(&mut self, lib: &str, kind: LibDepKind) {
    self
      .0
      .entry(lib.to_string())
      .and_modify(|existing| *existing = existing.merge(kind))
      .or_insert(kind);
  }

  pub fn merge(&mut self, other: &LibDeps) {
    for (lib, kind) in &other.0 {
      self.add(lib, *kind);
    }
  }

  pub fn get(&self, lib: &str) -> Option<LibDepKind> {
    self.0.get(lib).copied()
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  pub fn iter(&self) -> impl Iterator<Item = (&String, &LibDepKind)> {
    self.0.iter()
  }
}
