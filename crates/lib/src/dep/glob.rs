//! Glob patterns for file selectors.
//!
//! Supported syntax: `*` (any run of characters), `?` (one character),
//! `{a,b}` (alternatives) and `[...]` / `[!...]` character classes. A
//! pattern matches a single file name, never a path with separators.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use globset::{GlobBuilder, GlobMatcher};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::BuildError;

/// A compiled glob. Equality, ordering and hashing use the pattern text.
#[derive(Clone)]
pub struct Glob {
  pattern: String,
  matcher: GlobMatcher,
}

impl Glob {
  pub fn new(pattern: &str) -> Result<Self, BuildError> {
    if pattern.contains('/') {
      return Err(invalid(pattern, "globs match file names, not paths"));
    }
    let glob = GlobBuilder::new(pattern)
      .literal_separator(true)
      .backslash_escape(true)
      .build()
      .map_err(|e| invalid(pattern, &format!("invalid glob: {}", e.kind())))?;
    Ok(Self {
      pattern: pattern.to_string(),
      matcher: glob.compile_matcher(),
    })
  }

  /// Glob matching every file.
  pub fn any() -> Self {
    Self::new("*").unwrap_or_else(|_| unreachable!("constant glob"))
  }

  pub fn pattern(&self) -> &str {
    &self.pattern
  }

  pub fn matches(&self, name: &str) -> bool {
    self.matcher.is_match(name)
  }
}

fn invalid(pattern: &str, reason: &str) -> BuildError {
  BuildError::InvalidPath {
    path: pattern.to_string(),
    reason: reason.to_string(),
  }
}

impl fmt::Debug for Glob {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "Glob({:?})", self.pattern)
  }
}

impl fmt::Display for Glob {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.pattern)
  }
}

impl PartialEq for Glob {
  fn eq(&self, other: &Self) -> bool {
    self.pattern == other.pattern
  }
}

impl Eq for Glob {}

impl PartialOrd for Glob {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
    Some(self.cmp(other))
  }
}

impl Ord for Glob {
  fn cmp(&self, other: &Self) -> Ordering {
    self.pattern.cmp(&other.pattern)
  }
}

impl Hash for Glob {
  fn hash<H: Hasher>(&self, state: &mut H) {
    self.pattern.hash(state);
  }
}

impl Serialize for Glob {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&self.pattern)
  }
}

impl<'de> Deserialize<'de> for Glob {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    let pattern = String::deserialize(deserializer)?;
    Glob::new(&pattern).map_err(serde::de::Error::custom)
  }
}
