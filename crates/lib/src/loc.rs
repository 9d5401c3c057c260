//! Source locations attached to rules and aliases.

use std::fmt;
use std::panic::Location;

use serde::{Deserialize, Serialize};

/// Where a rule or alias was declared.
///
/// Captured automatically with `#[track_caller]` by the registration
/// functions, or supplied explicitly by front-ends that read rules from a
/// file.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Loc {
  pub file: String,
  pub line: u32,
  pub column: u32,
}

impl Loc {
  pub fn new(file: impl Into<String>, line: u32, column: u32) -> Self {
    Self {
      file: file.into(),
      line,
      column,
    }
  }

  /// Location of the caller of the enclosing `#[track_caller]` function.
  #[track_caller]
  pub fn caller() -> Self {
    let location = Location::caller();
    Self::new(location.file(), location.line(), location.column())
  }

  /// Placeholder for rules the engine synthesizes itself.
  pub fn internal(what: &str) -> Self {
    Self::new(format!("<{}>", what), 0, 0)
  }
}

impl fmt::Display for Loc {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if self.line == 0 {
      f.write_str(&self.file)
    } else {
      write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
  }
}
