//! Rules and rule generation.
//!
//! A [`Rule`] produces a set of targets in one build directory by running
//! an action. Rules are not written down ahead of time: a generator is
//! asked for the rules of a directory the first time anything in it is
//! needed.
//!
//! # Submodules
//!
//! - [`generator`] - generator callbacks and their registry
//! - [`scope`] - the handle generators register rules through
//! - [`subdir_set`] - subdirectory sets returned by generators

pub mod generator;
pub mod scope;
pub mod subdir_set;

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::action::Action;
use crate::build::Build;
use crate::dep::DepSet;
use crate::loc::Loc;
use crate::path::{ContextName, Path};

pub use generator::{GenRules, InitRules, RuleGenerators};
pub use scope::RuleScope;
pub use subdir_set::SubdirSet;

/// Identity of a rule. Unique across generations of one build system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RuleId(pub u64);

impl fmt::Display for RuleId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "#{}", self.0)
  }
}

/// How a rule relates to files of the same name in the source tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RuleMode {
  /// A source file with a target's name is an error.
  #[default]
  Standard,
  /// The rule is used only when none of its targets exist in the source tree.
  Fallback,
  /// The rule wins over the source copy. With `until_clean`, the promoted
  /// source files are reported for deletion.
  Promote { until_clean: bool },
}

/// A registered rule.
#[derive(Debug, Clone)]
pub struct Rule {
  pub id: RuleId,
  pub dir: Path,
  pub targets: BTreeSet<Path>,
  /// Absent for synthetic copy rules and install rules.
  pub context: Option<ContextName>,
  pub action: Build<Action>,
  pub mode: RuleMode,
  pub loc: Loc,
}

impl Rule {
  /// Dependencies known without evaluating the action.
  pub fn deps(&self) -> &DepSet {
    self.action.declared_deps()
  }

  /// Human readable name for logs and cycle reports.
  pub fn describe(&self) -> String {
    match self.targets.iter().next() {
      Some(first) if self.targets.len() == 1 => format!("{} ({})", first, self.loc),
      Some(first) => format!("{} and {} more ({})", first, self.targets.len() - 1, self.loc),
      None => format!("rule {} ({})", self.id, self.loc),
    }
  }
}

impl fmt::Display for Rule {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.describe())
  }
}

/// A rule as written by a generator, before it gets an id.
#[derive(Debug, Clone)]
pub struct RuleSpec {
  pub targets: Vec<Path>,
  pub action: Build<Action>,
  pub mode: RuleMode,
  pub loc: Loc,
}

impl RuleSpec {
  #[track_caller]
  pub fn new(targets: impl IntoIterator<Item = Path>, action: Build<Action>) -> Self {
    Self {
      targets: targets.into_iter().collect(),
      action,
      mode: RuleMode::Standard,
      loc: Loc::caller(),
    }
  }

  pub fn with_mode(mut self, mode: RuleMode) -> Self {
    self.mode = mode;
    self
  }

  pub fn with_loc(mut self, loc: Loc) -> Self {
    self.loc = loc;
    self
  }
}
