//! Engine error type.
//!
//! `BuildError` is `Clone`: a rule or directory load that fails is observed
//! by every task waiting on it, so I/O failures are captured as messages
//! rather than `std::io::Error` values.

use std::path::Path as FsPath;

use thiserror::Error;

use crate::loc::Loc;
use crate::path::Path;
use crate::rule::RuleId;

/// Fatal errors of a build generation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BuildError {
  // === Configuration errors ===
  /// Two rules of one directory declare the same target.
  #[error("multiple rules generated for {target}:\n- {first}\n- {second}")]
  OverlappingTargets { target: Path, first: Loc, second: Loc },

  /// A generator registered a rule whose targets are not in the directory it was asked to populate.
  #[error("{loc}: rule target {target} is outside of directory {dir}")]
  RuleOutsideDir { target: Path, dir: Path, loc: Loc },

  /// A generator registered an alias in a directory other than the one it populates.
  #[error("{loc}: alias {alias} is outside of directory {dir}")]
  AliasOutsideDir { alias: String, dir: Path, loc: Loc },

  /// A rule with no targets, or with targets spread over several directories.
  #[error("{loc}: invalid rule: {reason}")]
  InvalidRule { reason: String, loc: Loc },

  /// A recursive alias found nothing to depend on.
  #[error("{loc}: no rule found for recursive alias {alias}")]
  NoRecursiveAlias { alias: String, loc: Loc },

  /// A fallback rule whose targets are only partially present in the source tree.
  #[error("{loc}: fallback rule targets are only partially present in the source tree: {present:?}")]
  PartialFallback { present: Vec<Path>, loc: Loc },

  /// A standard rule targets a file that also exists in the source tree.
  #[error("{loc}: {target} is both a rule target and a source file")]
  SourceConflict { target: Path, loc: Loc },

  #[error("invalid path {path}: {reason}")]
  InvalidPath { path: String, reason: String },

  #[error("unknown context {0}")]
  UnknownContext(String),

  // === Cycle errors ===
  /// Resolution re-entered a node that is still being resolved.
  #[error("dependency cycle: {}", chain.join(" -> "))]
  DependencyCycle { chain: Vec<String> },

  // === Missing inputs ===
  #[error("no rule found for {0}")]
  NoRule(Path),

  #[error("file does not exist: {0}")]
  MissingFile(Path),

  // === Action failures ===
  #[error("rule {rule} failed: command exited with {code:?}: {cmd}")]
  CmdFailed { rule: RuleId, cmd: String, code: Option<i32> },

  #[error("rule {rule} failed: {message}")]
  ActionFailed { rule: RuleId, message: String },

  #[error("action of alias {alias} failed: {message}")]
  AliasActionFailed { alias: String, message: String },

  #[error("rule {rule} did not produce its target {target}")]
  TargetNotProduced { rule: RuleId, target: Path },

  // === Environment ===
  #[error("io error on {path}: {message}")]
  Io { path: String, message: String },

  #[error("cache error: {0}")]
  Cache(String),

  #[error("failed to serialize {what}: {message}")]
  Serialize { what: String, message: String },

  // === Generation lifecycle ===
  #[error("cannot reset: {0} build(s) still in flight")]
  BuildInProgress(usize),

  /// A fatal error already happened in this generation; no new work starts.
  #[error("build cancelled after an earlier failure")]
  Cancelled,

  /// Failure raised by a dependency description or a rule generator.
  #[error("{0}")]
  User(String),
}

impl BuildError {
  /// Wrap an I/O error with the path it concerns.
  pub fn io(path: impl AsRef<FsPath>, e: std::io::Error) -> Self {
    BuildError::Io {
      path: path.as_ref().display().to_string(),
      message: e.to_string(),
    }
  }

  pub fn user(message: impl Into<String>) -> Self {
    BuildError::User(message.into())
  }

  /// Configuration errors are detected while loading rules, before any action runs.
  pub fn is_configuration(&self) -> bool {
    matches!(
      self,
      BuildError::OverlappingTargets { .. }
        | BuildError::RuleOutsideDir { .. }
        | BuildError::AliasOutsideDir { .. }
        | BuildError::InvalidRule { .. }
        | BuildError::NoRecursiveAlias { .. }
        | BuildError::PartialFallback { .. }
        | BuildError::SourceConflict { .. }
        | BuildError::InvalidPath { .. }
        | BuildError::UnknownContext(_)
    )
  }
}

impl From<crate::util::hash::FileHashError> for BuildError {
  fn from(e: crate::util::hash::FileHashError) -> Self {
    match e {
      crate::util::hash::FileHashError::ReadFile { path, message } => BuildError::Io { path, message },
    }
  }
}
