//! Path and context model.
//!
//! The engine distinguishes three kinds of paths:
//!
//! - **Source**: files under version control, read-only to the engine
//! - **Build**: files under a context's (or install pseudo-context's) output
//!   subtree, written only by rule execution
//! - **External**: absolute paths outside the project, read-only
//!
//! Every path is relative to its root except external ones; [`Layout`]
//! resolves them to real filesystem locations.
//!
//! # Submodules
//!
//! - [`source_tree`] - listing of source directories

pub mod source_tree;

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::consts::{DEFAULT_BUILD_DIR, INSTALL_DIR};
use crate::error::BuildError;

/// Name of a build context (e.g. `default`, `release`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ContextName(pub String);

impl ContextName {
  pub fn new(name: impl Into<String>) -> Self {
    Self(name.into())
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for ContextName {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

/// A build profile under which the rule graph is instantiated.
///
/// `env` is added to the environment of every process spawned by a rule of
/// this context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Context {
  pub name: ContextName,
  pub env: BTreeMap<String, String>,
}

impl Context {
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: ContextName::new(name),
      env: BTreeMap::new(),
    }
  }

  pub fn with_env(mut self, key: &str, value: &str) -> Self {
    self.env.insert(key.to_string(), value.to_string());
    self
  }
}

/// Root of a build subtree: a context or an install pseudo-context.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum BuildRoot {
  Context(ContextName),
  Install(ContextName),
}

impl BuildRoot {
  /// Context the root belongs to, for both variants.
  pub fn context(&self) -> &ContextName {
    match self {
      BuildRoot::Context(name) | BuildRoot::Install(name) => name,
    }
  }

  /// Components of this root below the build directory.
  fn components(&self) -> Vec<&str> {
    match self {
      BuildRoot::Context(name) => vec![name.as_str()],
      BuildRoot::Install(name) => vec![INSTALL_DIR, name.as_str()],
    }
  }
}

impl fmt::Display for BuildRoot {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.components().join("/"))
  }
}

/// A normalized relative path: `/`-separated, no `.` or `..`, empty for the root.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RelPath(String);

impl RelPath {
  pub fn root() -> Self {
    Self(String::new())
  }

  /// Parse and normalize a relative path.
  ///
  /// Rejects absolute paths and any `..` component.
  pub fn parse(raw: &str) -> Result<Self, BuildError> {
    if raw.starts_with('/') || raw.starts_with('\\') {
      return Err(BuildError::InvalidPath {
        path: raw.to_string(),
        reason: "expected a relative path".to_string(),
      });
    }
    let mut parts = Vec::new();
    for part in raw.split(['/', '\\']) {
      match part {
        "" | "." => {}
        ".." => {
          return Err(BuildError::InvalidPath {
            path: raw.to_string(),
            reason: "`..` is not allowed".to_string(),
          });
        }
        other => parts.push(other),
      }
    }
    Ok(Self(parts.join("/")))
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }

  pub fn is_root(&self) -> bool {
    self.0.is_empty()
  }

  pub fn components(&self) -> Vec<&str> {
    if self.0.is_empty() {
      Vec::new()
    } else {
      self.0.split('/').collect()
    }
  }

  /// Append one component (or a relative suffix).
  pub fn join(&self, name: &str) -> Self {
    let suffix = name.trim_matches('/');
    if self.0.is_empty() {
      Self(suffix.to_string())
    } else if suffix.is_empty() {
      self.clone()
    } else {
      Self(format!("{}/{}", self.0, suffix))
    }
  }

  pub fn parent(&self) -> Option<Self> {
    if self.0.is_empty() {
      return None;
    }
    match self.0.rfind('/') {
      Some(idx) => Some(Self(self.0[..idx].to_string())),
      None => Some(Self::root()),
    }
  }

  pub fn basename(&self) -> &str {
    match self.0.rfind('/') {
      Some(idx) => &self.0[idx + 1..],
      None => &self.0,
    }
  }

  /// True when `self` equals `ancestor` or lies below it.
  pub fn is_descendant_of(&self, ancestor: &RelPath) -> bool {
    ancestor.0.is_empty() || self.0 == ancestor.0 || self.0.starts_with(&format!("{}/", ancestor.0))
  }
}

impl fmt::Display for RelPath {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if self.0.is_empty() { f.write_str(".") } else { f.write_str(&self.0) }
  }
}

/// A path known to the engine.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Path {
  Source(RelPath),
  Build(BuildRoot, RelPath),
  External(PathBuf),
}

impl Path {
  pub fn source(rel: &str) -> Result<Self, BuildError> {
    Ok(Path::Source(RelPath::parse(rel)?))
  }

  /// A path in a context's output tree.
  pub fn build(context: &str, rel: &str) -> Result<Self, BuildError> {
    Ok(Path::Build(BuildRoot::Context(ContextName::new(context)), RelPath::parse(rel)?))
  }

  /// A path in a context's install tree.
  pub fn install(context: &str, rel: &str) -> Result<Self, BuildError> {
    Ok(Path::Build(BuildRoot::Install(ContextName::new(context)), RelPath::parse(rel)?))
  }

  pub fn external(path: impl Into<PathBuf>) -> Self {
    Path::External(path.into())
  }

  /// Root directory of a build subtree.
  pub fn build_root(root: BuildRoot) -> Self {
    Path::Build(root, RelPath::root())
  }

  pub fn is_build(&self) -> bool {
    matches!(self, Path::Build(..))
  }

  pub fn is_source(&self) -> bool {
    matches!(self, Path::Source(_))
  }

  /// Root and relative part of a build path.
  pub fn as_build(&self) -> Option<(&BuildRoot, &RelPath)> {
    match self {
      Path::Build(root, rel) => Some((root, rel)),
      _ => None,
    }
  }

  pub fn rel(&self) -> Option<&RelPath> {
    match self {
      Path::Source(rel) | Path::Build(_, rel) => Some(rel),
      Path::External(_) => None,
    }
  }

  /// Append a relative suffix.
  pub fn join(&self, name: &str) -> Self {
    match self {
      Path::Source(rel) => Path::Source(rel.join(name)),
      Path::Build(root, rel) => Path::Build(root.clone(), rel.join(name)),
      Path::External(p) => Path::External(p.join(name)),
    }
  }

  /// Containing directory. The root of a tree has no parent.
  pub fn parent(&self) -> Option<Self> {
    match self {
      Path::Source(rel) => rel.parent().map(Path::Source),
      Path::Build(root, rel) => rel.parent().map(|p| Path::Build(root.clone(), p)),
      Path::External(p) => p.parent().map(|p| Path::External(p.to_path_buf())),
    }
  }

  pub fn basename(&self) -> String {
    match self {
      Path::Source(rel) | Path::Build(_, rel) => rel.basename().to_string(),
      Path::External(p) => p.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default(),
    }
  }

  /// The source path a context build path mirrors.
  ///
  /// Install paths have no source counterpart.
  pub fn source_counterpart(&self) -> Option<Path> {
    match self {
      Path::Build(BuildRoot::Context(_), rel) => Some(Path::Source(rel.clone())),
      _ => None,
    }
  }

  /// The same relative path in another build root.
  pub fn in_root(&self, root: &BuildRoot) -> Option<Path> {
    self.rel().map(|rel| Path::Build(root.clone(), rel.clone()))
  }
}

impl fmt::Display for Path {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Path::Source(rel) => write!(f, "{}", rel),
      Path::Build(root, rel) if rel.is_root() => write!(f, "{}/{}", DEFAULT_BUILD_DIR, root),
      Path::Build(root, rel) => write!(f, "{}/{}/{}", DEFAULT_BUILD_DIR, root, rel),
      Path::External(p) => write!(f, "{}", p.display()),
    }
  }
}

/// Physical location of the source tree and the build tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
  pub source_root: PathBuf,
  pub build_root: PathBuf,
}

impl Layout {
  pub fn new(source_root: impl Into<PathBuf>, build_root: impl Into<PathBuf>) -> Self {
    Self {
      source_root: source_root.into(),
      build_root: build_root.into(),
    }
  }

  /// Layout with the build root at `<source_root>/_build`.
  pub fn in_source(source_root: impl Into<PathBuf>) -> Self {
    let source_root = source_root.into();
    let build_root = source_root.join(DEFAULT_BUILD_DIR);
    Self {
      source_root,
      build_root,
    }
  }

  /// Filesystem location of an engine path.
  pub fn resolve(&self, path: &Path) -> PathBuf {
    match path {
      Path::Source(rel) => join_rel(&self.source_root, rel),
      Path::Build(root, rel) => {
        let mut base = self.build_root.clone();
        for component in root.components() {
          base.push(component);
        }
        join_rel(&base, rel)
      }
      Path::External(p) => p.clone(),
    }
  }
}

fn join_rel(base: &std::path::Path, rel: &RelPath) -> PathBuf {
  let mut out = base.to_path_buf();
  for component in rel.components() {
    out.push(component);
  }
  out
}
