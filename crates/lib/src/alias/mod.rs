//! Aliases.
//!
//! An alias is a named, directory-scoped bundle of dependencies (and
//! optionally actions). Depending on an alias depends on everything attached
//! to it; depending on it recursively also depends on the same-named alias
//! in every descendant directory.

use std::fmt;

use futures::FutureExt;
use serde::{Deserialize, Serialize};

use crate::action::Action;
use crate::build::{Build, Trace};
use crate::dep::{Dep, DepSet};
use crate::error::BuildError;
use crate::loc::Loc;
use crate::package::PackageName;
use crate::path::{BuildRoot, ContextName, Path, RelPath};

/// Name of an alias, unique within a directory.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AliasName(pub String);

impl AliasName {
  pub fn new(name: impl Into<String>) -> Self {
    Self(name.into())
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for AliasName {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

/// An alias in a build directory.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Alias {
  pub dir: Path,
  pub name: AliasName,
}

impl Alias {
  pub fn new(dir: Path, name: &str) -> Self {
    Self {
      dir,
      name: AliasName::new(name),
    }
  }

  /// The alias a package's installable files are attached to.
  pub fn package_install(context: &ContextName, package: &PackageName) -> Self {
    Self::new(
      Path::build_root(BuildRoot::Context(context.clone())),
      &format!(".{}-files", package),
    )
  }

  /// The same alias in a child directory.
  pub fn in_subdir(&self, name: &str) -> Alias {
    Alias {
      dir: self.dir.join(name),
      name: self.name.clone(),
    }
  }

  /// Depend on this alias only.
  ///
  /// An alias that no generator defines is satisfied trivially.
  pub fn dep(&self) -> Build<()> {
    Build::deps(DepSet::singleton(Dep::Alias(self.clone())))
  }

  /// Depend on this alias in this directory and all its descendants.
  ///
  /// Fails with [`BuildError::NoRecursiveAlias`] when no directory of the
  /// subtree defines it.
  #[track_caller]
  pub fn dep_rec(&self) -> Build<()> {
    let loc = Loc::caller();
    let alias = self.clone();
    Build::from_fn(DepSet::new(), move |eval| {
      let alias = alias.clone();
      let loc = loc.clone();
      async move {
        match eval.need_alias_rec(&alias).await? {
          Some(trace) => Ok(((), trace)),
          None => Err(BuildError::NoRecursiveAlias {
            alias: alias.to_string(),
            loc,
          }),
        }
      }
      .boxed()
    })
  }
}

impl fmt::Display for Alias {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}@{}", self.dir, self.name)
  }
}

/// What a generator attached to an alias.
#[derive(Debug, Clone)]
pub enum AliasItem {
  /// Plain dependencies.
  Deps { build: Build<()>, loc: Loc },
  /// An action run every time the alias is built. It produces no targets.
  Action {
    build: Build<Action>,
    context: Option<ContextName>,
    loc: Loc,
  },
}

impl AliasItem {
  pub fn loc(&self) -> &Loc {
    match self {
      AliasItem::Deps { loc, .. } | AliasItem::Action { loc, .. } => loc,
    }
  }
}

/// Depend on the alias `name` of `dir` in every context.
pub fn dep_multi_contexts(dir: &RelPath, name: &AliasName, contexts: &[ContextName]) -> Build<()> {
  let deps: DepSet = contexts
    .iter()
    .map(|ctx| {
      Dep::Alias(Alias {
        dir: Path::Build(BuildRoot::Context(ctx.clone()), dir.clone()),
        name: name.clone(),
      })
    })
    .collect();
  Build::deps(deps)
}

/// Recursive variant of [`dep_multi_contexts`].
///
/// Fails only if no context defines the alias anywhere under `dir`.
#[track_caller]
pub fn dep_rec_multi_contexts(dir: &RelPath, name: &AliasName, contexts: &[ContextName]) -> Build<()> {
  let loc = Loc::caller();
  let aliases: Vec<Alias> = contexts
    .iter()
    .map(|ctx| Alias {
      dir: Path::Build(BuildRoot::Context(ctx.clone()), dir.clone()),
      name: name.clone(),
    })
    .collect();
  let display = format!("{}@{}", dir, name);

  Build::from_fn(DepSet::new(), move |eval| {
    let aliases = aliases.clone();
    let loc = loc.clone();
    let display = display.clone();
    async move {
      let found = futures::future::try_join_all(aliases.iter().map(|a| eval.need_alias_rec(a))).await?;
      let mut trace = Trace::new();
      let mut any = false;
      for t in found.into_iter().flatten() {
        any = true;
        trace.merge(t);
      }
      if !any {
        return Err(BuildError::NoRecursiveAlias { alias: display, loc });
      }
      Ok(((), trace))
    }
    .boxed()
  })
}
