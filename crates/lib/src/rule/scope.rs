//! Rule registration scope.
//!
//! Generators never see the engine. They receive a [`RuleScope`] for the
//! directory being loaded and register rules and alias contents through it.
//! A scope only accepts rules whose targets lie in its directory.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use super::{Rule, RuleId, RuleSpec};
use crate::action::Action;
use crate::alias::{Alias, AliasItem};
use crate::build::Build;
use crate::error::BuildError;
use crate::loc::Loc;
use crate::path::{BuildRoot, ContextName, Path};
use crate::util::lock;

/// What a generator registered.
#[derive(Debug, Default)]
pub(crate) struct Collected {
  pub rules: Vec<Rule>,
  pub aliases: Vec<(Alias, AliasItem)>,
}

#[derive(Debug)]
struct ScopeInner {
  /// `None` for the init callback, which may register rules anywhere.
  dir: Option<Path>,
  ids: Arc<AtomicU64>,
  collected: Mutex<Collected>,
}

/// Capability to register rules for one directory.
#[derive(Debug, Clone)]
pub struct RuleScope {
  inner: Arc<ScopeInner>,
  prefix: Option<Build<()>>,
}

impl RuleScope {
  pub(crate) fn for_dir(dir: Path, ids: Arc<AtomicU64>) -> Self {
    Self::with_dir(Some(dir), ids)
  }

  pub(crate) fn for_init(ids: Arc<AtomicU64>) -> Self {
    Self::with_dir(None, ids)
  }

  fn with_dir(dir: Option<Path>, ids: Arc<AtomicU64>) -> Self {
    Self {
      inner: Arc::new(ScopeInner {
        dir,
        ids,
        collected: Mutex::new(Collected::default()),
      }),
      prefix: None,
    }
  }

  pub(crate) fn take(&self) -> Collected {
    std::mem::take(&mut *lock(&self.inner.collected))
  }

  /// Directory this scope populates; `None` while running the init callback.
  pub fn dir(&self) -> Option<&Path> {
    self.inner.dir.as_ref()
  }

  /// Register a rule.
  pub fn add_rule(&self, spec: RuleSpec) -> Result<RuleId, BuildError> {
    let RuleSpec {
      targets,
      action,
      mode,
      loc,
    } = spec;

    let dir = rule_dir(&targets, &loc)?;
    if let Some(expected) = &self.inner.dir
      && &dir != expected
    {
      return Err(BuildError::RuleOutsideDir {
        target: targets[0].clone(),
        dir: expected.clone(),
        loc,
      });
    }

    let action = match &self.prefix {
      Some(prefix) => prefix.clone().then(action),
      None => action,
    };
    let id = RuleId(self.inner.ids.fetch_add(1, Ordering::Relaxed));
    let rule = Rule {
      id,
      context: context_of(&dir),
      dir,
      targets: targets.into_iter().collect(),
      action,
      mode,
      loc,
    };
    lock(&self.inner.collected).rules.push(rule);
    Ok(id)
  }

  /// Register a standard rule, located at the caller.
  #[track_caller]
  pub fn rule(&self, targets: impl IntoIterator<Item = Path>, action: Build<Action>) -> Result<RuleId, BuildError> {
    self.add_rule(RuleSpec::new(targets, action))
  }

  /// Attach dependencies to an alias of this directory.
  #[track_caller]
  pub fn add_alias_deps(&self, alias: &Alias, deps: Build<()>) -> Result<(), BuildError> {
    let loc = Loc::caller();
    self.check_alias(alias, &loc)?;
    lock(&self.inner.collected)
      .aliases
      .push((alias.clone(), AliasItem::Deps { build: deps, loc }));
    Ok(())
  }

  /// Attach an action to an alias of this directory. It runs whenever the
  /// alias is built and produces no targets.
  #[track_caller]
  pub fn add_alias_action(&self, alias: &Alias, action: Build<Action>) -> Result<(), BuildError> {
    let loc = Loc::caller();
    self.check_alias(alias, &loc)?;
    let build = match &self.prefix {
      Some(prefix) => prefix.clone().then(action),
      None => action,
    };
    let item = AliasItem::Action {
      build,
      context: context_of(&alias.dir),
      loc,
    };
    lock(&self.inner.collected).aliases.push((alias.clone(), item));
    Ok(())
  }

  /// A scope whose rules also depend on `extra`.
  pub fn prefixed(&self, extra: Build<()>) -> RuleScope {
    let prefix = match &self.prefix {
      Some(existing) => existing.clone().then(extra),
      None => extra,
    };
    RuleScope {
      inner: self.inner.clone(),
      prefix: Some(prefix),
    }
  }

  /// Run `f` with a scope whose rules also depend on `extra`.
  pub async fn prefix_rules<F, Fut, R>(&self, extra: Build<()>, f: F) -> R
  where
    F: FnOnce(RuleScope) -> Fut,
    Fut: Future<Output = R>,
  {
    f(self.prefixed(extra)).await
  }

  fn check_alias(&self, alias: &Alias, loc: &Loc) -> Result<(), BuildError> {
    if !alias.dir.is_build() {
      return Err(BuildError::InvalidRule {
        reason: format!("alias {} is not in the build tree", alias),
        loc: loc.clone(),
      });
    }
    match &self.inner.dir {
      Some(dir) if dir != &alias.dir => Err(BuildError::AliasOutsideDir {
        alias: alias.to_string(),
        dir: dir.clone(),
        loc: loc.clone(),
      }),
      _ => Ok(()),
    }
  }
}

/// Common directory of a rule's targets.
fn rule_dir(targets: &[Path], loc: &Loc) -> Result<Path, BuildError> {
  let invalid = |reason: String| BuildError::InvalidRule {
    reason,
    loc: loc.clone(),
  };

  let Some(first) = targets.first() else {
    return Err(invalid("rule has no targets".to_string()));
  };
  let mut dir = None;
  for target in targets {
    if !target.is_build() {
      return Err(invalid(format!("target {} is not in the build tree", target)));
    }
    let parent = target
      .parent()
      .ok_or_else(|| invalid(format!("target {} is a build root", target)))?;
    match &dir {
      None => dir = Some(parent),
      Some(d) if d != &parent => {
        return Err(invalid(format!("targets {} and {} are in different directories", first, target)));
      }
      Some(_) => {}
    }
  }
  dir.ok_or_else(|| invalid("rule has no targets".to_string()))
}

fn context_of(dir: &Path) -> Option<ContextName> {
  match dir.as_build() {
    Some((BuildRoot::Context(name), _)) => Some(name.clone()),
    _ => None,
  }
}
