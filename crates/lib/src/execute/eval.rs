//! Evaluation of dependency descriptions.
//!
//! An [`Eval`] is the handle a [`Build`](crate::build::Build) thunk receives.
//! It knows which node (rule or alias) is evaluating, so every wait it
//! performs is recorded in the wait-for graph. In inspect mode file and
//! alias dependencies are recorded instead of built.

use std::collections::BTreeSet;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::{BoxFuture, try_join_all};

use super::cycle::Node;
use super::inspect::Inspector;
use super::session::Session;
use crate::alias::Alias;
use crate::build::Trace;
use crate::dep::{Dep, DepSet, FileSelector};
use crate::error::BuildError;
use crate::path::{ContextName, Path};
use crate::util::hash::hash_bytes;

#[derive(Clone)]
enum Mode {
  Execute,
  Inspect(Arc<Inspector>),
}

#[derive(Clone)]
pub(crate) struct Eval {
  session: Arc<Session>,
  node: Option<Node>,
  context: Option<ContextName>,
  mode: Mode,
}

impl Eval {
  pub fn execute(session: Arc<Session>, node: Option<Node>, context: Option<ContextName>) -> Self {
    Self {
      session,
      node,
      context,
      mode: Mode::Execute,
    }
  }

  pub fn inspect(session: Arc<Session>, node: Option<Node>, context: Option<ContextName>, inspector: Arc<Inspector>) -> Self {
    Self {
      session,
      node,
      context,
      mode: Mode::Inspect(inspector),
    }
  }

  pub fn session(&self) -> &Arc<Session> {
    &self.session
  }

  pub fn node(&self) -> Option<&Node> {
    self.node.as_ref()
  }

  /// Satisfy every dependency of a set concurrently.
  pub fn need(&self, deps: &DepSet) -> BoxFuture<'static, Result<Trace, BuildError>> {
    let futs: Vec<_> = deps.iter().map(|dep| self.need_one(dep.clone())).collect();
    async move {
      let mut trace = Trace::new();
      for t in try_join_all(futs).await? {
        trace.merge(t);
      }
      Ok(trace)
    }
    .boxed()
  }

  fn need_one(&self, dep: Dep) -> BoxFuture<'static, Result<Trace, BuildError>> {
    let this = self.clone();
    async move {
      this.session.check_cancelled()?;
      match (&this.mode, &dep) {
        (Mode::Execute, Dep::File(path)) => {
          let digest = this.session.build_path(this.node.clone(), path.clone()).await?;
          Ok(Trace::single(dep, Some(digest)))
        }
        (Mode::Execute, Dep::Alias(alias)) => {
          let digest = this.session.build_alias(this.node.clone(), alias.clone()).await?;
          Ok(Trace::single(dep, Some(digest)))
        }
        (Mode::Inspect(inspector), Dep::File(path)) => {
          if path.is_build() {
            inspector.clone().visit_path(this.clone(), path.clone()).await?;
          }
          Ok(Trace::single(dep, None))
        }
        (Mode::Inspect(inspector), Dep::Alias(alias)) => {
          inspector.clone().visit_alias(this.clone(), alias.clone()).await?;
          Ok(Trace::single(dep, None))
        }
        (_, Dep::FileSelector(selector)) => {
          let (_, trace) = this.select(selector).await?;
          Ok(trace)
        }
        (_, Dep::Env(name)) => {
          let (_, trace) = this.env_var(name);
          Ok(trace)
        }
      }
    }
    .boxed()
  }

  /// Build a file and read it.
  ///
  /// Inspection needs the contents too, so the file is built in both modes.
  pub fn read_file(&self, path: &Path) -> BoxFuture<'static, Result<(String, Trace), BuildError>> {
    let this = self.clone();
    let path = path.clone();
    async move {
      let from = match &this.mode {
        Mode::Execute => this.node.clone(),
        Mode::Inspect(inspector) => {
          if path.is_build() {
            inspector.clone().visit_path(this.clone(), path.clone()).await?;
          }
          None
        }
      };
      let digest = this.session.build_path(from, path.clone()).await?;
      let resolved = this.session.layout.resolve(&path);
      let text = tokio::fs::read_to_string(&resolved)
        .await
        .map_err(|e| BuildError::io(&resolved, e))?;
      Ok((text, Trace::single(Dep::File(path), Some(digest))))
    }
    .boxed()
  }

  /// Evaluate a file selector against its directory's listing.
  pub fn select(&self, selector: &FileSelector) -> BoxFuture<'static, Result<(BTreeSet<Path>, Trace), BuildError>> {
    let session = self.session.clone();
    let selector = selector.clone();
    async move {
      let (paths, digest) = session.select(selector.clone()).await?;
      Ok((paths, Trace::single(Dep::FileSelector(selector), Some(digest))))
    }
    .boxed()
  }

  /// Depend on `alias` in its directory and every known descendant.
  ///
  /// Returns `None` when no directory of the subtree defines the alias.
  pub fn need_alias_rec(&self, alias: &Alias) -> BoxFuture<'static, Result<Option<Trace>, BuildError>> {
    let this = self.clone();
    let alias = alias.clone();
    async move {
      let mut found = DepSet::new();
      let mut level = vec![alias.dir.clone()];

      while !level.is_empty() {
        let loads = level.iter().filter_map(|dir| {
          let (root, rel) = dir.as_build()?;
          Some(this.session.load_dir(root.clone(), rel.clone()))
        });
        let loaded = try_join_all(loads).await?;

        let mut next = Vec::new();
        for dir in loaded {
          if dir.aliases.contains_key(&alias.name) {
            found.insert(Dep::Alias(Alias {
              dir: dir.dir.clone(),
              name: alias.name.clone(),
            }));
          }
          next.extend(dir.subdirs.iter().map(|sub| dir.dir.join(sub)));
        }
        level = next;
      }

      if found.is_empty() {
        return Ok(None);
      }
      this.need(&found).await.map(Some)
    }
    .boxed()
  }

  /// Value of an environment variable: the context's setting, else the
  /// process environment.
  pub fn env_var(&self, name: &str) -> (Option<String>, Trace) {
    let value = self
      .context
      .as_ref()
      .and_then(|ctx| self.session.contexts.get(ctx))
      .and_then(|ctx| ctx.env.get(name).cloned())
      .or_else(|| std::env::var(name).ok());
    let digest = match &value {
      Some(v) => hash_bytes(format!("set:{}", v).as_bytes()),
      None => hash_bytes(b"unset"),
    };
    (value, Trace::single(Dep::Env(name.to_string()), Some(digest)))
  }
}
