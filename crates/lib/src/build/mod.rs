//! Dependency descriptions.
//!
//! A [`Build<T>`] describes a computation that needs a set of dependencies
//! before it can produce a `T`. Part of the set is known without running
//! anything (the declared deps, used for introspection); the rest is
//! discovered while evaluating (e.g. after reading a generated file).
//!
//! Evaluating a description yields its value together with a [`Trace`]: the
//! full set of dependencies that were actually needed, their digests, and
//! any library dependencies recorded along the way.
//!
//! # Submodules
//!
//! - [`lib_deps`] - required/optional library dependency records

pub mod lib_deps;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::{BoxFuture, try_join_all};

use crate::dep::{Dep, DepSet, FileSelector};
use crate::error::BuildError;
use crate::execute::eval::Eval;
use crate::path::Path;
use crate::util::hash::ContentHash;

pub use lib_deps::{LibDepKind, LibDeps};

/// Dependencies observed while evaluating a description.
///
/// `digests` only has entries for dependencies that were built; inspection
/// records dependencies without building them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Trace {
  pub deps: DepSet,
  pub digests: BTreeMap<Dep, ContentHash>,
  pub lib_deps: LibDeps,
}

impl Trace {
  pub fn new() -> Self {
    Self::default()
  }

  /// Trace of a single dependency.
  pub fn single(dep: Dep, digest: Option<ContentHash>) -> Self {
    let mut trace = Trace::default();
    trace.record(dep, digest);
    trace
  }

  pub fn record(&mut self, dep: Dep, digest: Option<ContentHash>) {
    if let Some(digest) = digest {
      self.digests.insert(dep.clone(), digest);
    }
    self.deps.insert(dep);
  }

  pub fn merge(&mut self, other: Trace) {
    self.deps.extend(&other.deps);
    self.digests.extend(other.digests);
    self.lib_deps.merge(&other.lib_deps);
  }
}

pub(crate) type EvalFuture<T> = BoxFuture<'static, Result<(T, Trace), BuildError>>;
type Thunk<T> = Arc<dyn Fn(Eval) -> EvalFuture<T> + Send + Sync>;

/// A computation with dependencies.
///
/// Descriptions are immutable and cheap to clone. Combining them never runs
/// anything; only the engine evaluates them.
pub struct Build<T> {
  declared: DepSet,
  thunk: Thunk<T>,
}

impl<T> Clone for Build<T> {
  fn clone(&self) -> Self {
    Self {
      declared: self.declared.clone(),
      thunk: self.thunk.clone(),
    }
  }
}

impl<T> fmt::Debug for Build<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Build").field("declared", &self.declared).finish_non_exhaustive()
  }
}

impl<T: Send + 'static> Build<T> {
  pub(crate) fn from_fn<F>(declared: DepSet, f: F) -> Self
  where
    F: Fn(Eval) -> EvalFuture<T> + Send + Sync + 'static,
  {
    Self {
      declared,
      thunk: Arc::new(f),
    }
  }

  /// Dependencies known without evaluating anything.
  pub fn declared_deps(&self) -> &DepSet {
    &self.declared
  }

  pub(crate) fn eval(&self, eval: Eval) -> EvalFuture<T> {
    (self.thunk)(eval)
  }

  /// A description that always fails with `err` when evaluated.
  pub fn fail(err: BuildError) -> Self {
    Self::from_fn(DepSet::new(), move |_| {
      let err = err.clone();
      async move { Err(err) }.boxed()
    })
  }

  pub fn map<U, F>(self, f: F) -> Build<U>
  where
    U: Send + 'static,
    F: Fn(T) -> U + Send + Sync + 'static,
  {
    let f = Arc::new(f);
    let declared = self.declared.clone();
    Build::from_fn(declared, move |eval| {
      let fut = self.eval(eval);
      let f = f.clone();
      async move {
        let (value, trace) = fut.await?;
        Ok((f(value), trace))
      }
      .boxed()
    })
  }

  /// Evaluate `self`, then the description computed from its value.
  ///
  /// Only the deps of `self` are declared; those of the second stage are
  /// discovered during evaluation.
  pub fn and_then<U, F>(self, f: F) -> Build<U>
  where
    U: Send + 'static,
    F: Fn(T) -> Build<U> + Send + Sync + 'static,
  {
    let f = Arc::new(f);
    let declared = self.declared.clone();
    Build::from_fn(declared, move |eval| {
      let first = self.eval(eval.clone());
      let f = f.clone();
      async move {
        let (value, mut trace) = first.await?;
        let (out, second) = f(value).eval(eval).await?;
        trace.merge(second);
        Ok((out, trace))
      }
      .boxed()
    })
  }

  /// Evaluate both descriptions concurrently.
  pub fn zip<U: Send + 'static>(self, other: Build<U>) -> Build<(T, U)> {
    let declared = self.declared.union(&other.declared);
    Build::from_fn(declared, move |eval| {
      let left = self.eval(eval.clone());
      let right = other.eval(eval);
      async move {
        let ((a, mut trace), (b, trace_b)) = futures::try_join!(left, right)?;
        trace.merge(trace_b);
        Ok(((a, b), trace))
      }
      .boxed()
    })
  }

  /// Evaluate both, keep the value of `next`.
  pub fn then<U: Send + 'static>(self, next: Build<U>) -> Build<U> {
    self.zip(next).map(|(_, value)| value)
  }

  /// Evaluate every description concurrently.
  pub fn all(builds: Vec<Build<T>>) -> Build<Vec<T>> {
    let mut declared = DepSet::new();
    for build in &builds {
      declared.extend(&build.declared);
    }
    let builds = Arc::new(builds);
    Build::from_fn(declared, move |eval| {
      let futs: Vec<_> = builds.iter().map(|b| b.eval(eval.clone())).collect();
      async move {
        let results = try_join_all(futs).await?;
        let mut trace = Trace::new();
        let mut values = Vec::with_capacity(results.len());
        for (value, t) in results {
          values.push(value);
          trace.merge(t);
        }
        Ok((values, trace))
      }
      .boxed()
    })
  }
}

impl<T: Clone + Send + Sync + 'static> Build<T> {
  /// A value with no dependencies.
  pub fn pure(value: T) -> Self {
    Self::from_fn(DepSet::new(), move |_| {
      let value = value.clone();
      async move { Ok((value, Trace::new())) }.boxed()
    })
  }
}

impl<T: Send + 'static> Build<(T, Vec<Path>)> {
  /// Depend on paths computed by the description itself.
  pub fn dyn_paths(self) -> Build<T> {
    let declared = self.declared.clone();
    Build::from_fn(declared, move |eval| {
      let first = self.eval(eval.clone());
      async move {
        let ((value, paths), mut trace) = first.await?;
        let deps: DepSet = paths.into_iter().map(Dep::File).collect();
        trace.merge(eval.need(&deps).await?);
        Ok((value, trace))
      }
      .boxed()
    })
  }
}

impl Build<()> {
  pub fn empty() -> Self {
    Build::pure(())
  }

  /// Depend on a set of dependencies.
  pub fn deps(deps: DepSet) -> Self {
    let declared = deps.clone();
    let deps = Arc::new(deps);
    Build::from_fn(declared, move |eval| {
      let deps = deps.clone();
      async move {
        let trace = eval.need(&deps).await?;
        Ok(((), trace))
      }
      .boxed()
    })
  }

  pub fn path(path: Path) -> Self {
    Build::deps(DepSet::singleton(Dep::File(path)))
  }

  pub fn paths(paths: impl IntoIterator<Item = Path>) -> Self {
    Build::deps(paths.into_iter().map(Dep::File).collect())
  }

  /// Record library dependencies for introspection.
  pub fn record_lib_deps(lib_deps: LibDeps) -> Self {
    Build::from_fn(DepSet::new(), move |_| {
      let trace = Trace {
        lib_deps: lib_deps.clone(),
        ..Trace::default()
      };
      async move { Ok(((), trace)) }.boxed()
    })
  }
}

impl Build<String> {
  /// Contents of a file, which is built first if it is a target.
  pub fn contents(path: Path) -> Self {
    let declared = DepSet::singleton(Dep::File(path.clone()));
    Build::from_fn(declared, move |eval| {
      let path = path.clone();
      async move { eval.read_file(&path).await }.boxed()
    })
  }
}

impl Build<Vec<String>> {
  /// Lines of a file, without line terminators.
  pub fn lines_of(path: Path) -> Self {
    Build::contents(path).map(|text| text.lines().map(str::to_string).collect())
  }
}

impl Build<BTreeSet<Path>> {
  /// Paths matched by a selector.
  ///
  /// Depends on the directory listing only; the matched files are not built.
  pub fn eval_pred(selector: FileSelector) -> Self {
    let declared = DepSet::singleton(Dep::FileSelector(selector.clone()));
    Build::from_fn(declared, move |eval| {
      let selector = selector.clone();
      async move { eval.select(&selector).await }.boxed()
    })
  }

  /// Paths matched by a selector, with every matched file built.
  pub fn paths_matching(selector: FileSelector) -> Self {
    Build::eval_pred(selector)
      .map(|paths| {
        let list = paths.iter().cloned().collect::<Vec<_>>();
        (paths, list)
      })
      .dyn_paths()
  }
}

impl Build<Option<String>> {
  /// Value of an environment variable of the current context.
  pub fn env_var(name: &str) -> Self {
    let name = name.to_string();
    let declared = DepSet::singleton(Dep::Env(name.clone()));
    Build::from_fn(declared, move |eval| {
      let name = name.clone();
      async move { Ok(eval.env_var(&name)) }.boxed()
    })
  }
}
