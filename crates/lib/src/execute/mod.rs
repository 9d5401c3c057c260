//! Build execution.
//!
//! [`BuildSystem`] is the entry point: it holds the registered contexts,
//! generators and caching mode, and a [`Session`](session::Session) with the
//! state of the current generation. It handles:
//! - Lazy loading of rule directories
//! - Deduplicated, concurrent realization of rules with bounded parallelism
//! - Cycle detection between waiting rules and aliases
//! - Cancellation of new work after the first fatal failure
//! - Introspection of the loaded rule graph

pub(crate) mod cycle;
pub(crate) mod eval;
pub(crate) mod inspect;
pub(crate) mod realize;
pub(crate) mod session;
pub mod trace_db;
pub mod types;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use tracing::{info, warn};

use crate::build::{Build, LibDeps};
use crate::cache::CachingMode;
use crate::error::BuildError;
use crate::load::LoadedDir;
use crate::package::{PackageAssignment, PackageName};
use crate::path::{BuildRoot, Context, Layout, Path};
use crate::rule::RuleGenerators;
use crate::util::lock;

use eval::Eval;
use inspect::Inspector;
use session::{Session, SessionParams};
use trace_db::TraceDb;

pub use types::{
  BuildStats, Diagnostic, EvaluatedRules, ExecuteConfig, JOBS_ENV, Realization, RuleOutcome, SANDBOX_ENV,
};

#[derive(Clone, Default)]
struct Registry {
  generators: RuleGenerators,
  packages: Option<PackageAssignment>,
}

/// The incremental build engine.
pub struct BuildSystem {
  layout: Layout,
  contexts: Vec<Context>,
  caching: CachingMode,
  config: ExecuteConfig,
  registry: RwLock<Registry>,
  rule_ids: Arc<AtomicU64>,
  generation: AtomicU64,
  trace_db: Arc<Mutex<TraceDb>>,
  session: RwLock<Arc<Session>>,
}

/// Counts a `do_build` as in flight for as long as it lives.
struct InFlight(Arc<Session>);

impl InFlight {
  fn new(session: Arc<Session>) -> Self {
    session.in_flight.fetch_add(1, Ordering::SeqCst);
    Self(session)
  }
}

impl Drop for InFlight {
  fn drop(&mut self) {
    self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
  }
}

/// Builds plus spawned tasks still running in a session.
fn busy(session: &Session) -> usize {
  session.in_flight.load(Ordering::SeqCst) + session.tasks.running()
}

impl BuildSystem {
  /// Create the engine for a set of contexts.
  ///
  /// Context names must be unique. Generators are registered separately
  /// with [`set_rule_generators`](Self::set_rule_generators).
  pub fn init(layout: Layout, contexts: Vec<Context>, caching: CachingMode, config: ExecuteConfig) -> Result<Self, BuildError> {
    let mut seen = BTreeSet::new();
    for ctx in &contexts {
      if !seen.insert(ctx.name.clone()) {
        return Err(BuildError::user(format!("context {} is declared twice", ctx.name)));
      }
    }

    let trace_db = Arc::new(Mutex::new(TraceDb::load(&layout.build_root)));
    let rule_ids = Arc::new(AtomicU64::new(0));
    let registry = Registry::default();
    let session = Arc::new(Session::new(SessionParams {
      generation: 0,
      layout: layout.clone(),
      contexts: contexts.clone(),
      caching: caching.clone(),
      config: config.clone(),
      generators: registry.generators.clone(),
      packages: None,
      rule_ids: rule_ids.clone(),
      trace_db: trace_db.clone(),
    }));

    info!(
      contexts = contexts.len(),
      caching = %caching.setting(),
      parallelism = config.parallelism,
      "build system initialized"
    );

    Ok(Self {
      layout,
      contexts,
      caching,
      config,
      registry: RwLock::new(registry),
      rule_ids,
      generation: AtomicU64::new(0),
      trace_db,
      session: RwLock::new(session),
    })
  }

  pub fn contexts(&self) -> &[Context] {
    &self.contexts
  }

  pub fn layout(&self) -> &Layout {
    &self.layout
  }

  pub fn config(&self) -> &ExecuteConfig {
    &self.config
  }

  /// The active caching mode.
  pub fn get_memory(&self) -> &CachingMode {
    &self.caching
  }

  pub fn generation(&self) -> u64 {
    self.generation.load(Ordering::SeqCst)
  }

  fn session(&self) -> Arc<Session> {
    self.session.read().unwrap_or_else(|e| e.into_inner()).clone()
  }

  /// Register the rule generators and start a fresh generation.
  pub fn set_rule_generators(&self, generators: RuleGenerators) -> Result<(), BuildError> {
    self.ensure_idle()?;
    self.registry.write().unwrap_or_else(|e| e.into_inner()).generators = generators;
    self.reset()
  }

  /// Register the package assignment and start a fresh generation.
  pub fn set_packages<F>(&self, assignment: F) -> Result<(), BuildError>
  where
    F: Fn(&Path) -> BTreeSet<PackageName> + Send + Sync + 'static,
  {
    self.ensure_idle()?;
    self.registry.write().unwrap_or_else(|e| e.into_inner()).packages = Some(Arc::new(assignment));
    self.reset()
  }

  fn ensure_idle(&self) -> Result<(), BuildError> {
    let in_flight = busy(&self.session());
    if in_flight > 0 {
      return Err(BuildError::BuildInProgress(in_flight));
    }
    Ok(())
  }

  /// Discard every loaded directory, rule and outcome.
  ///
  /// Registered contexts, generators and package assignment are kept.
  pub fn reset(&self) -> Result<(), BuildError> {
    let mut current = self.session.write().unwrap_or_else(|e| e.into_inner());
    let in_flight = busy(&current);
    if in_flight > 0 {
      return Err(BuildError::BuildInProgress(in_flight));
    }

    let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
    let registry = self.registry.read().unwrap_or_else(|e| e.into_inner()).clone();
    *current = Arc::new(Session::new(SessionParams {
      generation,
      layout: self.layout.clone(),
      contexts: self.contexts.clone(),
      caching: self.caching.clone(),
      config: self.config.clone(),
      generators: registry.generators,
      packages: registry.packages,
      rule_ids: self.rule_ids.clone(),
      trace_db: self.trace_db.clone(),
    }));
    info!(generation, "started new build generation");
    Ok(())
  }

  /// Evaluate a request, building everything it depends on.
  pub async fn do_build<T: Send + 'static>(&self, request: Build<T>) -> Result<T, BuildError> {
    let session = self.session();
    let _in_flight = InFlight::new(session.clone());
    session.check_cancelled()?;

    let result = request.eval(Eval::execute(session.clone(), None, None)).await;
    if result.is_err() {
      session.tasks.drain().await;
    }

    if let Err(e) = lock(&self.trace_db).save() {
      warn!(error = %e, "failed to save trace database");
    }

    match result {
      Ok((value, _)) => Ok(value),
      Err(e) => {
        session.record_failure(&e);
        Err(session.first_failure().unwrap_or(e))
      }
    }
  }

  /// Rules a request depends on, dependencies first, without running
  /// their actions.
  ///
  /// With `recursive` the walk continues through the dependencies of every
  /// rule found; otherwise only the rules the request needs directly are
  /// returned.
  pub async fn evaluate_rules<T: Send + 'static>(&self, recursive: bool, request: Build<T>) -> Result<EvaluatedRules, BuildError> {
    let inspector = self.inspect(recursive, request).await?;
    inspector.evaluated_rules()
  }

  /// Library dependencies recorded by the rules a request transitively
  /// depends on, merged per rule directory.
  pub async fn all_lib_deps<T: Send + 'static>(&self, request: Build<T>) -> Result<BTreeMap<Path, LibDeps>, BuildError> {
    let inspector = self.inspect(true, request).await?;
    Ok(inspector.lib_deps_by_dir())
  }

  async fn inspect<T: Send + 'static>(&self, recursive: bool, request: Build<T>) -> Result<Arc<Inspector>, BuildError> {
    let session = self.session();
    let _in_flight = InFlight::new(session.clone());
    session.check_cancelled()?;

    let inspector = Inspector::new(recursive);
    let result = request
      .eval(Eval::inspect(session.clone(), None, None, inspector.clone()))
      .await;
    if result.is_err() {
      session.tasks.drain().await;
    }
    result?;
    Ok(inspector)
  }

  /// Targets of every directory loaded so far.
  pub fn all_targets(&self) -> BTreeSet<Path> {
    self
      .session()
      .loaded_dirs()
      .iter()
      .flat_map(|dir| dir.targets().cloned().collect::<Vec<_>>())
      .collect()
  }

  /// Targets of a build directory, loading it if needed.
  pub async fn targets_of(&self, dir: &Path) -> Result<BTreeSet<Path>, BuildError> {
    if !dir.is_build() {
      return Ok(BTreeSet::new());
    }
    let loaded = self.load_dir(dir).await?;
    Ok(loaded.targets().cloned().collect())
  }

  /// Load a build directory: run its generator (once per generation) and
  /// return the rules and aliases registered for it.
  pub async fn load_dir(&self, dir: &Path) -> Result<Arc<LoadedDir>, BuildError> {
    let Some((root, rel)) = dir.as_build() else {
      return Err(BuildError::InvalidPath {
        path: dir.to_string(),
        reason: "not a build directory".to_string(),
      });
    };
    self.session().load_dir(root.clone(), rel.clone()).await
  }

  /// Whether some rule produces `path`.
  pub async fn is_target(&self, path: &Path) -> Result<bool, BuildError> {
    if !path.is_build() {
      return Ok(false);
    }
    Ok(self.session().rule_for(path).await?.is_some())
  }

  /// Source files shadowed by `until_clean` promotion in the directories
  /// loaded so far. They are reported, never deleted.
  pub fn files_in_source_tree_to_delete(&self) -> BTreeSet<Path> {
    self
      .session()
      .loaded_dirs()
      .iter()
      .flat_map(|dir| dir.promoted.iter().cloned().collect::<Vec<_>>())
      .collect()
  }

  /// Non-fatal findings of the current generation.
  pub fn diagnostics(&self) -> Vec<Diagnostic> {
    self.session().diagnostics()
  }

  pub fn stats(&self) -> BuildStats {
    self.session().stats()
  }

  /// The build root of a context.
  pub fn context_root(&self, name: &str) -> Option<Path> {
    self
      .contexts
      .iter()
      .find(|c| c.name.as_str() == name)
      .map(|c| Path::build_root(BuildRoot::Context(c.name.clone())))
  }
}

impl std::fmt::Debug for BuildSystem {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("BuildSystem")
      .field("layout", &self.layout)
      .field("contexts", &self.contexts)
      .field("caching", &self.caching.setting())
      .field("generation", &self.generation())
      .finish_non_exhaustive()
  }
}
