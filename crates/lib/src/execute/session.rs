//! Per-generation build state.
//!
//! A [`Session`] owns everything derived during one generation: loaded
//! directories, rule outcomes, alias stamps, file digests, the wait-for
//! graph and the failure flag. `reset` drops the session and builds a new
//! one; nothing in here is ever cleared in place.
//!
//! Every memoized computation is spawned as its own task the first time it
//! is requested and shared by all later requesters, so it runs exactly once
//! per generation and finishes even when the requester that started it
//! gives up. A failed build waits for those tasks before it returns, so
//! nothing from an abandoned generation is still writing once `reset` is
//! allowed.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::hash::Hash;
use std::io;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use tokio::sync::{Notify, Semaphore};
use tracing::{debug, error};

use super::cycle::{Node, WaitGraph};
use super::realize;
use super::trace_db::TraceDb;
use super::types::{BuildStats, Diagnostic, ExecuteConfig, RuleOutcome};
use crate::alias::Alias;
use crate::cache::CachingMode;
use crate::dep::FileSelector;
use crate::error::BuildError;
use crate::load::{self, InitOutput, LoadedDir};
use crate::package::PackageAssignment;
use crate::path::source_tree::list_source_dir;
use crate::path::{BuildRoot, Context, ContextName, Layout, Path, RelPath};
use crate::rule::{Rule, RuleGenerators};
use crate::util::hash::{ContentHash, hash_bytes, hash_file_async};
use crate::util::lock;

pub(crate) type SharedResult<T> = Shared<BoxFuture<'static, Result<T, BuildError>>>;

/// Inputs of a new generation.
pub(crate) struct SessionParams {
  pub generation: u64,
  pub layout: Layout,
  pub contexts: Vec<Context>,
  pub caching: CachingMode,
  pub config: ExecuteConfig,
  pub generators: RuleGenerators,
  pub packages: Option<PackageAssignment>,
  pub rule_ids: Arc<AtomicU64>,
  pub trace_db: Arc<Mutex<TraceDb>>,
}

pub(crate) struct Session {
  pub generation: u64,
  pub layout: Layout,
  pub contexts: BTreeMap<ContextName, Context>,
  pub caching: CachingMode,
  pub config: ExecuteConfig,
  pub generators: RuleGenerators,
  pub packages: Option<PackageAssignment>,
  pub rule_ids: Arc<AtomicU64>,
  pub semaphore: Arc<Semaphore>,
  pub trace_db: Arc<Mutex<TraceDb>>,
  pub in_flight: AtomicUsize,
  pub tasks: Arc<Tasks>,

  init: Mutex<Option<SharedResult<Arc<InitOutput>>>>,
  dirs: Mutex<HashMap<(BuildRoot, RelPath), SharedResult<Arc<LoadedDir>>>>,
  loaded: Mutex<BTreeMap<Path, Arc<LoadedDir>>>,
  rules: Mutex<HashMap<crate::rule::RuleId, SharedResult<Arc<RuleOutcome>>>>,
  aliases: Mutex<HashMap<Alias, SharedResult<ContentHash>>>,
  file_digests: Mutex<HashMap<Path, ContentHash>>,
  waits: Mutex<WaitGraph>,
  failure: Mutex<Option<BuildError>>,
  diagnostics: Mutex<Vec<Diagnostic>>,
  executed: AtomicUsize,
  cache_hits: AtomicUsize,
  up_to_date: AtomicUsize,
}

/// Removes a wait-for edge when the waiter stops waiting.
pub(crate) struct WaitGuard {
  session: Arc<Session>,
  from: Node,
  to: Node,
}

impl Drop for WaitGuard {
  fn drop(&mut self) {
    lock(&self.session.waits).remove_wait(&self.from, &self.to);
  }
}

/// Tasks spawned by a generation that have not finished yet.
#[derive(Default)]
pub(crate) struct Tasks {
  running: AtomicUsize,
  idle: Notify,
}

struct TaskGuard(Arc<Tasks>);

impl Drop for TaskGuard {
  fn drop(&mut self) {
    if self.0.running.fetch_sub(1, Ordering::SeqCst) == 1 {
      self.0.idle.notify_waiters();
    }
  }
}

impl Tasks {
  pub fn running(&self) -> usize {
    self.running.load(Ordering::SeqCst)
  }

  /// Wait until every spawned task has finished, including tasks spawned
  /// while waiting.
  pub async fn drain(&self) {
    loop {
      let idle = self.idle.notified();
      if self.running() == 0 {
        return;
      }
      idle.await;
    }
  }

  fn spawn_shared<T>(self: &Arc<Self>, fut: BoxFuture<'static, Result<T, BuildError>>) -> SharedResult<T>
  where
    T: Clone + Send + Sync + 'static,
  {
    self.running.fetch_add(1, Ordering::SeqCst);
    let guard = TaskGuard(self.clone());
    let handle = tokio::spawn(async move {
      let _guard = guard;
      fut.await
    });
    async move {
      match handle.await {
        Ok(result) => result,
        Err(e) => Err(BuildError::user(format!("build task aborted: {}", e))),
      }
    }
    .boxed()
    .shared()
  }
}

/// Return the shared computation for `key`, spawning it on first request.
fn memoize<K, T, F>(tasks: &Arc<Tasks>, table: &Mutex<HashMap<K, SharedResult<T>>>, key: K, start: F) -> SharedResult<T>
where
  K: Eq + Hash,
  T: Clone + Send + Sync + 'static,
  F: FnOnce() -> BoxFuture<'static, Result<T, BuildError>>,
{
  let mut table = lock(table);
  if let Some(existing) = table.get(&key) {
    return existing.clone();
  }
  let shared = tasks.spawn_shared(start());
  table.insert(key, shared.clone());
  shared
}

impl Session {
  pub fn new(params: SessionParams) -> Self {
    let SessionParams {
      generation,
      layout,
      contexts,
      caching,
      config,
      generators,
      packages,
      rule_ids,
      trace_db,
    } = params;

    Self {
      generation,
      layout,
      contexts: contexts.into_iter().map(|c| (c.name.clone(), c)).collect(),
      caching,
      semaphore: Arc::new(Semaphore::new(config.parallelism.max(1))),
      config,
      generators,
      packages,
      rule_ids,
      trace_db,
      in_flight: AtomicUsize::new(0),
      tasks: Arc::new(Tasks::default()),
      init: Mutex::new(None),
      dirs: Mutex::new(HashMap::new()),
      loaded: Mutex::new(BTreeMap::new()),
      rules: Mutex::new(HashMap::new()),
      aliases: Mutex::new(HashMap::new()),
      file_digests: Mutex::new(HashMap::new()),
      waits: Mutex::new(WaitGraph::default()),
      failure: Mutex::new(None),
      diagnostics: Mutex::new(Vec::new()),
      executed: AtomicUsize::new(0),
      cache_hits: AtomicUsize::new(0),
      up_to_date: AtomicUsize::new(0),
    }
  }

  // === Failure and cancellation ===

  /// Fails with `Cancelled` once the generation has failed.
  pub fn check_cancelled(&self) -> Result<(), BuildError> {
    if lock(&self.failure).is_some() {
      return Err(BuildError::Cancelled);
    }
    Ok(())
  }

  /// Remember the first fatal error of the generation.
  pub fn record_failure(&self, err: &BuildError) {
    if matches!(err, BuildError::Cancelled) {
      return;
    }
    let mut failure = lock(&self.failure);
    if failure.is_none() {
      error!(generation = self.generation, error = %err, "build failed");
      *failure = Some(err.clone());
    }
  }

  pub fn first_failure(&self) -> Option<BuildError> {
    lock(&self.failure).clone()
  }

  // === Diagnostics and counters ===

  pub fn push_diagnostic(&self, diagnostic: Diagnostic) {
    lock(&self.diagnostics).push(diagnostic);
  }

  pub fn diagnostics(&self) -> Vec<Diagnostic> {
    lock(&self.diagnostics).clone()
  }

  pub fn count_executed(&self) {
    self.executed.fetch_add(1, Ordering::Relaxed);
  }

  pub fn count_cache_hit(&self) {
    self.cache_hits.fetch_add(1, Ordering::Relaxed);
  }

  pub fn count_up_to_date(&self) {
    self.up_to_date.fetch_add(1, Ordering::Relaxed);
  }

  pub fn stats(&self) -> BuildStats {
    BuildStats {
      executed: self.executed.load(Ordering::Relaxed),
      cache_hits: self.cache_hits.load(Ordering::Relaxed),
      up_to_date: self.up_to_date.load(Ordering::Relaxed),
    }
  }

  /// Environment variables of a context; empty for context-less rules.
  pub fn context_env(&self, context: Option<&ContextName>) -> BTreeMap<String, String> {
    context
      .and_then(|name| self.contexts.get(name))
      .map(|ctx| ctx.env.clone())
      .unwrap_or_default()
  }

  // === Cycle detection ===

  /// Record that `from` is about to wait on `to`.
  pub fn wait_for(self: &Arc<Self>, from: Option<&Node>, to: &Node) -> Result<Option<WaitGuard>, BuildError> {
    let Some(from) = from else {
      return Ok(None);
    };
    lock(&self.waits).add_wait(from, to)?;
    Ok(Some(WaitGuard {
      session: self.clone(),
      from: from.clone(),
      to: to.clone(),
    }))
  }

  // === Directories ===

  /// Rules registered by the init callback. Runs once per generation.
  pub fn init_rules(self: &Arc<Self>) -> BoxFuture<'static, Result<Arc<InitOutput>, BuildError>> {
    let shared = {
      let mut cell = lock(&self.init);
      match &*cell {
        Some(shared) => shared.clone(),
        None => {
          let shared = self.tasks.spawn_shared(load::run_init(self.clone()));
          *cell = Some(shared.clone());
          shared
        }
      }
    };
    shared.boxed()
  }

  /// Load the rules of a build directory. Runs once per directory per generation.
  pub fn load_dir(self: &Arc<Self>, root: BuildRoot, rel: RelPath) -> BoxFuture<'static, Result<Arc<LoadedDir>, BuildError>> {
    let session = self.clone();
    let key = (root.clone(), rel.clone());
    memoize(&self.tasks, &self.dirs, key, move || {
      async move {
        let loaded = load::load_dir(session.clone(), root, rel).await?;
        lock(&session.loaded).insert(loaded.dir.clone(), loaded.clone());
        Ok(loaded)
      }
      .boxed()
    })
    .boxed()
  }

  /// Directories loaded so far.
  pub fn loaded_dirs(&self) -> Vec<Arc<LoadedDir>> {
    lock(&self.loaded).values().cloned().collect()
  }

  /// The rule producing a build path, loading its directory if needed.
  pub fn rule_for(self: &Arc<Self>, path: &Path) -> BoxFuture<'static, Result<Option<Arc<Rule>>, BuildError>> {
    let session = self.clone();
    let path = path.clone();
    async move {
      let Some(dir) = path.parent() else {
        return Ok(None);
      };
      let Some((root, rel)) = dir.as_build() else {
        return Ok(None);
      };
      let loaded = session.load_dir(root.clone(), rel.clone()).await?;
      Ok(loaded.by_target.get(&path).cloned())
    }
    .boxed()
  }

  // === Building ===

  /// Make a path available and return its digest.
  pub fn build_path(self: &Arc<Self>, from: Option<Node>, path: Path) -> BoxFuture<'static, Result<ContentHash, BuildError>> {
    let session = self.clone();
    async move {
      match &path {
        Path::Source(_) | Path::External(_) => session.file_digest(&path).await,
        Path::Build(..) => {
          let rule = session
            .rule_for(&path)
            .await?
            .ok_or_else(|| BuildError::NoRule(path.clone()))?;
          let outcome = session.execute_rule(from, rule).await?;
          outcome.targets.get(&path).cloned().ok_or(BuildError::NoRule(path))
        }
      }
    }
    .boxed()
  }

  /// Realize a rule. Runs once per rule per generation.
  pub fn execute_rule(self: &Arc<Self>, from: Option<Node>, rule: Arc<Rule>) -> BoxFuture<'static, Result<Arc<RuleOutcome>, BuildError>> {
    let session = self.clone();
    async move {
      let node = Node::rule(&rule);
      let shared = memoize(&session.tasks, &session.rules, rule.id, || realize::run_rule(session.clone(), rule.clone()));
      let _guard = session.wait_for(from.as_ref(), &node)?;
      shared.await
    }
    .boxed()
  }

  /// Build an alias and return its stamp. Runs once per alias per generation.
  pub fn build_alias(self: &Arc<Self>, from: Option<Node>, alias: Alias) -> BoxFuture<'static, Result<ContentHash, BuildError>> {
    let session = self.clone();
    async move {
      let node = Node::alias(&alias);
      let shared = memoize(&session.tasks, &session.aliases, alias.clone(), || {
        realize::run_alias(session.clone(), alias.clone())
      });
      let _guard = session.wait_for(from.as_ref(), &node)?;
      shared.await
    }
    .boxed()
  }

  /// Digest of a source or external file, computed once per generation.
  pub async fn file_digest(&self, path: &Path) -> Result<ContentHash, BuildError> {
    if let Some(digest) = lock(&self.file_digests).get(path) {
      return Ok(digest.clone());
    }
    let resolved = self.layout.resolve(path);
    match tokio::fs::metadata(&resolved).await {
      Ok(meta) if meta.is_file() => {}
      Ok(_) => {
        return Err(BuildError::Io {
          path: resolved.display().to_string(),
          message: "not a regular file".to_string(),
        });
      }
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(BuildError::MissingFile(path.clone())),
      Err(e) => return Err(BuildError::io(&resolved, e)),
    }
    let digest = hash_file_async(&resolved).await?;
    lock(&self.file_digests).insert(path.clone(), digest.clone());
    Ok(digest)
  }

  /// Paths a selector matches and the digest of the listing they came from.
  pub fn select(self: &Arc<Self>, selector: FileSelector) -> BoxFuture<'static, Result<(BTreeSet<Path>, ContentHash), BuildError>> {
    let session = self.clone();
    async move {
      let names: BTreeSet<String> = match &selector.dir {
        Path::Build(root, rel) => {
          let loaded = session.load_dir(root.clone(), rel.clone()).await?;
          loaded.by_target.keys().map(Path::basename).collect()
        }
        Path::Source(rel) => list_source_dir(&session.layout, rel).await?.files,
        Path::External(dir) => list_external_dir(dir).await?,
      };

      let matched: BTreeSet<String> = names.into_iter().filter(|n| selector.glob.matches(n)).collect();
      let listing = matched.iter().cloned().collect::<Vec<_>>().join("\n");
      debug!(selector = %selector, matched = matched.len(), "evaluated file selector");

      let paths = matched.iter().map(|n| selector.dir.join(n)).collect();
      Ok((paths, hash_bytes(listing.as_bytes())))
    }
    .boxed()
  }
}

async fn list_external_dir(dir: &std::path::Path) -> Result<BTreeSet<String>, BuildError> {
  let mut names = BTreeSet::new();
  let mut entries = match tokio::fs::read_dir(dir).await {
    Ok(entries) => entries,
    Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(names),
    Err(e) => return Err(BuildError::io(dir, e)),
  };
  while let Some(entry) = entries.next_entry().await.map_err(|e| BuildError::io(dir, e))? {
    let file_type = entry.file_type().await.map_err(|e| BuildError::io(entry.path(), e))?;
    if file_type.is_file() {
      names.insert(entry.file_name().to_string_lossy().to_string());
    }
  }
  Ok(names)
}
