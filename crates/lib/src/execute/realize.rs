//! Realization of rules and aliases.
//!
//! A rule is realized by evaluating its action description (which builds
//! every dependency), computing its key, and then producing the targets in
//! one of three ways: skipping because the trace database shows them up to
//! date, materializing them from the cache, or running the action.

use std::collections::BTreeMap;
use std::io;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::{BoxFuture, try_join_all};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::cycle::Node;
use super::eval::Eval;
use super::session::Session;
use super::trace_db::TraceEntry;
use super::types::{Diagnostic, Realization, RuleOutcome};
use crate::action::{Action, ActionEnv, ActionError, Sandbox, SandboxPreference, run_action};
use crate::alias::{Alias, AliasItem};
use crate::build::Trace;
use crate::cache::{CacheClient, CacheKey, CachedFile, CachedOutputs, CachingMode};
use crate::consts::RULE_KEY_VERSION;
use crate::error::BuildError;
use crate::path::Path;
use crate::rule::Rule;
use crate::util::hash::{ContentHash, Hashable, combine, hash_bytes, hash_file_async};
use crate::util::lock;

/// Everything a rule's outputs are a function of.
#[derive(Serialize)]
struct RuleKeyInput<'a> {
  version: u32,
  action: &'a Action,
  targets: Vec<String>,
  deps: Vec<(String, &'a ContentHash)>,
  env: &'a BTreeMap<String, String>,
}

impl Hashable for RuleKeyInput<'_> {}

fn rule_key(rule: &Rule, action: &Action, trace: &Trace, env: &BTreeMap<String, String>) -> Result<CacheKey, BuildError> {
  let mut deps: Vec<(String, &ContentHash)> = trace.digests.iter().map(|(dep, digest)| (dep.to_string(), digest)).collect();
  deps.sort();
  let input = RuleKeyInput {
    version: RULE_KEY_VERSION,
    action,
    targets: rule.targets.iter().map(ToString::to_string).collect(),
    deps,
    env,
  };
  input.compute_hash().map_err(|e| BuildError::Serialize {
    what: format!("key of rule {}", rule.id),
    message: e.to_string(),
  })
}

/// Trace database entries are keyed by the rule's first target, which is
/// stable across generations while rule ids are not.
fn trace_db_key(rule: &Rule) -> String {
  rule
    .targets
    .iter()
    .next()
    .map(ToString::to_string)
    .unwrap_or_else(|| rule.id.to_string())
}

/// Realize a rule, recording the generation's failure if it fails.
pub(crate) fn run_rule(session: Arc<Session>, rule: Arc<Rule>) -> BoxFuture<'static, Result<Arc<RuleOutcome>, BuildError>> {
  async move {
    let result = realize_rule(&session, &rule).await;
    if let Err(e) = &result {
      session.record_failure(e);
    }
    result.map(Arc::new)
  }
  .boxed()
}

async fn realize_rule(session: &Arc<Session>, rule: &Rule) -> Result<RuleOutcome, BuildError> {
  session.check_cancelled()?;

  // Build every dependency and obtain the concrete action
  let eval = Eval::execute(session.clone(), Some(Node::rule(rule)), rule.context.clone());
  let (action, trace) = rule.action.eval(eval).await?;
  session.check_cancelled()?;

  let env = session.context_env(rule.context.as_ref());
  let key = rule_key(rule, &action, &trace, &env)?;
  let db_key = trace_db_key(rule);

  let _permit = session
    .semaphore
    .clone()
    .acquire_owned()
    .await
    .map_err(|_| BuildError::Cancelled)?;
  session.check_cancelled()?;

  if !matches!(session.caching, CachingMode::Check(_))
    && let Some(targets) = up_to_date(session, rule, &db_key, &key).await?
  {
    debug!(rule = %rule.id, key = %key.short(), "rule is up to date");
    session.count_up_to_date();
    return Ok(RuleOutcome {
      targets,
      realization: Realization::UpToDate,
    });
  }

  let (targets, realization) = match &session.caching {
    CachingMode::Disabled => (execute(session, rule, &action, &trace, &env).await?, Realization::Executed),
    CachingMode::Enabled(client) => {
      let cached = client.lookup(&key).await?;
      let restored = match cached {
        Some(cached) => materialize(session, rule, &cached).await?,
        None => None,
      };
      match restored {
        Some(targets) => {
          info!(rule = %rule.id, key = %key.short(), "restored rule outputs from cache");
          session.count_cache_hit();
          (targets, Realization::CacheHit)
        }
        None => {
          debug!(rule = %rule.id, key = %key.short(), "cache miss");
          let targets = execute(session, rule, &action, &trace, &env).await?;
          store(session, client.as_ref(), &key, &targets).await?;
          (targets, Realization::Executed)
        }
      }
    }
    CachingMode::Check(client) => {
      let targets = execute(session, rule, &action, &trace, &env).await?;
      match client.lookup(&key).await? {
        Some(cached) => compare(session, rule, &cached, &targets),
        None => store(session, client.as_ref(), &key, &targets).await?,
      }
      (targets, Realization::Executed)
    }
  };

  lock(&session.trace_db).record(
    db_key,
    TraceEntry {
      key,
      targets: targets.iter().map(|(p, d)| (p.to_string(), d.clone())).collect(),
    },
  );

  Ok(RuleOutcome { targets, realization })
}

/// Targets recorded for an unchanged key, if they are all still in place.
async fn up_to_date(
  session: &Session,
  rule: &Rule,
  db_key: &str,
  key: &CacheKey,
) -> Result<Option<BTreeMap<Path, ContentHash>>, BuildError> {
  let Some(entry) = lock(&session.trace_db).get(db_key).cloned() else {
    return Ok(None);
  };
  if &entry.key != key || entry.targets.len() != rule.targets.len() {
    return Ok(None);
  }

  let mut targets = BTreeMap::new();
  for target in &rule.targets {
    let Some(recorded) = entry.targets.get(&target.to_string()) else {
      return Ok(None);
    };
    let resolved = session.layout.resolve(target);
    if !tokio::fs::try_exists(&resolved).await.unwrap_or(false) {
      return Ok(None);
    }
    let digest = hash_file_async(&resolved).await?;
    if &digest != recorded {
      return Ok(None);
    }
    targets.insert(target.clone(), digest);
  }
  Ok(Some(targets))
}

/// Run the action and hash what it produced.
async fn execute(
  session: &Session,
  rule: &Rule,
  action: &Action,
  trace: &Trace,
  env: &BTreeMap<String, String>,
) -> Result<BTreeMap<Path, ContentHash>, BuildError> {
  for target in &rule.targets {
    let resolved = session.layout.resolve(target);
    match tokio::fs::remove_file(&resolved).await {
      Ok(()) => {}
      Err(e) if e.kind() == io::ErrorKind::NotFound => {}
      Err(e) => return Err(BuildError::io(&resolved, e)),
    }
  }
  let dir = session.layout.resolve(&rule.dir);
  tokio::fs::create_dir_all(&dir)
    .await
    .map_err(|e| BuildError::io(&dir, e))?;

  let root = rule
    .dir
    .as_build()
    .map(|(root, _)| Path::build_root(root.clone()))
    .unwrap_or_else(|| rule.dir.clone());

  info!(rule = %rule.id, action = %action.describe(), "executing rule");
  let result = match session.config.sandbox {
    SandboxPreference::None => {
      let action_env = ActionEnv {
        layout: session.layout.clone(),
        env: env.clone(),
        cwd: session.layout.resolve(&root),
      };
      run_action(action, &action_env).await
    }
    SandboxPreference::Copy => {
      let sandbox = Sandbox::create(&session.layout)?;
      sandbox.populate(&session.layout, trace.deps.paths()).await?;
      let action_env = ActionEnv {
        layout: sandbox.layout().clone(),
        env: env.clone(),
        cwd: sandbox.layout().resolve(&root),
      };
      let result = run_action(action, &action_env).await;
      if result.is_ok() {
        sandbox.extract(&session.layout, &rule.targets).await?;
      }
      result
    }
  };
  result.map_err(|e| match e {
    ActionError::CmdFailed { cmd, code } => BuildError::CmdFailed { rule: rule.id, cmd, code },
    other => BuildError::ActionFailed {
      rule: rule.id,
      message: other.to_string(),
    },
  })?;
  session.count_executed();

  let mut targets = BTreeMap::new();
  for target in &rule.targets {
    let resolved = session.layout.resolve(target);
    if !tokio::fs::try_exists(&resolved).await.unwrap_or(false) {
      return Err(BuildError::TargetNotProduced {
        rule: rule.id,
        target: target.clone(),
      });
    }
    targets.insert(target.clone(), hash_file_async(&resolved).await?);
  }
  Ok(targets)
}

/// Write cached outputs as the rule's targets.
///
/// Returns `None` when the entry does not cover every target or a file's
/// contents do not match its digest; the caller then runs the action.
async fn materialize(
  session: &Session,
  rule: &Rule,
  cached: &CachedOutputs,
) -> Result<Option<BTreeMap<Path, ContentHash>>, BuildError> {
  let mut files = Vec::with_capacity(rule.targets.len());
  for target in &rule.targets {
    let Some(file) = cached.get(&target.basename()) else {
      debug!(rule = %rule.id, target = %target, "cache entry lacks a target");
      return Ok(None);
    };
    if hash_bytes(&file.contents) != file.digest {
      warn!(rule = %rule.id, target = %target, "cached file does not match its digest, ignoring entry");
      return Ok(None);
    }
    files.push((target, file));
  }

  let mut targets = BTreeMap::new();
  for (target, file) in files {
    let resolved = session.layout.resolve(target);
    if let Some(parent) = resolved.parent() {
      tokio::fs::create_dir_all(parent)
        .await
        .map_err(|e| BuildError::io(parent, e))?;
    }
    tokio::fs::write(&resolved, &file.contents)
      .await
      .map_err(|e| BuildError::io(&resolved, e))?;
    targets.insert(target.clone(), file.digest.clone());
  }
  Ok(Some(targets))
}

async fn store(
  session: &Session,
  client: &dyn CacheClient,
  key: &CacheKey,
  targets: &BTreeMap<Path, ContentHash>,
) -> Result<(), BuildError> {
  let mut outputs = CachedOutputs::default();
  for (target, digest) in targets {
    let resolved = session.layout.resolve(target);
    let contents = tokio::fs::read(&resolved)
      .await
      .map_err(|e| BuildError::io(&resolved, e))?;
    outputs.files.push(CachedFile {
      name: target.basename(),
      digest: digest.clone(),
      contents,
    });
  }
  client.store(key, &outputs).await?;
  debug!(key = %key.short(), files = outputs.files.len(), "stored rule outputs in cache");
  Ok(())
}

/// Report every target whose local digest differs from the cached one.
fn compare(session: &Session, rule: &Rule, cached: &CachedOutputs, targets: &BTreeMap<Path, ContentHash>) {
  for (target, local) in targets {
    let Some(file) = cached.get(&target.basename()) else {
      continue;
    };
    if &file.digest != local {
      warn!(
        rule = %rule.id,
        target = %target,
        cached = %file.digest.short(),
        local = %local.short(),
        "rule output differs from cached output"
      );
      session.push_diagnostic(Diagnostic::CacheDivergence {
        rule: rule.id,
        target: target.clone(),
        cached: file.digest.clone(),
        local: local.clone(),
      });
    }
  }
}

/// Build an alias, recording the generation's failure if it fails.
pub(crate) fn run_alias(session: Arc<Session>, alias: Alias) -> BoxFuture<'static, Result<ContentHash, BuildError>> {
  async move {
    let result = realize_alias(&session, &alias).await;
    if let Err(e) = &result {
      session.record_failure(e);
    }
    result
  }
  .boxed()
}

/// The stamp of an alias digests everything attached to it. An alias
/// nobody defined has the stamp of the empty set.
async fn realize_alias(session: &Arc<Session>, alias: &Alias) -> Result<ContentHash, BuildError> {
  session.check_cancelled()?;
  let Some((root, rel)) = alias.dir.as_build() else {
    return Err(BuildError::InvalidPath {
      path: alias.dir.to_string(),
      reason: "aliases live in build directories".to_string(),
    });
  };
  let loaded = session.load_dir(root.clone(), rel.clone()).await?;
  let items = loaded.aliases.get(&alias.name).cloned().unwrap_or_default();
  let node = Node::alias(alias);

  let parts = try_join_all(
    items
      .into_iter()
      .enumerate()
      .map(|(idx, item)| alias_item(session.clone(), alias.clone(), node.clone(), idx, item)),
  )
  .await?;

  let entries: Vec<(String, ContentHash)> = parts.into_iter().flatten().collect();
  debug!(alias = %alias, entries = entries.len(), "built alias");
  Ok(combine(entries.iter().map(|(label, digest)| (label.clone(), digest))))
}

async fn alias_item(
  session: Arc<Session>,
  alias: Alias,
  node: Node,
  idx: usize,
  item: AliasItem,
) -> Result<Vec<(String, ContentHash)>, BuildError> {
  match item {
    AliasItem::Deps { build, .. } => {
      let eval = Eval::execute(session.clone(), Some(node), None);
      let ((), trace) = build.eval(eval).await?;
      Ok(trace.digests.into_iter().map(|(dep, digest)| (dep.to_string(), digest)).collect())
    }
    AliasItem::Action { build, context, .. } => {
      let eval = Eval::execute(session.clone(), Some(node), context.clone());
      let (action, trace) = build.eval(eval).await?;
      session.check_cancelled()?;

      let _permit = session
        .semaphore
        .clone()
        .acquire_owned()
        .await
        .map_err(|_| BuildError::Cancelled)?;
      session.check_cancelled()?;

      info!(alias = %alias, action = %action.describe(), "running alias action");
      let action_env = ActionEnv {
        layout: session.layout.clone(),
        env: session.context_env(context.as_ref()),
        cwd: session.layout.resolve(&alias.dir),
      };
      run_action(&action, &action_env)
        .await
        .map_err(|e| BuildError::AliasActionFailed {
          alias: alias.to_string(),
          message: e.to_string(),
        })?;
      session.count_executed();

      let action_digest = action.compute_hash().map_err(|e| BuildError::Serialize {
        what: format!("action of alias {}", alias),
        message: e.to_string(),
      })?;
      let mut entries: Vec<(String, ContentHash)> =
        trace.digests.into_iter().map(|(dep, digest)| (dep.to_string(), digest)).collect();
      entries.push((format!("action {}", idx), action_digest));
      Ok(entries)
    }
  }
}
