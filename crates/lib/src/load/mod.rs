//! Rule directory loading.
//!
//! Loading a build directory collects the rules whose targets live in it:
//! those registered by the init callback for this directory, those the
//! directory's generator registers, and synthetic copy rules for the
//! source files of context directories. Rule modes are applied against the
//! source listing and target sets are checked for overlaps.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::Ordering;

use futures::FutureExt;
use futures::future::BoxFuture;
use tracing::{debug, info};

use crate::action::Action;
use crate::alias::{AliasItem, AliasName};
use crate::build::Build;
use crate::error::BuildError;
use crate::execute::session::Session;
use crate::loc::Loc;
use crate::path::source_tree::list_source_dir;
use crate::path::{BuildRoot, Path, RelPath};
use crate::rule::{Rule, RuleId, RuleMode, RuleScope, SubdirSet};

/// The rule set of one build directory.
#[derive(Debug)]
pub struct LoadedDir {
  pub dir: Path,
  pub rules: Vec<Arc<Rule>>,
  pub by_target: BTreeMap<Path, Arc<Rule>>,
  pub aliases: BTreeMap<AliasName, Vec<AliasItem>>,
  /// Subdirectories known to exist: source subdirectories, directories the
  /// init callback registered rules in, and those the generator asked to keep.
  pub subdirs: BTreeSet<String>,
  /// Source files shadowed by `Promote { until_clean: true }` rules.
  pub promoted: BTreeSet<Path>,
}

impl LoadedDir {
  pub fn targets(&self) -> impl Iterator<Item = &Path> {
    self.by_target.keys()
  }
}

/// What the init callback registered, grouped by directory.
#[derive(Debug, Default)]
pub(crate) struct InitOutput {
  rules: HashMap<Path, Vec<Rule>>,
  aliases: HashMap<Path, Vec<(AliasName, AliasItem)>>,
  dirs: BTreeSet<Path>,
}

impl InitOutput {
  /// Immediate children of `dir` that lead to a directory with init rules.
  fn child_dirs(&self, dir: &Path) -> BTreeSet<String> {
    let Some((root, rel)) = dir.as_build() else {
      return BTreeSet::new();
    };
    let depth = rel.components().len();
    self
      .dirs
      .iter()
      .filter_map(|d| {
        let (d_root, d_rel) = d.as_build()?;
        if d_root != root || d_rel == rel || !d_rel.is_descendant_of(rel) {
          return None;
        }
        d_rel.components().get(depth).map(|c| c.to_string())
      })
      .collect()
  }
}

/// Run the init callback.
pub(crate) fn run_init(session: Arc<Session>) -> BoxFuture<'static, Result<Arc<InitOutput>, BuildError>> {
  async move {
    let mut output = InitOutput::default();
    let Some(init) = session.generators.init().cloned() else {
      return Ok(Arc::new(output));
    };

    let scope = RuleScope::for_init(session.rule_ids.clone());
    init.init(&scope).await?;
    let collected = scope.take();
    info!(
      generation = session.generation,
      rules = collected.rules.len(),
      aliases = collected.aliases.len(),
      "init callback registered rules"
    );

    for rule in collected.rules {
      output.dirs.insert(rule.dir.clone());
      output.rules.entry(rule.dir.clone()).or_default().push(rule);
    }
    for (alias, item) in collected.aliases {
      output.dirs.insert(alias.dir.clone());
      output.aliases.entry(alias.dir).or_default().push((alias.name, item));
    }
    Ok(Arc::new(output))
  }
  .boxed()
}

/// Load one build directory.
pub(crate) async fn load_dir(session: Arc<Session>, root: BuildRoot, rel: RelPath) -> Result<Arc<LoadedDir>, BuildError> {
  session.check_cancelled()?;
  if !session.contexts.contains_key(root.context()) {
    return Err(BuildError::UnknownContext(root.context().to_string()));
  }

  let dir = Path::Build(root.clone(), rel.clone());
  let init = session.init_rules().await?;

  let mut rules: Vec<Rule> = init.rules.get(&dir).cloned().unwrap_or_default();
  let mut aliases: BTreeMap<AliasName, Vec<AliasItem>> = BTreeMap::new();
  for (name, item) in init.aliases.get(&dir).cloned().unwrap_or_default() {
    aliases.entry(name).or_default().push(item);
  }
  let mut subdirs = init.child_dirs(&dir);

  if let Some(generator) = session.generators.for_root(&root) {
    let scope = RuleScope::for_dir(dir.clone(), session.rule_ids.clone());
    let components: Vec<String> = rel.components().into_iter().map(str::to_string).collect();
    let keep = generator.gen_rules(&scope, &dir, &components).await?;
    let collected = scope.take();

    match keep {
      Some(keep) => {
        rules.extend(collected.rules);
        for (alias, item) in collected.aliases {
          aliases.entry(alias.name).or_default().push(item);
        }
        if let SubdirSet::These(names) = keep {
          subdirs.extend(names);
        }
      }
      None => {
        let loc = collected
          .rules
          .first()
          .map(|r| r.loc.clone())
          .or_else(|| collected.aliases.first().map(|(_, item)| item.loc().clone()));
        if let Some(loc) = loc {
          return Err(BuildError::InvalidRule {
            reason: format!("generator declined {} but registered rules or aliases in it", dir),
            loc,
          });
        }
      }
    }
  }

  let source = match &root {
    BuildRoot::Context(_) => list_source_dir(&session.layout, &rel).await?,
    BuildRoot::Install(_) => Default::default(),
  };
  subdirs.extend(source.subdirs.iter().cloned());

  let mut promoted = BTreeSet::new();
  let mut kept = Vec::with_capacity(rules.len());
  for rule in rules {
    let in_source: Vec<Path> = match &root {
      BuildRoot::Context(_) => rule
        .targets
        .iter()
        .filter(|t| source.files.contains(&t.basename()))
        .cloned()
        .collect(),
      BuildRoot::Install(_) => Vec::new(),
    };

    match rule.mode {
      RuleMode::Standard => {
        if let Some(target) = in_source.first() {
          return Err(BuildError::SourceConflict {
            target: target.clone(),
            loc: rule.loc.clone(),
          });
        }
      }
      RuleMode::Fallback => {
        if in_source.len() == rule.targets.len() {
          debug!(rule = %rule.id, dir = %dir, "fallback rule shadowed by source files");
          continue;
        }
        if !in_source.is_empty() {
          return Err(BuildError::PartialFallback {
            present: in_source,
            loc: rule.loc.clone(),
          });
        }
      }
      RuleMode::Promote { until_clean } => {
        if until_clean {
          promoted.extend(rule.targets.iter().filter_map(Path::source_counterpart));
        }
      }
    }
    kept.push(Arc::new(rule));
  }

  let mut by_target: BTreeMap<Path, Arc<Rule>> = BTreeMap::new();
  for rule in &kept {
    for target in &rule.targets {
      if let Some(existing) = by_target.get(target) {
        return Err(BuildError::OverlappingTargets {
          target: target.clone(),
          first: existing.loc.clone(),
          second: rule.loc.clone(),
        });
      }
      by_target.insert(target.clone(), rule.clone());
    }
  }

  if let BuildRoot::Context(_) = &root {
    for file in &source.files {
      let target = dir.join(file);
      if by_target.contains_key(&target) {
        continue;
      }
      let rule = Arc::new(copy_rule(&session, Path::Source(rel.join(file)), target.clone()));
      by_target.insert(target, rule.clone());
      kept.push(rule);
    }
  }

  debug!(
    dir = %dir,
    rules = kept.len(),
    aliases = aliases.len(),
    subdirs = subdirs.len(),
    "loaded directory"
  );

  Ok(Arc::new(LoadedDir {
    dir,
    rules: kept,
    by_target,
    aliases,
    subdirs,
    promoted,
  }))
}

/// Synthetic rule making a source file available in the build tree.
fn copy_rule(session: &Session, src: Path, dst: Path) -> Rule {
  let id = RuleId(session.rule_ids.fetch_add(1, Ordering::Relaxed));
  let action = {
    let (src, dst) = (src.clone(), dst.clone());
    Build::path(src.clone()).map(move |()| Action::copy(src.clone(), dst.clone()))
  };
  Rule {
    id,
    dir: dst.parent().unwrap_or_else(|| dst.clone()),
    targets: BTreeSet::from([dst]),
    context: None,
    action,
    mode: RuleMode::Standard,
    loc: Loc::internal("source copy"),
  }
}
