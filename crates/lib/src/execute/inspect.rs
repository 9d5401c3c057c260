//! Rule introspection.
//!
//! Inspection walks a dependency description without running actions. File
//! dependencies on build paths are resolved to their rules, and when the
//! walk is recursive each rule's action description is evaluated in turn
//! (once per rule) to discover the rules it depends on.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::{Arc, Mutex};

use futures::FutureExt;
use futures::future::BoxFuture;
use petgraph::algo::{tarjan_scc, toposort};
use petgraph::graphmap::DiGraphMap;
use tracing::debug;

use super::cycle::{Node, NodeKey};
use super::eval::Eval;
use super::types::EvaluatedRules;
use crate::alias::{Alias, AliasItem};
use crate::build::LibDeps;
use crate::error::BuildError;
use crate::path::Path;
use crate::rule::{Rule, RuleId};
use crate::util::lock;

#[derive(Default)]
struct InspectState {
  rules: BTreeMap<RuleId, Arc<Rule>>,
  /// (dependent, dependency)
  edges: BTreeSet<(RuleId, RuleId)>,
  lib_deps: BTreeMap<RuleId, LibDeps>,
  expanded: HashSet<RuleId>,
  aliases_seen: HashSet<(Option<NodeKey>, Alias)>,
}

pub(crate) struct Inspector {
  recursive: bool,
  state: Mutex<InspectState>,
}

impl Inspector {
  pub fn new(recursive: bool) -> Arc<Self> {
    Arc::new(Self {
      recursive,
      state: Mutex::new(InspectState::default()),
    })
  }

  /// Record the rule producing `path` and, when recursive, inspect it.
  pub fn visit_path(self: Arc<Self>, eval: Eval, path: Path) -> BoxFuture<'static, Result<(), BuildError>> {
    async move {
      let session = eval.session().clone();
      let rule = session
        .rule_for(&path)
        .await?
        .ok_or_else(|| BuildError::NoRule(path.clone()))?;

      let expand = {
        let mut state = lock(&self.state);
        state.rules.entry(rule.id).or_insert_with(|| rule.clone());
        if let Some(from) = eval.node().and_then(Node::rule_id) {
          state.edges.insert((from, rule.id));
        }
        self.recursive && state.expanded.insert(rule.id)
      };
      if !expand {
        return Ok(());
      }

      debug!(rule = %rule.id, "inspecting rule");
      let inner = Eval::inspect(session, Some(Node::rule(&rule)), rule.context.clone(), self.clone());
      let (_, trace) = rule.action.eval(inner).await?;
      if !trace.lib_deps.is_empty() {
        lock(&self.state).lib_deps.insert(rule.id, trace.lib_deps);
      }
      Ok(())
    }
    .boxed()
  }

  /// Inspect what is attached to an alias, on behalf of the evaluating node.
  pub fn visit_alias(self: Arc<Self>, eval: Eval, alias: Alias) -> BoxFuture<'static, Result<(), BuildError>> {
    async move {
      let key = (eval.node().map(|n| n.key.clone()), alias.clone());
      if !lock(&self.state).aliases_seen.insert(key) {
        return Ok(());
      }
      let Some((root, rel)) = alias.dir.as_build() else {
        return Ok(());
      };
      let loaded = eval.session().load_dir(root.clone(), rel.clone()).await?;
      let Some(items) = loaded.aliases.get(&alias.name) else {
        return Ok(());
      };
      for item in items {
        match item {
          AliasItem::Deps { build, .. } => {
            build.eval(eval.clone()).await?;
          }
          AliasItem::Action { build, .. } => {
            build.eval(eval.clone()).await?;
          }
        }
      }
      Ok(())
    }
    .boxed()
  }

  /// Every rule seen so far, in id order.
  pub fn visited_rules(&self) -> Vec<Arc<Rule>> {
    lock(&self.state).rules.values().cloned().collect()
  }

  /// Rules seen so far, dependencies first.
  pub fn evaluated_rules(&self) -> Result<EvaluatedRules, BuildError> {
    let state = lock(&self.state);

    let mut graph: DiGraphMap<RuleId, ()> = DiGraphMap::new();
    for id in state.rules.keys() {
      graph.add_node(*id);
    }
    for (dependent, dependency) in &state.edges {
      graph.add_edge(*dependency, *dependent, ());
    }

    let order = toposort(&graph, None).map_err(|cycle| {
      let start = cycle.node_id();
      let chain = tarjan_scc(&graph)
        .into_iter()
        .find(|scc| scc.contains(&start))
        .unwrap_or_else(|| vec![start]);
      BuildError::DependencyCycle {
        chain: chain
          .iter()
          .filter_map(|id| state.rules.get(id))
          .map(|rule| rule.describe())
          .collect(),
      }
    })?;

    let mut deps: BTreeMap<RuleId, BTreeSet<RuleId>> = state.rules.keys().map(|id| (*id, BTreeSet::new())).collect();
    for (dependent, dependency) in &state.edges {
      deps.entry(*dependent).or_default().insert(*dependency);
    }

    Ok(EvaluatedRules {
      rules: order.iter().filter_map(|id| state.rules.get(id).cloned()).collect(),
      deps,
    })
  }

  /// Recorded library dependencies merged per rule directory.
  pub fn lib_deps_by_dir(&self) -> BTreeMap<Path, LibDeps> {
    let state = lock(&self.state);
    let mut by_dir: BTreeMap<Path, LibDeps> = BTreeMap::new();
    for (id, lib_deps) in &state.lib_deps {
      if let Some(rule) = state.rules.get(id) {
        by_dir.entry(rule.dir.clone()).or_default().merge(lib_deps);
      }
    }
    by_dir
  }
}
