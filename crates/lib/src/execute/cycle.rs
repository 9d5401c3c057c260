//! Cycle detection.
//!
//! Rules and aliases are evaluated by independent tasks that wait on each
//! other's results. Every wait is recorded as an edge of a wait-for graph
//! before the waiter suspends; an edge that would close a loop is refused
//! and reported as a dependency cycle instead of deadlocking.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use petgraph::graphmap::DiGraphMap;

use crate::alias::Alias;
use crate::error::BuildError;
use crate::rule::{Rule, RuleId};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum NodeKey {
  Rule(RuleId),
  Alias(Alias),
}

/// A task that can wait on other tasks. Compared by key only.
#[derive(Debug, Clone)]
pub(crate) struct Node {
  pub key: NodeKey,
  label: Arc<str>,
}

impl Node {
  pub fn rule(rule: &Rule) -> Self {
    Self {
      key: NodeKey::Rule(rule.id),
      label: Arc::from(rule.describe()),
    }
  }

  pub fn alias(alias: &Alias) -> Self {
    Self {
      key: NodeKey::Alias(alias.clone()),
      label: Arc::from(format!("alias {}", alias)),
    }
  }

  pub fn rule_id(&self) -> Option<RuleId> {
    match self.key {
      NodeKey::Rule(id) => Some(id),
      NodeKey::Alias(_) => None,
    }
  }
}

impl PartialEq for Node {
  fn eq(&self, other: &Self) -> bool {
    self.key == other.key
  }
}

impl Eq for Node {}

impl Hash for Node {
  fn hash<H: Hasher>(&self, state: &mut H) {
    self.key.hash(state);
  }
}

impl fmt::Display for Node {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.label)
  }
}

/// Wait-for graph of one generation.
///
/// Edge weights count concurrent waits between the same pair of nodes.
#[derive(Debug, Default)]
pub(crate) struct WaitGraph {
  ids: HashMap<NodeKey, u32>,
  labels: Vec<Arc<str>>,
  graph: DiGraphMap<u32, usize>,
}

impl WaitGraph {
  fn intern(&mut self, node: &Node) -> u32 {
    if let Some(id) = self.ids.get(&node.key) {
      return *id;
    }
    let id = self.labels.len() as u32;
    self.labels.push(node.label.clone());
    self.ids.insert(node.key.clone(), id);
    self.graph.add_node(id);
    id
  }

  /// Record that `from` waits on `to`, unless that closes a cycle.
  pub fn add_wait(&mut self, from: &Node, to: &Node) -> Result<(), BuildError> {
    let f = self.intern(from);
    let t = self.intern(to);

    if let Some(path) = self.find_path(t, f) {
      let mut chain = vec![self.labels[f as usize].to_string()];
      chain.extend(path.iter().map(|n| self.labels[*n as usize].to_string()));
      return Err(BuildError::DependencyCycle { chain });
    }

    match self.graph.edge_weight_mut(f, t) {
      Some(count) => *count += 1,
      None => {
        self.graph.add_edge(f, t, 1);
      }
    }
    Ok(())
  }

  pub fn remove_wait(&mut self, from: &Node, to: &Node) {
    let (Some(&f), Some(&t)) = (self.ids.get(&from.key), self.ids.get(&to.key)) else {
      return;
    };
    let remove = match self.graph.edge_weight_mut(f, t) {
      Some(count) => {
        *count -= 1;
        *count == 0
      }
      None => false,
    };
    if remove {
      self.graph.remove_edge(f, t);
    }
  }

  /// Nodes of a path from `start` to `goal`, both included.
  fn find_path(&self, start: u32, goal: u32) -> Option<Vec<u32>> {
    if start == goal {
      return Some(vec![start]);
    }
    let mut prev: HashMap<u32, u32> = HashMap::new();
    let mut queue = VecDeque::from([start]);
    while let Some(node) = queue.pop_front() {
      for next in self.graph.neighbors(node) {
        if next == start || prev.contains_key(&next) {
          continue;
        }
        prev.insert(next, node);
        if next == goal {
          let mut path = vec![goal];
          let mut cur = goal;
          while let Some(&p) = prev.get(&cur) {
            path.push(p);
            cur = p;
          }
          path.reverse();
          return Some(path);
        }
        queue.push_back(next);
      }
    }
    None
  }
}
