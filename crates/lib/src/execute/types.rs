//! Types for rule execution.
//!
//! Configuration, per-generation statistics, non-fatal diagnostics and the
//! results of rule execution and introspection.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::action::SandboxPreference;
use crate::path::Path;
use crate::rule::{Rule, RuleId};
use crate::util::hash::ContentHash;

/// Environment variable overriding the number of concurrent actions.
pub const JOBS_ENV: &str = "RULEGRAPH_JOBS";

/// Environment variable selecting the sandbox mode (`none` or `copy`).
pub const SANDBOX_ENV: &str = "RULEGRAPH_SANDBOX";

/// Configuration for rule execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecuteConfig {
  /// Maximum number of actions running at once.
  pub parallelism: usize,

  /// How actions are isolated from the build tree.
  pub sandbox: SandboxPreference,
}

impl Default for ExecuteConfig {
  fn default() -> Self {
    Self {
      parallelism: num_cpus(),
      sandbox: SandboxPreference::None,
    }
  }
}

impl ExecuteConfig {
  /// Defaults overridden by `RULEGRAPH_JOBS` and `RULEGRAPH_SANDBOX`.
  pub fn from_env() -> Result<Self, String> {
    let mut config = Self::default();
    if let Ok(jobs) = std::env::var(JOBS_ENV) {
      config.parallelism = match jobs.parse::<usize>() {
        Ok(0) | Err(_) => return Err(format!("{} must be a positive integer, got '{}'", JOBS_ENV, jobs)),
        Ok(n) => n,
      };
    }
    if let Ok(sandbox) = std::env::var(SANDBOX_ENV) {
      config.sandbox = sandbox.parse()?;
    }
    Ok(config)
  }
}

/// Get the number of CPUs for default parallelism.
fn num_cpus() -> usize {
  std::thread::available_parallelism().map(|p| p.get()).unwrap_or(4)
}

/// Counters for the current generation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BuildStats {
  /// Actions run locally (rules and alias actions).
  pub executed: usize,
  /// Rules whose targets were materialized from the cache.
  pub cache_hits: usize,
  /// Rules skipped because their targets matched the trace database.
  pub up_to_date: usize,
}

/// A non-fatal finding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
  /// A rule produced different output than the cached execution with the same key.
  CacheDivergence {
    rule: RuleId,
    target: Path,
    cached: ContentHash,
    local: ContentHash,
  },
}

impl fmt::Display for Diagnostic {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Diagnostic::CacheDivergence {
        rule,
        target,
        cached,
        local,
      } => write!(
        f,
        "rule {} is not reproducible: {} has digest {} but the cache has {}",
        rule,
        target,
        local.short(),
        cached.short()
      ),
    }
  }
}

/// How a rule's targets came to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Realization {
  Executed,
  CacheHit,
  UpToDate,
}

/// Result of realizing one rule.
#[derive(Debug, Clone)]
pub struct RuleOutcome {
  pub targets: BTreeMap<Path, ContentHash>,
  pub realization: Realization,
}

/// Rules reachable from a request, dependencies first.
#[derive(Debug, Clone, Default)]
pub struct EvaluatedRules {
  pub rules: Vec<Arc<Rule>>,
  /// Rule -> rules it depends on.
  pub deps: BTreeMap<RuleId, BTreeSet<RuleId>>,
}

impl EvaluatedRules {
  pub fn position(&self, id: RuleId) -> Option<usize> {
    self.rules.iter().position(|r| r.id == id)
  }
}
