//! Packages.
//!
//! A package assignment maps a build directory to the packages its targets
//! belong to. [`package_deps`] projects the rule graph onto packages: the
//! packages another package's installed files were built from.

use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::sync::Arc;

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::build::{Build, Trace};
use crate::dep::DepSet;
use crate::error::BuildError;
use crate::execute::cycle::Node;
use crate::execute::eval::Eval;
use crate::execute::inspect::Inspector;
use crate::path::Path;
use crate::rule::{Rule, RuleId};

/// Name of an installable package.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PackageName(pub String);

impl PackageName {
  pub fn new(name: impl Into<String>) -> Self {
    Self(name.into())
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for PackageName {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

/// Build directory -> packages its targets belong to.
pub type PackageAssignment = Arc<dyn Fn(&Path) -> BTreeSet<PackageName> + Send + Sync>;

/// Packages other than `pkg` whose files `files` were built from.
///
/// `files` are built first. The walk then follows rule dependencies
/// backwards from the rules producing them: a dependency in a directory of
/// another package is recorded and not followed further; a dependency in a
/// directory of `pkg` itself, or of no package, is followed.
pub fn package_deps(pkg: &PackageName, files: Vec<Path>) -> Build<BTreeSet<PackageName>> {
  let pkg = pkg.clone();
  let files = Arc::new(files);
  let walk_files = files.clone();

  Build::paths(files.iter().cloned()).and_then(move |()| {
    let pkg = pkg.clone();
    let files = walk_files.clone();
    Build::from_fn(DepSet::new(), move |eval| {
      let pkg = pkg.clone();
      let files = files.clone();
      async move {
        let deps = walk(&eval, &pkg, &files).await?;
        Ok((deps, Trace::new()))
      }
      .boxed()
    })
  })
}

async fn walk(eval: &Eval, pkg: &PackageName, files: &[Path]) -> Result<BTreeSet<PackageName>, BuildError> {
  let session = eval.session().clone();
  let mut found = BTreeSet::new();
  let Some(assignment) = session.packages.clone() else {
    return Ok(found);
  };

  let mut visited: HashSet<RuleId> = HashSet::new();
  let mut queue: Vec<Arc<Rule>> = Vec::new();
  for file in files.iter().filter(|f| f.is_build()) {
    if let Some(rule) = session.rule_for(file).await?
      && visited.insert(rule.id)
    {
      queue.push(rule);
    }
  }

  while let Some(rule) = queue.pop() {
    for dep in direct_deps(eval, &rule).await? {
      let owners = assignment(&dep.dir);
      if owners.is_empty() || owners.contains(pkg) {
        if visited.insert(dep.id) {
          queue.push(dep);
        }
      } else {
        found.extend(owners.into_iter().filter(|p| p != pkg));
      }
    }
  }

  debug!(package = %pkg, deps = found.len(), rules = visited.len(), "computed package dependencies");
  Ok(found)
}

/// Rules `rule` depends on directly, including through aliases.
async fn direct_deps(eval: &Eval, rule: &Rule) -> Result<Vec<Arc<Rule>>, BuildError> {
  let inspector = Inspector::new(false);
  let inner = Eval::inspect(
    eval.session().clone(),
    Some(Node::rule(rule)),
    rule.context.clone(),
    inspector.clone(),
  );
  rule.action.eval(inner).await?;
  Ok(inspector.visited_rules())
}
