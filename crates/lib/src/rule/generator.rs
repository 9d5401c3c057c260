//! Rule generator callbacks.
//!
//! Two callbacks produce all rules of a build:
//!
//! - [`InitRules`] runs once per generation, before any directory is
//!   loaded, and may register rules in any directory
//! - [`GenRules`] is asked for the rules of one directory of one build root
//!   the first time that directory is needed

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use super::{RuleScope, SubdirSet};
use crate::error::BuildError;
use crate::path::{BuildRoot, ContextName, Path};

/// Populates one directory.
#[async_trait]
pub trait GenRules: Send + Sync {
  /// Register the rules of `dir` through `scope`.
  ///
  /// `components` are the components of `dir` below its build root.
  /// Returns the subdirectories to keep, or `None` when the generator has
  /// nothing for this directory.
  async fn gen_rules(
    &self,
    scope: &RuleScope,
    dir: &Path,
    components: &[String],
  ) -> Result<Option<SubdirSet>, BuildError>;
}

/// Registers rules before any directory is loaded.
#[async_trait]
pub trait InitRules: Send + Sync {
  async fn init(&self, scope: &RuleScope) -> Result<(), BuildError>;
}

/// Generators by build root.
#[derive(Clone, Default)]
pub struct RuleGenerators {
  init: Option<Arc<dyn InitRules>>,
  by_root: HashMap<BuildRoot, Arc<dyn GenRules>>,
}

impl RuleGenerators {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_init(mut self, init: Arc<dyn InitRules>) -> Self {
    self.init = Some(init);
    self
  }

  /// Use `generator` for one build root.
  pub fn with_root(mut self, root: BuildRoot, generator: Arc<dyn GenRules>) -> Self {
    self.by_root.insert(root, generator);
    self
  }

  /// Use `generator` for the context root and the install root of each context.
  pub fn with_contexts<'a>(
    mut self,
    contexts: impl IntoIterator<Item = &'a ContextName>,
    generator: Arc<dyn GenRules>,
  ) -> Self {
    for ctx in contexts {
      self.by_root.insert(BuildRoot::Context(ctx.clone()), generator.clone());
      self.by_root.insert(BuildRoot::Install(ctx.clone()), generator.clone());
    }
    self
  }

  pub(crate) fn init(&self) -> Option<&Arc<dyn InitRules>> {
    self.init.as_ref()
  }

  pub(crate) fn for_root(&self, root: &BuildRoot) -> Option<&Arc<dyn GenRules>> {
    self.by_root.get(root)
  }
}

impl fmt::Debug for RuleGenerators {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let mut roots: Vec<String> = self.by_root.keys().map(ToString::to_string).collect();
    roots.sort();
    f.debug_struct("RuleGenerators")
      .field("init", &self.init.is_some())
      .field("roots", &roots)
      .finish()
  }
}
