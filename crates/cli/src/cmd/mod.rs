mod build;
mod rules;
mod targets;

pub use build::cmd_build;
pub use rules::cmd_rules;
pub use targets::cmd_targets;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::debug;

use rulegraph_lib::{
  BuildRoot, BuildSystem, CacheSetting, ContextName, ExecuteConfig, Layout, LocalCache, RuleGenerators,
};

use crate::rule_file::RuleFile;

/// Options shared by every command.
#[derive(Debug, Clone)]
pub struct GlobalOptions {
  pub root: Option<PathBuf>,
  pub cache: Option<CacheSetting>,
  pub jobs: Option<usize>,
}

/// A project opened for one command.
pub struct Project {
  pub system: BuildSystem,
  pub contexts: Vec<ContextName>,
}

impl Project {
  pub fn open(options: &GlobalOptions) -> Result<Self> {
    let root = match &options.root {
      Some(root) => root.clone(),
      None => std::env::current_dir().context("Failed to determine current directory")?,
    };
    let root = dunce::canonicalize(&root).with_context(|| format!("Project root not found: {}", root.display()))?;

    let rule_file = Arc::new(RuleFile::load(&root)?);
    let contexts = rule_file.contexts();
    let names: Vec<ContextName> = contexts.iter().map(|c| c.name.clone()).collect();

    let mut config = ExecuteConfig::from_env().map_err(anyhow::Error::msg)?;
    if let Some(jobs) = options.jobs {
      config.parallelism = jobs.max(1);
    }

    let setting = match options.cache {
      Some(setting) => setting,
      None => CacheSetting::from_env().map_err(anyhow::Error::msg)?,
    };
    let caching = setting.into_mode(Arc::new(LocalCache::default_location()));
    debug!(root = %root.display(), cache = %setting, jobs = config.parallelism, "opening project");

    let system = BuildSystem::init(Layout::in_source(&root), contexts, caching, config).context("Failed to start the build engine")?;
    let generators = names.iter().fold(RuleGenerators::new(), |generators, name| {
      generators.with_root(BuildRoot::Context(name.clone()), rule_file.clone())
    });
    system
      .set_rule_generators(generators)
      .context("Failed to register rules")?;

    Ok(Self { system, contexts: names })
  }
}
