//! The `rulegraph.json` rule file.
//!
//! A static description of the build contexts and, per source directory,
//! the rules and aliases of that directory. Names inside a directory entry
//! are relative to that directory; a dependency written `@name` is the
//! alias `name` of the directory.
//!
//! ```json
//! {
//!   "contexts": [{ "name": "default" }],
//!   "dirs": {
//!     "lib": {
//!       "rules": [
//!         { "targets": ["foo.out"], "deps": ["foo.in"], "action": { "shell": "cp foo.in foo.out" } }
//!       ],
//!       "aliases": { "default": { "deps": ["foo.out"] } }
//!     }
//!   }
//! }
//! ```

use std::collections::BTreeMap;
use std::path::Path as FsPath;

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use rulegraph_lib::action::Action;
use rulegraph_lib::{
  Alias, Build, BuildError, Context, GenRules, Path, RelPath, RuleMode, RuleScope, RuleSpec, SubdirSet,
};

pub const RULE_FILE: &str = "rulegraph.json";

/// Contents of a rule file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleFile {
  #[serde(default)]
  pub contexts: Vec<ContextEntry>,
  /// Source directory (`""` for the root) -> its rules.
  #[serde(default)]
  pub dirs: BTreeMap<String, DirEntry>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ContextEntry {
  pub name: String,
  #[serde(default)]
  pub env: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DirEntry {
  #[serde(default)]
  pub rules: Vec<RuleEntry>,
  #[serde(default)]
  pub aliases: BTreeMap<String, AliasEntry>,
  /// Subdirectories that exist only in the build tree.
  #[serde(default)]
  pub subdirs: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleEntry {
  pub targets: Vec<String>,
  #[serde(default)]
  pub deps: Vec<String>,
  pub action: ActionEntry,
  #[serde(default)]
  pub mode: ModeEntry,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AliasEntry {
  #[serde(default)]
  pub deps: Vec<String>,
  pub action: Option<ActionEntry>,
}

/// What a rule runs. `write` and `copy` produce the rule's first target.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionEntry {
  Shell(String),
  Run {
    prog: String,
    #[serde(default)]
    args: Vec<String>,
  },
  Write(String),
  Copy(String),
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModeEntry {
  #[default]
  Standard,
  Fallback,
  Promote,
  PromoteUntilClean,
}

impl From<ModeEntry> for RuleMode {
  fn from(mode: ModeEntry) -> Self {
    match mode {
      ModeEntry::Standard => RuleMode::Standard,
      ModeEntry::Fallback => RuleMode::Fallback,
      ModeEntry::Promote => RuleMode::Promote { until_clean: false },
      ModeEntry::PromoteUntilClean => RuleMode::Promote { until_clean: true },
    }
  }
}

impl RuleFile {
  /// Load `rulegraph.json` from the project root. A project without one
  /// has a single `default` context and only source copies.
  pub fn load(root: &FsPath) -> Result<Self> {
    let path = root.join(RULE_FILE);
    if !path.exists() {
      debug!(path = %path.display(), "no rule file, using defaults");
      return Ok(Self::default());
    }
    let content = std::fs::read_to_string(&path).with_context(|| format!("Failed to read {}", path.display()))?;
    Self::parse(&content).with_context(|| format!("Failed to parse {}", path.display()))
  }

  pub fn parse(content: &str) -> Result<Self> {
    let file: RuleFile = serde_json::from_str(content)?;
    for dir in file.dirs.keys() {
      RelPath::parse(dir).with_context(|| format!("Invalid directory '{}'", dir))?;
    }
    Ok(file)
  }

  /// Declared contexts, or `default` when none are declared.
  pub fn contexts(&self) -> Vec<Context> {
    if self.contexts.is_empty() {
      return vec![Context::new("default")];
    }
    self
      .contexts
      .iter()
      .map(|entry| {
        entry
          .env
          .iter()
          .fold(Context::new(entry.name.clone()), |ctx, (k, v)| ctx.with_env(k, v))
      })
      .collect()
  }

  fn entry(&self, components: &[String]) -> Option<&DirEntry> {
    self.dirs.iter().find_map(|(dir, entry)| {
      let rel = RelPath::parse(dir).ok()?;
      (rel.components() == components).then_some(entry)
    })
  }
}

#[async_trait]
impl GenRules for RuleFile {
  async fn gen_rules(&self, scope: &RuleScope, dir: &Path, components: &[String]) -> Result<Option<SubdirSet>, BuildError> {
    let Some(entry) = self.entry(components) else {
      return Ok(Some(SubdirSet::empty()));
    };

    for rule in &entry.rules {
      let targets = rule
        .targets
        .iter()
        .map(|t| local_path(dir, t))
        .collect::<Result<Vec<_>, _>>()?;
      let first = targets.first().cloned().unwrap_or_else(|| dir.clone());
      let action = deps_of(dir, &rule.deps)?.then(Build::pure(action_of(dir, &first, &rule.action)?));
      scope.add_rule(RuleSpec::new(targets, action).with_mode(rule.mode.into()))?;
    }

    for (name, alias_entry) in &entry.aliases {
      let alias = Alias::new(dir.clone(), name);
      if !alias_entry.deps.is_empty() {
        scope.add_alias_deps(&alias, deps_of(dir, &alias_entry.deps)?)?;
      }
      if let Some(action) = &alias_entry.action {
        scope.add_alias_action(&alias, Build::pure(action_of(dir, dir, action)?))?;
      }
    }

    debug!(dir = %dir, rules = entry.rules.len(), aliases = entry.aliases.len(), "generated rules from rule file");
    Ok(Some(SubdirSet::these(entry.subdirs.iter().cloned())))
  }
}

/// A name relative to `dir`, which must stay inside it.
fn local_path(dir: &Path, name: &str) -> Result<Path, BuildError> {
  let rel = RelPath::parse(name)?;
  Ok(dir.join(rel.as_str()))
}

fn deps_of(dir: &Path, deps: &[String]) -> Result<Build<()>, BuildError> {
  let mut paths = Vec::new();
  let mut aliases = Vec::new();
  for dep in deps {
    match dep.strip_prefix('@') {
      Some(name) => aliases.push(Alias::new(dir.clone(), name).dep()),
      None => paths.push(local_path(dir, dep)?),
    }
  }
  Ok(Build::paths(paths).then(Build::all(aliases).map(|_| ())))
}

fn action_of(dir: &Path, target: &Path, entry: &ActionEntry) -> Result<Action, BuildError> {
  Ok(match entry {
    ActionEntry::Shell(script) => Action::shell(script).with_cwd(dir.clone()),
    ActionEntry::Run { prog, args } => Action::run(prog, args.iter().cloned()).with_cwd(dir.clone()),
    ActionEntry::Write(contents) => Action::write_file(target.clone(), contents.clone()),
    ActionEntry::Copy(src) => Action::copy(local_path(dir, src)?, target.clone()),
  })
}
