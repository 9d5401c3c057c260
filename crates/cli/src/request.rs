//! Command-line targets.
//!
//! - `_build/<ctx>/path` and `_build/install/<ctx>/path` name one build path
//! - `path` names that path in every context
//! - `@dir/name` is the alias `name` of `dir` and its descendants, in every context
//! - `@@dir/name` is the alias `name` of `dir` only

use anyhow::{Result, bail};

use rulegraph_lib::alias::{dep_multi_contexts, dep_rec_multi_contexts};
use rulegraph_lib::consts::{DEFAULT_BUILD_DIR, INSTALL_DIR};
use rulegraph_lib::{AliasName, Build, ContextName, Path, RelPath};

/// A parsed command-line target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
  Paths(Vec<Path>),
  Alias { dir: RelPath, name: AliasName, recursive: bool },
}

impl Target {
  pub fn parse(raw: &str, contexts: &[ContextName]) -> Result<Self> {
    if let Some(rest) = raw.strip_prefix("@@") {
      let (dir, name) = split_alias(rest)?;
      return Ok(Target::Alias {
        dir,
        name,
        recursive: false,
      });
    }
    if let Some(rest) = raw.strip_prefix('@') {
      let (dir, name) = split_alias(rest)?;
      return Ok(Target::Alias {
        dir,
        name,
        recursive: true,
      });
    }

    let rel = RelPath::parse(raw)?;
    let components = rel.components();
    if components.first() == Some(&DEFAULT_BUILD_DIR) {
      let path = match components.get(1..) {
        Some([install, ctx, rest @ ..]) if *install == INSTALL_DIR => Path::install(ctx, &rest.join("/"))?,
        Some([ctx, rest @ ..]) => Path::build(ctx, &rest.join("/"))?,
        _ => bail!("'{}' does not name a build context", raw),
      };
      return Ok(Target::Paths(vec![path]));
    }

    let paths = contexts
      .iter()
      .map(|ctx| Path::build(ctx.as_str(), rel.as_str()))
      .collect::<Result<Vec<_>, _>>()?;
    Ok(Target::Paths(paths))
  }

  pub fn request(&self, contexts: &[ContextName]) -> Build<()> {
    match self {
      Target::Paths(paths) => Build::paths(paths.iter().cloned()),
      Target::Alias {
        dir,
        name,
        recursive: true,
      } => dep_rec_multi_contexts(dir, name, contexts),
      Target::Alias { dir, name, .. } => dep_multi_contexts(dir, name, contexts),
    }
  }
}

fn split_alias(raw: &str) -> Result<(RelPath, AliasName)> {
  let rel = RelPath::parse(raw)?;
  let name = rel.basename().to_string();
  if name.is_empty() {
    bail!("missing alias name in '{}'", raw);
  }
  let dir = rel.parent().unwrap_or_default();
  Ok((dir, AliasName::new(name)))
}

/// One request building every target.
pub fn parse_targets(raw: &[String], contexts: &[ContextName]) -> Result<Build<()>> {
  let requests = raw
    .iter()
    .map(|t| Target::parse(t, contexts).map(|target| target.request(contexts)))
    .collect::<Result<Vec<_>>>()?;
  Ok(Build::all(requests).map(|_| ()))
}
