//! Implementation of the `rulegraph targets` command.

use anyhow::{Context, Result};

use rulegraph_lib::{Path, RelPath};

use super::{GlobalOptions, Project};
use crate::output::{print_json, print_note};

/// List the targets of a directory in every context.
pub fn cmd_targets(options: &GlobalOptions, dir: &str, json: bool) -> Result<()> {
  let project = Project::open(options)?;
  let rel = RelPath::parse(dir)?;

  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let mut all = Vec::new();
  for ctx in &project.contexts {
    let dir = Path::build(ctx.as_str(), rel.as_str())?;
    let targets = rt
      .block_on(project.system.targets_of(&dir))
      .with_context(|| format!("Failed to load {}", dir))?;
    all.extend(targets);
  }

  if json {
    let names: Vec<String> = all.iter().map(ToString::to_string).collect();
    return print_json(&names);
  }

  if all.is_empty() {
    print_note(&format!("No targets in {}", rel));
  }
  for target in all {
    println!("{}", target);
  }
  Ok(())
}
