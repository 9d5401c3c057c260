//! Implementation of the `rulegraph rules` command.
//!
//! Prints the rules a set of targets transitively depends on, dependencies
//! first, without running any action.

use anyhow::{Context, Result};

use super::{GlobalOptions, Project};
use crate::output::{print_json, print_rule};
use crate::request::parse_targets;

pub fn cmd_rules(options: &GlobalOptions, targets: &[String], json: bool) -> Result<()> {
  let project = Project::open(options)?;
  let request = parse_targets(targets, &project.contexts)?;

  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let evaluated = rt
    .block_on(project.system.evaluate_rules(true, request))
    .context("Failed to evaluate rules")?;

  if json {
    let rules: Vec<_> = evaluated
      .rules
      .iter()
      .map(|rule| {
        let deps: Vec<String> = evaluated
          .deps
          .get(&rule.id)
          .map(|ids| ids.iter().map(ToString::to_string).collect())
          .unwrap_or_default();
        serde_json::json!({
          "id": rule.id.to_string(),
          "dir": rule.dir.to_string(),
          "targets": rule.targets.iter().map(ToString::to_string).collect::<Vec<_>>(),
          "deps": deps,
          "loc": rule.loc.to_string(),
        })
      })
      .collect();
    print_json(&rules)?;
    return Ok(());
  }

  for rule in &evaluated.rules {
    let after: Vec<_> = evaluated
      .deps
      .get(&rule.id)
      .map(|ids| ids.iter().copied().collect())
      .unwrap_or_default();
    print_rule(rule.id, &rule.targets, &after);
  }

  Ok(())
}
