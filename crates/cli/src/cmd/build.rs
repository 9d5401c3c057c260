//! Implementation of the `rulegraph build` command.

use std::time::Instant;

use anyhow::{Context, Result};
use tracing::info;

use super::{GlobalOptions, Project};
use crate::output::{print_build_report, print_diagnostic, print_note, print_paths};
use crate::request::parse_targets;

/// Build every target, then report what the engine did.
///
/// Non-reproducible rules found in check mode are reported as warnings;
/// source files shadowed by promoted rules are listed but left in place.
pub fn cmd_build(options: &GlobalOptions, targets: &[String]) -> Result<()> {
  let project = Project::open(options)?;
  let request = parse_targets(targets, &project.contexts)?;

  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let started = Instant::now();
  rt.block_on(project.system.do_build(request)).context("Build failed")?;
  let elapsed = started.elapsed();

  let stats = project.system.stats();
  info!(executed = stats.executed, cache_hits = stats.cache_hits, up_to_date = stats.up_to_date, "build finished");

  print_build_report(elapsed, &stats);
  for diagnostic in project.system.diagnostics() {
    print_diagnostic(&diagnostic);
  }

  let stale = project.system.files_in_source_tree_to_delete();
  if !stale.is_empty() {
    println!();
    print_note("Source files superseded by promoted rules:");
    print_paths(&stale);
  }

  Ok(())
}
