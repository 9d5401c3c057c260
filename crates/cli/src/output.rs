//! Terminal output of the `rulegraph` commands.
//!
//! Status lines go to stdout, errors and diagnostics to stderr. Colors are
//! only used when the stream supports them.

use std::io::Write;
use std::time::Duration;

use anyhow::Context;
use owo_colors::{OwoColorize, Stream};

use rulegraph_lib::{BuildStats, Diagnostic, Path, RuleId};

const OK: &str = "✓";
const FAILED: &str = "✗";
const WARN: &str = "⚠";
const NOTE: &str = "•";

pub fn format_duration(duration: Duration) -> String {
  let millis = duration.as_millis();
  match millis {
    0..=999 => format!("{}ms", millis),
    1_000..=59_999 => format!("{}.{:02}s", millis / 1_000, (millis % 1_000) / 10),
    _ => format!("{}m {}s", millis / 60_000, (millis % 60_000) / 1_000),
  }
}

/// Summary of a finished build.
pub fn print_build_report(elapsed: Duration, stats: &BuildStats) {
  println!(
    "{} Build complete in {}",
    OK.if_supports_color(Stream::Stdout, |s| s.green()),
    format_duration(elapsed)
  );
  for (label, count) in [
    ("Executed", stats.executed),
    ("Restored from cache", stats.cache_hits),
    ("Up to date", stats.up_to_date),
  ] {
    println!("  {}: {}", label.if_supports_color(Stream::Stdout, |s| s.dimmed()), count);
  }
}

pub fn print_diagnostic(diagnostic: &Diagnostic) {
  eprintln!(
    "{} {}",
    WARN.if_supports_color(Stream::Stderr, |s| s.yellow()),
    diagnostic.if_supports_color(Stream::Stderr, |s| s.yellow())
  );
}

pub fn print_error(message: &str) {
  eprintln!(
    "{} {}",
    FAILED.if_supports_color(Stream::Stderr, |s| s.red()),
    message.if_supports_color(Stream::Stderr, |s| s.red())
  );
}

pub fn print_note(message: &str) {
  println!("{} {}", NOTE.if_supports_color(Stream::Stdout, |s| s.blue()), message);
}

/// One rule of `rulegraph rules`: its targets, then the rules it waits for.
pub fn print_rule<'a>(id: RuleId, targets: impl IntoIterator<Item = &'a Path>, after: &[RuleId]) {
  let targets: Vec<String> = targets.into_iter().map(ToString::to_string).collect();
  println!("{} → {}", id.if_supports_color(Stream::Stdout, |s| s.bold()), targets.join(" "));
  if !after.is_empty() {
    let after: Vec<String> = after.iter().map(ToString::to_string).collect();
    println!("    after {}", after.join(", "));
  }
}

pub fn print_paths<'a>(paths: impl IntoIterator<Item = &'a Path>) {
  for path in paths {
    println!("  {}", path);
  }
}

pub fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
  let mut stdout = std::io::stdout().lock();
  serde_json::to_writer_pretty(&mut stdout, value).context("Failed to write JSON output")?;
  writeln!(stdout).context("Failed to write JSON output")?;
  Ok(())
}
