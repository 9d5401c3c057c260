mod cmd;
mod output;
mod request;
mod rule_file;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use rulegraph_lib::CacheSetting;

use crate::cmd::{GlobalOptions, cmd_build, cmd_rules, cmd_targets};
use crate::output::print_error;

/// rulegraph - incremental builds from a static rule file
#[derive(Parser)]
#[command(name = "rulegraph")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Enable verbose output
  #[arg(short, long, global = true)]
  verbose: bool,

  /// Project root (default: current directory)
  #[arg(long, global = true)]
  root: Option<PathBuf>,

  /// Cache mode: disabled, enabled or check (default: $RULEGRAPH_CACHE_MODE)
  #[arg(long, global = true)]
  cache: Option<CacheSetting>,

  /// Maximum number of concurrent actions (default: $RULEGRAPH_JOBS or CPU count)
  #[arg(short = 'j', long, global = true)]
  jobs: Option<usize>,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Build paths and aliases
  Build {
    /// Paths, `@alias` (recursive) or `@@dir/alias`
    #[arg(required = true)]
    targets: Vec<String>,
  },

  /// Print the rules targets depend on, without building
  Rules {
    #[arg(required = true)]
    targets: Vec<String>,

    /// Output as JSON
    #[arg(long)]
    json: bool,
  },

  /// List the targets of a directory in every context
  Targets {
    #[arg(default_value = ".")]
    dir: String,

    /// Output as JSON
    #[arg(long)]
    json: bool,
  },
}

fn main() {
  let cli = Cli::parse();

  let default_level = if cli.verbose { "info" } else { "warn" };
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
    .with_writer(std::io::stderr)
    .without_time()
    .init();

  if let Err(e) = run(cli) {
    print_error(&format!("{:#}", e));
    std::process::exit(1);
  }
}

fn run(cli: Cli) -> Result<()> {
  let options = GlobalOptions {
    root: cli.root,
    cache: cli.cache,
    jobs: cli.jobs,
  };

  match cli.command {
    Commands::Build { targets } => cmd_build(&options, &targets),
    Commands::Rules { targets, json } => cmd_rules(&options, &targets, json),
    Commands::Targets { dir, json } => cmd_targets(&options, &dir, json),
  }
}
