//! Rule actions.
//!
//! Actions are the primitive operations a rule (or an alias) performs.
//! They are plain data: serializable, hashable into cache keys, and only
//! executed by [`exec::run_action`].
//!
//! # Action Types
//!
//! - [`Action::Run`] - Spawn a program with args, env, cwd and optional stdout capture
//! - [`Action::WriteFile`] - Write literal contents to a target
//! - [`Action::Copy`] - Copy one file to another
//! - [`Action::Mkdir`] - Create a directory
//! - [`Action::Progn`] - Run a sequence of actions in order

pub mod exec;
pub mod sandbox;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::path::Path;
use crate::util::hash::Hashable;

pub use exec::{ActionEnv, ActionError, run_action};
pub use sandbox::{Sandbox, SandboxPreference};

/// A primitive operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
  Run {
    prog: String,
    args: Vec<String>,
    env: BTreeMap<String, String>,
    /// Working directory; the context root when absent.
    cwd: Option<Path>,
    /// File receiving the process's stdout.
    stdout_to: Option<Path>,
  },
  WriteFile {
    path: Path,
    contents: String,
  },
  Copy {
    src: Path,
    dst: Path,
  },
  Mkdir {
    path: Path,
  },
  Progn(Vec<Action>),
}

impl Hashable for Action {}

impl Action {
  pub fn run<I, S>(prog: &str, args: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Action::Run {
      prog: prog.to_string(),
      args: args.into_iter().map(Into::into).collect(),
      env: BTreeMap::new(),
      cwd: None,
      stdout_to: None,
    }
  }

  /// Run a script with the platform shell.
  pub fn shell(script: &str) -> Self {
    let (shell, mut args) = exec::get_shell(None);
    args.push(script.to_string());
    Action::run(&shell, args)
  }

  pub fn write_file(path: Path, contents: impl Into<String>) -> Self {
    Action::WriteFile {
      path,
      contents: contents.into(),
    }
  }

  pub fn copy(src: Path, dst: Path) -> Self {
    Action::Copy { src, dst }
  }

  pub fn mkdir(path: Path) -> Self {
    Action::Mkdir { path }
  }

  pub fn progn(actions: Vec<Action>) -> Self {
    Action::Progn(actions)
  }

  /// Set an environment variable of a `Run` action. No-op for other actions.
  pub fn with_env(mut self, key: &str, value: &str) -> Self {
    if let Action::Run { env, .. } = &mut self {
      env.insert(key.to_string(), value.to_string());
    }
    self
  }

  /// Set the working directory of a `Run` action. No-op for other actions.
  pub fn with_cwd(mut self, dir: Path) -> Self {
    if let Action::Run { cwd, .. } = &mut self {
      *cwd = Some(dir);
    }
    self
  }

  /// Redirect the stdout of a `Run` action to a file. No-op for other actions.
  pub fn with_stdout_to(mut self, path: Path) -> Self {
    if let Action::Run { stdout_to, .. } = &mut self {
      *stdout_to = Some(path);
    }
    self
  }

  /// Short description for logs.
  pub fn describe(&self) -> String {
    match self {
      Action::Run { prog, args, .. } if args.is_empty() => prog.clone(),
      Action::Run { prog, args, .. } => format!("{} {}", prog, args.join(" ")),
      Action::WriteFile { path, .. } => format!("write {}", path),
      Action::Copy { src, dst } => format!("copy {} -> {}", src, dst),
      Action::Mkdir { path } => format!("mkdir {}", path),
      Action::Progn(actions) => actions.iter().map(Action::describe).collect::<Vec<_>>().join("; "),
    }
  }
}
