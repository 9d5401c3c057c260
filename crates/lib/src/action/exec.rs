//! Action execution.
//!
//! Processes run with a cleared environment: only `PATH` is inherited, the
//! rest is fixed (`HOME`, `TMPDIR`, locale, `SOURCE_DATE_EPOCH`) and then
//! extended with the context's and the action's own variables.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;

use futures::FutureExt;
use futures::future::BoxFuture;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info};

use super::Action;
use crate::consts::SOURCE_DATE_EPOCH;
use crate::path::Layout;

/// Errors from running a single action.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ActionError {
  #[error("command failed with exit code {code:?}: {cmd}")]
  CmdFailed { cmd: String, code: Option<i32> },

  #[error("failed to spawn {cmd}: {message}")]
  Spawn { cmd: String, message: String },

  #[error("io error on {path}: {message}")]
  Io { path: String, message: String },
}

impl ActionError {
  fn io(path: &std::path::Path, e: std::io::Error) -> Self {
    ActionError::Io {
      path: path.display().to_string(),
      message: e.to_string(),
    }
  }
}

/// Where and with what environment an action runs.
#[derive(Debug, Clone)]
pub struct ActionEnv {
  pub layout: Layout,
  /// Context variables, applied before the action's own.
  pub env: BTreeMap<String, String>,
  /// Default working directory.
  pub cwd: PathBuf,
}

/// Run an action to completion.
pub fn run_action<'a>(action: &'a Action, env: &'a ActionEnv) -> BoxFuture<'a, Result<(), ActionError>> {
  async move {
    match action {
      Action::Run {
        prog,
        args,
        env: vars,
        cwd,
        stdout_to,
      } => {
        let cwd = cwd.as_ref().map(|p| env.layout.resolve(p)).unwrap_or_else(|| env.cwd.clone());
        let stdout_to = stdout_to.as_ref().map(|p| env.layout.resolve(p));
        run_process(prog, args, vars, &cwd, stdout_to, env).await
      }
      Action::WriteFile { path, contents } => {
        let dst = env.layout.resolve(path);
        ensure_parent(&dst).await?;
        tokio::fs::write(&dst, contents).await.map_err(|e| ActionError::io(&dst, e))
      }
      Action::Copy { src, dst } => {
        let from = env.layout.resolve(src);
        let to = env.layout.resolve(dst);
        ensure_parent(&to).await?;
        tokio::fs::copy(&from, &to)
          .await
          .map(|_| ())
          .map_err(|e| ActionError::io(&from, e))
      }
      Action::Mkdir { path } => {
        let dir = env.layout.resolve(path);
        tokio::fs::create_dir_all(&dir).await.map_err(|e| ActionError::io(&dir, e))
      }
      Action::Progn(actions) => {
        for inner in actions {
          run_action(inner, env).await?;
        }
        Ok(())
      }
    }
  }
  .boxed()
}

async fn ensure_parent(path: &std::path::Path) -> Result<(), ActionError> {
  match path.parent() {
    Some(parent) => tokio::fs::create_dir_all(parent)
      .await
      .map_err(|e| ActionError::io(parent, e)),
    None => Ok(()),
  }
}

async fn run_process(
  prog: &str,
  args: &[String],
  vars: &BTreeMap<String, String>,
  cwd: &std::path::Path,
  stdout_to: Option<PathBuf>,
  env: &ActionEnv,
) -> Result<(), ActionError> {
  let cmd_line = if args.is_empty() {
    prog.to_string()
  } else {
    format!("{} {}", prog, args.join(" "))
  };
  info!(cmd = %cmd_line, "running action");

  tokio::fs::create_dir_all(cwd).await.map_err(|e| ActionError::io(cwd, e))?;
  let tmp = tempfile::Builder::new()
    .prefix("action-")
    .tempdir()
    .map_err(|e| ActionError::io(&std::env::temp_dir(), e))?;

  let mut command = Command::new(prog);
  command
    .args(args)
    .current_dir(cwd)
    .env_clear()
    .env("PATH", std::env::var("PATH").unwrap_or_default())
    .env("HOME", "/homeless-shelter")
    .env("TMPDIR", tmp.path())
    .env("TMP", tmp.path())
    .env("TEMP", tmp.path())
    .env("LANG", "C")
    .env("LC_ALL", "C")
    .env("SOURCE_DATE_EPOCH", SOURCE_DATE_EPOCH)
    .envs(&env.env)
    .envs(vars)
    .stdin(Stdio::null());

  debug!(prog = %prog, working_dir = ?cwd, "spawning process");

  let output = command.output().await.map_err(|e| ActionError::Spawn {
    cmd: cmd_line.clone(),
    message: e.to_string(),
  })?;

  if !output.status.success() {
    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stderr.is_empty() {
      debug!(stderr = %stderr, "command stderr");
    }
    return Err(ActionError::CmdFailed {
      cmd: cmd_line,
      code: output.status.code(),
    });
  }

  match stdout_to {
    Some(dst) => {
      ensure_parent(&dst).await?;
      tokio::fs::write(&dst, &output.stdout)
        .await
        .map_err(|e| ActionError::io(&dst, e))?;
    }
    None => {
      let stdout = String::from_utf8_lossy(&output.stdout);
      if !stdout.trim().is_empty() {
        debug!(stdout = %stdout.trim(), "command output");
      }
    }
  }

  Ok(())
}

/// Get the shell command and arguments for the current platform.
///
/// Always `/bin/sh` (Unix) or PowerShell (Windows) unless overridden, so that
/// user profiles never leak into actions.
pub fn get_shell(override_shell: Option<&str>) -> (String, Vec<String>) {
  if let Some(shell) = override_shell {
    let args = if shell.contains("powershell") || shell.contains("pwsh") {
      vec![
        "-NoProfile".to_string(),
        "-ExecutionPolicy".to_string(),
        "Bypass".to_string(),
        "-Command".to_string(),
      ]
    } else if shell.contains("cmd") {
      vec!["/C".to_string()]
    } else {
      vec!["-c".to_string()]
    };
    return (shell.to_string(), args);
  }

  #[cfg(unix)]
  {
    ("/bin/sh".to_string(), vec!["-c".to_string()])
  }

  #[cfg(windows)]
  {
    (
      "powershell.exe".to_string(),
      vec![
        "-NoProfile".to_string(),
        "-ExecutionPolicy".to_string(),
        "Bypass".to_string(),
        "-Command".to_string(),
      ],
    )
  }
}
