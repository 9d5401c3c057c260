//! Copy sandboxes.
//!
//! A sandboxed rule runs in a scratch tree under `<build_root>/.sandbox`
//! that contains only its dependencies. Targets are copied back into the
//! real build tree afterwards; anything else the action wrote is discarded
//! with the scratch tree.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tempfile::TempDir;
use tracing::debug;

use crate::consts::SANDBOX_DIR;
use crate::error::BuildError;
use crate::path::{Layout, Path};

/// How rule actions are isolated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SandboxPreference {
  /// Run in the build tree.
  #[default]
  None,
  /// Run in a scratch tree holding copies of the dependencies.
  Copy,
}

impl FromStr for SandboxPreference {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "none" => Ok(SandboxPreference::None),
      "copy" => Ok(SandboxPreference::Copy),
      other => Err(format!("unknown sandbox mode '{}', expected none or copy", other)),
    }
  }
}

/// A scratch tree for one rule execution. Removed on drop.
#[derive(Debug)]
pub struct Sandbox {
  _dir: TempDir,
  layout: Layout,
}

impl Sandbox {
  pub fn create(real: &Layout) -> Result<Self, BuildError> {
    let parent = real.build_root.join(SANDBOX_DIR);
    std::fs::create_dir_all(&parent).map_err(|e| BuildError::io(&parent, e))?;
    let dir = tempfile::Builder::new()
      .prefix("rule-")
      .tempdir_in(&parent)
      .map_err(|e| BuildError::io(&parent, e))?;
    let layout = Layout::new(dir.path().join("src"), dir.path().join("build"));
    Ok(Self { _dir: dir, layout })
  }

  /// Layout actions see when running inside the sandbox.
  pub fn layout(&self) -> &Layout {
    &self.layout
  }

  /// Copy dependencies from the real tree. Missing files are skipped; the
  /// engine has already built everything it could.
  pub async fn populate<'a>(
    &self,
    real: &Layout,
    deps: impl IntoIterator<Item = &'a Path>,
  ) -> Result<(), BuildError> {
    for path in deps {
      if matches!(path, Path::External(_)) {
        continue;
      }
      let from = real.resolve(path);
      if !tokio::fs::try_exists(&from).await.unwrap_or(false) {
        continue;
      }
      copy_file(&from, &self.layout.resolve(path)).await?;
    }
    Ok(())
  }

  /// Copy produced targets back into the real tree.
  pub async fn extract<'a>(
    &self,
    real: &Layout,
    targets: impl IntoIterator<Item = &'a Path>,
  ) -> Result<(), BuildError> {
    for target in targets {
      let from = self.layout.resolve(target);
      if !tokio::fs::try_exists(&from).await.unwrap_or(false) {
        debug!(target = %target, "target missing from sandbox");
        continue;
      }
      copy_file(&from, &real.resolve(target)).await?;
    }
    Ok(())
  }
}

async fn copy_file(from: &std::path::Path, to: &std::path::Path) -> Result<(), BuildError> {
  if let Some(parent) = to.parent() {
    tokio::fs::create_dir_all(parent)
      .await
      .map_err(|e| BuildError::io(parent, e))?;
  }
  tokio::fs::copy(from, to).await.map_err(|e| BuildError::io(from, e))?;
  Ok(())
}
