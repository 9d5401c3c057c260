//! Local on-disk cache.
//!
//! # Storage Layout
//!
//! ```text
//! {cache_dir}/
//! ├── meta/<key>.json     # CacheMeta: file names and digests of one execution
//! └── files/<digest>      # File contents, shared between entries
//! ```

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::debug;

use super::{CacheClient, CacheError, CacheKey, CachedFile, CachedOutputs};
use crate::consts::CACHE_FORMAT_VERSION;
use crate::platform::paths::shared_cache_dir;
use crate::util::hash::ContentHash;

#[derive(Debug, Serialize, Deserialize)]
struct CacheMeta {
  version: u32,
  files: Vec<MetaFile>,
}

#[derive(Debug, Serialize, Deserialize)]
struct MetaFile {
  name: String,
  digest: ContentHash,
}

/// Cache stored in a local directory.
#[derive(Debug, Clone)]
pub struct LocalCache {
  root: PathBuf,
}

impl LocalCache {
  pub fn new(root: PathBuf) -> Self {
    Self { root }
  }

  /// Cache at the shared per-user location (`RULEGRAPH_CACHE` or the platform cache dir).
  pub fn default_location() -> Self {
    Self::new(shared_cache_dir())
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  fn meta_path(&self, key: &CacheKey) -> PathBuf {
    self.root.join("meta").join(format!("{}.json", key.0))
  }

  fn file_path(&self, digest: &ContentHash) -> PathBuf {
    self.root.join("files").join(&digest.0)
  }
}

fn io_err(path: &Path, e: io::Error) -> CacheError {
  CacheError::Io {
    path: path.display().to_string(),
    message: e.to_string(),
  }
}

/// Write via a temp file in the same directory, then rename.
fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), CacheError> {
  let dir = path.parent().unwrap_or(Path::new("."));
  std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
  let mut temp = NamedTempFile::new_in(dir).map_err(|e| io_err(dir, e))?;
  temp.write_all(contents).map_err(|e| io_err(temp.path(), e))?;
  temp.persist(path).map_err(|e| io_err(path, e.error))?;
  Ok(())
}

#[async_trait]
impl CacheClient for LocalCache {
  async fn lookup(&self, key: &CacheKey) -> Result<Option<CachedOutputs>, CacheError> {
    let meta_path = self.meta_path(key);
    let content = match tokio::fs::read_to_string(&meta_path).await {
      Ok(content) => content,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
      Err(e) => return Err(io_err(&meta_path, e)),
    };

    let meta: CacheMeta = serde_json::from_str(&content).map_err(|e| CacheError::Corrupted {
      path: meta_path.display().to_string(),
      message: e.to_string(),
    })?;
    if meta.version != CACHE_FORMAT_VERSION {
      return Err(CacheError::UnsupportedVersion(meta.version));
    }

    let mut outputs = CachedOutputs::default();
    for file in meta.files {
      let path = self.file_path(&file.digest);
      let contents = match tokio::fs::read(&path).await {
        Ok(contents) => contents,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
          debug!(key = %key.short(), file = %file.name, "cache entry lost a file, treating as miss");
          return Ok(None);
        }
        Err(e) => return Err(io_err(&path, e)),
      };
      outputs.files.push(CachedFile {
        name: file.name,
        digest: file.digest,
        contents,
      });
    }

    Ok(Some(outputs))
  }

  async fn store(&self, key: &CacheKey, outputs: &CachedOutputs) -> Result<(), CacheError> {
    let meta = CacheMeta {
      version: CACHE_FORMAT_VERSION,
      files: outputs
        .files
        .iter()
        .map(|f| MetaFile {
          name: f.name.clone(),
          digest: f.digest.clone(),
        })
        .collect(),
    };
    let meta_json = serde_json::to_vec_pretty(&meta).map_err(|e| CacheError::Corrupted {
      path: self.meta_path(key).display().to_string(),
      message: e.to_string(),
    })?;

    let files: Vec<(PathBuf, Vec<u8>)> = outputs
      .files
      .iter()
      .map(|f| (self.file_path(&f.digest), f.contents.clone()))
      .collect();
    let meta_path = self.meta_path(key);

    let result = tokio::task::spawn_blocking(move || {
      for (path, contents) in &files {
        if !path.exists() {
          write_atomic(path, contents)?;
        }
      }
      write_atomic(&meta_path, &meta_json)
    })
    .await;

    match result {
      Ok(inner) => inner,
      Err(e) => Err(CacheError::Io {
        path: self.root.display().to_string(),
        message: e.to_string(),
      }),
    }
  }
}
