//! Persistent trace database.
//!
//! Records, for every executed rule, the key it ran with and the digests of
//! the targets it produced. A later generation skips a rule whose key is
//! unchanged and whose targets still carry the recorded digests.
//!
//! Stored as JSON at `<build_root>/.db.json`, rewritten atomically.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path as FsPath, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::consts::{TRACE_DB_FILENAME, TRACE_DB_VERSION};
use crate::error::BuildError;
use crate::util::hash::ContentHash;

/// What one rule produced last time it ran.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceEntry {
  pub key: ContentHash,
  /// Target path (as displayed) -> digest.
  pub targets: BTreeMap<String, ContentHash>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TraceFile {
  version: u32,
  rules: BTreeMap<String, TraceEntry>,
}

/// In-memory trace database, keyed by a rule's first target.
#[derive(Debug, Default)]
pub struct TraceDb {
  path: PathBuf,
  rules: BTreeMap<String, TraceEntry>,
  dirty: bool,
}

impl TraceDb {
  /// Load the database of a build root.
  ///
  /// A missing file, an unreadable file or a file from another format
  /// version yields an empty database; the next save replaces it.
  pub fn load(build_root: &FsPath) -> Self {
    let path = build_root.join(TRACE_DB_FILENAME);
    let rules = match fs::read_to_string(&path) {
      Ok(content) => match serde_json::from_str::<TraceFile>(&content) {
        Ok(file) if file.version == TRACE_DB_VERSION => file.rules,
        Ok(file) => {
          warn!(path = %path.display(), version = file.version, "ignoring trace database of another version");
          BTreeMap::new()
        }
        Err(e) => {
          warn!(path = %path.display(), error = %e, "ignoring unreadable trace database");
          BTreeMap::new()
        }
      },
      Err(e) if e.kind() == io::ErrorKind::NotFound => BTreeMap::new(),
      Err(e) => {
        warn!(path = %path.display(), error = %e, "ignoring unreadable trace database");
        BTreeMap::new()
      }
    };
    Self {
      path,
      rules,
      dirty: false,
    }
  }

  pub fn get(&self, rule_key: &str) -> Option<&TraceEntry> {
    self.rules.get(rule_key)
  }

  pub fn record(&mut self, rule_key: String, entry: TraceEntry) {
    if self.rules.get(&rule_key) != Some(&entry) {
      self.rules.insert(rule_key, entry);
      self.dirty = true;
    }
  }

  pub fn len(&self) -> usize {
    self.rules.len()
  }

  pub fn is_empty(&self) -> bool {
    self.rules.is_empty()
  }

  /// Write the database if it changed since the last save.
  ///
  /// Uses atomic write (write to temp, then rename) to prevent corruption.
  pub fn save(&mut self) -> Result<(), BuildError> {
    if !self.dirty {
      return Ok(());
    }
    let dir = self.path.parent().unwrap_or(FsPath::new("."));
    fs::create_dir_all(dir).map_err(|e| BuildError::io(dir, e))?;

    let file = TraceFile {
      version: TRACE_DB_VERSION,
      rules: self.rules.clone(),
    };
    let content = serde_json::to_string_pretty(&file).map_err(|e| BuildError::Serialize {
      what: "trace database".to_string(),
      message: e.to_string(),
    })?;
    let temp_path = self.path.with_extension("json.tmp");
    fs::write(&temp_path, &content).map_err(|e| BuildError::io(&temp_path, e))?;
    fs::rename(&temp_path, &self.path).map_err(|e| BuildError::io(&self.path, e))?;

    self.dirty = false;
    Ok(())
  }
}
