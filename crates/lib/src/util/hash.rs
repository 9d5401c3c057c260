//! Hashing utilities for content-addressed caching and verification.
//!
//! This module provides:
//! - `ContentHash`: a full 64-character SHA-256 digest
//! - `Hashable`: digest of any serializable description (actions, cache keys)
//! - `hash_file()`: single file hashing
//! - `hash_bytes()`: arbitrary byte hashing
//! - `combine()`: order-sensitive digest of several digests

use std::fs;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::consts::SHORT_HASH_LEN;

pub type HashError = serde_json::Error;

/// A full 64-character SHA256 hash for content verification.
///
/// # Format
///
/// The hash is a lowercase hexadecimal string (64 characters).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ContentHash(pub String);

impl ContentHash {
  /// Abbreviated form for log lines.
  pub fn short(&self) -> &str {
    let len = self.0.len().min(SHORT_HASH_LEN);
    &self.0[..len]
  }
}

impl std::fmt::Display for ContentHash {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// Content-addressed digest of a serializable value.
///
/// The value is serialized to JSON and the JSON text is hashed, so two
/// descriptions hash equal exactly when they serialize equal.
pub trait Hashable: Serialize {
  fn compute_hash(&self) -> Result<ContentHash, HashError> {
    let serialized = serde_json::to_string(self)?;
    Ok(hash_bytes(serialized.as_bytes()))
  }
}

/// Error while hashing a file.
#[derive(Debug, Clone, thiserror::Error, Serialize, Deserialize)]
pub enum FileHashError {
  #[error("failed to read file {path}: {message}")]
  ReadFile { path: String, message: String },
}

/// Hash a file's contents.
///
/// Returns the full 64-character SHA256 hash of the file.
pub fn hash_file(path: &Path) -> Result<ContentHash, FileHashError> {
  let read_err = |e: std::io::Error| FileHashError::ReadFile {
    path: path.display().to_string(),
    message: e.to_string(),
  };

  let mut file = fs::File::open(path).map_err(read_err)?;
  let mut hasher = Sha256::new();
  let mut buffer = [0u8; 8192];

  loop {
    let bytes_read = file.read(&mut buffer).map_err(read_err)?;
    if bytes_read == 0 {
      break;
    }
    hasher.update(&buffer[..bytes_read]);
  }

  Ok(ContentHash(format!("{:x}", hasher.finalize())))
}

/// Hash a file on the blocking pool.
pub async fn hash_file_async(path: &Path) -> Result<ContentHash, FileHashError> {
  let owned = path.to_path_buf();
  match tokio::task::spawn_blocking(move || hash_file(&owned)).await {
    Ok(result) => result,
    Err(e) => Err(FileHashError::ReadFile {
      path: path.display().to_string(),
      message: e.to_string(),
    }),
  }
}

/// Hash arbitrary bytes.
///
/// Returns the full 64-character SHA256 hash.
pub fn hash_bytes(data: &[u8]) -> ContentHash {
  let mut hasher = Sha256::new();
  hasher.update(data);
  ContentHash(format!("{:x}", hasher.finalize()))
}

/// Digest of a sequence of labelled digests.
///
/// Each entry contributes `label:digest\n`, so both the labels and the order
/// of entries matter.
pub fn combine<'a, I>(entries: I) -> ContentHash
where
  I: IntoIterator<Item = (String, &'a ContentHash)>,
{
  let mut hasher = Sha256::new();
  for (label, hash) in entries {
    hasher.update(label.as_bytes());
    hasher.update(b":");
    hasher.update(hash.0.as_bytes());
    hasher.update(b"\n");
  }
  ContentHash(format!("{:x}", hasher.finalize()))
}
