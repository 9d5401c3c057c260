//! Shared build cache.
//!
//! A cache maps the key of a rule execution (action, targets, dependency
//! digests, context environment) to the files it produced. The engine
//! consults it according to the [`CachingMode`]:
//!
//! - `Disabled`: never consulted
//! - `Enabled`: a hit materializes the cached outputs instead of running
//!   the action; a miss runs it and stores the outputs
//! - `Check`: the action always runs and its outputs are compared with the
//!   cached ones to detect non-reproducible rules
//!
//! # Submodules
//!
//! - [`local`] - on-disk cache shared between projects of one user

pub mod local;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::BuildError;
use crate::util::hash::ContentHash;

pub use local::LocalCache;

/// Environment variable selecting the caching mode of the command line tool.
pub const CACHE_MODE_ENV: &str = "RULEGRAPH_CACHE_MODE";

/// Key of one rule execution.
pub type CacheKey = ContentHash;

/// One file produced by a rule, by name within the rule's directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedFile {
  pub name: String,
  pub digest: ContentHash,
  pub contents: Vec<u8>,
}

/// Everything a rule execution produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CachedOutputs {
  pub files: Vec<CachedFile>,
}

impl CachedOutputs {
  pub fn get(&self, name: &str) -> Option<&CachedFile> {
    self.files.iter().find(|f| f.name == name)
  }
}

/// Errors from a cache backend.
#[derive(Debug, Error)]
pub enum CacheError {
  #[error("io error on {path}: {message}")]
  Io { path: String, message: String },

  #[error("corrupted cache entry {path}: {message}")]
  Corrupted { path: String, message: String },

  #[error("unsupported cache format version {0}")]
  UnsupportedVersion(u32),
}

impl From<CacheError> for BuildError {
  fn from(e: CacheError) -> Self {
    BuildError::Cache(e.to_string())
  }
}

/// A cache backend.
#[async_trait]
pub trait CacheClient: Send + Sync + fmt::Debug {
  async fn lookup(&self, key: &CacheKey) -> Result<Option<CachedOutputs>, CacheError>;

  async fn store(&self, key: &CacheKey, outputs: &CachedOutputs) -> Result<(), CacheError>;
}

/// How the engine uses the cache.
#[derive(Debug, Clone, Default)]
pub enum CachingMode {
  #[default]
  Disabled,
  Enabled(Arc<dyn CacheClient>),
  Check(Arc<dyn CacheClient>),
}

impl CachingMode {
  pub fn client(&self) -> Option<&Arc<dyn CacheClient>> {
    match self {
      CachingMode::Disabled => None,
      CachingMode::Enabled(client) | CachingMode::Check(client) => Some(client),
    }
  }

  pub fn setting(&self) -> CacheSetting {
    match self {
      CachingMode::Disabled => CacheSetting::Disabled,
      CachingMode::Enabled(_) => CacheSetting::Enabled,
      CachingMode::Check(_) => CacheSetting::Check,
    }
  }
}

/// Caching mode without a client, as read from flags or the environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CacheSetting {
  #[default]
  Disabled,
  Enabled,
  Check,
}

impl CacheSetting {
  /// Read `RULEGRAPH_CACHE_MODE`; unset means disabled.
  pub fn from_env() -> Result<Self, String> {
    match std::env::var(CACHE_MODE_ENV) {
      Ok(value) => value.parse(),
      Err(_) => Ok(CacheSetting::Disabled),
    }
  }

  pub fn into_mode(self, client: Arc<dyn CacheClient>) -> CachingMode {
    match self {
      CacheSetting::Disabled => CachingMode::Disabled,
      CacheSetting::Enabled => CachingMode::Enabled(client),
      CacheSetting::Check => CachingMode::Check(client),
    }
  }
}

impl FromStr for CacheSetting {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "disabled" | "off" => Ok(CacheSetting::Disabled),
      "enabled" | "on" => Ok(CacheSetting::Enabled),
      "check" => Ok(CacheSetting::Check),
      other => Err(format!("unknown cache mode '{}', expected disabled, enabled or check", other)),
    }
  }
}

impl fmt::Display for CacheSetting {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      CacheSetting::Disabled => f.write_str("disabled"),
      CacheSetting::Enabled => f.write_str("enabled"),
      CacheSetting::Check => f.write_str("check"),
    }
  }
}
