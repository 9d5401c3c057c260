//! Crate-wide constants.

/// Application name, used for cache and config directory names.
pub const APP_NAME: &str = "rulegraph";

/// Directory under the build root holding install pseudo-contexts.
pub const INSTALL_DIR: &str = "install";

/// Default name of the build root inside a project.
pub const DEFAULT_BUILD_DIR: &str = "_build";

/// Trace database file, relative to the build root.
pub const TRACE_DB_FILENAME: &str = ".db.json";

/// Sandbox scratch directory, relative to the build root.
pub const SANDBOX_DIR: &str = ".sandbox";

/// Version of the on-disk trace database format.
pub const TRACE_DB_VERSION: u32 = 1;

/// Version of the rule key layout. Bumping it invalidates every trace and cache entry.
pub const RULE_KEY_VERSION: u32 = 1;

/// Version of the local cache metadata format.
pub const CACHE_FORMAT_VERSION: u32 = 1;

/// Number of hex characters shown when a digest is abbreviated in logs.
pub const SHORT_HASH_LEN: usize = 12;

/// Value of `SOURCE_DATE_EPOCH` given to spawned actions (1980-01-01, the ZIP epoch).
pub const SOURCE_DATE_EPOCH: &str = "315532800";
