//! rulegraph-lib: an incremental build engine
//!
//! This crate provides the engine behind the `rulegraph` tool:
//! - `Build`: composable descriptions of computations and their dependencies
//! - `rule`: rules, rule scopes and the generator callbacks that register them
//! - `alias`: named, directory-scoped bundles of dependencies
//! - `execute`: the `BuildSystem` that loads directories lazily and realizes
//!   rules concurrently, deduplicated per generation
//! - `cache`: the cache client contract and a local directory-backed client
//! - `package`: projection of the rule graph onto packages

pub mod action;
pub mod alias;
pub mod build;
pub mod cache;
pub mod consts;
pub mod dep;
pub mod error;
pub mod execute;
pub mod load;
pub mod loc;
pub mod package;
pub mod path;
pub mod platform;
pub mod rule;
pub mod util;

pub use action::{Action, SandboxPreference};
pub use alias::{Alias, AliasName};
pub use build::{Build, LibDepKind, LibDeps, Trace};
pub use cache::{CacheClient, CacheSetting, CachingMode, LocalCache};
pub use dep::{Dep, DepSet, FileSelector, Glob};
pub use error::BuildError;
pub use execute::{BuildStats, BuildSystem, Diagnostic, EvaluatedRules, ExecuteConfig};
pub use loc::Loc;
pub use package::{PackageName, package_deps};
pub use path::{BuildRoot, Context, ContextName, Layout, Path, RelPath};
pub use rule::{GenRules, InitRules, RuleGenerators, RuleId, RuleMode, RuleScope, RuleSpec, SubdirSet};
