//! Integration tests for the build engine.
//!
//! Each test builds a scratch project in a temporary directory with
//! generators written as closures.

mod alias_tests;
mod cache_tests;
mod execute_tests;
mod package_tests;
