//! Build command integration tests.

use predicates::prelude::*;

use super::common::TestEnv;

const HELLO: &str = r#"{
  "dirs": {
    "": {
      "rules": [{ "targets": ["hello.txt"], "action": { "write": "hello" } }],
      "aliases": { "default": { "deps": ["hello.txt"] } }
    }
  }
}"#;

#[test]
fn build_single_target() {
  let env = TestEnv::with_rules(HELLO);

  env
    .rulegraph_cmd()
    .args(["build", "hello.txt"])
    .assert()
    .success()
    .stdout(predicate::str::contains("Build complete"))
    .stdout(predicate::str::contains("Executed: 1"));

  assert_eq!(env.read_file("_build/default/hello.txt"), "hello");
}

#[test]
fn build_is_incremental_across_runs() {
  let env = TestEnv::with_rules(HELLO);

  env.rulegraph_cmd().args(["build", "hello.txt"]).assert().success();

  env
    .rulegraph_cmd()
    .args(["build", "hello.txt"])
    .assert()
    .success()
    .stdout(predicate::str::contains("Executed: 0"))
    .stdout(predicate::str::contains("Up to date: 1"));
}

#[test]
fn build_recursive_alias() {
  let env = TestEnv::with_rules(HELLO);

  env.rulegraph_cmd().args(["build", "@default"]).assert().success();
  assert_eq!(env.read_file("_build/default/hello.txt"), "hello");
}

#[test]
fn build_missing_alias_fails() {
  let env = TestEnv::with_rules(HELLO);

  env
    .rulegraph_cmd()
    .args(["build", "@runtest"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("Build failed"));
}

#[test]
fn build_in_every_context() {
  let env = TestEnv::with_rules(
    r#"{
      "contexts": [{ "name": "default" }, { "name": "release" }],
      "dirs": { "": { "rules": [{ "targets": ["out.txt"], "action": { "write": "out" } }] } }
    }"#,
  );

  env.rulegraph_cmd().args(["build", "out.txt"]).assert().success();
  assert_eq!(env.read_file("_build/default/out.txt"), "out");
  assert_eq!(env.read_file("_build/release/out.txt"), "out");

  env
    .rulegraph_cmd()
    .args(["build", "_build/release/out.txt"])
    .assert()
    .success()
    .stdout(predicate::str::contains("Executed: 0"));
}

#[cfg(unix)]
#[test]
fn build_shell_rule_from_sources() {
  let env = TestEnv::with_rules(
    r#"{
      "dirs": {
        "lib": {
          "rules": [{ "targets": ["foo.out"], "deps": ["foo.in"], "action": { "shell": "cat foo.in foo.in > foo.out" } }]
        }
      }
    }"#,
  );
  env.write_file("lib/foo.in", "ab\n");

  env.rulegraph_cmd().args(["build", "lib/foo.out"]).assert().success();
  assert_eq!(env.read_file("_build/default/lib/foo.out"), "ab\nab\n");
}

#[cfg(unix)]
#[test]
fn failing_action_fails_the_build() {
  let env = TestEnv::with_rules(
    r#"{ "dirs": { "": { "rules": [{ "targets": ["bad"], "action": { "shell": "exit 2" } }] } } }"#,
  );

  env
    .rulegraph_cmd()
    .args(["build", "bad"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("Build failed"))
    .stderr(predicate::str::contains("command exited"));
}

#[test]
fn cache_restores_cleaned_outputs() {
  let env = TestEnv::with_rules(HELLO);

  env
    .rulegraph_cmd()
    .args(["--cache", "enabled", "build", "hello.txt"])
    .assert()
    .success()
    .stdout(predicate::str::contains("Executed: 1"));

  std::fs::remove_dir_all(env.temp.path().join("_build")).unwrap();

  env
    .rulegraph_cmd()
    .args(["--cache", "enabled", "build", "hello.txt"])
    .assert()
    .success()
    .stdout(predicate::str::contains("Restored from cache: 1"));
  assert_eq!(env.read_file("_build/default/hello.txt"), "hello");
}

#[test]
fn cache_mode_from_environment() {
  let env = TestEnv::with_rules(HELLO);

  env
    .rulegraph_cmd()
    .env("RULEGRAPH_CACHE_MODE", "enabled")
    .args(["build", "hello.txt"])
    .assert()
    .success();
  std::fs::remove_dir_all(env.temp.path().join("_build")).unwrap();

  env
    .rulegraph_cmd()
    .env("RULEGRAPH_CACHE_MODE", "enabled")
    .args(["build", "hello.txt"])
    .assert()
    .success()
    .stdout(predicate::str::contains("Restored from cache: 1"));
}

#[test]
fn invalid_rule_file_is_reported() {
  let env = TestEnv::with_rules(r#"{ "dirz": {} }"#);

  env
    .rulegraph_cmd()
    .args(["build", "hello.txt"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("Failed to parse"));
}
