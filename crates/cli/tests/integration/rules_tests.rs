//! Rules and targets command integration tests.

use predicates::prelude::*;

use super::common::TestEnv;

const LIB: &str = r#"{
  "dirs": {
    "lib": {
      "rules": [
        { "targets": ["foo.out"], "deps": ["foo.in"], "action": { "copy": "foo.in" } },
        { "targets": ["bar.out"], "deps": ["foo.out"], "action": { "copy": "foo.out" } }
      ]
    }
  }
}"#;

#[test]
fn rules_are_listed_without_building() {
  let env = TestEnv::with_rules(LIB);
  env.write_file("lib/foo.in", "foo");

  let output = env
    .rulegraph_cmd()
    .args(["rules", "lib/bar.out", "--json"])
    .assert()
    .success()
    .get_output()
    .stdout
    .clone();

  let rules: serde_json::Value = serde_json::from_slice(&output).unwrap();
  let targets: Vec<String> = rules
    .as_array()
    .unwrap()
    .iter()
    .map(|r| r["targets"][0].as_str().unwrap().to_string())
    .collect();
  assert_eq!(
    targets,
    vec![
      "_build/default/lib/foo.in",
      "_build/default/lib/foo.out",
      "_build/default/lib/bar.out",
    ]
  );
  assert!(!env.temp.path().join("_build/default/lib/bar.out").exists());
}

#[test]
fn rules_text_output() {
  let env = TestEnv::with_rules(LIB);
  env.write_file("lib/foo.in", "foo");

  env
    .rulegraph_cmd()
    .args(["rules", "lib/bar.out"])
    .assert()
    .success()
    .stdout(predicate::str::contains("_build/default/lib/bar.out"))
    .stdout(predicate::str::contains("after"));
}

#[test]
fn targets_of_directory() {
  let env = TestEnv::with_rules(LIB);
  env.write_file("lib/foo.in", "foo");

  env
    .rulegraph_cmd()
    .args(["targets", "lib"])
    .assert()
    .success()
    .stdout(predicate::str::contains("_build/default/lib/foo.in"))
    .stdout(predicate::str::contains("_build/default/lib/foo.out"))
    .stdout(predicate::str::contains("_build/default/lib/bar.out"));
}

#[test]
fn targets_as_json() {
  let env = TestEnv::with_rules(LIB);

  let output = env
    .rulegraph_cmd()
    .args(["targets", "lib", "--json"])
    .assert()
    .success()
    .get_output()
    .stdout
    .clone();

  let targets: Vec<String> = serde_json::from_slice(&output).unwrap();
  assert_eq!(targets, vec!["_build/default/lib/bar.out", "_build/default/lib/foo.out"]);
}
