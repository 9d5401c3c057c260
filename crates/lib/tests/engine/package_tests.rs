use std::collections::BTreeSet;

use rulegraph_lib::{Build, CachingMode, LibDepKind, LibDeps, PackageName, Path, SubdirSet, package_deps};

use super::common::{FnGen, Project, default_generators, dpath, rel, write};

/// Writes `target` once `dep` is built, without reading it.
fn after(dep: Path, target: Path) -> Build<rulegraph_lib::Action> {
  Build::path(dep).then(write(target, "done"))
}

/// `a/top.txt` <- `c/mid.txt` <- `b/lib.txt`.
fn chain() -> std::sync::Arc<FnGen> {
  FnGen::new(|scope, dir, components| {
    match rel(components).as_str() {
      "a" => {
        let top = dir.join("top.txt");
        scope.rule([top.clone()], after(dpath("c/mid.txt"), top))?;
      }
      "b" => {
        let lib = dir.join("lib.txt");
        scope.rule([lib.clone()], write(lib, "lib"))?;
      }
      "c" => {
        let mid = dir.join("mid.txt");
        scope.rule([mid.clone()], after(dpath("b/lib.txt"), mid))?;
      }
      _ => {}
    }
    Ok(Some(SubdirSet::empty()))
  })
}

fn owners(dir: &Path) -> BTreeSet<PackageName> {
  let first = dir
    .rel()
    .and_then(|rel| rel.components().first().map(|c| c.to_string()));
  match first.as_deref() {
    Some("a") => BTreeSet::from([PackageName::new("pa")]),
    Some("b") => BTreeSet::from([PackageName::new("pb")]),
    _ => BTreeSet::new(),
  }
}

#[tokio::test]
async fn package_dependencies_cross_unowned_directories() {
  let project = Project::new();
  let system = project.system(CachingMode::Disabled);
  system.set_rule_generators(default_generators(chain())).unwrap();
  system.set_packages(owners).unwrap();

  let deps = system
    .do_build(package_deps(&PackageName::new("pa"), vec![dpath("a/top.txt")]))
    .await
    .unwrap();
  assert_eq!(deps, BTreeSet::from([PackageName::new("pb")]));
  assert!(project.exists(&dpath("a/top.txt")));
  assert!(project.exists(&dpath("b/lib.txt")));

  let deps = system
    .do_build(package_deps(&PackageName::new("pb"), vec![dpath("b/lib.txt")]))
    .await
    .unwrap();
  assert!(deps.is_empty());
}

#[tokio::test]
async fn package_dependencies_without_assignment_are_empty() {
  let project = Project::new();
  let system = project.system(CachingMode::Disabled);
  system.set_rule_generators(default_generators(chain())).unwrap();

  let deps = system
    .do_build(package_deps(&PackageName::new("pa"), vec![dpath("a/top.txt")]))
    .await
    .unwrap();
  assert!(deps.is_empty());
}

#[tokio::test]
async fn evaluated_rules_are_ordered_dependencies_first() {
  let project = Project::new();
  let system = project.system(CachingMode::Disabled);
  system.set_rule_generators(default_generators(chain())).unwrap();

  let request = Build::path(dpath("a/top.txt"));
  let all = system.evaluate_rules(true, request.clone()).await.unwrap();
  let order: Vec<Path> = all
    .rules
    .iter()
    .map(|r| r.targets.iter().next().cloned().unwrap())
    .collect();
  assert_eq!(order, vec![dpath("b/lib.txt"), dpath("c/mid.txt"), dpath("a/top.txt")]);

  let top = &all.rules[2];
  let mid = &all.rules[1];
  assert_eq!(all.deps[&top.id], BTreeSet::from([mid.id]));
  assert!(all.position(top.id) > all.position(mid.id));

  let direct = system.evaluate_rules(false, request).await.unwrap();
  assert_eq!(direct.rules.len(), 1);
  assert_eq!(direct.rules[0].targets, BTreeSet::from([dpath("a/top.txt")]));

  assert_eq!(system.stats().executed, 0);
  assert!(!project.exists(&dpath("a/top.txt")));
}

#[tokio::test]
async fn lib_deps_merge_per_directory() {
  let project = Project::new();

  let generator = FnGen::new(|scope, dir, components| {
    if rel(components) == "a" {
      let one = dir.join("one.txt");
      let action = Build::record_lib_deps(LibDeps::new().with("unix", LibDepKind::Optional)).then(write(one.clone(), "1"));
      scope.rule([one], action)?;

      let two = dir.join("two.txt");
      let libs = LibDeps::new()
        .with("unix", LibDepKind::Required)
        .with("threads", LibDepKind::Optional);
      let action = Build::record_lib_deps(libs).then(after(dpath("a/one.txt"), two.clone()));
      scope.rule([two], action)?;
    }
    Ok(Some(SubdirSet::empty()))
  });
  let system = project.system(CachingMode::Disabled);
  system.set_rule_generators(default_generators(generator)).unwrap();

  let by_dir = system.all_lib_deps(Build::path(dpath("a/two.txt"))).await.unwrap();
  let libs = &by_dir[&dpath("a")];
  assert_eq!(libs.get("unix"), Some(LibDepKind::Required));
  assert_eq!(libs.get("threads"), Some(LibDepKind::Optional));
  assert_eq!(by_dir.len(), 1);
}
