use rulegraph_lib::{Build, CacheSetting, CachingMode, Diagnostic, SubdirSet};

use super::common::{FnGen, Project, compile, default_generators, dpath, src, write};

fn compile_foo() -> std::sync::Arc<FnGen> {
  FnGen::new(|scope, dir, components| {
    if components.is_empty() {
      let target = dir.join("foo.cma");
      scope.rule([target.clone()], compile(src("foo.ml"), target))?;
    }
    Ok(Some(SubdirSet::empty()))
  })
}

#[tokio::test]
async fn cache_hit_restores_identical_outputs() {
  let project = Project::new();
  project.write("foo.ml", "let x = 1");
  let target = dpath("foo.cma");

  let plain = project.system(CachingMode::Disabled);
  plain.set_rule_generators(default_generators(compile_foo())).unwrap();
  plain.do_build(Build::path(target.clone())).await.unwrap();
  let expected = std::fs::read(project.resolve(&target)).unwrap();
  project.clean();

  let system = project.system(CachingMode::Enabled(project.cache()));
  assert_eq!(system.get_memory().setting(), CacheSetting::Enabled);
  system.set_rule_generators(default_generators(compile_foo())).unwrap();
  system.do_build(Build::path(target.clone())).await.unwrap();
  assert_eq!(system.stats().executed, 1);
  assert_eq!(system.stats().cache_hits, 0);

  project.clean();
  system.reset().unwrap();
  system.do_build(Build::path(target.clone())).await.unwrap();
  assert_eq!(system.stats().executed, 0);
  assert_eq!(system.stats().cache_hits, 1);
  assert_eq!(std::fs::read(project.resolve(&target)).unwrap(), expected);
}

#[tokio::test]
async fn cache_is_keyed_by_inputs() {
  let project = Project::new();
  project.write("foo.ml", "let x = 1");
  let target = dpath("foo.cma");

  let system = project.system(CachingMode::Enabled(project.cache()));
  system.set_rule_generators(default_generators(compile_foo())).unwrap();
  system.do_build(Build::path(target.clone())).await.unwrap();

  project.write("foo.ml", "let x = 2");
  project.clean();
  system.reset().unwrap();
  system.do_build(Build::path(target.clone())).await.unwrap();
  assert_eq!(system.stats().executed, 1);
  assert_eq!(system.stats().cache_hits, 0);
  assert_eq!(project.read(&target), "compiled(let x = 2)");
}

#[tokio::test]
#[cfg(unix)]
async fn check_mode_reports_non_reproducible_rules() {
  let project = Project::new();

  let generator = FnGen::new(|scope, dir, components| {
    if components.is_empty() {
      scope.rule(
        [dir.join("stamp.txt")],
        Build::pure(rulegraph_lib::Action::shell("echo $$ > stamp.txt")),
      )?;
    }
    Ok(Some(SubdirSet::empty()))
  });
  let system = project.system(CachingMode::Check(project.cache()));
  system.set_rule_generators(default_generators(generator)).unwrap();

  system.do_build(Build::path(dpath("stamp.txt"))).await.unwrap();
  assert!(system.diagnostics().is_empty());

  system.reset().unwrap();
  system.do_build(Build::path(dpath("stamp.txt"))).await.unwrap();
  assert_eq!(system.stats().executed, 1);

  let diagnostics = system.diagnostics();
  assert_eq!(diagnostics.len(), 1);
  match &diagnostics[0] {
    Diagnostic::CacheDivergence { target, cached, local, .. } => {
      assert_eq!(*target, dpath("stamp.txt"));
      assert_ne!(cached, local);
    }
  }
}

#[tokio::test]
async fn check_mode_accepts_reproducible_rules() {
  let project = Project::new();

  let generator = FnGen::new(|scope, dir, components| {
    if components.is_empty() {
      let out = dir.join("out.txt");
      scope.rule([out.clone()], write(out, "same every time"))?;
    }
    Ok(Some(SubdirSet::empty()))
  });
  let system = project.system(CachingMode::Check(project.cache()));
  system.set_rule_generators(default_generators(generator)).unwrap();

  for _ in 0..2 {
    system.do_build(Build::path(dpath("out.txt"))).await.unwrap();
    system.reset().unwrap();
  }
  system.do_build(Build::path(dpath("out.txt"))).await.unwrap();
  assert_eq!(system.stats().executed, 1);
  assert!(system.diagnostics().is_empty());
}

#[tokio::test]
async fn unchanged_rules_are_skipped_across_generations() {
  let project = Project::new();
  project.write("foo.ml", "let x = 1");
  let target = dpath("foo.cma");

  let system = project.system(CachingMode::Disabled);
  system.set_rule_generators(default_generators(compile_foo())).unwrap();
  system.do_build(Build::path(target.clone())).await.unwrap();
  assert_eq!(system.stats().executed, 1);

  system.reset().unwrap();
  system.do_build(Build::path(target.clone())).await.unwrap();
  assert_eq!(system.stats().executed, 0);
  assert_eq!(system.stats().up_to_date, 1);
}

#[tokio::test]
async fn trace_database_survives_restarts() {
  let project = Project::new();
  project.write("foo.ml", "let x = 1");
  let target = dpath("foo.cma");

  {
    let system = project.system(CachingMode::Disabled);
    system.set_rule_generators(default_generators(compile_foo())).unwrap();
    system.do_build(Build::path(target.clone())).await.unwrap();
  }
  assert!(project.layout.build_root.join(".db.json").exists());

  let system = project.system(CachingMode::Disabled);
  system.set_rule_generators(default_generators(compile_foo())).unwrap();
  system.do_build(Build::path(target.clone())).await.unwrap();
  assert_eq!(system.stats().executed, 0);
  assert_eq!(system.stats().up_to_date, 1);

  project.write("foo.ml", "let x = 2");
  system.reset().unwrap();
  system.do_build(Build::path(target.clone())).await.unwrap();
  assert_eq!(system.stats().executed, 1);
  assert_eq!(project.read(&target), "compiled(let x = 2)");
}

#[tokio::test]
async fn modified_target_is_rebuilt() {
  let project = Project::new();
  project.write("foo.ml", "let x = 1");
  let target = dpath("foo.cma");

  let system = project.system(CachingMode::Disabled);
  system.set_rule_generators(default_generators(compile_foo())).unwrap();
  system.do_build(Build::path(target.clone())).await.unwrap();

  std::fs::write(project.resolve(&target), "tampered").unwrap();
  system.reset().unwrap();
  system.do_build(Build::path(target.clone())).await.unwrap();
  assert_eq!(system.stats().executed, 1);
  assert_eq!(project.read(&target), "compiled(let x = 1)");
}
