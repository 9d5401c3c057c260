use std::collections::BTreeSet;

use rulegraph_lib::action::Action;
use rulegraph_lib::alias::{dep_multi_contexts, dep_rec_multi_contexts};
use rulegraph_lib::{
  Alias, AliasName, Build, BuildError, CachingMode, Context, ContextName, ExecuteConfig, Path, RelPath,
  RuleGenerators, SubdirSet,
};

use super::common::{FnGen, Project, default_generators, dpath, write};

/// Every directory gets `out.txt` and an `all` alias depending on it.
fn alias_everywhere() -> std::sync::Arc<FnGen> {
  FnGen::new(|scope, dir, _| {
    let out = dir.join("out.txt");
    scope.rule([out.clone()], write(out.clone(), "out"))?;
    scope.add_alias_deps(&Alias::new(dir.clone(), "all"), Build::path(out))?;
    Ok(Some(SubdirSet::empty()))
  })
}

fn targets(rules: &rulegraph_lib::EvaluatedRules) -> BTreeSet<Path> {
  rules.rules.iter().flat_map(|r| r.targets.iter().cloned()).collect()
}

#[tokio::test]
async fn recursive_alias_covers_every_directory() {
  let project = Project::new();
  project.write("a/x.src", "x");
  project.write("b/y.src", "y");

  let system = project.system(CachingMode::Disabled);
  system.set_rule_generators(default_generators(alias_everywhere())).unwrap();

  let recursive = Alias::new(dpath(""), "all").dep_rec();
  let explicit = Build::all(vec![
    Alias::new(dpath(""), "all").dep(),
    Alias::new(dpath("a"), "all").dep(),
    Alias::new(dpath("b"), "all").dep(),
  ]);

  let from_recursive = system.evaluate_rules(true, recursive.clone()).await.unwrap();
  let from_explicit = system.evaluate_rules(true, explicit).await.unwrap();
  assert_eq!(targets(&from_recursive), targets(&from_explicit));
  assert_eq!(
    targets(&from_recursive),
    BTreeSet::from([dpath("out.txt"), dpath("a/out.txt"), dpath("b/out.txt")])
  );

  system.do_build(recursive).await.unwrap();
  assert!(project.exists(&dpath("a/out.txt")));
  assert!(project.exists(&dpath("b/out.txt")));
  assert_eq!(system.stats().executed, 3);
}

#[tokio::test]
async fn recursive_alias_defined_nowhere_fails() {
  let project = Project::new();
  project.write("a/x.src", "x");

  let generator = FnGen::new(|_, _, _| Ok(Some(SubdirSet::empty())));
  let system = project.system(CachingMode::Disabled);
  system.set_rule_generators(default_generators(generator)).unwrap();

  let err = system
    .do_build(Alias::new(dpath(""), "runtest").dep_rec())
    .await
    .unwrap_err();
  assert!(matches!(err, BuildError::NoRecursiveAlias { .. }), "{:?}", err);
  assert!(err.is_configuration());
}

#[tokio::test]
async fn undefined_alias_is_satisfied_trivially() {
  let project = Project::new();

  let generator = FnGen::new(|_, _, _| Ok(Some(SubdirSet::empty())));
  let system = project.system(CachingMode::Disabled);
  system.set_rule_generators(default_generators(generator)).unwrap();

  system.do_build(Alias::new(dpath(""), "runtest").dep()).await.unwrap();
  assert_eq!(system.stats().executed, 0);
}

#[tokio::test]
async fn generated_subdirectories_are_walked() {
  let project = Project::new();

  let generator = FnGen::new(|scope, dir, components| {
    let out = dir.join("out.txt");
    scope.rule([out.clone()], write(out.clone(), "out"))?;
    scope.add_alias_deps(&Alias::new(dir.clone(), "all"), Build::path(out))?;
    if components.is_empty() {
      return Ok(Some(SubdirSet::these(["generated"])));
    }
    Ok(Some(SubdirSet::empty()))
  });
  let system = project.system(CachingMode::Disabled);
  system.set_rule_generators(default_generators(generator)).unwrap();

  system.do_build(Alias::new(dpath(""), "all").dep_rec()).await.unwrap();
  assert!(project.exists(&dpath("generated/out.txt")));
}

#[tokio::test]
async fn aliases_span_contexts() {
  let project = Project::new();

  let contexts = vec![Context::new("default"), Context::new("release")];
  let names = [ContextName::new("default"), ContextName::new("release")];
  let generators = RuleGenerators::new().with_contexts(names.iter(), alias_everywhere());
  let system = project.system_with(contexts, CachingMode::Disabled, ExecuteConfig::default());
  system.set_rule_generators(generators).unwrap();

  system
    .do_build(dep_multi_contexts(&RelPath::root(), &AliasName::new("all"), &names))
    .await
    .unwrap();
  assert!(project.exists(&dpath("out.txt")));
  assert!(project.exists(&Path::build("release", "out.txt").unwrap()));

  system.reset().unwrap();
  system
    .do_build(dep_rec_multi_contexts(&RelPath::root(), &AliasName::new("all"), &names))
    .await
    .unwrap();

  let err = system
    .do_build(dep_rec_multi_contexts(&RelPath::root(), &AliasName::new("missing"), &names))
    .await
    .unwrap_err();
  assert!(matches!(err, BuildError::NoRecursiveAlias { .. }), "{:?}", err);
}

#[tokio::test]
async fn alias_action_runs_once_per_generation() {
  let project = Project::new();

  let generator = FnGen::new(|scope, dir, components| {
    if components.is_empty() {
      let alias = Alias::new(dir.clone(), "runtest");
      scope.add_alias_action(&alias, Build::pure(Action::mkdir(dir.join("ran"))))?;
    }
    Ok(Some(SubdirSet::empty()))
  });
  let system = project.system(CachingMode::Disabled);
  system.set_rule_generators(default_generators(generator)).unwrap();

  let runtest = Alias::new(dpath(""), "runtest");
  system.do_build(runtest.dep()).await.unwrap();
  system.do_build(runtest.dep()).await.unwrap();
  assert_eq!(system.stats().executed, 1);
  assert!(project.resolve(&dpath("ran")).is_dir());

  system.reset().unwrap();
  system.do_build(runtest.dep()).await.unwrap();
  assert_eq!(system.stats().executed, 1);
}

#[tokio::test]
async fn aliases_must_belong_to_their_directory() {
  let project = Project::new();

  let generator = FnGen::new(|scope, _, components| {
    if components.is_empty() {
      scope.add_alias_deps(&Alias::new(dpath("elsewhere"), "all"), Build::empty())?;
    }
    Ok(Some(SubdirSet::empty()))
  });
  let system = project.system(CachingMode::Disabled);
  system.set_rule_generators(default_generators(generator)).unwrap();

  let err = system.targets_of(&dpath("")).await.unwrap_err();
  assert!(matches!(err, BuildError::AliasOutsideDir { .. }), "{:?}", err);
}

#[tokio::test]
async fn package_install_alias_collects_files() {
  let project = Project::new();
  let default = ContextName::new("default");
  let pkg = rulegraph_lib::PackageName::new("foo");

  let generator = {
    let alias = Alias::package_install(&default, &pkg);
    FnGen::new(move |scope, dir, components| {
      if components.is_empty() {
        let meta = dir.join("META");
        scope.rule([meta.clone()], write(meta.clone(), "version = 1"))?;
        scope.add_alias_deps(&alias, Build::path(meta))?;
      }
      Ok(Some(SubdirSet::empty()))
    })
  };
  let system = project.system(CachingMode::Disabled);
  system.set_rule_generators(default_generators(generator)).unwrap();

  system.do_build(Alias::package_install(&default, &pkg).dep()).await.unwrap();
  assert_eq!(project.read(&dpath("META")), "version = 1");
}
