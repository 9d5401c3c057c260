use std::collections::BTreeSet;

use rulegraph_lib::action::Action;
use rulegraph_lib::{
  Build, BuildError, CachingMode, Context, ExecuteConfig, FileSelector, Glob, SandboxPreference, SubdirSet,
};

use super::common::{FnGen, Project, compile, concat, default_generators, dpath, rel, src, write};

#[tokio::test]
async fn builds_library_from_source_once() {
  let project = Project::new();
  project.write("lib/foo.ml", "let x = 1");

  let generator = FnGen::new(|scope, dir, components| {
    if rel(components) == "lib" {
      let target = dir.join("foo.cma");
      scope.rule([target.clone()], compile(src("lib/foo.ml"), target))?;
    }
    Ok(Some(SubdirSet::empty()))
  });
  let system = project.system(CachingMode::Disabled);
  system.set_rule_generators(default_generators(generator)).unwrap();

  let target = dpath("lib/foo.cma");
  system.do_build(Build::path(target.clone())).await.unwrap();

  assert!(project.exists(&target));
  assert_eq!(project.read(&target), "compiled(let x = 1)");
  assert_eq!(system.stats().executed, 1);
}

#[tokio::test]
async fn second_build_in_same_generation_runs_nothing() {
  let project = Project::new();
  project.write("lib/foo.ml", "let x = 1");

  let generator = FnGen::new(|scope, dir, components| {
    if rel(components) == "lib" {
      let target = dir.join("foo.cma");
      scope.rule([target.clone()], compile(src("lib/foo.ml"), target))?;
    }
    Ok(Some(SubdirSet::empty()))
  });
  let system = project.system(CachingMode::Disabled);
  system.set_rule_generators(default_generators(generator.clone())).unwrap();

  let request = Build::path(dpath("lib/foo.cma"));
  system.do_build(request.clone()).await.unwrap();
  system.do_build(request).await.unwrap();

  assert_eq!(system.stats().executed, 1);
  assert_eq!(generator.calls(), 1);
}

#[tokio::test]
async fn shared_dependency_executes_once() {
  let project = Project::new();

  let generator = FnGen::new(|scope, dir, components| {
    if components.is_empty() {
      let common = dir.join("common.txt");
      scope.rule([common.clone()], write(common.clone(), "common"))?;
      for name in ["a.txt", "b.txt"] {
        let target = dir.join(name);
        scope.rule([target.clone()], concat(vec![common.clone()], target))?;
      }
    }
    Ok(Some(SubdirSet::empty()))
  });
  let system = project.system(CachingMode::Disabled);
  system.set_rule_generators(default_generators(generator)).unwrap();

  let request = Build::path(dpath("a.txt")).then(Build::path(dpath("b.txt")));
  system.do_build(request).await.unwrap();

  assert_eq!(system.stats().executed, 3);
  assert_eq!(project.read(&dpath("a.txt")), "common");
  assert_eq!(project.read(&dpath("b.txt")), "common");
}

#[tokio::test]
async fn dependency_cycle_is_reported_with_chain() {
  let project = Project::new();

  let generator = FnGen::new(|scope, dir, components| {
    if components.is_empty() {
      let a = dir.join("a.txt");
      let b = dir.join("b.txt");
      scope.rule([a.clone()], concat(vec![b.clone()], a.clone()))?;
      scope.rule([b.clone()], concat(vec![a.clone()], b))?;
    }
    Ok(Some(SubdirSet::empty()))
  });
  let system = project.system(CachingMode::Disabled);
  system.set_rule_generators(default_generators(generator)).unwrap();

  let err = system.do_build(Build::path(dpath("a.txt"))).await.unwrap_err();
  match err {
    BuildError::DependencyCycle { chain } => {
      assert!(chain.len() >= 3, "chain too short: {:?}", chain);
      assert!(chain.iter().any(|n| n.contains("a.txt")));
      assert!(chain.iter().any(|n| n.contains("b.txt")));
    }
    other => panic!("expected a dependency cycle, got {:?}", other),
  }
  assert_eq!(system.stats().executed, 0);
}

#[tokio::test]
async fn rule_depending_on_its_own_target_is_a_cycle() {
  let project = Project::new();

  let generator = FnGen::new(|scope, dir, components| {
    if components.is_empty() {
      let a = dir.join("self.txt");
      scope.rule([a.clone()], concat(vec![a.clone()], a))?;
    }
    Ok(Some(SubdirSet::empty()))
  });
  let system = project.system(CachingMode::Disabled);
  system.set_rule_generators(default_generators(generator)).unwrap();

  let err = system.do_build(Build::path(dpath("self.txt"))).await.unwrap_err();
  assert!(matches!(err, BuildError::DependencyCycle { .. }), "{:?}", err);
}

#[tokio::test]
async fn failure_stops_new_work_until_reset() {
  let project = Project::new();

  let generator = FnGen::new(|scope, dir, components| {
    if components.is_empty() {
      let bad = dir.join("bad.txt");
      scope.rule(
        [bad],
        Build::pure(Action::run("definitely-not-a-real-program-xyz", Vec::<String>::new())),
      )?;
      let good = dir.join("good.txt");
      scope.rule([good.clone()], write(good, "good"))?;
    }
    Ok(Some(SubdirSet::empty()))
  });
  let system = project.system(CachingMode::Disabled);
  system.set_rule_generators(default_generators(generator)).unwrap();

  let err = system.do_build(Build::path(dpath("bad.txt"))).await.unwrap_err();
  assert!(matches!(err, BuildError::ActionFailed { .. }), "{:?}", err);

  let err = system.do_build(Build::path(dpath("good.txt"))).await.unwrap_err();
  assert_eq!(err, BuildError::Cancelled);
  assert!(!project.exists(&dpath("good.txt")));

  system.reset().unwrap();
  system.do_build(Build::path(dpath("good.txt"))).await.unwrap();
  assert_eq!(project.read(&dpath("good.txt")), "good");
}

#[tokio::test]
#[cfg(unix)]
async fn failed_build_waits_for_running_siblings() {
  let project = Project::new();

  let generator = FnGen::new(|scope, dir, components| {
    if components.is_empty() {
      scope.rule(
        [dir.join("slow.txt")],
        Build::pure(Action::shell("sleep 1; echo slow > slow.txt")),
      )?;
      scope.rule([dir.join("bad.txt")], Build::pure(Action::shell("exit 1")))?;
    }
    Ok(Some(SubdirSet::empty()))
  });
  let config = ExecuteConfig {
    parallelism: 4,
    sandbox: SandboxPreference::None,
  };
  let system = project.system_with(vec![Context::new("default")], CachingMode::Disabled, config);
  system.set_rule_generators(default_generators(generator)).unwrap();

  let request = Build::path(dpath("slow.txt")).zip(Build::path(dpath("bad.txt")));
  let err = system.do_build(request).await.unwrap_err();
  assert!(matches!(err, BuildError::CmdFailed { code: Some(1), .. }), "{:?}", err);

  let slow_after_build = project.exists(&dpath("slow.txt"));
  system.reset().unwrap();
  tokio::time::sleep(std::time::Duration::from_millis(1500)).await;
  assert_eq!(project.exists(&dpath("slow.txt")), slow_after_build);
}

#[tokio::test]
#[cfg(unix)]
async fn failing_command_reports_exit_code() {
  let project = Project::new();

  let generator = FnGen::new(|scope, dir, components| {
    if components.is_empty() {
      scope.rule([dir.join("out.txt")], Build::pure(Action::shell("exit 3")))?;
    }
    Ok(Some(SubdirSet::empty()))
  });
  let system = project.system(CachingMode::Disabled);
  system.set_rule_generators(default_generators(generator)).unwrap();

  let err = system.do_build(Build::path(dpath("out.txt"))).await.unwrap_err();
  assert!(matches!(err, BuildError::CmdFailed { code: Some(3), .. }), "{:?}", err);
}

#[tokio::test]
async fn action_must_produce_its_targets() {
  let project = Project::new();

  let generator = FnGen::new(|scope, dir, components| {
    if components.is_empty() {
      let declared = dir.join("declared.txt");
      scope.rule([declared], write(dir.join("other.txt"), "oops"))?;
    }
    Ok(Some(SubdirSet::empty()))
  });
  let system = project.system(CachingMode::Disabled);
  system.set_rule_generators(default_generators(generator)).unwrap();

  let err = system.do_build(Build::path(dpath("declared.txt"))).await.unwrap_err();
  assert!(matches!(err, BuildError::TargetNotProduced { .. }), "{:?}", err);
}

#[tokio::test]
async fn missing_inputs_are_reported() {
  let project = Project::new();

  let generator = FnGen::new(|scope, dir, components| {
    if components.is_empty() {
      let out = dir.join("out.txt");
      scope.rule([out.clone()], compile(src("missing.ml"), out))?;
    }
    Ok(Some(SubdirSet::empty()))
  });
  let system = project.system(CachingMode::Disabled);
  system.set_rule_generators(default_generators(generator)).unwrap();

  let err = system.do_build(Build::path(dpath("out.txt"))).await.unwrap_err();
  assert_eq!(err, BuildError::MissingFile(src("missing.ml")));

  system.reset().unwrap();
  let err = system.do_build(Build::path(dpath("nothing.txt"))).await.unwrap_err();
  assert_eq!(err, BuildError::NoRule(dpath("nothing.txt")));
}

#[tokio::test]
async fn dependencies_discovered_from_file_contents() {
  let project = Project::new();
  project.write("deps.txt", "a.out\nb.out\n");

  let generator = FnGen::new(|scope, dir, components| {
    if components.is_empty() {
      for name in ["a.out", "b.out", "c.out"] {
        let target = dir.join(name);
        scope.rule([target.clone()], write(target, name))?;
      }
    }
    Ok(Some(SubdirSet::empty()))
  });
  let system = project.system(CachingMode::Disabled);
  system.set_rule_generators(default_generators(generator)).unwrap();

  let request = Build::lines_of(src("deps.txt"))
    .map(|lines| {
      let paths = lines.iter().map(|l| dpath(l)).collect::<Vec<_>>();
      (lines.len(), paths)
    })
    .dyn_paths();
  let count = system.do_build(request).await.unwrap();

  assert_eq!(count, 2);
  assert!(project.exists(&dpath("a.out")));
  assert!(project.exists(&dpath("b.out")));
  assert!(!project.exists(&dpath("c.out")));
  assert_eq!(system.stats().executed, 2);
}

#[tokio::test]
async fn selector_sees_targets_of_its_directory() {
  let project = Project::new();

  let generator = FnGen::new(|scope, dir, components| {
    if components.is_empty() {
      for name in ["x.out", "y.out", "z.txt"] {
        let target = dir.join(name);
        scope.rule([target.clone()], write(target, name))?;
      }
    }
    Ok(Some(SubdirSet::empty()))
  });
  let system = project.system(CachingMode::Disabled);
  system.set_rule_generators(default_generators(generator)).unwrap();

  let selector = FileSelector::new(dpath(""), Glob::new("*.out").unwrap());

  let listed = system.do_build(Build::eval_pred(selector.clone())).await.unwrap();
  assert_eq!(listed, BTreeSet::from([dpath("x.out"), dpath("y.out")]));
  assert_eq!(system.stats().executed, 0);

  let built = system.do_build(Build::paths_matching(selector)).await.unwrap();
  assert_eq!(built, listed);
  assert_eq!(system.stats().executed, 2);
  assert!(!project.exists(&dpath("z.txt")));

  let negated = FileSelector::new(dpath(""), Glob::new("[!x]*").unwrap());
  let listed = system.do_build(Build::eval_pred(negated)).await.unwrap();
  assert_eq!(listed, BTreeSet::from([dpath("y.out"), dpath("z.txt")]));
}

#[tokio::test]
async fn context_environment_reaches_rules() {
  let project = Project::new();

  let generator = FnGen::new(|scope, dir, components| {
    if components.is_empty() {
      let target = dir.join("profile.txt");
      let action = {
        let target = target.clone();
        Build::env_var("PROFILE").map(move |value| Action::write_file(target.clone(), value.unwrap_or_default()))
      };
      scope.rule([target], action)?;
    }
    Ok(Some(SubdirSet::empty()))
  });
  let system = project.system_with(
    vec![Context::new("default").with_env("PROFILE", "release")],
    CachingMode::Disabled,
    ExecuteConfig::default(),
  );
  system.set_rule_generators(default_generators(generator)).unwrap();

  system.do_build(Build::path(dpath("profile.txt"))).await.unwrap();
  assert_eq!(project.read(&dpath("profile.txt")), "release");
}

#[tokio::test]
async fn source_files_are_copied_on_demand() {
  let project = Project::new();
  project.write("lib/foo.ml", "let x = 1");

  let generator = FnGen::new(|_, _, _| Ok(Some(SubdirSet::empty())));
  let system = project.system(CachingMode::Disabled);
  system.set_rule_generators(default_generators(generator)).unwrap();

  system.do_build(Build::path(dpath("lib/foo.ml"))).await.unwrap();
  assert_eq!(project.read(&dpath("lib/foo.ml")), "let x = 1");
}

#[tokio::test]
async fn sandboxed_rules_only_see_their_dependencies() {
  let project = Project::new();
  project.write("lib/foo.ml", "let x = 1");

  let generator = FnGen::new(|scope, dir, components| {
    if rel(components) == "lib" {
      let target = dir.join("foo.copy");
      scope.rule(
        [target.clone()],
        Build::path(src("lib/foo.ml")).map(move |()| Action::copy(src("lib/foo.ml"), target.clone())),
      )?;
    }
    Ok(Some(SubdirSet::empty()))
  });
  let config = ExecuteConfig {
    parallelism: 2,
    sandbox: SandboxPreference::Copy,
  };
  let system = project.system_with(vec![Context::new("default")], CachingMode::Disabled, config);
  system.set_rule_generators(default_generators(generator)).unwrap();

  system.do_build(Build::path(dpath("lib/foo.copy"))).await.unwrap();
  assert_eq!(project.read(&dpath("lib/foo.copy")), "let x = 1");

  let leftovers = std::fs::read_dir(project.layout.build_root.join(".sandbox")).unwrap().count();
  assert_eq!(leftovers, 0);
}

#[tokio::test]
async fn concurrent_requests_share_work() {
  let project = Project::new();

  let generator = FnGen::new(|scope, dir, components| {
    if components.is_empty() {
      for i in 0..8 {
        let target = dir.join(&format!("part{}.txt", i));
        scope.rule([target.clone()], write(target, "part"))?;
      }
      let all = dir.join("all.txt");
      let parts = (0..8).map(|i| dir.join(&format!("part{}.txt", i))).collect();
      scope.rule([all.clone()], concat(parts, all))?;
    }
    Ok(Some(SubdirSet::empty()))
  });
  let config = ExecuteConfig {
    parallelism: 2,
    sandbox: SandboxPreference::None,
  };
  let system = project.system_with(vec![Context::new("default")], CachingMode::Disabled, config);
  system.set_rule_generators(default_generators(generator)).unwrap();

  let request = Build::path(dpath("all.txt"));
  let (a, b) = tokio::join!(system.do_build(request.clone()), system.do_build(request));
  a.unwrap();
  b.unwrap();

  assert_eq!(system.stats().executed, 9);
  assert_eq!(project.read(&dpath("all.txt")), vec!["part"; 8].join("+"));
}
