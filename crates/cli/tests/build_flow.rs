//! End-to-end build flows through the `zen` binary.

mod common;

use common::{copy_package, read, TestEnv};
use predicates::prelude::*;

#[test]
fn build_materializes_outputs_and_metadata() {
  let env = TestEnv::new();
  env.write_package("a", &copy_package(false));
  env.write_file("a/f.txt", "hi");

  env.zen().args(["build", "//p/a:t"]).assert().success();

  assert_eq!(read(&env.state().join("out/a/t/f.txt")), "hi");

  let metadata_dir = env.state().join("metadata/a/t");
  let markers: Vec<_> = std::fs::read_dir(metadata_dir).unwrap().collect();
  assert_eq!(markers.len(), 1);

  // The artifact bundle for the hash exists alongside.
  let artifacts: Vec<_> = std::fs::read_dir(env.state().join("artifacts/a/t")).unwrap().collect();
  assert_eq!(artifacts.len(), 1);
}

#[test]
fn second_build_is_a_cache_hit() {
  let env = TestEnv::new();
  env.write_package("a", &copy_package(true));
  env.write_file("a/f.txt", "hi");

  env.zen().args(["build", "//p/a:t"]).assert().success();
  env.zen().args(["build", "//p/a:t"]).assert().success();

  // The run hook executed exactly once.
  assert_eq!(read(&env.project.join("runs.log")), "ran\n");
}

#[test]
fn changed_input_rebuilds() {
  let env = TestEnv::new();
  env.write_package("a", &copy_package(true));
  env.write_file("a/f.txt", "hi");
  env.zen().args(["build", "//p/a:t"]).assert().success();

  env.write_file("a/f.txt", "bye");
  env.zen().args(["build", "//p/a:t"]).assert().success();

  assert_eq!(read(&env.project.join("runs.log")), "ran\nran\n");
  assert_eq!(read(&env.state().join("out/a/t/f.txt")), "bye");

  // One sandbox per hash.
  assert_eq!(std::fs::read_dir(env.state().join("cache/a/t")).unwrap().count(), 2);
}

#[test]
fn dependency_outputs_stage_into_dependent_sandbox() {
  let env = TestEnv::new();
  env.write_package(
    "a",
    r#"{"exec": [
      {"name": "t", "srcs": {"s": ["f.txt"]}, "outs": ["f.txt"], "scripts": {"build": []}},
      {"name": "u", "srcs": {"r": ["//p/a:t"]}, "outs": ["g.txt"], "deps": ["//p/a:t"],
       "scripts": {"build": ["cp f.txt g.txt"]}}
    ]}"#,
  );
  env.write_file("a/f.txt", "hi");

  env.zen().args(["build", "//p/a:u"]).assert().success();

  assert_eq!(read(&env.state().join("out/a/u/g.txt")), "hi");
}

#[test]
fn cycle_is_reported_and_nothing_runs() {
  let env = TestEnv::new();
  env.write_package(
    "a",
    r#"{"exec": [
      {"name": "t", "deps": ["//p/a:u"], "scripts": {"build": ["touch t-ran"]}},
      {"name": "u", "deps": ["//p/a:t"], "scripts": {"build": ["touch u-ran"]}}
    ]}"#,
  );

  env
    .zen()
    .args(["build", "//p/a:t"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("cycle"));

  assert!(!env.state().join("cache").exists());
}

#[test]
fn spread_builds_every_subpackage() {
  let env = TestEnv::new();
  let block =
    |name: &str| format!(r#"{{"exec": [{{"name": "{name}", "outs": ["o"], "scripts": {{"build": ["echo x > o"]}}}}]}}"#);
  env.write_package("a", &block("root"));
  env.write_package("a/sub1", &block("one"));
  env.write_package("a/sub2", &block("two"));

  env.zen().args(["build", "//p/a/..."]).assert().success();

  assert!(env.state().join("out/a/root/o").exists());
  assert!(env.state().join("out/a/sub1/one/o").exists());
  assert!(env.state().join("out/a/sub2/two/o").exists());
}

#[test]
fn failing_step_reports_its_fqn() {
  let env = TestEnv::new();
  env.write_package(
    "a",
    r#"{"exec": [{"name": "bad", "scripts": {"build": ["exit 1"]}}]}"#,
  );

  env
    .zen()
    .args(["build", "//p/a:bad"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("//p/a:bad:build"));
}

#[test]
fn clean_flag_forces_rebuild() {
  let env = TestEnv::new();
  env.write_package("a", &copy_package(true));
  env.write_file("a/f.txt", "hi");

  env.zen().args(["build", "//p/a:t"]).assert().success();
  env.zen().args(["build", "--clean", "//p/a:t"]).assert().success();

  assert_eq!(read(&env.project.join("runs.log")), "ran\nran\n");
}

#[test]
fn clean_command_removes_state() {
  let env = TestEnv::new();
  env.write_package("a", &copy_package(false));
  env.write_file("a/f.txt", "hi");
  env.zen().args(["build", "//p/a:t"]).assert().success();
  assert!(env.state().join("out").exists());

  env.zen().arg("clean").assert().success();
  assert!(!env.state().join("out").exists());
  assert!(!env.state().join("cache").exists());
  assert!(!env.state().join("metadata").exists());
}

#[test]
fn variables_interpolate_into_commands() {
  let env = TestEnv::new();
  env.write_package(
    "a",
    r#"{
      "variables": [{"greeting": "hello"}],
      "exec": [{"name": "t", "outs": ["o"], "env": {"MSG": "world"},
                "scripts": {"build": ["echo {MSG} > o"]}}]
    }"#,
  );

  env.zen().args(["build", "//p/a:t"]).assert().success();
  assert_eq!(read(&env.state().join("out/a/t/o")), "world\n");
}

#[test]
fn deploy_runs_build_first() {
  let env = TestEnv::new();
  env.write_package(
    "a",
    r#"{"exec": [{
      "name": "t",
      "srcs": {"s": ["f.txt"]},
      "outs": ["f.txt"],
      "scripts": {"build": [], "deploy": ["test -f f.txt", "echo deployed > deployed.txt"]}
    }]}"#,
  );
  env.write_file("a/f.txt", "hi");

  env.zen().args(["deploy", "//p/a:t"]).assert().success();

  // Deploy ran inside the build's materialized out dir.
  assert_eq!(read(&env.state().join("out/a/t/deployed.txt")), "deployed\n");
}
