use predicates::prelude::*;

use super::common::TestEnv;

#[test]
fn gc_with_empty_store_succeeds() {
  let env = TestEnv::empty();

  env
    .kiln_cmd()
    .arg("gc")
    .assert()
    .success()
    .stdout(predicate::str::contains("Garbage collection complete"));
}

#[test]
fn gc_dry_run_shows_what_would_be_removed() {
  let env = TestEnv::empty();

  env
    .kiln_cmd()
    .arg("gc")
    .arg("--dry-run")
    .assert()
    .success()
    .stdout(predicate::str::contains("Dry run"));
}

#[test]
fn gc_json_output_is_valid() {
  let env = TestEnv::empty();

  env
    .kiln_cmd()
    .arg("gc")
    .args(["-o", "json"])
    .assert()
    .success()
    .stdout(predicate::str::contains("objects_deleted"))
    .stdout(predicate::str::contains("cache_entries_deleted"))
    .stdout(predicate::str::contains("deleted_paths"));
}

#[test]
fn gc_removes_superseded_output_and_keeps_current() {
  let env = TestEnv::from_fixture("basic");
  let build = || {
    env
      .build_cmd(&["textures/wood"])
      .args(["--platform", "linux"])
      .assert()
      .success();
  };
  build();
  env.write_file("textures/wood.png", "repainted wood pixel payload");
  build();

  let output = env.kiln_cmd().args(["gc", "-o", "json"]).output().unwrap();
  assert!(output.status.success());
  let result: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
  assert_eq!(result["stats"]["objects_deleted"], 1);
  assert_eq!(result["stats"]["cache_entries_deleted"], 1);

  env
    .kiln_cmd()
    .args(["cat", "linux/textures/wood", "--stream", "data"])
    .assert()
    .success()
    .stdout("repainted wood pixel payload");
}

#[test]
fn gc_keeps_outputs_of_every_platform() {
  let env = TestEnv::from_fixture("basic");
  for platform in ["linux", "android"] {
    env
      .build_cmd(&["textures/wood"])
      .args(["--platform", platform])
      .assert()
      .success();
  }

  let output = env.kiln_cmd().args(["gc", "-o", "json"]).output().unwrap();
  assert!(output.status.success());
  let result: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
  assert_eq!(result["stats"]["objects_deleted"], 0);

  for url in ["linux/textures/wood", "android/textures/wood"] {
    env.kiln_cmd().args(["cat", url, "--stream", "data"]).assert().success();
  }
}
