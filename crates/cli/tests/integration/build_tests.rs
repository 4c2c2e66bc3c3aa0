use predicates::prelude::*;

use super::common::TestEnv;

#[test]
fn build_texture_succeeds() {
  let env = TestEnv::from_fixture("basic");

  env
    .build_cmd(&["textures/wood"])
    .args(["--platform", "linux"])
    .assert()
    .success()
    .stdout(predicate::str::contains("textures/wood"))
    .stdout(predicate::str::contains("settings"))
    .stdout(predicate::str::contains("Build complete"));
}

#[test]
fn second_build_is_cached() {
  let env = TestEnv::from_fixture("basic");

  env.build_cmd(&["textures/wood"]).assert().success();

  env
    .build_cmd(&["textures/wood"])
    .assert()
    .success()
    .stdout(predicate::str::contains("(cached)"))
    .stdout(predicate::str::contains("Executed: 0"));
}

#[test]
fn json_output_reports_commands() {
  let env = TestEnv::from_fixture("basic");

  let output = env
    .build_cmd(&["textures/wood", "textures/bump"])
    .args(["-o", "json", "--jobs", "2"])
    .output()
    .unwrap();
  assert!(output.status.success());

  let result: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
  assert_eq!(result["status"], "successful");
  assert_eq!(result["commands"].as_array().unwrap().len(), 3);
  assert_eq!(result["outputs"].as_array().unwrap().len(), 2);
}

#[test]
fn hash_inputs_flag_is_accepted() {
  let env = TestEnv::from_fixture("basic");

  env
    .build_cmd(&["textures/bump"])
    .args(["--hash-inputs", "--platform", "android"])
    .assert()
    .success();
}

#[test]
fn empty_source_fails_with_exit_code() {
  let env = TestEnv::from_fixture("broken");

  env
    .build_cmd(&["empty"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("is empty"))
    .stderr(predicate::str::contains("Build failed"));
}

#[test]
fn unknown_kind_fails_before_building() {
  let env = TestEnv::from_fixture("broken");

  env
    .build_cmd(&["hero"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("no compiler registered for asset kind 'mesh'"));
}

#[test]
fn unknown_asset_fails() {
  let env = TestEnv::from_fixture("basic");

  env
    .build_cmd(&["textures/missing"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("textures/missing"));
}

#[test]
fn unknown_platform_is_rejected() {
  let env = TestEnv::from_fixture("basic");

  env
    .build_cmd(&["textures/wood"])
    .args(["--platform", "amiga"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("unknown platform"));
}

#[test]
fn timeout_accepts_human_durations() {
  let env = TestEnv::from_fixture("basic");

  env
    .build_cmd(&["textures/wood"])
    .args(["--timeout", "10m"])
    .assert()
    .success();

  env
    .build_cmd(&["textures/wood"])
    .args(["--timeout", "soon"])
    .assert()
    .failure();
}
