use predicates::prelude::*;

use super::common::TestEnv;

#[test]
fn cat_prints_streamed_payload() {
  let env = TestEnv::from_fixture("basic");
  env
    .build_cmd(&["textures/wood"])
    .args(["--platform", "linux"])
    .assert()
    .success();

  env
    .kiln_cmd()
    .args(["cat", "linux/textures/wood", "--stream", "data"])
    .assert()
    .success()
    .stdout("wood pixel payload");
}

#[test]
fn cat_prints_record() {
  let env = TestEnv::from_fixture("basic");
  env
    .build_cmd(&["textures/bump"])
    .args(["--platform", "linux"])
    .assert()
    .success();

  env
    .kiln_cmd()
    .args(["cat", "linux/textures/bump"])
    .assert()
    .success()
    .stdout(predicate::str::contains("\"texture_type\":\"normal-map\""))
    .stdout(predicate::str::ends_with("bump pixel payload"));
}

#[test]
fn cat_settings_record() {
  let env = TestEnv::from_fixture("basic");
  env
    .build_cmd(&["settings"])
    .args(["--platform", "android"])
    .assert()
    .success();

  env
    .kiln_cmd()
    .args(["cat", "android/settings"])
    .assert()
    .success()
    .stdout(predicate::str::contains("\"texture_quality\": \"fast\""))
    .stdout(predicate::str::contains("level-11-0"));
}

#[test]
fn cat_unknown_url_fails() {
  let env = TestEnv::empty();

  env
    .kiln_cmd()
    .args(["cat", "nothing/here"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("nothing/here"));
}

#[test]
fn cat_unknown_stream_fails() {
  let env = TestEnv::from_fixture("basic");
  env
    .build_cmd(&["textures/bump"])
    .args(["--platform", "linux"])
    .assert()
    .success();

  env
    .kiln_cmd()
    .args(["cat", "linux/textures/bump", "--stream", "data"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("data"));
}

#[test]
fn cat_needs_the_platform_qualified_url() {
  let env = TestEnv::from_fixture("basic");
  env
    .build_cmd(&["textures/wood"])
    .args(["--platform", "windows"])
    .assert()
    .success();

  env.kiln_cmd().args(["cat", "textures/wood"]).assert().failure();
  env
    .kiln_cmd()
    .args(["cat", "linux/textures/wood", "--stream", "data"])
    .assert()
    .failure();
  env
    .kiln_cmd()
    .args(["cat", "windows/textures/wood", "--stream", "data"])
    .assert()
    .success()
    .stdout("wood pixel payload");
}
