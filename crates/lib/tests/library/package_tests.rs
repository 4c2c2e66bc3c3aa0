//! Package builds: expansion, caching and invalidation across rebuilds.

use kiln_lib::BuildStatus;
use kiln_lib::compiler::StreamingPolicy;
use kiln_lib::compiler::texture;
use kiln_lib::platform::TargetPlatform;
use tokio_util::sync::CancellationToken;

use super::common::{TestPackage, read_record, touch_later};

fn two_textures() -> TestPackage {
  let package = TestPackage::with_settings();
  package.write("textures/wood.kasset", "kind: texture\nsource: wood.png\n");
  package.write("textures/wood.png", "wood pixels");
  package.write("textures/stone.kasset", "kind: texture\nsource: stone.png\ntype: grayscale\n");
  package.write("textures/stone.png", "stone pixels");
  package
}

#[tokio::test]
async fn shared_settings_compile_once() {
  let package = two_textures();
  let engine = package.engine(StreamingPolicy::Flag);

  let result = package
    .build(&engine, TargetPlatform::Linux, &["textures/wood", "textures/stone"])
    .await;

  assert!(result.is_success());
  assert_eq!(result.commands.len(), 3);
  assert_eq!(result.outputs.len(), 2);
  assert_eq!(result.commands[0].url, "linux/settings");
}

#[tokio::test]
async fn unchanged_rebuild_executes_nothing() {
  let package = two_textures();
  let engine = package.engine(StreamingPolicy::Flag);
  let assets = ["textures/wood", "textures/stone"];

  let first = package.build(&engine, TargetPlatform::Linux, &assets).await;
  let second = package.build(&engine, TargetPlatform::Linux, &assets).await;

  assert_eq!(first.executed(), 3);
  assert_eq!(second.executed(), 0);
  assert_eq!(second.cache_hits(), 3);
  assert_eq!(first.outputs, second.outputs);
  assert_eq!(engine.store().write_count(), 3);
}

#[tokio::test]
async fn edited_source_rebuilds_only_its_texture() {
  let package = two_textures();
  let engine = package.engine(StreamingPolicy::Never);
  let assets = ["textures/wood", "textures/stone"];

  package.build(&engine, TargetPlatform::Linux, &assets).await;
  package.write("textures/wood.png", "repainted wood pixels");
  let result = package.build(&engine, TargetPlatform::Linux, &assets).await;

  assert!(result.is_success());
  assert!(result.command("linux/textures/wood").unwrap().executed);
  assert!(result.command("linux/textures/stone").unwrap().cache_hit);
  assert!(result.command("linux/settings").unwrap().cache_hit);
  assert!(read_record(&engine, "linux/textures/wood").ends_with(b"repainted wood pixels"));
}

#[tokio::test]
async fn touched_source_rebuilds() {
  let package = two_textures();
  let engine = package.engine(StreamingPolicy::Never);

  package.build(&engine, TargetPlatform::Linux, &["textures/stone"]).await;
  touch_later(&package.root().join("textures/stone.png"));
  let result = package.build(&engine, TargetPlatform::Linux, &["textures/stone"]).await;

  assert!(result.command("linux/textures/stone").unwrap().executed);
}

#[tokio::test]
async fn settings_change_invalidates_dependents() {
  let package = two_textures();
  let engine = package.engine(StreamingPolicy::Flag);
  let assets = ["textures/wood", "textures/stone"];

  package.build(&engine, TargetPlatform::Linux, &assets).await;
  package.write("settings.kasset", "kind: game-settings\ncolor_space: gamma\n");
  let result = package.build(&engine, TargetPlatform::Linux, &assets).await;

  assert!(result.is_success());
  assert_eq!(result.executed(), 3);
}

#[tokio::test]
async fn platforms_cache_separately() {
  let package = two_textures();
  let engine = package.engine(StreamingPolicy::Flag);

  package.build(&engine, TargetPlatform::Linux, &["textures/wood"]).await;
  let ios = package.build(&engine, TargetPlatform::Ios, &["textures/wood"]).await;
  let linux = package.build(&engine, TargetPlatform::Linux, &["textures/wood"]).await;

  assert_eq!(ios.executed(), 2);
  assert_eq!(linux.executed(), 0);
}

#[tokio::test]
async fn platform_builds_publish_side_by_side() {
  let package = two_textures();
  let engine = package.engine(StreamingPolicy::Never);

  let linux = package.build(&engine, TargetPlatform::Linux, &["textures/wood"]).await;
  let android = package.build(&engine, TargetPlatform::Android, &["textures/wood"]).await;

  assert!(linux.is_success() && android.is_success());
  assert_eq!(linux.outputs[0].url, "linux/textures/wood");
  assert_eq!(android.outputs[0].url, "android/textures/wood");
  assert_ne!(linux.outputs[0].fingerprint, android.outputs[0].fingerprint);

  for (url, platform) in [
    ("linux/textures/wood", TargetPlatform::Linux),
    ("android/textures/wood", TargetPlatform::Android),
  ] {
    let record = read_record(&engine, url);
    let (header, _) = texture::decode(&record).unwrap();
    assert_eq!(header.platform, platform, "{url}");
  }
}

#[tokio::test]
async fn unknown_asset_kind_fails_before_execution() {
  let package = TestPackage::with_settings();
  package.write("hero.kasset", "kind: mesh\nsource: hero.fbx\n");
  let engine = package.engine(StreamingPolicy::Flag);

  let result = package.build(&engine, TargetPlatform::Linux, &["hero"]).await;

  assert_eq!(result.status, BuildStatus::Failed);
  assert!(result.commands.is_empty());
  assert!(result.errors().any(|(_, entry)| entry.message.contains("mesh")));
}

#[tokio::test]
async fn broken_description_is_skipped_not_fatal() {
  let package = two_textures();
  package.write("broken.kasset", "kind: [texture\n");
  let engine = package.engine(StreamingPolicy::Flag);

  let loaded = package.load();
  assert_eq!(loaded.skipped().len(), 1);

  let result = package.build(&engine, TargetPlatform::Linux, &["textures/wood"]).await;
  assert!(result.is_success());
}

#[tokio::test]
async fn cancelled_request_publishes_nothing() {
  let package = two_textures();
  let engine = package.engine(StreamingPolicy::Flag);
  let cancel = CancellationToken::new();
  cancel.cancel();

  let request = kiln_lib::BuildRequest::new(TargetPlatform::Linux).asset("textures/wood");
  let result = engine.build(&package.load(), &request, &cancel).await;

  assert_eq!(result.status, BuildStatus::Cancelled);
  assert!(result.outputs.is_empty());
  assert!(engine.open_content("linux/textures/wood").is_err());
  assert_eq!(engine.store().write_count(), 0);
}

#[tokio::test]
async fn performance_report_covers_phases() {
  let package = two_textures();
  let engine = package.engine(StreamingPolicy::Flag);

  let result = package.build(&engine, TargetPlatform::Linux, &["textures/wood"]).await;

  let labels: Vec<_> = result.performance.measures().iter().map(|m| m.label.as_str()).collect();
  assert_eq!(labels, vec!["expand", "execute", "aggregate"]);
}
