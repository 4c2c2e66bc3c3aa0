//! Texture compilation through the engine.

use kiln_lib::BuildStatus;
use kiln_lib::compiler::StreamingPolicy;
use kiln_lib::compiler::settings::TextureQuality;
use kiln_lib::compiler::texture::{self, TEXTURE_STREAM, TextureType};
use kiln_lib::platform::TargetPlatform;

use super::common::{TestPackage, read_record, read_stream};

const PIXELS: &[u8] = b"\x89PNG fake pixel payload";

fn wood() -> TestPackage {
  let package = TestPackage::with_settings();
  package.write("textures/wood.kasset", "kind: texture\nsource: wood.png\n");
  package.write("textures/wood.png", PIXELS);
  package
}

#[tokio::test]
async fn streamable_texture_goes_to_data_stream() {
  let package = wood();
  let engine = package.engine(StreamingPolicy::Flag);

  let result = package.build(&engine, TargetPlatform::Linux, &["textures/wood"]).await;

  assert_eq!(result.status, BuildStatus::Successful);
  assert_eq!(result.commands.len(), 2);
  assert_eq!(result.outputs.len(), 1);
  assert_eq!(result.outputs[0].url, "linux/textures/wood");

  let record = read_record(&engine, "linux/textures/wood");
  let (header, inline) = texture::decode(&record).unwrap();
  assert!(header.streamed);
  assert!(inline.is_empty());
  assert!(header.srgb);
  assert_eq!(header.texture_type, TextureType::Color);
  assert_eq!(header.platform, TargetPlatform::Linux);
  assert_eq!(header.texture_quality, TextureQuality::Normal);
  assert_eq!(header.payload_size, PIXELS.len() as u64);
  assert_eq!(read_stream(&engine, "linux/textures/wood", TEXTURE_STREAM), PIXELS);
}

#[tokio::test]
async fn never_policy_inlines_payload() {
  let package = wood();
  let engine = package.engine(StreamingPolicy::Never);

  package.build(&engine, TargetPlatform::Linux, &["textures/wood"]).await;

  let handle = engine.open_content("linux/textures/wood").unwrap();
  assert!(handle.stream_names().is_empty());
  let record = read_record(&engine, "linux/textures/wood");
  let (header, inline) = texture::decode(&record).unwrap();
  assert!(!header.streamed);
  assert_eq!(inline, PIXELS);
}

#[tokio::test]
async fn min_size_policy_keeps_small_textures_inline() {
  let package = wood();
  let engine = package.engine(StreamingPolicy::MinSize(1 << 20));

  package.build(&engine, TargetPlatform::Linux, &["textures/wood"]).await;

  let record = read_record(&engine, "linux/textures/wood");
  let (header, inline) = texture::decode(&record).unwrap();
  assert!(!header.streamed);
  assert_eq!(inline, PIXELS);
}

#[tokio::test]
async fn not_streamable_flag_is_honoured() {
  let package = TestPackage::with_settings();
  package.write("ui.kasset", "kind: texture\nsource: ui.png\nstreamable: false\n");
  package.write("ui.png", PIXELS);
  let engine = package.engine(StreamingPolicy::Flag);

  package.build(&engine, TargetPlatform::Windows, &["ui"]).await;

  let (header, _) = texture::decode(&read_record(&engine, "windows/ui")).unwrap();
  assert!(!header.streamed);
}

#[tokio::test]
async fn gamma_color_space_disables_srgb() {
  let package = TestPackage::new();
  package.write("settings.kasset", "kind: game-settings\ncolor_space: gamma\n");
  package.write("wood.kasset", "kind: texture\nsource: wood.png\n");
  package.write("wood.png", PIXELS);
  let engine = package.engine(StreamingPolicy::Never);

  package.build(&engine, TargetPlatform::Linux, &["wood"]).await;

  let (header, _) = texture::decode(&read_record(&engine, "linux/wood")).unwrap();
  assert!(!header.srgb);
}

#[tokio::test]
async fn normal_maps_are_never_srgb() {
  let package = TestPackage::with_settings();
  package.write(
    "bump.kasset",
    "kind: texture\nsource: bump.png\ntype: normal-map\nsrgb: true\n",
  );
  package.write("bump.png", PIXELS);
  let engine = package.engine(StreamingPolicy::Never);

  let result = package.build(&engine, TargetPlatform::Linux, &["bump"]).await;

  let (header, _) = texture::decode(&read_record(&engine, "linux/bump")).unwrap();
  assert_eq!(header.texture_type, TextureType::NormalMap);
  assert!(!header.srgb);
  assert!(result.log.iter().any(|entry| entry.message.contains("srgb is ignored")));
}

#[tokio::test]
async fn platform_override_reaches_texture_header() {
  let package = TestPackage::new();
  package.write(
    "settings.kasset",
    "kind: game-settings\ntexture_quality: high\nplatforms:\n  android:\n    texture_quality: fast\n",
  );
  package.write("wood.kasset", "kind: texture\nsource: wood.png\n");
  package.write("wood.png", PIXELS);
  let engine = package.engine(StreamingPolicy::Never);

  package.build(&engine, TargetPlatform::Android, &["wood"]).await;
  let (android, _) = texture::decode(&read_record(&engine, "android/wood")).unwrap();

  package.build(&engine, TargetPlatform::Windows, &["wood"]).await;
  let (windows, _) = texture::decode(&read_record(&engine, "windows/wood")).unwrap();

  assert_eq!(android.texture_quality, TextureQuality::Fast);
  assert_eq!(windows.texture_quality, TextureQuality::High);
}

#[tokio::test]
async fn empty_source_fails_texture_only() {
  let package = TestPackage::with_settings();
  package.write("empty.kasset", "kind: texture\nsource: empty.png\n");
  package.write("empty.png", b"");
  let engine = package.engine(StreamingPolicy::Flag);

  let result = package.build(&engine, TargetPlatform::Linux, &["empty"]).await;

  assert_eq!(result.status, BuildStatus::Failed);
  assert_eq!(result.command("linux/settings").unwrap().status, BuildStatus::Successful);
  assert_eq!(result.command("linux/empty").unwrap().status, BuildStatus::Failed);
  assert!(result.errors().any(|(url, entry)| url == Some("linux/empty") && entry.message.contains("empty")));
  assert!(engine.open_content("linux/empty").is_err());
}

#[tokio::test]
async fn missing_source_fails_texture() {
  let package = TestPackage::with_settings();
  package.write("gone.kasset", "kind: texture\nsource: gone.png\n");
  let engine = package.engine(StreamingPolicy::Flag);

  let result = package.build(&engine, TargetPlatform::Linux, &["gone"]).await;

  assert_eq!(result.status, BuildStatus::Failed);
  assert_eq!(result.command("linux/gone").unwrap().status, BuildStatus::Failed);
}
