//! Texture compiler.
//!
//! Texture assets reference a source image next to their description. Compilation
//! depends on the package's game settings (for the color space) and produces a record
//! holding a JSON header. The pixel payload follows the header inline, or goes into a
//! separate `data` stream when the [`StreamingPolicy`] says so.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::asset::AssetItem;
use crate::command::{Command, CommandError, ExecuteContext, InputFile, Params};
use crate::compiler::settings::{self, ColorSpace, SETTINGS_ASSET_KIND, TextureQuality};
use crate::compiler::{Compilation, CompileContext, CompileError, Compiler, output_url};
use crate::graph::DependencyKind;
use crate::graph::resolve::{AssetSelector, DependencyRequest};
use crate::platform::TargetPlatform;
use crate::store::ContentBlob;
use crate::util::hash::hash_bytes;

pub const TEXTURE_ASSET_KIND: &str = "texture";
pub const TEXTURE_COMMAND_KIND: &str = "texture-convert";
const TEXTURE_COMMAND_VERSION: u32 = 3;
pub const TEXTURE_STREAM: &str = "data";
const HEADER_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TextureType {
  #[default]
  Color,
  NormalMap,
  Grayscale,
}

impl fmt::Display for TextureType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      TextureType::Color => write!(f, "color"),
      TextureType::NormalMap => write!(f, "normal-map"),
      TextureType::Grayscale => write!(f, "grayscale"),
    }
  }
}

fn default_true() -> bool {
  true
}

/// A `texture` asset description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextureAsset {
  pub source: PathBuf,
  #[serde(rename = "type", default)]
  pub texture_type: TextureType,
  /// Sample as sRGB. Only meaningful for color textures.
  #[serde(default = "default_true")]
  pub srgb: bool,
  #[serde(default = "default_true")]
  pub streamable: bool,
}

impl TextureAsset {
  fn with_type(source: impl Into<PathBuf>, texture_type: TextureType) -> Self {
    Self {
      source: source.into(),
      texture_type,
      srgb: texture_type == TextureType::Color,
      streamable: true,
    }
  }

  pub fn color(source: impl Into<PathBuf>) -> Self {
    Self::with_type(source, TextureType::Color)
  }

  pub fn normal_map(source: impl Into<PathBuf>) -> Self {
    Self::with_type(source, TextureType::NormalMap)
  }

  pub fn grayscale(source: impl Into<PathBuf>) -> Self {
    Self::with_type(source, TextureType::Grayscale)
  }

  /// Render as an asset description file.
  pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
    let mut value = serde_yaml::to_value(self)?;
    if let serde_yaml::Value::Mapping(mapping) = &mut value {
      mapping.insert("kind".into(), TEXTURE_ASSET_KIND.into());
    }
    serde_yaml::to_string(&value)
  }
}

/// Decides whether a texture payload goes into a separate stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StreamingPolicy {
  /// Stream whenever the asset is marked streamable.
  #[default]
  Flag,
  /// Stream streamable assets whose payload is at least this many bytes.
  MinSize(u64),
  /// Always inline.
  Never,
}

impl StreamingPolicy {
  pub fn should_stream(&self, streamable: bool, size: u64) -> bool {
    match self {
      StreamingPolicy::Flag => streamable,
      StreamingPolicy::MinSize(min) => streamable && size >= *min,
      StreamingPolicy::Never => false,
    }
  }
}

impl fmt::Display for StreamingPolicy {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      StreamingPolicy::Flag => write!(f, "flag"),
      StreamingPolicy::MinSize(min) => write!(f, "min-size:{min}"),
      StreamingPolicy::Never => write!(f, "never"),
    }
  }
}

/// JSON header at the start of every texture record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextureHeader {
  pub format_version: u32,
  pub texture_type: TextureType,
  pub srgb: bool,
  pub platform: TargetPlatform,
  pub graphics_profile: String,
  pub texture_quality: TextureQuality,
  pub payload_size: u64,
  pub payload_hash: String,
  /// Payload lives in the `data` stream rather than after the header.
  pub streamed: bool,
}

/// Split a texture record into its header and inline payload (empty when streamed).
pub fn decode(record: &[u8]) -> Result<(TextureHeader, &[u8]), serde_json::Error> {
  let split = record.iter().position(|&b| b == b'\n').unwrap_or(record.len());
  let header = serde_json::from_slice(&record[..split])?;
  let payload = record.get(split + 1..).unwrap_or(&[]);
  Ok((header, payload))
}

#[derive(Debug)]
pub struct TextureConvertCommand {
  url: String,
  source: PathBuf,
  settings_url: String,
  texture_type: TextureType,
  srgb: bool,
  streamable: bool,
  platform: TargetPlatform,
  policy: StreamingPolicy,
  params: Params,
}

impl TextureConvertCommand {
  /// `source` is absolute or relative to the package root.
  pub fn new(
    url: &str,
    source: PathBuf,
    settings_url: &str,
    asset: &TextureAsset,
    platform: TargetPlatform,
    policy: StreamingPolicy,
  ) -> Self {
    let params = Params::new()
      .with("source", source.clone())
      .with("type", asset.texture_type.to_string())
      .with("srgb", asset.srgb)
      .with("streamable", asset.streamable)
      .with("platform", platform.as_str())
      .with("settings", settings_url)
      .with("streaming", policy.to_string());
    Self {
      url: url.to_string(),
      source,
      settings_url: settings_url.to_string(),
      texture_type: asset.texture_type,
      srgb: asset.srgb,
      streamable: asset.streamable,
      platform,
      policy,
      params,
    }
  }

  /// sRGB sampling only makes sense for color textures in a linear pipeline.
  fn effective_srgb(&self, color_space: ColorSpace) -> bool {
    self.texture_type == TextureType::Color && self.srgb && color_space == ColorSpace::Linear
  }
}

impl Command for TextureConvertCommand {
  fn kind(&self) -> &'static str {
    TEXTURE_COMMAND_KIND
  }

  fn version(&self) -> u32 {
    TEXTURE_COMMAND_VERSION
  }

  fn params(&self) -> &Params {
    &self.params
  }

  fn output_url(&self) -> &str {
    &self.url
  }

  fn input_files(&self) -> Box<dyn Iterator<Item = InputFile> + '_> {
    Box::new(std::iter::once(InputFile::new(self.source.clone())))
  }

  fn execute(&self, ctx: &mut ExecuteContext) -> Result<ContentBlob, CommandError> {
    ctx.check_cancelled()?;

    let path = ctx.resolve_path(&self.source);
    let payload = fs::read(&path).map_err(|source| CommandError::Read {
      path: path.clone(),
      source,
    })?;
    if payload.is_empty() {
      return Err(CommandError::Failed(format!("source image {} is empty", path.display())));
    }

    ctx.check_cancelled()?;

    let settings_blob = ctx.load(&self.settings_url)?;
    let settings = settings::decode(&settings_blob.record).map_err(|e| CommandError::InvalidParameter {
      name: "settings".to_string(),
      message: format!("unreadable settings at {}: {e}", self.settings_url),
    })?;

    let srgb = self.effective_srgb(settings.color_space);
    let streamed = self.policy.should_stream(self.streamable, payload.len() as u64);
    let header = TextureHeader {
      format_version: HEADER_FORMAT_VERSION,
      texture_type: self.texture_type,
      srgb,
      platform: self.platform,
      graphics_profile: settings.graphics_profile,
      texture_quality: settings.texture_quality,
      payload_size: payload.len() as u64,
      payload_hash: hash_bytes(&payload).0,
      streamed,
    };

    let mut record =
      serde_json::to_vec(&header).map_err(|e| CommandError::Failed(format!("failed to encode header: {e}")))?;
    record.push(b'\n');

    ctx.info(format!(
      "converted {} texture ({} bytes, srgb: {}, streamed: {})",
      self.texture_type,
      payload.len(),
      srgb,
      streamed
    ));

    if streamed {
      Ok(ContentBlob::new(record).with_stream(TEXTURE_STREAM, payload))
    } else {
      record.extend_from_slice(&payload);
      Ok(ContentBlob::new(record))
    }
  }
}

pub struct TextureCompiler {
  policy: StreamingPolicy,
}

impl TextureCompiler {
  pub fn new(policy: StreamingPolicy) -> Self {
    Self { policy }
  }
}

impl Compiler for TextureCompiler {
  fn kind(&self) -> &'static str {
    TEXTURE_ASSET_KIND
  }

  fn input_types(&self, _asset: &AssetItem) -> Vec<DependencyRequest> {
    vec![DependencyRequest::new(
      DependencyKind::CompileAsset,
      AssetSelector::Kind(SETTINGS_ASSET_KIND.to_string()),
    )]
  }

  fn prepare(&self, ctx: &CompileContext<'_>, asset: &AssetItem) -> Result<Compilation, CompileError> {
    let description: TextureAsset = asset.parse()?;
    if description.source.as_os_str().is_empty() {
      return Err(CompileError::Invalid("texture has no source".to_string()));
    }

    let settings = ctx
      .package
      .find_kind(SETTINGS_ASSET_KIND)
      .ok_or_else(|| CompileError::Invalid("package has no game settings".to_string()))?;

    let source = package_relative(ctx.package.root(), &asset.source_path(&description.source));
    let command = TextureConvertCommand::new(
      &output_url(ctx.platform, &asset.location),
      source,
      &output_url(ctx.platform, &settings.location),
      &description,
      ctx.platform,
      self.policy,
    );

    let mut compilation = Compilation::new(Arc::new(command));
    if description.texture_type != TextureType::Color && description.srgb {
      compilation = compilation.warn(format!(
        "{}: srgb is ignored for {} textures",
        asset.location, description.texture_type
      ));
    }
    Ok(compilation)
  }
}

/// Express `path` relative to `root` when it lies inside it.
fn package_relative(root: &Path, path: &Path) -> PathBuf {
  path.strip_prefix(root).map(Path::to_path_buf).unwrap_or_else(|_| path.to_path_buf())
}
