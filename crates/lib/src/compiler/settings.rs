//! Game settings compiler.
//!
//! A package has at most one `game-settings` asset. Compiling it resolves per-platform
//! overrides for the target platform and publishes the result as JSON, which texture
//! commands load at execution time.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::asset::AssetItem;
use crate::command::{Command, CommandError, ExecuteContext, Params};
use crate::compiler::{Compilation, CompileContext, CompileError, Compiler, output_url};
use crate::platform::TargetPlatform;
use crate::store::ContentBlob;

pub const SETTINGS_ASSET_KIND: &str = "game-settings";
pub const SETTINGS_COMMAND_KIND: &str = "settings";
const SETTINGS_COMMAND_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorSpace {
  #[default]
  Linear,
  Gamma,
}

impl fmt::Display for ColorSpace {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ColorSpace::Linear => write!(f, "linear"),
      ColorSpace::Gamma => write!(f, "gamma"),
    }
  }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextureQuality {
  #[default]
  Fast,
  Normal,
  High,
}

impl fmt::Display for TextureQuality {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      TextureQuality::Fast => write!(f, "fast"),
      TextureQuality::Normal => write!(f, "normal"),
      TextureQuality::High => write!(f, "high"),
    }
  }
}

fn default_graphics_profile() -> String {
  "level-10-0".to_string()
}

/// Fields a platform override may replace.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SettingsOverride {
  pub color_space: Option<ColorSpace>,
  pub graphics_profile: Option<String>,
  pub texture_quality: Option<TextureQuality>,
}

/// A `game-settings` asset description.
#[derive(Debug, Clone, Deserialize)]
pub struct GameSettingsAsset {
  #[serde(default)]
  pub color_space: ColorSpace,
  #[serde(default = "default_graphics_profile")]
  pub graphics_profile: String,
  #[serde(default)]
  pub texture_quality: TextureQuality,
  #[serde(default)]
  pub platforms: BTreeMap<TargetPlatform, SettingsOverride>,
}

impl GameSettingsAsset {
  /// Apply the override for `platform`, if any.
  pub fn resolve(&self, platform: TargetPlatform) -> ResolvedSettings {
    let overrides = self.platforms.get(&platform).cloned().unwrap_or_default();
    ResolvedSettings {
      platform,
      color_space: overrides.color_space.unwrap_or(self.color_space),
      graphics_profile: overrides.graphics_profile.unwrap_or_else(|| self.graphics_profile.clone()),
      texture_quality: overrides.texture_quality.unwrap_or(self.texture_quality),
    }
  }
}

/// Settings in effect for one platform. This is the published record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedSettings {
  pub platform: TargetPlatform,
  pub color_space: ColorSpace,
  pub graphics_profile: String,
  pub texture_quality: TextureQuality,
}

/// Publishes resolved settings. Has no input files: everything it writes is in its
/// parameters.
#[derive(Debug)]
pub struct SettingsCommand {
  url: String,
  settings: ResolvedSettings,
  params: Params,
}

impl SettingsCommand {
  pub fn new(url: &str, settings: ResolvedSettings) -> Self {
    let params = Params::new()
      .with("platform", settings.platform.as_str())
      .with("color_space", settings.color_space.to_string())
      .with("graphics_profile", settings.graphics_profile.clone())
      .with("texture_quality", settings.texture_quality.to_string());
    Self {
      url: url.to_string(),
      settings,
      params,
    }
  }

  pub fn settings(&self) -> &ResolvedSettings {
    &self.settings
  }
}

impl Command for SettingsCommand {
  fn kind(&self) -> &'static str {
    SETTINGS_COMMAND_KIND
  }

  fn version(&self) -> u32 {
    SETTINGS_COMMAND_VERSION
  }

  fn params(&self) -> &Params {
    &self.params
  }

  fn output_url(&self) -> &str {
    &self.url
  }

  fn execute(&self, ctx: &mut ExecuteContext) -> Result<ContentBlob, CommandError> {
    ctx.check_cancelled()?;
    let record = serde_json::to_vec_pretty(&self.settings)
      .map_err(|e| CommandError::Failed(format!("failed to encode settings: {e}")))?;
    ctx.debug(format!(
      "resolved settings for {}: {} color space, {} quality",
      self.settings.platform, self.settings.color_space, self.settings.texture_quality
    ));
    Ok(ContentBlob::new(record))
  }
}

pub struct GameSettingsCompiler;

impl Compiler for GameSettingsCompiler {
  fn kind(&self) -> &'static str {
    SETTINGS_ASSET_KIND
  }

  fn prepare(&self, ctx: &CompileContext<'_>, asset: &AssetItem) -> Result<Compilation, CompileError> {
    let description: GameSettingsAsset = asset.parse()?;
    let settings = description.resolve(ctx.platform);
    let url = output_url(ctx.platform, &asset.location);
    Ok(Compilation::new(Arc::new(SettingsCommand::new(&url, settings))))
  }
}

/// Decode a published settings record.
pub fn decode(record: &[u8]) -> Result<ResolvedSettings, serde_json::Error> {
  serde_json::from_slice(record)
}
