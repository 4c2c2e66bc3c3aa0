pub mod paths;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Platform that compiled content is produced for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetPlatform {
  Windows,
  Linux,
  MacOs,
  Android,
  Ios,
}

impl TargetPlatform {
  pub const ALL: [TargetPlatform; 5] = [Self::Windows, Self::Linux, Self::MacOs, Self::Android, Self::Ios];

  /// Detect the host operating system at runtime
  ///
  /// Returns `None` if the host is not a desktop platform content can be built for
  pub fn host() -> Option<Self> {
    match std::env::consts::OS {
      "linux" => Some(Self::Linux),
      "macos" => Some(Self::MacOs),
      "windows" => Some(Self::Windows),
      _ => None,
    }
  }

  /// Returns the lowercase string identifier for this platform
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Windows => "windows",
      Self::Linux => "linux",
      Self::MacOs => "macos",
      Self::Android => "android",
      Self::Ios => "ios",
    }
  }

  /// Mobile targets get reduced texture quality unless overridden.
  pub fn is_mobile(&self) -> bool {
    matches!(self, Self::Android | Self::Ios)
  }
}

impl Default for TargetPlatform {
  fn default() -> Self {
    Self::host().unwrap_or(Self::Linux)
  }
}

impl fmt::Display for TargetPlatform {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.as_str())
  }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown platform '{0}' (expected one of: windows, linux, macos, android, ios)")]
pub struct UnknownPlatform(pub String);

impl FromStr for TargetPlatform {
  type Err = UnknownPlatform;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "windows" => Ok(Self::Windows),
      "linux" => Ok(Self::Linux),
      "macos" | "darwin" => Ok(Self::MacOs),
      "android" => Ok(Self::Android),
      "ios" => Ok(Self::Ios),
      _ => Err(UnknownPlatform(s.to_string())),
    }
  }
}
