//! Asset packages.
//!
//! A package is a directory tree of asset description files (`*.kasset`, YAML). Each
//! file carries a top-level `kind` naming the compiler responsible for it, plus
//! kind-specific fields. An asset's location is its path relative to the package root,
//! without extension, with `/` separators: `textures/wood.kasset` becomes
//! `textures/wood`.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::consts::ASSET_FILE_EXTENSION;

#[derive(Debug, Error)]
pub enum PackageError {
  #[error("package root {path} is not a directory")]
  NotADirectory { path: PathBuf },

  #[error("failed to read package {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to walk package: {0}")]
  Walk(#[from] walkdir::Error),
}

/// Why an asset file was left out of a package.
#[derive(Debug, Clone)]
pub struct SkippedAsset {
  pub path: PathBuf,
  pub reason: String,
}

/// One loaded asset description.
#[derive(Debug, Clone)]
pub struct AssetItem {
  pub location: String,
  pub kind: String,
  /// Absolute path of the description file.
  pub path: PathBuf,
  pub file_size: u64,
  pub body: serde_yaml::Value,
}

impl AssetItem {
  /// Deserialize the description into a kind-specific type.
  pub fn parse<T: DeserializeOwned>(&self) -> Result<T, serde_yaml::Error> {
    serde_yaml::from_value(self.body.clone())
  }

  /// Directory containing the description file.
  pub fn directory(&self) -> &Path {
    self.path.parent().unwrap_or(Path::new(""))
  }

  /// Resolve a source reference relative to the description file.
  pub fn source_path(&self, reference: &Path) -> PathBuf {
    if reference.is_absolute() {
      reference.to_path_buf()
    } else {
      self.directory().join(reference)
    }
  }
}

#[derive(Debug, Clone)]
pub struct Package {
  root: PathBuf,
  assets: BTreeMap<String, AssetItem>,
  skipped: Vec<SkippedAsset>,
}

impl Package {
  /// Load every asset description under `root`.
  ///
  /// Files that cannot be read or parsed are skipped with a warning and listed in
  /// [`Package::skipped`]; the rest of the package still loads.
  pub fn load(root: &Path) -> Result<Self, PackageError> {
    if !root.is_dir() {
      return Err(PackageError::NotADirectory {
        path: root.to_path_buf(),
      });
    }
    let root = dunce::canonicalize(root).map_err(|source| PackageError::Io {
      path: root.to_path_buf(),
      source,
    })?;

    let mut assets = BTreeMap::new();
    let mut skipped = Vec::new();

    for entry in WalkDir::new(&root).sort_by_file_name() {
      let entry = entry?;
      let path = entry.path();
      if !entry.file_type().is_file() || path.extension().is_none_or(|ext| ext != ASSET_FILE_EXTENSION) {
        continue;
      }

      match load_item(&root, path) {
        Ok(item) => {
          debug!(location = %item.location, kind = %item.kind, "loaded asset");
          assets.insert(item.location.clone(), item);
        }
        Err(reason) => {
          warn!(path = %path.display(), reason = %reason, "skipping asset");
          skipped.push(SkippedAsset {
            path: path.to_path_buf(),
            reason,
          });
        }
      }
    }

    info!(root = %root.display(), assets = assets.len(), skipped = skipped.len(), "loaded package");
    Ok(Self { root, assets, skipped })
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  pub fn get(&self, location: &str) -> Option<&AssetItem> {
    self.assets.get(location)
  }

  /// First asset (by location) of the given kind.
  pub fn find_kind(&self, kind: &str) -> Option<&AssetItem> {
    self.assets.values().find(|item| item.kind == kind)
  }

  pub fn iter(&self) -> impl Iterator<Item = &AssetItem> {
    self.assets.values()
  }

  pub fn len(&self) -> usize {
    self.assets.len()
  }

  pub fn is_empty(&self) -> bool {
    self.assets.is_empty()
  }

  pub fn skipped(&self) -> &[SkippedAsset] {
    &self.skipped
  }
}

fn load_item(root: &Path, path: &Path) -> Result<AssetItem, String> {
  let content = fs::read_to_string(path).map_err(|e| e.to_string())?;
  let body: serde_yaml::Value = serde_yaml::from_str(&content).map_err(|e| e.to_string())?;

  let kind = body
    .get("kind")
    .and_then(serde_yaml::Value::as_str)
    .ok_or_else(|| "missing string field 'kind'".to_string())?
    .to_string();

  Ok(AssetItem {
    location: location_of(root, path),
    kind,
    path: path.to_path_buf(),
    file_size: content.len() as u64,
    body,
  })
}

fn location_of(root: &Path, path: &Path) -> String {
  let relative = path.strip_prefix(root).unwrap_or(path).with_extension("");
  relative
    .components()
    .map(|c| c.as_os_str().to_string_lossy())
    .collect::<Vec<_>>()
    .join("/")
}
