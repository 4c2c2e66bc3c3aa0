//! Shared helpers for library integration tests.

use std::io::Read;
use std::path::Path;

use kiln_lib::asset::Package;
use kiln_lib::compiler::{CompilerRegistry, StreamingPolicy};
use kiln_lib::execute::ExecuteConfig;
use kiln_lib::platform::TargetPlatform;
use kiln_lib::{BuildRequest, BuildResult, Engine, EngineConfig};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

pub const LINEAR_SETTINGS: &str = "kind: game-settings\ncolor_space: linear\ntexture_quality: normal\n";

/// A package directory and a store, both isolated in one temp dir.
pub struct TestPackage {
  pub temp: TempDir,
}

impl TestPackage {
  pub fn new() -> Self {
    let temp = TempDir::new().unwrap();
    std::fs::create_dir_all(temp.path().join("package")).unwrap();
    Self { temp }
  }

  /// Package with linear game settings.
  pub fn with_settings() -> Self {
    let package = Self::new();
    package.write("settings.kasset", LINEAR_SETTINGS);
    package
  }

  pub fn root(&self) -> std::path::PathBuf {
    self.temp.path().join("package")
  }

  pub fn write(&self, relative_path: &str, content: impl AsRef<[u8]>) {
    let path = self.root().join(relative_path);
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, content).unwrap();
  }

  pub fn load(&self) -> Package {
    Package::load(&self.root()).unwrap()
  }

  pub fn engine(&self, policy: StreamingPolicy) -> Engine {
    let config = EngineConfig::new(self.temp.path().join("store")).with_execute(ExecuteConfig::default().with_parallelism(2));
    Engine::open(config, CompilerRegistry::with_defaults(policy)).unwrap()
  }

  pub async fn build(&self, engine: &Engine, platform: TargetPlatform, assets: &[&str]) -> BuildResult {
    let request = assets
      .iter()
      .fold(BuildRequest::new(platform), |request, asset| request.asset(*asset));
    engine.build(&self.load(), &request, &CancellationToken::new()).await
  }
}

pub fn read_record(engine: &Engine, url: &str) -> Vec<u8> {
  let mut record = Vec::new();
  engine
    .open_content(url)
    .unwrap()
    .open_record()
    .unwrap()
    .read_to_end(&mut record)
    .unwrap();
  record
}

pub fn read_stream(engine: &Engine, url: &str, name: &str) -> Vec<u8> {
  let mut data = Vec::new();
  engine
    .open_content(url)
    .unwrap()
    .open_stream(name)
    .unwrap()
    .read_to_end(&mut data)
    .unwrap();
  data
}

/// Bump the modification time of `path` without changing its size.
pub fn touch_later(path: &Path) {
  let file = std::fs::File::options().write(true).open(path).unwrap();
  let later = std::time::SystemTime::now() + std::time::Duration::from_secs(5);
  file.set_modified(later).unwrap();
}
