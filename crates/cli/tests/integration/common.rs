//! Shared test helpers for CLI integration tests.

use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use tempfile::TempDir;

/// Get path to a fixture package.
pub fn fixture_path(name: &str) -> PathBuf {
  PathBuf::from(env!("CARGO_MANIFEST_DIR"))
    .join("tests")
    .join("fixtures")
    .join(name)
}

fn copy_dir(from: &Path, to: &Path) {
  fs::create_dir_all(to).unwrap();
  for entry in fs::read_dir(from).unwrap_or_else(|e| panic!("Failed to read fixture {}: {}", from.display(), e)) {
    let entry = entry.unwrap();
    let target = to.join(entry.file_name());
    if entry.file_type().unwrap().is_dir() {
      copy_dir(&entry.path(), &target);
    } else {
      fs::copy(entry.path(), &target).unwrap();
    }
  }
}

/// Isolated test environment.
///
/// Each test gets its own temporary directory with an isolated store and package.
pub struct TestEnv {
  pub temp: TempDir,
  pub package_path: PathBuf,
}

impl TestEnv {
  /// Create from a fixture package, copied into `<temp>/package`.
  pub fn from_fixture(name: &str) -> Self {
    let temp = TempDir::new().unwrap();
    let package_path = temp.path().join("package");
    copy_dir(&fixture_path(name), &package_path);
    Self { temp, package_path }
  }

  /// Create an empty test environment.
  pub fn empty() -> Self {
    let temp = TempDir::new().unwrap();
    let package_path = temp.path().join("package");
    fs::create_dir_all(&package_path).unwrap();
    Self { temp, package_path }
  }

  /// Write a file relative to the package directory.
  pub fn write_file(&self, relative_path: &str, content: &str) {
    let path = self.package_path.join(relative_path);
    if let Some(parent) = path.parent() {
      fs::create_dir_all(parent).unwrap();
    }
    fs::write(&path, content).unwrap();
  }

  /// Store path (isolated per test).
  pub fn store_path(&self) -> PathBuf {
    let p = self.temp.path().join("store");
    fs::create_dir_all(&p).unwrap();
    dunce::canonicalize(&p).unwrap_or(p)
  }

  /// Get a pre-configured Command for the kiln binary.
  ///
  /// Points `KILN_STORE` at the isolated store.
  pub fn kiln_cmd(&self) -> Command {
    let mut cmd: Command = cargo_bin_cmd!("kiln");
    cmd.env("KILN_STORE", self.store_path());
    cmd.env_remove("RUST_LOG");
    cmd
  }

  /// `kiln build --package <package> <assets>...`
  pub fn build_cmd(&self, assets: &[&str]) -> Command {
    let mut cmd = self.kiln_cmd();
    cmd.arg("build").arg("--package").arg(&self.package_path).args(assets);
    cmd
  }
}
