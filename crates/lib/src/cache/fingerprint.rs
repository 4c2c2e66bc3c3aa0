//! Fingerprint computation.
//!
//! A fingerprint is the SHA-256 of the canonical serialization of everything that
//! determines a command's output: kind, version, parameters, the state of each declared
//! input file, and the fingerprints of direct upstream commands and pinned artifacts.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::command::{Command, Params};
use crate::util::hash::{DirHashError, HashError, Hashable, hash_file};

/// A 64-character lowercase hex SHA-256 digest identifying a command's output.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(pub String);

impl Fingerprint {
  /// Two-character directory shard.
  pub fn shard(&self) -> &str {
    self.0.get(..2).unwrap_or("00")
  }

  /// Shortened form for display.
  pub fn short(&self) -> &str {
    self.0.get(..12).unwrap_or(&self.0)
  }

  /// Observe the inputs of `command` and fingerprint it.
  pub fn compute(
    command: &dyn Command,
    base_dir: &Path,
    marker: InputMarker,
    upstream: &[Fingerprint],
  ) -> Result<(Fingerprint, Vec<InputState>), FingerprintError> {
    let inputs = input_states(command, base_dir, marker)?;
    let fingerprint = compute(command, &inputs, upstream)?;
    Ok((fingerprint, inputs))
  }
}

impl fmt::Display for Fingerprint {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// How input files contribute to a fingerprint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputMarker {
  /// Size plus last-modified time.
  #[default]
  Modified,
  /// Size plus SHA-256 of the contents.
  Content,
}

/// Observed state of one declared input file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputState {
  /// Path as declared by the command.
  pub path: PathBuf,
  pub size: u64,
  /// `mtime:<nanos>` or `sha256:<hex>`.
  pub marker: String,
}

#[derive(Debug, Error)]
pub enum FingerprintError {
  #[error("input file {path} is unreadable: {source}")]
  Input {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to hash input file: {0}")]
  Hash(#[from] DirHashError),

  #[error("failed to serialize fingerprint input: {0}")]
  Serialize(#[from] HashError),
}

#[derive(Serialize)]
struct FingerprintInput<'a> {
  kind: &'a str,
  version: u32,
  params: &'a Params,
  inputs: &'a [InputState],
  upstream: &'a [Fingerprint],
}

impl Hashable for FingerprintInput<'_> {}

/// Observe the state of every declared input of `command`.
///
/// Inputs are returned sorted by declared path and deduplicated.
pub fn input_states(
  command: &dyn Command,
  base_dir: &Path,
  marker: InputMarker,
) -> Result<Vec<InputState>, FingerprintError> {
  let mut declared: Vec<PathBuf> = command.input_files().map(|input| input.path).collect();
  declared.sort();
  declared.dedup();

  declared
    .into_iter()
    .map(|path| {
      let resolved = if path.is_absolute() { path.clone() } else { base_dir.join(&path) };
      input_state(path, &resolved, marker)
    })
    .collect()
}

fn input_state(declared: PathBuf, resolved: &Path, marker: InputMarker) -> Result<InputState, FingerprintError> {
  let input_err = |source| FingerprintError::Input {
    path: resolved.to_path_buf(),
    source,
  };

  let metadata = fs::metadata(resolved).map_err(input_err)?;
  let marker = match marker {
    InputMarker::Modified => {
      let modified = metadata.modified().map_err(input_err)?;
      let nanos = modified.duration_since(UNIX_EPOCH).map(|d| d.as_nanos()).unwrap_or(0);
      format!("mtime:{nanos}")
    }
    InputMarker::Content => format!("sha256:{}", hash_file(resolved)?),
  };

  Ok(InputState {
    path: declared,
    size: metadata.len(),
    marker,
  })
}

/// Compute the fingerprint of `command` given its observed inputs and the fingerprints
/// of its direct upstream commands (in any order).
pub fn compute(
  command: &dyn Command,
  inputs: &[InputState],
  upstream: &[Fingerprint],
) -> Result<Fingerprint, FingerprintError> {
  let mut upstream = upstream.to_vec();
  upstream.sort();

  let input = FingerprintInput {
    kind: command.kind(),
    version: command.version(),
    params: command.params(),
    inputs,
    upstream: &upstream,
  };

  Ok(Fingerprint(input.compute_hash()?.0))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::util::testutil::TestCommand;
  use tempfile::TempDir;

  #[test]
  fn fingerprint_is_stable() {
    let temp = TempDir::new().unwrap();
    fs::write(temp.path().join("a.txt"), "hello").unwrap();
    let cmd = TestCommand::new("out/a").input("a.txt").param("quality", "high");

    let inputs = input_states(&cmd, temp.path(), InputMarker::Modified).unwrap();
    let fp1 = compute(&cmd, &inputs, &[]).unwrap();
    let fp2 = compute(&cmd, &inputs, &[]).unwrap();

    assert_eq!(fp1, fp2);
    assert_eq!(fp1.0.len(), 64);
    assert!(fp1.0.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
  }

  #[test]
  fn param_insertion_order_is_irrelevant() {
    let a = TestCommand::new("out/a").param("x", 1i64).param("y", "two");
    let b = TestCommand::new("out/a").param("y", "two").param("x", 1i64);
    assert_eq!(compute(&a, &[], &[]).unwrap(), compute(&b, &[], &[]).unwrap());
  }

  #[test]
  fn version_changes_fingerprint() {
    let v3 = TestCommand::new("out/a").with_version(3);
    let v4 = TestCommand::new("out/a").with_version(4);
    assert_ne!(compute(&v3, &[], &[]).unwrap(), compute(&v4, &[], &[]).unwrap());
  }

  #[test]
  fn kind_and_params_change_fingerprint() {
    let base = TestCommand::new("out/a").param("srgb", true);
    let other_param = TestCommand::new("out/a").param("srgb", false);
    let other_kind = TestCommand::new("out/a").with_kind("other").param("srgb", true);

    let fp = compute(&base, &[], &[]).unwrap();
    assert_ne!(fp, compute(&other_param, &[], &[]).unwrap());
    assert_ne!(fp, compute(&other_kind, &[], &[]).unwrap());
  }

  #[test]
  fn output_url_is_not_part_of_fingerprint() {
    let a = TestCommand::new("out/a").param("p", 1i64);
    let b = TestCommand::new("out/b").param("p", 1i64);
    assert_eq!(compute(&a, &[], &[]).unwrap(), compute(&b, &[], &[]).unwrap());
  }

  #[test]
  fn upstream_order_is_irrelevant_but_content_is_not() {
    let cmd = TestCommand::new("out/a");
    let u1 = Fingerprint("1".repeat(64));
    let u2 = Fingerprint("2".repeat(64));
    let u3 = Fingerprint("3".repeat(64));

    let a = compute(&cmd, &[], &[u1.clone(), u2.clone()]).unwrap();
    let b = compute(&cmd, &[], &[u2.clone(), u1.clone()]).unwrap();
    let c = compute(&cmd, &[], &[u1, u3]).unwrap();

    assert_eq!(a, b);
    assert_ne!(a, c);
  }

  #[test]
  fn input_size_change_changes_fingerprint() {
    let temp = TempDir::new().unwrap();
    let file = temp.path().join("a.txt");
    fs::write(&file, "hello").unwrap();
    let cmd = TestCommand::new("out/a").input("a.txt");

    let before = input_states(&cmd, temp.path(), InputMarker::Modified).unwrap();
    fs::write(&file, "hello, world").unwrap();
    let after = input_states(&cmd, temp.path(), InputMarker::Modified).unwrap();

    assert_eq!(before[0].size, 5);
    assert_eq!(after[0].size, 12);
    assert_ne!(compute(&cmd, &before, &[]).unwrap(), compute(&cmd, &after, &[]).unwrap());
  }

  #[test]
  fn content_marker_ignores_touch() {
    let temp = TempDir::new().unwrap();
    let file = temp.path().join("a.txt");
    fs::write(&file, "hello").unwrap();
    let cmd = TestCommand::new("out/a").input("a.txt");

    let before = input_states(&cmd, temp.path(), InputMarker::Content).unwrap();
    fs::write(&file, "hello").unwrap();
    let after = input_states(&cmd, temp.path(), InputMarker::Content).unwrap();

    assert_eq!(before, after);
    assert!(before[0].marker.starts_with("sha256:"));
  }

  #[test]
  fn missing_input_is_an_error() {
    let temp = TempDir::new().unwrap();
    let cmd = TestCommand::new("out/a").input("missing.txt");
    assert!(matches!(
      input_states(&cmd, temp.path(), InputMarker::Modified),
      Err(FingerprintError::Input { .. })
    ));
  }

  #[test]
  fn inputs_are_sorted_and_deduplicated() {
    let temp = TempDir::new().unwrap();
    fs::write(temp.path().join("a.txt"), "a").unwrap();
    fs::write(temp.path().join("b.txt"), "b").unwrap();
    let cmd = TestCommand::new("out/a").input("b.txt").input("a.txt").input("b.txt");

    let inputs = input_states(&cmd, temp.path(), InputMarker::Modified).unwrap();
    let paths: Vec<_> = inputs.iter().map(|i| i.path.clone()).collect();
    assert_eq!(paths, vec![PathBuf::from("a.txt"), PathBuf::from("b.txt")]);
  }
}
