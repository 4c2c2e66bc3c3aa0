//! Commands: deterministic units of compilation work.
//!
//! A command is identified by a stable kind tag and an explicit version number. Its
//! output is a pure function of (kind, version, parameters, declared input files),
//! which is what allows the cache layer to reuse outputs across builds.
//!
//! # Submodules
//!
//! - [`context`] - per-execution context handed to [`Command::execute`]

pub mod context;

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::store::{ContentBlob, StoreError};

pub use context::ExecuteContext;

/// A typed parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum ParamValue {
  Bool(bool),
  Int(i64),
  Float(f64),
  Str(String),
  Path(PathBuf),
}

impl From<bool> for ParamValue {
  fn from(value: bool) -> Self {
    ParamValue::Bool(value)
  }
}

impl From<i64> for ParamValue {
  fn from(value: i64) -> Self {
    ParamValue::Int(value)
  }
}

impl From<f64> for ParamValue {
  fn from(value: f64) -> Self {
    ParamValue::Float(value)
  }
}

impl From<&str> for ParamValue {
  fn from(value: &str) -> Self {
    ParamValue::Str(value.to_string())
  }
}

impl From<String> for ParamValue {
  fn from(value: String) -> Self {
    ParamValue::Str(value)
  }
}

impl From<PathBuf> for ParamValue {
  fn from(value: PathBuf) -> Self {
    ParamValue::Path(value)
  }
}

/// Named command parameters.
///
/// Backed by a `BTreeMap`, so iteration and serialization are sorted by name no
/// matter in which order parameters were inserted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Params(BTreeMap<String, ParamValue>);

impl Params {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with(mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
    self.insert(name, value);
    self
  }

  pub fn insert(&mut self, name: impl Into<String>, value: impl Into<ParamValue>) {
    self.0.insert(name.into(), value.into());
  }

  pub fn get(&self, name: &str) -> Option<&ParamValue> {
    self.0.get(name)
  }

  pub fn get_str(&self, name: &str) -> Option<&str> {
    match self.0.get(name) {
      Some(ParamValue::Str(s)) => Some(s),
      _ => None,
    }
  }

  pub fn get_bool(&self, name: &str) -> Option<bool> {
    match self.0.get(name) {
      Some(ParamValue::Bool(b)) => Some(*b),
      _ => None,
    }
  }

  pub fn get_path(&self, name: &str) -> Option<&Path> {
    match self.0.get(name) {
      Some(ParamValue::Path(p)) => Some(p),
      _ => None,
    }
  }

  pub fn iter(&self) -> impl Iterator<Item = (&String, &ParamValue)> {
    self.0.iter()
  }

  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }
}

/// A declared input file of a command.
///
/// Paths are absolute or relative to the package root the build runs against.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InputFile {
  pub path: PathBuf,
}

impl InputFile {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self { path: path.into() }
  }

  /// Resolve the declared path against `base_dir` when it is relative.
  pub fn resolve(&self, base_dir: &Path) -> PathBuf {
    if self.path.is_absolute() {
      self.path.clone()
    } else {
      base_dir.join(&self.path)
    }
  }
}

/// Errors a command reports from [`Command::execute`].
///
/// Each one fails only the reporting command (and skips its dependents).
#[derive(Debug, Error)]
pub enum CommandError {
  /// Generic failure with a human readable message.
  #[error("{0}")]
  Failed(String),

  /// A source file could not be read.
  #[error("failed to read {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  /// A parameter is missing or has the wrong type.
  #[error("invalid parameter '{name}': {message}")]
  InvalidParameter { name: String, message: String },

  /// Output of an upstream command could not be loaded.
  #[error("dependency output unavailable for {url}: {source}")]
  MissingDependency {
    url: String,
    #[source]
    source: StoreError,
  },

  /// The command loaded content it never declared a dependency on.
  #[error("{url} is not a declared dependency")]
  UndeclaredDependency { url: String },

  /// The command observed the cancellation signal.
  #[error("cancelled")]
  Cancelled,
}

/// A unit of deterministic compilation work.
///
/// `execute` runs on a blocking worker thread and may do file I/O or call into
/// codecs. It never writes to the content store itself: the returned blob is committed
/// by the engine under the command's fingerprint, all parts or none.
pub trait Command: Send + Sync + fmt::Debug {
  /// Stable tag naming what kind of work this is.
  fn kind(&self) -> &'static str;

  /// Explicit version of the algorithm. Bumping it invalidates every cached output of
  /// this kind.
  fn version(&self) -> u32;

  /// Parameters that influence the output.
  fn params(&self) -> &Params;

  /// Locator under which the output is published.
  fn output_url(&self) -> &str;

  /// Declared input files. Every call starts a fresh sequence.
  fn input_files(&self) -> Box<dyn Iterator<Item = InputFile> + '_> {
    Box::new(std::iter::empty())
  }

  /// Produce the output.
  fn execute(&self, ctx: &mut ExecuteContext) -> Result<ContentBlob, CommandError>;
}
