//! Per-execution context.
//!
//! Each execution gets its own context: nothing in it is shared with other running
//! commands except read access to already committed content.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::cache::Fingerprint;
use crate::command::CommandError;
use crate::platform::TargetPlatform;
use crate::result::log::{LogEntry, Severity};
use crate::store::{ContentBlob, ContentStore, StoreError};

pub struct ExecuteContext {
  url: String,
  platform: TargetPlatform,
  base_dir: PathBuf,
  cancel: CancellationToken,
  store: Arc<ContentStore>,
  dependencies: BTreeMap<String, Fingerprint>,
  log: Vec<LogEntry>,
}

impl ExecuteContext {
  pub(crate) fn new(
    url: &str,
    platform: TargetPlatform,
    base_dir: &Path,
    cancel: CancellationToken,
    store: Arc<ContentStore>,
    dependencies: BTreeMap<String, Fingerprint>,
  ) -> Self {
    Self {
      url: url.to_string(),
      platform,
      base_dir: base_dir.to_path_buf(),
      cancel,
      store,
      dependencies,
      log: Vec::new(),
    }
  }

  /// Locator of the output being produced.
  pub fn output_url(&self) -> &str {
    &self.url
  }

  /// Platform the output is compiled for.
  pub fn platform(&self) -> TargetPlatform {
    self.platform
  }

  /// Directory relative input paths are resolved against.
  pub fn base_dir(&self) -> &Path {
    &self.base_dir
  }

  pub fn resolve_path(&self, path: &Path) -> PathBuf {
    if path.is_absolute() {
      path.to_path_buf()
    } else {
      self.base_dir.join(path)
    }
  }

  pub fn is_cancelled(&self) -> bool {
    self.cancel.is_cancelled()
  }

  /// Cancellation checkpoint.
  ///
  /// Commands call this between expensive steps and propagate the error with `?`.
  pub fn check_cancelled(&self) -> Result<(), CommandError> {
    if self.cancel.is_cancelled() {
      return Err(CommandError::Cancelled);
    }
    Ok(())
  }

  /// Load the committed output of a declared dependency.
  ///
  /// Content is read by the fingerprint the dependency had when this command was keyed,
  /// not through the URL index, which other builds may remap meanwhile.
  pub fn load(&self, url: &str) -> Result<ContentBlob, CommandError> {
    let fingerprint = self
      .dependencies
      .get(url)
      .ok_or_else(|| CommandError::UndeclaredDependency { url: url.to_string() })?;

    let missing = |source| CommandError::MissingDependency {
      url: url.to_string(),
      source,
    };
    self.store.get(fingerprint).map_err(missing)?.ok_or_else(|| {
      missing(StoreError::NotFound {
        fingerprint: fingerprint.clone(),
      })
    })
  }

  pub fn log(&mut self, severity: Severity, message: impl Into<String>) {
    let message = message.into();
    match severity {
      Severity::Debug => debug!(url = %self.url, "{message}"),
      Severity::Info => info!(url = %self.url, "{message}"),
      Severity::Warning => warn!(url = %self.url, "{message}"),
      Severity::Error => error!(url = %self.url, "{message}"),
    }
    self.log.push(LogEntry::new(severity, message));
  }

  pub fn debug(&mut self, message: impl Into<String>) {
    self.log(Severity::Debug, message);
  }

  pub fn info(&mut self, message: impl Into<String>) {
    self.log(Severity::Info, message);
  }

  pub fn warn(&mut self, message: impl Into<String>) {
    self.log(Severity::Warning, message);
  }

  pub fn error(&mut self, message: impl Into<String>) {
    self.log(Severity::Error, message);
  }

  pub(crate) fn into_log(self) -> Vec<LogEntry> {
    self.log
  }
}
