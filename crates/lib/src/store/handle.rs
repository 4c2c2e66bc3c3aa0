use std::fs::File;
use std::path::PathBuf;

use crate::cache::Fingerprint;
use crate::consts::RECORD_FILE_NAME;
use crate::store::{StoreError, StoredObject, stream_path};

/// Read handle for content published under a URL.
///
/// The object was verified when the handle was opened. Parts are read lazily, so
/// large streamed data never has to be held in memory.
#[derive(Debug, Clone)]
pub struct ContentHandle {
  url: String,
  object: StoredObject,
}

impl ContentHandle {
  pub(crate) fn new(url: &str, object: StoredObject) -> Self {
    Self {
      url: url.to_string(),
      object,
    }
  }

  pub fn url(&self) -> &str {
    &self.url
  }

  pub fn fingerprint(&self) -> &Fingerprint {
    &self.object.fingerprint
  }

  pub fn record_size(&self) -> u64 {
    self.object.marker.record_size
  }

  pub fn stream_names(&self) -> &[String] {
    &self.object.marker.streams
  }

  pub fn open_record(&self) -> Result<File, StoreError> {
    let path = self.object.path.join(RECORD_FILE_NAME);
    File::open(&path).map_err(|source| StoreError::Io { path, source })
  }

  pub fn open_stream(&self, name: &str) -> Result<File, StoreError> {
    if !self.object.marker.streams.iter().any(|s| s == name) {
      return Err(StoreError::UnknownStream {
        fingerprint: self.object.fingerprint.clone(),
        name: name.to_string(),
      });
    }
    let path: PathBuf = stream_path(&self.object.path, name);
    File::open(&path).map_err(|source| StoreError::Io { path, source })
  }

  /// Size of a stream in bytes.
  pub fn stream_size(&self, name: &str) -> Result<u64, StoreError> {
    let file = self.open_stream(name)?;
    let path = stream_path(&self.object.path, name);
    let metadata = file.metadata().map_err(|source| StoreError::Io { path, source })?;
    Ok(metadata.len())
  }
}
