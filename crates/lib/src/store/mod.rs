//! Content store: fingerprint-addressed storage of command outputs.
//!
//! # Layout
//!
//! ```text
//! <root>/
//!   objects/<fp[..2]>/<fp>/
//!     record.bin            primary record
//!     streams/<name>.bin    streamable parts
//!     .kiln-complete        completion marker (JSON)
//!   urls/<sha256(url)>.json URL index entry
//!   tmp/                    staging area
//! ```
//!
//! Objects are written into a staging directory under `tmp/` and renamed into place
//! once every part and the completion marker are on disk. A reader therefore either
//! sees a complete object or none at all. The marker records a hash of the object
//! directory, and every read verifies it.

mod handle;

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cache::Fingerprint;
use crate::consts::{MARKER_FORMAT_VERSION, OBJECT_COMPLETE_MARKER, RECORD_FILE_NAME, STREAMS_DIR_NAME};
use crate::util::hash::{ContentHash, DirHashError, hash_bytes, hash_directory};

pub use handle::ContentHandle;

const OBJECTS_DIR: &str = "objects";
const URLS_DIR: &str = "urls";
const STAGING_DIR: &str = "tmp";
const STREAM_EXTENSION: &str = "bin";

#[derive(Debug, Error)]
pub enum StoreError {
  #[error("I/O error at {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("object {fingerprint} is corrupted: {reason}")]
  Corrupt { fingerprint: Fingerprint, reason: String },

  #[error("no content published under {url}")]
  UnknownUrl { url: String },

  #[error("object {fingerprint} not found")]
  NotFound { fingerprint: Fingerprint },

  #[error("object {fingerprint} has no stream named '{name}'")]
  UnknownStream { fingerprint: Fingerprint, name: String },

  #[error("invalid stream name '{0}'")]
  InvalidStreamName(String),

  #[error("failed to hash object: {0}")]
  Hash(#[from] DirHashError),

  #[error("failed to serialize store metadata: {0}")]
  Serialize(#[from] serde_json::Error),
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> StoreError + '_ {
  move |source| StoreError::Io {
    path: path.to_path_buf(),
    source,
  }
}

/// The output of one command execution.
///
/// A primary record plus zero or more named streamable parts. Stream names are limited
/// to ASCII letters, digits, `-` and `_`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContentBlob {
  pub record: Vec<u8>,
  pub streams: BTreeMap<String, Vec<u8>>,
}

impl ContentBlob {
  pub fn new(record: impl Into<Vec<u8>>) -> Self {
    Self {
      record: record.into(),
      streams: BTreeMap::new(),
    }
  }

  pub fn with_stream(mut self, name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
    self.streams.insert(name.into(), data.into());
    self
  }

  pub fn stream(&self, name: &str) -> Option<&[u8]> {
    self.streams.get(name).map(Vec::as_slice)
  }

  /// Total number of bytes across record and streams.
  pub fn size(&self) -> u64 {
    let streams: usize = self.streams.values().map(Vec::len).sum();
    (self.record.len() + streams) as u64
  }
}

/// Completion marker written last into every object directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectMarker {
  pub version: u32,
  pub content_hash: ContentHash,
  pub record_size: u64,
  pub streams: Vec<String>,
}

/// URL index entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct UrlEntry {
  url: String,
  fingerprint: Fingerprint,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
  /// The object was written by this call.
  Inserted,
  /// A complete object already existed; nothing was written.
  AlreadyPresent,
}

/// A verified object, as returned by [`ContentStore::verify`].
#[derive(Debug, Clone)]
pub struct StoredObject {
  pub fingerprint: Fingerprint,
  pub path: PathBuf,
  pub marker: ObjectMarker,
}

/// Filesystem content store.
///
/// Safe to share between threads; all mutation goes through atomic renames.
#[derive(Debug)]
pub struct ContentStore {
  root: PathBuf,
  writes: AtomicUsize,
}

impl ContentStore {
  /// Open (and create if needed) the store rooted at `root`.
  pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
    let root = root.into();
    for dir in [OBJECTS_DIR, URLS_DIR, STAGING_DIR] {
      let path = root.join(dir);
      fs::create_dir_all(&path).map_err(io_err(&path))?;
    }
    debug!(root = %root.display(), "opened content store");
    Ok(Self {
      root,
      writes: AtomicUsize::new(0),
    })
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  pub fn objects_dir(&self) -> PathBuf {
    self.root.join(OBJECTS_DIR)
  }

  pub fn urls_dir(&self) -> PathBuf {
    self.root.join(URLS_DIR)
  }

  pub fn staging_dir(&self) -> PathBuf {
    self.root.join(STAGING_DIR)
  }

  /// Directory holding the object for `fingerprint`.
  pub fn object_path(&self, fingerprint: &Fingerprint) -> PathBuf {
    self.objects_dir().join(fingerprint.shard()).join(&fingerprint.0)
  }

  /// Number of objects written by this instance.
  pub fn write_count(&self) -> usize {
    self.writes.load(Ordering::SeqCst)
  }

  /// Whether a complete object exists for `fingerprint`. Does not verify contents.
  pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
    self.object_path(fingerprint).join(OBJECT_COMPLETE_MARKER).is_file()
  }

  /// Commit `blob` under `fingerprint`, all parts or none.
  ///
  /// When a complete object already exists, nothing is written. Two writers racing on
  /// the same fingerprint both succeed and exactly one object survives.
  pub fn insert(&self, fingerprint: &Fingerprint, blob: &ContentBlob) -> Result<InsertOutcome, StoreError> {
    if self.contains(fingerprint) {
      debug!(fingerprint = %fingerprint, "object already present");
      return Ok(InsertOutcome::AlreadyPresent);
    }

    for name in blob.streams.keys() {
      validate_stream_name(name)?;
    }

    let staging_root = self.staging_dir();
    fs::create_dir_all(&staging_root).map_err(io_err(&staging_root))?;
    let staging = tempfile::Builder::new()
      .prefix("obj-")
      .tempdir_in(&staging_root)
      .map_err(io_err(&staging_root))?;

    let marker = write_object(staging.path(), blob)?;

    let target = self.object_path(fingerprint);
    if let Some(parent) = target.parent() {
      fs::create_dir_all(parent).map_err(io_err(parent))?;
    }

    // Leftover from an interrupted writer that never produced a marker
    if target.exists() && !self.contains(fingerprint) {
      warn!(fingerprint = %fingerprint, "removing incomplete object");
      fs::remove_dir_all(&target).map_err(io_err(&target))?;
    }

    let staged = staging.keep();
    match fs::rename(&staged, &target) {
      Ok(()) => {
        self.writes.fetch_add(1, Ordering::SeqCst);
        info!(
          fingerprint = %fingerprint,
          content = %marker.content_hash,
          size = blob.size(),
          "stored object"
        );
        Ok(InsertOutcome::Inserted)
      }
      Err(e) => {
        let _ = fs::remove_dir_all(&staged);
        if self.contains(fingerprint) {
          debug!(fingerprint = %fingerprint, "lost insert race, object already present");
          Ok(InsertOutcome::AlreadyPresent)
        } else {
          Err(StoreError::Io { path: target, source: e })
        }
      }
    }
  }

  /// Verify the object for `fingerprint` against its completion marker.
  ///
  /// Returns `Ok(None)` when no complete object exists. A hash mismatch is reported as
  /// [`StoreError::Corrupt`] and the damaged object is removed.
  pub fn verify(&self, fingerprint: &Fingerprint) -> Result<Option<StoredObject>, StoreError> {
    let path = self.object_path(fingerprint);
    let marker_path = path.join(OBJECT_COMPLETE_MARKER);
    let content = match fs::read_to_string(&marker_path) {
      Ok(content) => content,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
      Err(e) => return Err(StoreError::Io { path: marker_path, source: e }),
    };

    let marker: ObjectMarker = match serde_json::from_str(&content) {
      Ok(marker) => marker,
      Err(e) => return Err(self.discard_corrupt(fingerprint, format!("unreadable marker: {e}"))),
    };

    let actual = hash_directory(&path, &[OBJECT_COMPLETE_MARKER])?;
    if actual != marker.content_hash {
      return Err(self.discard_corrupt(
        fingerprint,
        format!("expected content hash {}, found {}", marker.content_hash, actual),
      ));
    }

    Ok(Some(StoredObject {
      fingerprint: fingerprint.clone(),
      path,
      marker,
    }))
  }

  /// Load the full object for `fingerprint`, verified.
  pub fn get(&self, fingerprint: &Fingerprint) -> Result<Option<ContentBlob>, StoreError> {
    let Some(object) = self.verify(fingerprint)? else {
      return Ok(None);
    };

    let record_path = object.path.join(RECORD_FILE_NAME);
    let record = fs::read(&record_path).map_err(io_err(&record_path))?;

    let mut streams = BTreeMap::new();
    for name in &object.marker.streams {
      let stream_path = stream_path(&object.path, name);
      let data = fs::read(&stream_path).map_err(io_err(&stream_path))?;
      streams.insert(name.clone(), data);
    }

    Ok(Some(ContentBlob { record, streams }))
  }

  /// Remove the object for `fingerprint`, if any.
  pub fn remove(&self, fingerprint: &Fingerprint) -> Result<bool, StoreError> {
    let path = self.object_path(fingerprint);
    match fs::remove_dir_all(&path) {
      Ok(()) => Ok(true),
      Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
      Err(e) => Err(StoreError::Io { path, source: e }),
    }
  }

  /// Delete everything left in the staging directory.
  ///
  /// Only safe while no other writer uses the store (under an exclusive lock).
  pub fn sweep_staging(&self) -> Result<Vec<PathBuf>, StoreError> {
    let staging = self.staging_dir();
    let entries = match fs::read_dir(&staging) {
      Ok(entries) => entries,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
      Err(e) => return Err(StoreError::Io { path: staging, source: e }),
    };

    let mut removed = Vec::new();
    for entry in entries.flatten() {
      let path = entry.path();
      let result = if path.is_dir() {
        fs::remove_dir_all(&path)
      } else {
        fs::remove_file(&path)
      };
      match result {
        Ok(()) => removed.push(path),
        Err(e) => warn!(path = %path.display(), error = %e, "failed to remove staging leftover"),
      }
    }

    if !removed.is_empty() {
      debug!(count = removed.len(), "swept staging directory");
    }
    Ok(removed)
  }

  /// Point `url` at `fingerprint`. Replaces any previous mapping atomically.
  pub fn map_url(&self, url: &str, fingerprint: &Fingerprint) -> Result<(), StoreError> {
    let entry = UrlEntry {
      url: url.to_string(),
      fingerprint: fingerprint.clone(),
    };
    let content = serde_json::to_vec_pretty(&entry)?;
    let path = self.url_entry_path(url);
    write_atomic(&self.staging_dir(), &path, &content)?;
    debug!(url, fingerprint = %fingerprint, "mapped url");
    Ok(())
  }

  /// Fingerprint currently published under `url`.
  pub fn resolve_url(&self, url: &str) -> Result<Option<Fingerprint>, StoreError> {
    let path = self.url_entry_path(url);
    let content = match fs::read_to_string(&path) {
      Ok(content) => content,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
      Err(e) => return Err(StoreError::Io { path, source: e }),
    };
    let entry: UrlEntry = serde_json::from_str(&content)?;
    Ok(Some(entry.fingerprint))
  }

  /// All `(url, fingerprint)` pairs in the URL index.
  pub fn urls(&self) -> Result<Vec<(String, Fingerprint)>, StoreError> {
    let dir = self.urls_dir();
    let mut entries = Vec::new();
    let read_dir = match fs::read_dir(&dir) {
      Ok(read_dir) => read_dir,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(entries),
      Err(e) => return Err(StoreError::Io { path: dir, source: e }),
    };

    for dir_entry in read_dir {
      let dir_entry = dir_entry.map_err(io_err(&dir))?;
      let path = dir_entry.path();
      if path.extension().is_none_or(|ext| ext != "json") {
        continue;
      }
      let content = fs::read_to_string(&path).map_err(io_err(&path))?;
      match serde_json::from_str::<UrlEntry>(&content) {
        Ok(entry) => entries.push((entry.url, entry.fingerprint)),
        Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable url entry"),
      }
    }

    entries.sort();
    Ok(entries)
  }

  /// Open the content published under `url` for streamed reading.
  pub fn open_url(&self, url: &str) -> Result<ContentHandle, StoreError> {
    let fingerprint = self.resolve_url(url)?.ok_or_else(|| StoreError::UnknownUrl { url: url.to_string() })?;
    let object = self.verify(&fingerprint)?.ok_or(StoreError::NotFound {
      fingerprint: fingerprint.clone(),
    })?;
    Ok(ContentHandle::new(url, object))
  }

  fn url_entry_path(&self, url: &str) -> PathBuf {
    self.urls_dir().join(format!("{}.json", hash_bytes(url.as_bytes())))
  }

  fn discard_corrupt(&self, fingerprint: &Fingerprint, reason: String) -> StoreError {
    warn!(fingerprint = %fingerprint, reason = %reason, "discarding corrupted object");
    if let Err(e) = self.remove(fingerprint) {
      warn!(fingerprint = %fingerprint, error = %e, "failed to remove corrupted object");
    }
    StoreError::Corrupt {
      fingerprint: fingerprint.clone(),
      reason,
    }
  }
}

pub(crate) fn stream_path(object: &Path, name: &str) -> PathBuf {
  object.join(STREAMS_DIR_NAME).join(format!("{name}.{STREAM_EXTENSION}"))
}

fn validate_stream_name(name: &str) -> Result<(), StoreError> {
  let valid = !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
  if valid {
    Ok(())
  } else {
    Err(StoreError::InvalidStreamName(name.to_string()))
  }
}

/// Write all parts of `blob` into `dir`, marker last.
fn write_object(dir: &Path, blob: &ContentBlob) -> Result<ObjectMarker, StoreError> {
  let record_path = dir.join(RECORD_FILE_NAME);
  fs::write(&record_path, &blob.record).map_err(io_err(&record_path))?;

  if !blob.streams.is_empty() {
    let streams_dir = dir.join(STREAMS_DIR_NAME);
    fs::create_dir_all(&streams_dir).map_err(io_err(&streams_dir))?;
    for (name, data) in &blob.streams {
      let path = stream_path(dir, name);
      fs::write(&path, data).map_err(io_err(&path))?;
    }
  }

  let marker = ObjectMarker {
    version: MARKER_FORMAT_VERSION,
    content_hash: hash_directory(dir, &[OBJECT_COMPLETE_MARKER])?,
    record_size: blob.record.len() as u64,
    streams: blob.streams.keys().cloned().collect(),
  };

  let marker_path = dir.join(OBJECT_COMPLETE_MARKER);
  let content = serde_json::to_vec_pretty(&marker)?;
  fs::write(&marker_path, content).map_err(io_err(&marker_path))?;

  Ok(marker)
}

/// Write `content` to `target` through a temp file in `staging` and an atomic rename.
pub(crate) fn write_atomic(staging: &Path, target: &Path, content: &[u8]) -> Result<(), StoreError> {
  if let Some(parent) = target.parent() {
    fs::create_dir_all(parent).map_err(io_err(parent))?;
  }
  fs::create_dir_all(staging).map_err(io_err(staging))?;
  let mut file = tempfile::NamedTempFile::new_in(staging).map_err(io_err(staging))?;
  file.write_all(content).map_err(io_err(target))?;
  file.persist(target).map_err(|e| StoreError::Io {
    path: target.to_path_buf(),
    source: e.error,
  })?;
  Ok(())
}
