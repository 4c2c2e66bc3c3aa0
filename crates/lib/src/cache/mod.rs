//! Cache layer: maps fingerprints to previously produced outputs.
//!
//! Entries live next to the content store at `<root>/cache/<fp[..2]>/<fp>.json`. An
//! entry is only ever trusted together with a verified object in the store; anything
//! unreadable or inconsistent degrades to a miss.
//!
//! # Submodules
//!
//! - [`fingerprint`] - fingerprint computation and input observation

pub mod fingerprint;

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, warn};

use crate::store::{ContentStore, StoreError};
use crate::util::hash::ContentHash;

pub use fingerprint::{Fingerprint, FingerprintError, InputMarker, InputState};

const CACHE_DIR: &str = "cache";

#[derive(Debug, Error)]
pub enum CacheError {
  #[error("I/O error at {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to serialize cache entry: {0}")]
  Serialize(#[from] serde_json::Error),

  #[error(transparent)]
  Store(#[from] StoreError),
}

/// Record of a successful execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
  pub fingerprint: Fingerprint,
  pub kind: String,
  pub version: u32,
  pub output_url: String,
  pub inputs: Vec<InputState>,
  /// Hash of the stored object directory, as recorded in its completion marker.
  pub content_hash: ContentHash,
  pub streams: Vec<String>,
  pub created_at: SystemTime,
}

/// What the current build expects a reusable entry to match.
#[derive(Debug, Clone, Copy)]
pub struct CacheProbe<'a> {
  pub kind: &'a str,
  pub version: u32,
  pub inputs: &'a [InputState],
}

type ClaimMap = Mutex<HashMap<Fingerprint, Arc<tokio::sync::Mutex<()>>>>;

#[derive(Debug)]
pub struct CacheLayer {
  dir: PathBuf,
  store: Arc<ContentStore>,
  in_flight: ClaimMap,
}

impl CacheLayer {
  /// Open the cache layer that sits in front of `store`.
  pub fn open(store: Arc<ContentStore>) -> Result<Self, CacheError> {
    let dir = store.root().join(CACHE_DIR);
    fs::create_dir_all(&dir).map_err(|source| CacheError::Io {
      path: dir.clone(),
      source,
    })?;
    Ok(Self {
      dir,
      store,
      in_flight: Mutex::new(HashMap::new()),
    })
  }

  pub fn dir(&self) -> &Path {
    &self.dir
  }

  pub fn entry_path(&self, fingerprint: &Fingerprint) -> PathBuf {
    self.dir.join(fingerprint.shard()).join(format!("{}.json", fingerprint.0))
  }

  /// Find a reusable output for `fingerprint`.
  ///
  /// Returns an entry only when the recorded version and input states match `probe` and
  /// the stored object verifies against the recorded content hash. Unreadable or
  /// inconsistent entries are removed and reported as a miss.
  pub fn lookup(&self, fingerprint: &Fingerprint, probe: CacheProbe<'_>) -> Option<CacheEntry> {
    let path = self.entry_path(fingerprint);
    let content = match fs::read_to_string(&path) {
      Ok(content) => content,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
      Err(e) => {
        warn!(fingerprint = %fingerprint, error = %e, "cache entry unreadable, treating as miss");
        return None;
      }
    };

    let entry: CacheEntry = match serde_json::from_str(&content) {
      Ok(entry) => entry,
      Err(e) => {
        self.discard(fingerprint, &format!("malformed entry: {e}"));
        return None;
      }
    };

    if &entry.fingerprint != fingerprint || entry.kind != probe.kind || entry.version != probe.version {
      self.discard(fingerprint, "entry does not match command");
      return None;
    }

    if entry.inputs != probe.inputs {
      debug!(fingerprint = %fingerprint, "input states differ, cache miss");
      return None;
    }

    match self.store.verify(fingerprint) {
      Ok(Some(object)) if object.marker.content_hash == entry.content_hash => Some(entry),
      Ok(Some(_)) => {
        self.discard(fingerprint, "stored content hash differs from entry");
        None
      }
      Ok(None) => {
        self.discard(fingerprint, "stored object missing");
        None
      }
      Err(e) => {
        self.discard(fingerprint, &e.to_string());
        None
      }
    }
  }

  /// Record `entry`. Returns `false` when an entry for the fingerprint already exists.
  pub fn store(&self, entry: &CacheEntry) -> Result<bool, CacheError> {
    let path = self.entry_path(&entry.fingerprint);
    if path.is_file() {
      return Ok(false);
    }

    let io_err = |path: &Path| {
      let path = path.to_path_buf();
      move |source| CacheError::Io { path, source }
    };

    if let Some(parent) = path.parent() {
      fs::create_dir_all(parent).map_err(io_err(parent))?;
    }

    let staging = self.store.staging_dir();
    fs::create_dir_all(&staging).map_err(io_err(&staging))?;
    let content = serde_json::to_vec_pretty(entry)?;
    let mut file = tempfile::NamedTempFile::new_in(&staging).map_err(io_err(&staging))?;
    io::Write::write_all(&mut file, &content).map_err(io_err(&path))?;

    match file.persist_noclobber(&path) {
      Ok(_) => {
        debug!(fingerprint = %entry.fingerprint, url = %entry.output_url, "recorded cache entry");
        Ok(true)
      }
      Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => Ok(false),
      Err(e) => Err(CacheError::Io { path, source: e.error }),
    }
  }

  /// Remove the entry for `fingerprint`.
  pub fn remove(&self, fingerprint: &Fingerprint) -> Result<bool, CacheError> {
    let path = self.entry_path(fingerprint);
    match fs::remove_file(&path) {
      Ok(()) => Ok(true),
      Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
      Err(e) => Err(CacheError::Io { path, source: e }),
    }
  }

  /// Fingerprints of every entry on disk.
  pub fn fingerprints(&self) -> Result<Vec<Fingerprint>, CacheError> {
    let mut fingerprints = Vec::new();
    for entry in walkdir::WalkDir::new(&self.dir).min_depth(2).max_depth(2) {
      let entry = entry.map_err(|e| CacheError::Io {
        path: self.dir.clone(),
        source: io::Error::other(e.to_string()),
      })?;
      let path = entry.path();
      if path.extension().is_some_and(|ext| ext == "json")
        && let Some(stem) = path.file_stem().and_then(|s| s.to_str())
      {
        fingerprints.push(Fingerprint(stem.to_string()));
      }
    }
    fingerprints.sort();
    Ok(fingerprints)
  }

  /// Serialize work on `fingerprint` within this process.
  ///
  /// The second claimant of a fingerprint waits until the first guard is dropped, then
  /// finds the first one's output through [`CacheLayer::lookup`].
  pub async fn claim(&self, fingerprint: &Fingerprint) -> ClaimGuard<'_> {
    let lock = {
      let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
      in_flight.entry(fingerprint.clone()).or_default().clone()
    };
    let guard = lock.lock_owned().await;
    ClaimGuard {
      layer: self,
      fingerprint: fingerprint.clone(),
      guard: Some(guard),
    }
  }

  fn discard(&self, fingerprint: &Fingerprint, reason: &str) {
    warn!(fingerprint = %fingerprint, reason, "discarding cache entry");
    if let Err(e) = self.remove(fingerprint) {
      warn!(fingerprint = %fingerprint, error = %e, "failed to remove cache entry");
    }
  }
}

/// Exclusive in-process claim on a fingerprint.
pub struct ClaimGuard<'a> {
  layer: &'a CacheLayer,
  fingerprint: Fingerprint,
  guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for ClaimGuard<'_> {
  fn drop(&mut self) {
    drop(self.guard.take());
    let mut in_flight = self.layer.in_flight.lock().unwrap_or_else(|e| e.into_inner());
    if let Some(lock) = in_flight.get(&self.fingerprint)
      && Arc::strong_count(lock) == 1
    {
      in_flight.remove(&self.fingerprint);
    }
  }
}
