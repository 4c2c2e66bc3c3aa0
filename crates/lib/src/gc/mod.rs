//! Garbage collection of the content store.
//!
//! Content is live when some URL in the URL index points at its fingerprint. Everything
//! else is swept: staging leftovers, objects without a completion marker, objects that
//! were superseded by newer outputs, and cache entries for fingerprints no longer
//! published.
//!
//! The caller must hold the store lock exclusively.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::cache::{CacheError, CacheLayer, Fingerprint};
use crate::store::{ContentStore, StoreError};

#[derive(Debug, Error)]
pub enum GcError {
  #[error("failed to read URL index: {0}")]
  UrlIndex(#[source] StoreError),

  #[error("failed to read store directory {path}: {source}")]
  ReadStore {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to sweep staging directory: {0}")]
  Staging(#[source] StoreError),

  #[error("failed to list cache entries: {0}")]
  Cache(#[from] CacheError),
}

#[derive(Debug, Default, serde::Serialize)]
pub struct GcStats {
  pub urls: usize,
  pub objects_scanned: usize,
  pub objects_deleted: usize,
  pub objects_bytes_freed: u64,
  pub cache_entries_scanned: usize,
  pub cache_entries_deleted: usize,
  pub staging_deleted: usize,
}

impl GcStats {
  pub fn total_deleted(&self) -> usize {
    self.objects_deleted + self.cache_entries_deleted + self.staging_deleted
  }
}

#[derive(Debug, serde::Serialize)]
pub struct GcResult {
  pub dry_run: bool,
  pub stats: GcStats,
  pub deleted_paths: Vec<PathBuf>,
}

fn collect_live(store: &ContentStore) -> Result<HashSet<Fingerprint>, GcError> {
  let live: HashSet<Fingerprint> = store
    .urls()
    .map_err(GcError::UrlIndex)?
    .into_iter()
    .map(|(_, fingerprint)| fingerprint)
    .collect();
  debug!(count = live.len(), "collected live fingerprints from URL index");
  Ok(live)
}

fn dir_size(path: &Path) -> u64 {
  WalkDir::new(path)
    .into_iter()
    .filter_map(|e| e.ok())
    .filter(|e| e.file_type().is_file())
    .filter_map(|e| e.metadata().ok())
    .map(|m| m.len())
    .sum()
}

pub fn collect_garbage(store: &ContentStore, cache: &CacheLayer, dry_run: bool) -> Result<GcResult, GcError> {
  let live = collect_live(store)?;

  let mut stats = GcStats {
    urls: live.len(),
    ..GcStats::default()
  };
  let mut deleted_paths = Vec::new();

  sweep_staging(store, dry_run, &mut stats, &mut deleted_paths)?;
  sweep_objects(store, &live, dry_run, &mut stats, &mut deleted_paths)?;
  sweep_cache(cache, &live, dry_run, &mut stats, &mut deleted_paths)?;

  info!(
    objects_deleted = stats.objects_deleted,
    cache_entries_deleted = stats.cache_entries_deleted,
    staging_deleted = stats.staging_deleted,
    bytes_freed = stats.objects_bytes_freed,
    dry_run,
    "garbage collection complete"
  );

  Ok(GcResult {
    dry_run,
    stats,
    deleted_paths,
  })
}

fn sweep_staging(
  store: &ContentStore,
  dry_run: bool,
  stats: &mut GcStats,
  deleted_paths: &mut Vec<PathBuf>,
) -> Result<(), GcError> {
  let removed = if dry_run {
    match fs::read_dir(store.staging_dir()) {
      Ok(entries) => entries.flatten().map(|e| e.path()).collect(),
      Err(_) => Vec::new(),
    }
  } else {
    store.sweep_staging().map_err(GcError::Staging)?
  };

  stats.staging_deleted += removed.len();
  deleted_paths.extend(removed);
  Ok(())
}

fn sweep_objects(
  store: &ContentStore,
  live: &HashSet<Fingerprint>,
  dry_run: bool,
  stats: &mut GcStats,
  deleted_paths: &mut Vec<PathBuf>,
) -> Result<(), GcError> {
  let objects_dir = store.objects_dir();
  let shards = match fs::read_dir(&objects_dir) {
    Ok(shards) => shards,
    Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
    Err(source) => {
      return Err(GcError::ReadStore {
        path: objects_dir,
        source,
      });
    }
  };

  for shard in shards.flatten() {
    let shard_path = shard.path();
    if !shard_path.is_dir() {
      continue;
    }
    let entries = fs::read_dir(&shard_path).map_err(|source| GcError::ReadStore {
      path: shard_path.clone(),
      source,
    })?;

    for entry in entries.flatten() {
      let path = entry.path();
      if !path.is_dir() {
        continue;
      }

      stats.objects_scanned += 1;

      let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        continue;
      };
      let fingerprint = Fingerprint(name.to_string());

      let is_live = live.contains(&fingerprint);
      let is_complete = store.contains(&fingerprint);
      if is_live && is_complete {
        continue;
      }

      if !is_complete {
        debug!(path = %path.display(), "removing incomplete object");
      } else {
        debug!(path = %path.display(), "removing unreferenced object");
      }

      let size = dir_size(&path);
      if dry_run {
        stats.objects_deleted += 1;
        stats.objects_bytes_freed += size;
        deleted_paths.push(path);
      } else {
        match fs::remove_dir_all(&path) {
          Ok(()) => {
            stats.objects_deleted += 1;
            stats.objects_bytes_freed += size;
            deleted_paths.push(path);
          }
          Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to delete object");
          }
        }
      }
    }
  }

  Ok(())
}

fn sweep_cache(
  cache: &CacheLayer,
  live: &HashSet<Fingerprint>,
  dry_run: bool,
  stats: &mut GcStats,
  deleted_paths: &mut Vec<PathBuf>,
) -> Result<(), GcError> {
  for fingerprint in cache.fingerprints()? {
    stats.cache_entries_scanned += 1;
    if live.contains(&fingerprint) {
      continue;
    }

    let path = cache.entry_path(&fingerprint);
    debug!(path = %path.display(), "removing unreferenced cache entry");

    if dry_run {
      stats.cache_entries_deleted += 1;
      deleted_paths.push(path);
    } else {
      match cache.remove(&fingerprint) {
        Ok(_) => {
          stats.cache_entries_deleted += 1;
          deleted_paths.push(path);
        }
        Err(e) => {
          warn!(path = %path.display(), error = %e, "failed to delete cache entry");
        }
      }
    }
  }

  Ok(())
}
