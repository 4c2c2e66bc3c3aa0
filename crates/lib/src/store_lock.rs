//! Advisory locking of a content store directory.
//!
//! Engines hold a shared lock on the store for as long as they are open, so several
//! builds can run side by side. Garbage collection takes the lock exclusively and
//! therefore never runs while any engine has the store open.
//!
//! Exclusive holders record who they are in the lock file so a blocked process can
//! report it. Shared holders leave the file alone.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::consts::STORE_LOCK_FILE;

const HOLDER_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
  /// Builds and readers.
  Shared,
  /// Garbage collection.
  Exclusive,
}

impl fmt::Display for LockMode {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      LockMode::Shared => f.write_str("shared"),
      LockMode::Exclusive => f.write_str("exclusive"),
    }
  }
}

/// Identity of the process holding the store exclusively.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockHolder {
  pub version: u32,
  pub pid: u32,
  pub since_unix: u64,
  pub operation: String,
  pub store: PathBuf,
}

impl LockHolder {
  fn current(operation: &str, store: &Path) -> Self {
    Self {
      version: HOLDER_FORMAT_VERSION,
      pid: std::process::id(),
      since_unix: SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs(),
      operation: operation.to_string(),
      store: store.to_path_buf(),
    }
  }
}

#[derive(Debug, Error)]
pub enum StoreLockError {
  #[error(
    "cannot take {requested} lock on the store: held by `{}` (PID {}, since unix time {})\n\
     If no kiln process is running, remove the lock file:\n  {lock_path}",
    holder.operation, holder.pid, holder.since_unix
  )]
  Busy {
    requested: LockMode,
    holder: LockHolder,
    lock_path: PathBuf,
  },

  #[error(
    "cannot take {requested} lock on the store: it is in use by another kiln process\n\
     If no kiln process is running, remove the lock file:\n  {lock_path}"
  )]
  InUse { requested: LockMode, lock_path: PathBuf },

  #[error("failed to create store directory {path}: {source}")]
  CreateDir {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to open lock file {path}: {source}")]
  Open {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to record lock holder: {0}")]
  RecordHolder(#[source] io::Error),

  #[error("failed to lock {path}: {source}")]
  Lock {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

/// A held store lock. Released on drop.
#[derive(Debug)]
pub struct StoreLock {
  file: File,
  lock_path: PathBuf,
  mode: LockMode,
}

impl StoreLock {
  /// Lock the store rooted at `store` without blocking, creating the directory if needed.
  ///
  /// `operation` names what the lock is for (`build`, `gc`, ...) and is reported to
  /// processes that are blocked by an exclusive holder.
  pub fn acquire(store: &Path, mode: LockMode, operation: &str) -> Result<Self, StoreLockError> {
    std::fs::create_dir_all(store).map_err(|source| StoreLockError::CreateDir {
      path: store.to_path_buf(),
      source,
    })?;

    let lock_path = store.join(STORE_LOCK_FILE);
    let file = OpenOptions::new()
      .read(true)
      .write(true)
      .create(true)
      .truncate(false)
      .open(&lock_path)
      .map_err(|source| StoreLockError::Open {
        path: lock_path.clone(),
        source,
      })?;

    match try_lock(&file, mode) {
      Ok(()) => {}
      Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Err(busy(&lock_path, mode)),
      Err(source) => {
        return Err(StoreLockError::Lock {
          path: lock_path,
          source,
        });
      }
    }

    let lock = StoreLock { file, lock_path, mode };
    if mode == LockMode::Exclusive {
      lock.record_holder(&LockHolder::current(operation, store))?;
    }

    debug!(store = %store.display(), %mode, operation, "acquired store lock");
    Ok(lock)
  }

  /// Holder recorded in the lock file, read through the held handle.
  ///
  /// Opening a second handle would fail on Windows, where the lock is mandatory.
  pub fn holder(&self) -> io::Result<LockHolder> {
    let mut file = &self.file;
    file.seek(SeekFrom::Start(0))?;
    let mut contents = String::new();
    file.read_to_string(&mut contents)?;
    serde_json::from_str(&contents).map_err(io::Error::other)
  }

  fn record_holder(&self, holder: &LockHolder) -> Result<(), StoreLockError> {
    let mut file = &self.file;
    file.set_len(0).map_err(StoreLockError::RecordHolder)?;
    file.seek(SeekFrom::Start(0)).map_err(StoreLockError::RecordHolder)?;
    let json = serde_json::to_vec_pretty(holder).map_err(|e| StoreLockError::RecordHolder(io::Error::other(e)))?;
    file.write_all(&json).map_err(StoreLockError::RecordHolder)?;
    file.flush().map_err(StoreLockError::RecordHolder)
  }

  pub fn lock_path(&self) -> &Path {
    &self.lock_path
  }

  pub fn mode(&self) -> LockMode {
    self.mode
  }
}

/// Contention error for `requested`, naming the exclusive holder when one is recorded.
///
/// Only a shared request can be sure a recorded holder is current: shared holders never
/// record themselves, so a record may be left over from an earlier exclusive holder.
fn busy(lock_path: &Path, requested: LockMode) -> StoreLockError {
  let holder = std::fs::read_to_string(lock_path)
    .ok()
    .and_then(|contents| serde_json::from_str::<LockHolder>(&contents).ok());

  match holder {
    Some(holder) if requested == LockMode::Shared => StoreLockError::Busy {
      requested,
      holder,
      lock_path: lock_path.to_path_buf(),
    },
    _ => StoreLockError::InUse {
      requested,
      lock_path: lock_path.to_path_buf(),
    },
  }
}

#[cfg(unix)]
fn try_lock(file: &File, mode: LockMode) -> io::Result<()> {
  use rustix::fs::{FlockOperation, flock};
  use std::os::unix::io::AsFd;

  let operation = match mode {
    LockMode::Shared => FlockOperation::NonBlockingLockShared,
    LockMode::Exclusive => FlockOperation::NonBlockingLockExclusive,
  };

  flock(file.as_fd(), operation).map_err(|e| io::Error::from_raw_os_error(e.raw_os_error()))
}

#[cfg(windows)]
fn try_lock(file: &File, mode: LockMode) -> io::Result<()> {
  use std::os::windows::io::AsRawHandle;
  use windows_sys::Win32::Foundation::{ERROR_LOCK_VIOLATION, HANDLE};
  use windows_sys::Win32::Storage::FileSystem::{LOCKFILE_EXCLUSIVE_LOCK, LOCKFILE_FAIL_IMMEDIATELY, LockFileEx};

  let handle = file.as_raw_handle() as HANDLE;
  let flags = match mode {
    LockMode::Shared => LOCKFILE_FAIL_IMMEDIATELY,
    LockMode::Exclusive => LOCKFILE_FAIL_IMMEDIATELY | LOCKFILE_EXCLUSIVE_LOCK,
  };

  // SAFETY: OVERLAPPED is plain data and valid when zeroed; the handle is owned by `file`.
  let result = unsafe {
    let mut overlapped = std::mem::zeroed();
    LockFileEx(handle, flags, 0, 1, 0, &mut overlapped)
  };

  if result != 0 {
    return Ok(());
  }
  let err = io::Error::last_os_error();
  if err.raw_os_error() == Some(ERROR_LOCK_VIOLATION as i32) {
    Err(io::Error::from(io::ErrorKind::WouldBlock))
  } else {
    Err(err)
  }
}
