//! Implementation of the `kiln cat` command.

use std::io::{self, Write};

use anyhow::{Context, Result};

use kiln_lib::platform::paths::store_dir;
use kiln_lib::store::ContentStore;
use kiln_lib::store_lock::{LockMode, StoreLock};

/// Copy the record (or a named stream) published under `url` to stdout.
pub fn cmd_cat(url: &str, stream: Option<&str>) -> Result<()> {
  let root = store_dir();
  let _lock = StoreLock::acquire(&root, LockMode::Shared, "cat").context("Failed to acquire store lock")?;
  let store = ContentStore::open(&root).context("Failed to open content store")?;

  let handle = store.open_url(url).with_context(|| format!("No content for {url}"))?;
  let mut reader = match stream {
    Some(name) => handle.open_stream(name)?,
    None => handle.open_record()?,
  };

  let mut stdout = io::stdout().lock();
  io::copy(&mut reader, &mut stdout).context("Failed to write content")?;
  stdout.flush()?;
  Ok(())
}
