use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};

use kiln_lib::cache::CacheLayer;
use kiln_lib::gc::collect_garbage;
use kiln_lib::platform::paths::store_dir;
use kiln_lib::store::ContentStore;
use kiln_lib::store_lock::{LockMode, StoreLock};

use crate::output::{OutputFormat, format_bytes, format_duration, print_info, print_json, print_stat, print_success};

pub fn cmd_gc(dry_run: bool, output: OutputFormat) -> Result<()> {
  let start = Instant::now();
  let root = store_dir();

  let _lock = StoreLock::acquire(&root, LockMode::Exclusive, "gc").context("Failed to acquire store lock")?;
  let store = Arc::new(ContentStore::open(&root).context("Failed to open content store")?);
  let cache = CacheLayer::open(store.clone()).context("Failed to open cache")?;

  let result = collect_garbage(&store, &cache, dry_run)?;

  if output.is_json() {
    print_json(&result)?;
  } else {
    println!();
    if dry_run {
      print_info("Dry run - no changes made");
    } else {
      print_success("Garbage collection complete!");
    }
    print_stat("Published URLs", &result.stats.urls.to_string());
    print_stat("Objects removed", &result.stats.objects_deleted.to_string());
    print_stat("Cache entries removed", &result.stats.cache_entries_deleted.to_string());
    print_stat("Staging leftovers removed", &result.stats.staging_deleted.to_string());
    print_stat("Space freed", &format_bytes(result.stats.objects_bytes_freed));
    print_stat("Duration", &format_duration(start.elapsed()));
  }

  Ok(())
}
