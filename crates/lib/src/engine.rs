//! The build engine.
//!
//! An [`Engine`] owns the content store, the cache layer, the compiler registry and the
//! worker pool. It holds a shared lock on the store while open, so any number of engines
//! (in this process or others) may build against one store, while garbage collection
//! waits for all of them to shut down.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::asset::Package;
use crate::cache::{CacheError, CacheLayer};
use crate::compiler::{CompilerRegistry, PackageResolver};
use crate::execute::{ExecuteConfig, ExecuteEnv, run_graph};
use crate::graph::BuildGraph;
use crate::graph::resolve::{AssetSelector, expand};
use crate::platform::TargetPlatform;
use crate::platform::paths::store_dir;
use crate::result::report::PerformanceReport;
use crate::result::{BuildResult, aggregate};
use crate::store::{ContentHandle, ContentStore, StoreError};
use crate::store_lock::{LockMode, StoreLock, StoreLockError};

#[derive(Debug, Error)]
pub enum EngineError {
  #[error("failed to open content store: {0}")]
  Store(#[from] StoreError),

  #[error("failed to open cache: {0}")]
  Cache(#[from] CacheError),

  #[error(transparent)]
  Lock(#[from] StoreLockError),
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
  pub store_root: PathBuf,
  pub execute: ExecuteConfig,
}

impl EngineConfig {
  pub fn new(store_root: impl Into<PathBuf>) -> Self {
    Self {
      store_root: store_root.into(),
      execute: ExecuteConfig::default(),
    }
  }

  /// Store root from `KILN_STORE`, or the per-user default.
  pub fn from_env() -> Self {
    Self::new(store_dir())
  }

  pub fn with_execute(mut self, execute: ExecuteConfig) -> Self {
    self.execute = execute;
    self
  }
}

/// Assets to build, by location, for one target platform.
#[derive(Debug, Clone)]
pub struct BuildRequest {
  pub assets: Vec<String>,
  pub platform: TargetPlatform,
}

impl BuildRequest {
  pub fn new(platform: TargetPlatform) -> Self {
    Self {
      assets: Vec::new(),
      platform,
    }
  }

  pub fn asset(mut self, location: impl Into<String>) -> Self {
    self.assets.push(location.into());
    self
  }
}

pub struct Engine {
  store: Arc<ContentStore>,
  cache: Arc<CacheLayer>,
  registry: CompilerRegistry,
  config: EngineConfig,
  workers: Arc<Semaphore>,
  lock: Option<StoreLock>,
}

impl Engine {
  /// Open the store at `config.store_root`, creating it if needed.
  pub fn open(config: EngineConfig, registry: CompilerRegistry) -> Result<Self, EngineError> {
    let store = Arc::new(ContentStore::open(&config.store_root)?);
    let lock = StoreLock::acquire(store.root(), LockMode::Shared, "build")?;
    let cache = Arc::new(CacheLayer::open(store.clone())?);
    let workers = Arc::new(Semaphore::new(config.execute.parallelism.max(1)));

    debug!(
      store = %store.root().display(),
      parallelism = config.execute.parallelism,
      input_marker = ?config.execute.input_marker,
      "opened engine"
    );
    Ok(Self {
      store,
      cache,
      registry,
      config,
      workers,
      lock: Some(lock),
    })
  }

  /// Expand `request` against `package`, then execute the resulting graph.
  ///
  /// Definition errors yield a failed result without executing anything.
  pub async fn build(&self, package: &Package, request: &BuildRequest, cancel: &CancellationToken) -> BuildResult {
    let start = Instant::now();
    info!(assets = request.assets.len(), platform = %request.platform, "build requested");

    let mut performance = PerformanceReport::new();
    performance.begin("expand");
    let resolver = PackageResolver::new(package, &self.registry, request.platform).with_store(&self.store);
    let roots: Vec<AssetSelector> = request.assets.iter().cloned().map(AssetSelector::Location).collect();
    let expansion = match expand(&resolver, &roots) {
      Ok(expansion) => expansion,
      Err(e) => {
        warn!(error = %e, "build definition failed");
        performance.end();
        let mut result = BuildResult::definition_failure(&e, start.elapsed());
        result.performance = performance;
        return result;
      }
    };
    performance.end();

    let mut result = self
      .execute(&expansion.graph, package.root(), request.platform, cancel)
      .await;

    let mut log = expansion.log;
    log.append(&mut result.log);
    result.log = log;
    for measure in result.performance.measures() {
      performance.record(measure.label.clone(), measure.duration);
    }
    result.performance = performance;
    result.elapsed = start.elapsed();
    result
  }

  /// Execute a prepared graph.
  ///
  /// Relative input paths resolve against `base_dir`.
  pub async fn execute(
    &self,
    graph: &BuildGraph,
    base_dir: &Path,
    platform: TargetPlatform,
    cancel: &CancellationToken,
  ) -> BuildResult {
    let start = Instant::now();
    let env = ExecuteEnv {
      store: self.store.clone(),
      cache: self.cache.clone(),
      workers: self.workers.clone(),
      config: self.config.execute.clone(),
    };

    let mut performance = PerformanceReport::new();
    performance.begin("execute");
    let reports = run_graph(&env, graph, base_dir, platform, cancel).await;
    performance.begin("aggregate");
    let mut result = aggregate(graph, reports, cancel.is_cancelled(), start.elapsed());
    performance.end();
    result.performance = performance;

    info!(
      status = %result.status,
      commands = result.commands.len(),
      executed = result.executed(),
      cache_hits = result.cache_hits(),
      elapsed_ms = result.elapsed.as_millis() as u64,
      "build finished"
    );
    result
  }

  /// Open published content by URL.
  pub fn open_content(&self, url: &str) -> Result<ContentHandle, StoreError> {
    self.store.open_url(url)
  }

  pub fn store(&self) -> &Arc<ContentStore> {
    &self.store
  }

  pub fn cache(&self) -> &Arc<CacheLayer> {
    &self.cache
  }

  pub fn registry(&self) -> &CompilerRegistry {
    &self.registry
  }

  pub fn config(&self) -> &EngineConfig {
    &self.config
  }

  /// Release the store. Staging leftovers are swept when no other engine is using it.
  pub fn shutdown(mut self) {
    drop(self.lock.take());
    match StoreLock::acquire(self.store.root(), LockMode::Exclusive, "shutdown") {
      Ok(_lock) => match self.store.sweep_staging() {
        Ok(removed) => debug!(removed = removed.len(), "engine shut down"),
        Err(e) => warn!(error = %e, "failed to sweep staging directory"),
      },
      Err(e) => debug!(reason = %e, "store still in use, leaving staging directory"),
    }
  }
}
