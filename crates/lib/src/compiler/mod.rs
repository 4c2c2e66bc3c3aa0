//! Asset compilers.
//!
//! A compiler turns one asset description into a [`Command`]. Compilers are looked up
//! by asset kind in a [`CompilerRegistry`] that is built once and never changes while
//! builds run. [`PackageResolver`] ties a package and a registry together into the
//! [`Resolver`] used to expand build requests.
//!
//! # Submodules
//!
//! - [`settings`] - game settings (`game-settings`)
//! - [`texture`] - textures (`texture`)

pub mod settings;
pub mod texture;

use std::collections::BTreeMap;
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crate::asset::{AssetItem, Package};
use crate::cache::Fingerprint;
use crate::command::Command;
use crate::graph::resolve::{AssetSelector, DependencyRequest, Resolution, Resolver};
use crate::graph::{DefinitionError, DependencyKind};
use crate::platform::TargetPlatform;
use crate::result::LogEntry;
use crate::store::ContentStore;

pub use settings::GameSettingsCompiler;
pub use texture::{StreamingPolicy, TextureCompiler};

#[derive(Debug, Error)]
pub enum CompileError {
  #[error("invalid asset description: {0}")]
  Parse(#[from] serde_yaml::Error),

  #[error("{0}")]
  Invalid(String),
}

/// Locator the output of asset `location` compiled for `platform` is published under.
pub fn output_url(platform: TargetPlatform, location: &str) -> String {
  format!("{platform}/{location}")
}

/// What a compiler sees while preparing an asset.
#[derive(Debug, Clone, Copy)]
pub struct CompileContext<'a> {
  pub package: &'a Package,
  pub platform: TargetPlatform,
}

/// A prepared command plus the content it needs from other assets.
pub struct Compilation {
  pub command: Arc<dyn Command>,
  pub dependencies: Vec<DependencyRequest>,
  pub log: Vec<LogEntry>,
}

impl Compilation {
  pub fn new(command: Arc<dyn Command>) -> Self {
    Self {
      command,
      dependencies: Vec::new(),
      log: Vec::new(),
    }
  }

  pub fn depends_on(mut self, dependency: DependencyRequest) -> Self {
    self.dependencies.push(dependency);
    self
  }

  pub fn warn(mut self, message: impl Into<String>) -> Self {
    self.log.push(LogEntry::warning(message));
    self
  }
}

pub trait Compiler: Send + Sync {
  /// Asset kind this compiler handles.
  fn kind(&self) -> &'static str;

  /// Other assets that must be compiled before any asset of this kind.
  fn input_types(&self, _asset: &AssetItem) -> Vec<DependencyRequest> {
    Vec::new()
  }

  fn prepare(&self, ctx: &CompileContext<'_>, asset: &AssetItem) -> Result<Compilation, CompileError>;
}

/// Static mapping from asset kind to compiler.
#[derive(Default)]
pub struct CompilerRegistry {
  compilers: BTreeMap<&'static str, Arc<dyn Compiler>>,
}

impl CompilerRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Registry with every built-in compiler.
  pub fn with_defaults(policy: StreamingPolicy) -> Self {
    let mut registry = Self::new();
    registry.register(GameSettingsCompiler);
    registry.register(TextureCompiler::new(policy));
    registry
  }

  /// Register `compiler`, replacing any compiler already registered for its kind.
  pub fn register(&mut self, compiler: impl Compiler + 'static) {
    self.compilers.insert(compiler.kind(), Arc::new(compiler));
  }

  pub fn get(&self, kind: &str) -> Option<&Arc<dyn Compiler>> {
    self.compilers.get(kind)
  }

  pub fn kinds(&self) -> impl Iterator<Item = &'static str> + '_ {
    self.compilers.keys().copied()
  }
}

/// Resolves assets of one package through a registry.
pub struct PackageResolver<'a> {
  package: &'a Package,
  registry: &'a CompilerRegistry,
  platform: TargetPlatform,
  store: Option<&'a ContentStore>,
}

impl<'a> PackageResolver<'a> {
  pub fn new(package: &'a Package, registry: &'a CompilerRegistry, platform: TargetPlatform) -> Self {
    Self {
      package,
      registry,
      platform,
      store: None,
    }
  }

  /// Accept content already published in `store` for assets missing from the package.
  pub fn with_store(mut self, store: &'a ContentStore) -> Self {
    self.store = Some(store);
    self
  }

  fn find(&self, asset: &AssetSelector) -> Option<&'a AssetItem> {
    match asset {
      AssetSelector::Location(location) => self.package.get(location),
      AssetSelector::Kind(kind) => self.package.find_kind(kind),
    }
  }

  /// Content already published for `asset` on this platform, and its current fingerprint.
  fn published(&self, asset: &AssetSelector) -> Option<(String, Fingerprint)> {
    let (AssetSelector::Location(location), Some(store)) = (asset, self.store) else {
      return None;
    };
    let url = output_url(self.platform, location);
    match store.resolve_url(&url) {
      Ok(Some(fingerprint)) => Some((url, fingerprint)),
      _ => None,
    }
  }
}

impl Resolver for PackageResolver<'_> {
  fn resolve(&self, kind: DependencyKind, asset: &AssetSelector) -> Result<Resolution, DefinitionError> {
    let Some(item) = self.find(asset) else {
      if let Some((url, fingerprint)) = self.published(asset) {
        debug!(%url, fingerprint = %fingerprint.short(), "dependency satisfied by published content");
        return Ok(Resolution::Artifact { url, fingerprint });
      }
      return Err(DefinitionError::Unresolved {
        kind,
        selector: asset.to_string(),
      });
    };

    let compiler = self.registry.get(&item.kind).ok_or_else(|| DefinitionError::NoCompiler {
      location: item.location.clone(),
      kind: item.kind.clone(),
    })?;

    let ctx = CompileContext {
      package: self.package,
      platform: self.platform,
    };
    let compilation = compiler.prepare(&ctx, item).map_err(|e| DefinitionError::Compile {
      location: item.location.clone(),
      message: e.to_string(),
    })?;

    let mut dependencies = compiler.input_types(item);
    dependencies.extend(compilation.dependencies);

    debug!(location = %item.location, kind = %item.kind, dependencies = dependencies.len(), "prepared asset");
    Ok(Resolution::Command {
      command: compilation.command,
      dependencies,
      log: compilation.log,
    })
  }
}
