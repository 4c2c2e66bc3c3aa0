//! Expanding requested assets into a build graph.
//!
//! Expansion asks a [`Resolver`] for each requested asset. A resolver either hands back
//! a command plus the further dependencies that command needs, or reports that the
//! dependency is already satisfied by content in the store. Dependencies are expanded
//! recursively; each output URL becomes exactly one node.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::cache::Fingerprint;
use crate::command::Command;
use crate::graph::{BuildGraph, CommandId, DefinitionError, DependencyKind, GraphBuilder};
use crate::result::log::LogEntry;

/// Which asset a dependency refers to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "by", content = "value", rename_all = "lowercase")]
pub enum AssetSelector {
  /// A specific asset by location.
  Location(String),
  /// The single asset of the given kind.
  Kind(String),
}

impl fmt::Display for AssetSelector {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      AssetSelector::Location(location) => write!(f, "asset '{location}'"),
      AssetSelector::Kind(kind) => write!(f, "asset of kind '{kind}'"),
    }
  }
}

/// A dependency a command declares on another asset.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DependencyRequest {
  pub kind: DependencyKind,
  pub asset: AssetSelector,
}

impl DependencyRequest {
  pub fn new(kind: DependencyKind, asset: AssetSelector) -> Self {
    Self { kind, asset }
  }
}

/// Outcome of resolving one dependency.
pub enum Resolution {
  /// Work is needed: this command, which itself needs `dependencies`.
  Command {
    command: Arc<dyn Command>,
    dependencies: Vec<DependencyRequest>,
    log: Vec<LogEntry>,
  },
  /// Already satisfied by content published under `url`, currently at `fingerprint`.
  Artifact { url: String, fingerprint: Fingerprint },
}

/// Source of commands for requested assets.
pub trait Resolver {
  fn resolve(&self, kind: DependencyKind, asset: &AssetSelector) -> Result<Resolution, DefinitionError>;
}

/// A frozen graph plus the messages produced while building it.
#[derive(Debug)]
pub struct Expansion {
  pub graph: BuildGraph,
  pub log: Vec<LogEntry>,
}

/// Expand `roots` into a build graph.
///
/// Roots must resolve to commands. Any unresolved dependency or cycle fails the whole
/// expansion. Artifact dependencies are pinned on their dependent at the fingerprint
/// they resolved to, so republishing one invalidates the dependent.
pub fn expand<R: Resolver + ?Sized>(resolver: &R, roots: &[AssetSelector]) -> Result<Expansion, DefinitionError> {
  let mut expander = Expander {
    resolver,
    builder: GraphBuilder::new(),
    log: Vec::new(),
  };

  for root in roots {
    match expander.visit(DependencyKind::CompileAsset, root)? {
      Visited::Command(id) => expander.builder.mark_root(id),
      Visited::Artifact { .. } => {
        return Err(DefinitionError::NothingToBuild {
          selector: root.to_string(),
        });
      }
    }
  }

  let graph = expander.builder.build()?;
  Ok(Expansion {
    graph,
    log: expander.log,
  })
}

enum Visited {
  Command(CommandId),
  Artifact { url: String, fingerprint: Fingerprint },
}

struct Expander<'a, R: ?Sized> {
  resolver: &'a R,
  builder: GraphBuilder,
  log: Vec<LogEntry>,
}

impl<R: Resolver + ?Sized> Expander<'_, R> {
  fn visit(&mut self, kind: DependencyKind, asset: &AssetSelector) -> Result<Visited, DefinitionError> {
    let (command, dependencies, log) = match self.resolver.resolve(kind, asset)? {
      Resolution::Artifact { url, fingerprint } => return Ok(Visited::Artifact { url, fingerprint }),
      Resolution::Command {
        command,
        dependencies,
        log,
      } => (command, dependencies, log),
    };

    // Already expanded, possibly further up the current path
    if let Some(id) = self.builder.find(command.output_url()) {
      return Ok(Visited::Command(id));
    }

    self.log.extend(log);
    let id = self.builder.add_command(command);
    for dependency in dependencies {
      match self.visit(dependency.kind, &dependency.asset)? {
        Visited::Command(dep_id) => self.builder.add_dependency(id, dep_id, dependency.kind)?,
        Visited::Artifact { url, fingerprint } => self.builder.add_artifact(id, &url, fingerprint)?,
      }
    }
    Ok(Visited::Command(id))
  }
}
