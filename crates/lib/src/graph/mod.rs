//! Build graph: commands and the dependency edges between them.
//!
//! A [`GraphBuilder`] is mutable while a request is being expanded. [`GraphBuilder::build`]
//! verifies the graph is acyclic and freezes it into a [`BuildGraph`], which is immutable
//! for the duration of execution.
//!
//! # Submodules
//!
//! - [`resolve`] - expanding requested assets into a graph through a resolver

pub mod resolve;

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;

use petgraph::Direction;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cache::Fingerprint;
use crate::command::Command;

/// Index of a command within one graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommandId(pub usize);

impl fmt::Display for CommandId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "#{}", self.0)
  }
}

impl CommandId {
  fn node(self) -> NodeIndex {
    NodeIndex::new(self.0)
  }
}

/// Why one command depends on another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DependencyKind {
  /// The dependent needs the other asset to have been compiled.
  CompileAsset,
  /// The dependent reads the other command's output.
  CompileContent,
}

impl fmt::Display for DependencyKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      DependencyKind::CompileAsset => write!(f, "compile-asset"),
      DependencyKind::CompileContent => write!(f, "compile-content"),
    }
  }
}

/// Errors detected before any command runs. A request that hits one executes nothing.
#[derive(Debug, Error)]
pub enum DefinitionError {
  #[error("dependency cycle involving {url}")]
  Cycle { url: String },

  #[error("unknown command {0}")]
  UnknownCommand(CommandId),

  #[error("no asset matches {selector} (needed as {kind})")]
  Unresolved { kind: DependencyKind, selector: String },

  #[error("no compiler registered for asset kind '{kind}' (asset {location})")]
  NoCompiler { location: String, kind: String },

  #[error("failed to prepare {location}: {message}")]
  Compile { location: String, message: String },

  #[error("nothing to build for {selector}")]
  NothingToBuild { selector: String },
}

/// Published content a command reads, pinned by URL to the fingerprint it resolved to.
pub type Artifacts = BTreeMap<String, Fingerprint>;

/// Mutable graph under construction.
///
/// Commands are deduplicated by output URL: adding a second command with an URL already
/// present returns the existing id.
#[derive(Default)]
pub struct GraphBuilder {
  graph: DiGraph<CommandId, DependencyKind>,
  commands: Vec<Arc<dyn Command>>,
  artifacts: Vec<Artifacts>,
  by_url: HashMap<String, CommandId>,
  roots: Vec<CommandId>,
}

impl GraphBuilder {
  pub fn new() -> Self {
    Self::default()
  }

  /// Add `command`, or return the id of the command already producing its URL.
  pub fn add_command(&mut self, command: Arc<dyn Command>) -> CommandId {
    if let Some(&id) = self.by_url.get(command.output_url()) {
      return id;
    }
    let id = CommandId(self.commands.len());
    let idx = self.graph.add_node(id);
    debug_assert_eq!(idx.index(), id.0);
    self.by_url.insert(command.output_url().to_string(), id);
    self.commands.push(command);
    self.artifacts.push(Artifacts::new());
    id
  }

  /// Command currently registered for `url`.
  pub fn find(&self, url: &str) -> Option<CommandId> {
    self.by_url.get(url).copied()
  }

  /// Record that `dependent` consumes `dependency`.
  pub fn add_dependency(
    &mut self,
    dependent: CommandId,
    dependency: CommandId,
    kind: DependencyKind,
  ) -> Result<(), DefinitionError> {
    for id in [dependent, dependency] {
      if id.0 >= self.commands.len() {
        return Err(DefinitionError::UnknownCommand(id));
      }
    }
    self.graph.update_edge(dependency.node(), dependent.node(), kind);
    Ok(())
  }

  /// Record that `dependent` reads published content `url` as it stands at `fingerprint`.
  pub fn add_artifact(
    &mut self,
    dependent: CommandId,
    url: &str,
    fingerprint: Fingerprint,
  ) -> Result<(), DefinitionError> {
    let artifacts = self
      .artifacts
      .get_mut(dependent.0)
      .ok_or(DefinitionError::UnknownCommand(dependent))?;
    artifacts.insert(url.to_string(), fingerprint);
    Ok(())
  }

  /// Mark `id` as a requested output.
  pub fn mark_root(&mut self, id: CommandId) {
    if !self.roots.contains(&id) {
      self.roots.push(id);
    }
  }

  pub fn len(&self) -> usize {
    self.commands.len()
  }

  pub fn is_empty(&self) -> bool {
    self.commands.is_empty()
  }

  /// Verify the graph is acyclic and freeze it.
  pub fn build(self) -> Result<BuildGraph, DefinitionError> {
    let order = toposort(&self.graph, None).map_err(|cycle| {
      let id = self.graph[cycle.node_id()];
      DefinitionError::Cycle {
        url: self.commands[id.0].output_url().to_string(),
      }
    })?;

    Ok(BuildGraph {
      order: order.into_iter().map(|idx| self.graph[idx]).collect(),
      graph: self.graph,
      commands: self.commands,
      artifacts: self.artifacts,
      roots: self.roots,
    })
  }
}

/// Immutable, acyclic graph of commands.
pub struct BuildGraph {
  graph: DiGraph<CommandId, DependencyKind>,
  commands: Vec<Arc<dyn Command>>,
  artifacts: Vec<Artifacts>,
  roots: Vec<CommandId>,
  order: Vec<CommandId>,
}

impl BuildGraph {
  pub fn len(&self) -> usize {
    self.commands.len()
  }

  pub fn is_empty(&self) -> bool {
    self.commands.is_empty()
  }

  pub fn ids(&self) -> impl Iterator<Item = CommandId> + '_ {
    (0..self.commands.len()).map(CommandId)
  }

  pub fn command(&self, id: CommandId) -> &Arc<dyn Command> {
    &self.commands[id.0]
  }

  /// Published content `id` reads without a producing command in this graph.
  pub fn artifacts(&self, id: CommandId) -> &Artifacts {
    &self.artifacts[id.0]
  }

  /// Requested outputs, in request order.
  pub fn roots(&self) -> &[CommandId] {
    &self.roots
  }

  /// Commands in an order where dependencies come before dependents.
  pub fn topological_order(&self) -> &[CommandId] {
    &self.order
  }

  /// Direct dependencies of `id`.
  pub fn dependencies(&self, id: CommandId) -> Vec<CommandId> {
    self.neighbors(id, Direction::Incoming)
  }

  /// Direct dependents of `id`.
  pub fn dependents(&self, id: CommandId) -> Vec<CommandId> {
    self.neighbors(id, Direction::Outgoing)
  }

  /// Every command that depends on `id` directly or indirectly.
  pub fn transitive_dependents(&self, id: CommandId) -> Vec<CommandId> {
    let mut seen = HashSet::new();
    let mut queue: VecDeque<CommandId> = self.dependents(id).into();
    while let Some(next) = queue.pop_front() {
      if seen.insert(next) {
        queue.extend(self.dependents(next));
      }
    }
    let mut result: Vec<_> = seen.into_iter().collect();
    result.sort();
    result
  }

  fn neighbors(&self, id: CommandId, direction: Direction) -> Vec<CommandId> {
    let mut ids: Vec<_> = self
      .graph
      .neighbors_directed(id.node(), direction)
      .map(|idx| self.graph[idx])
      .collect();
    ids.sort();
    ids.dedup();
    ids
  }
}

impl fmt::Debug for BuildGraph {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("BuildGraph")
      .field("commands", &self.commands.len())
      .field("edges", &self.graph.edge_count())
      .field("roots", &self.roots)
      .finish()
  }
}
