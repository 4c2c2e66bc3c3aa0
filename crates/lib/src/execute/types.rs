//! Types for graph execution.
//!
//! This module defines the configuration and per-node state used by the scheduler.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::cache::InputMarker;

/// Configuration for graph execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteConfig {
  /// Maximum number of commands executing at once, across all builds of one engine.
  pub parallelism: usize,

  /// How input files contribute to fingerprints.
  pub input_marker: InputMarker,
}

impl Default for ExecuteConfig {
  fn default() -> Self {
    Self {
      parallelism: num_cpus(),
      input_marker: InputMarker::default(),
    }
  }
}

impl ExecuteConfig {
  pub fn with_parallelism(mut self, parallelism: usize) -> Self {
    self.parallelism = parallelism.max(1);
    self
  }

  pub fn with_input_marker(mut self, input_marker: InputMarker) -> Self {
    self.input_marker = input_marker;
    self
  }
}

/// Get the number of CPUs for default parallelism.
fn num_cpus() -> usize {
  std::thread::available_parallelism().map(|p| p.get()).unwrap_or(4)
}

/// Lifecycle of one node during a build.
///
/// `Pending -> Ready -> Running -> Finalized`. A node reaches `Finalized` exactly once,
/// either by running or by being skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
  /// Waiting on dependencies.
  Pending,
  /// All dependencies succeeded; queued for a worker.
  Ready,
  /// Handed to a node task.
  Running,
  /// Report recorded; never changes again.
  Finalized,
}

impl fmt::Display for NodeState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      NodeState::Pending => "pending",
      NodeState::Ready => "ready",
      NodeState::Running => "running",
      NodeState::Finalized => "finalized",
    };
    write!(f, "{}", s)
  }
}
