//! Graph execution.
//!
//! A single coordinator owns the per-node state, the remaining-dependency counters and
//! the ready queue. Each ready node becomes its own task (see [`node`]); tasks compete
//! for permits of the engine-wide worker semaphore, so the concurrency limit holds
//! across every build running on one engine.
//!
//! When a node fails, every not-yet-finalized transitive dependent is finalized as
//! [`BuildStatus::NotTriggeredPrerequisite`] without running; unrelated subtrees
//! continue. Once the request is cancelled, nodes that have not started finalize as
//! [`BuildStatus::Cancelled`] instead.
//!
//! # Submodules
//!
//! - [`types`] - configuration and node states
//! - [`node`] - the per-node task

mod node;
pub mod types;

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::{CacheLayer, Fingerprint};
use crate::graph::{BuildGraph, CommandId};
use crate::platform::TargetPlatform;
use crate::result::{BuildStatus, CommandReport, LogEntry};
use crate::store::ContentStore;

pub use types::{ExecuteConfig, NodeState};

/// Shared services a node task needs.
#[derive(Clone)]
pub(crate) struct ExecuteEnv {
  pub store: Arc<ContentStore>,
  pub cache: Arc<CacheLayer>,
  pub workers: Arc<Semaphore>,
  pub config: ExecuteConfig,
}

/// Coordinator bookkeeping for one run.
struct Schedule {
  states: Vec<NodeState>,
  reports: Vec<Option<CommandReport>>,
  fingerprints: Vec<Option<Fingerprint>>,
  remaining: Vec<usize>,
}

impl Schedule {
  fn new(graph: &BuildGraph) -> Self {
    let count = graph.len();
    Self {
      states: vec![NodeState::Pending; count],
      reports: vec![None; count],
      fingerprints: vec![None; count],
      remaining: graph.ids().map(|id| graph.dependencies(id).len()).collect(),
    }
  }

  fn finalize(&mut self, report: CommandReport) {
    let id = report.id;
    debug_assert_ne!(self.states[id.0], NodeState::Finalized);
    self.states[id.0] = NodeState::Finalized;
    self.reports[id.0] = Some(report);
  }

  fn skip(&mut self, graph: &BuildGraph, id: CommandId, status: BuildStatus, message: String) {
    let command = graph.command(id);
    self.finalize(CommandReport::skipped(
      id,
      command.kind(),
      command.output_url(),
      status,
      message,
    ));
  }
}

/// Execute every node of `graph`.
///
/// Returns one finalized report per command, indexed by command id.
pub(crate) async fn run_graph(
  env: &ExecuteEnv,
  graph: &BuildGraph,
  base_dir: &Path,
  platform: TargetPlatform,
  cancel: &CancellationToken,
) -> Vec<CommandReport> {
  let mut schedule = Schedule::new(graph);
  let mut ready: VecDeque<CommandId> = graph
    .topological_order()
    .iter()
    .copied()
    .filter(|id| schedule.remaining[id.0] == 0)
    .collect();
  for id in &ready {
    schedule.states[id.0] = NodeState::Ready;
  }

  let mut running: JoinSet<CommandReport> = JoinSet::new();
  let mut tasks: HashMap<tokio::task::Id, CommandId> = HashMap::new();

  info!(commands = graph.len(), %platform, "executing build graph");

  loop {
    while let Some(id) = ready.pop_front() {
      if cancel.is_cancelled() {
        schedule.skip(graph, id, BuildStatus::Cancelled, "cancelled before start".to_string());
        continue;
      }

      // Pin what this node reads to the fingerprints its key is computed from
      let mut upstream = graph.artifacts(id).clone();
      for dep in graph.dependencies(id) {
        if let Some(fingerprint) = &schedule.fingerprints[dep.0] {
          upstream.insert(graph.command(dep).output_url().to_string(), fingerprint.clone());
        }
      }

      schedule.states[id.0] = NodeState::Running;
      let handle = running.spawn(node::run(node::NodeJob {
        id,
        command: graph.command(id).clone(),
        upstream,
        base_dir: base_dir.to_path_buf(),
        platform,
        cancel: cancel.clone(),
        env: env.clone(),
      }));
      tasks.insert(handle.id(), id);
    }

    let Some(joined) = running.join_next_with_id().await else {
      break;
    };

    let report = match joined {
      Ok((task, report)) => {
        tasks.remove(&task);
        report
      }
      Err(e) => {
        let Some(id) = tasks.remove(&e.id()) else {
          warn!(error = %e, "lost track of a node task");
          continue;
        };
        let command = graph.command(id);
        let mut report = CommandReport::new(id, command.kind(), command.output_url());
        report.status = BuildStatus::Failed;
        report.log.push(LogEntry::error(format!("node task failed: {e}")));
        report
      }
    };

    let id = report.id;
    match report.status {
      BuildStatus::Successful => {
        schedule.fingerprints[id.0] = report.fingerprint.clone();
        for dependent in graph.dependents(id) {
          let remaining = &mut schedule.remaining[dependent.0];
          *remaining = remaining.saturating_sub(1);
          if *remaining == 0 && schedule.states[dependent.0] == NodeState::Pending {
            schedule.states[dependent.0] = NodeState::Ready;
            ready.push_back(dependent);
          }
        }
      }
      // Unstarted dependents are finalized as cancelled once everything drains
      _ if cancel.is_cancelled() => {}
      status => {
        let url = report.url.clone();
        for dependent in graph.transitive_dependents(id) {
          if schedule.states[dependent.0] == NodeState::Pending {
            debug!(url = %graph.command(dependent).output_url(), prerequisite = %url, "skipping dependent");
            schedule.skip(
              graph,
              dependent,
              BuildStatus::NotTriggeredPrerequisite,
              format!("prerequisite {url} {status}"),
            );
          }
        }
      }
    }

    schedule.finalize(report);
  }

  for &id in graph.topological_order() {
    if schedule.states[id.0] != NodeState::Finalized {
      if cancel.is_cancelled() {
        schedule.skip(graph, id, BuildStatus::Cancelled, "cancelled before start".to_string());
      } else {
        schedule.skip(
          graph,
          id,
          BuildStatus::NotTriggeredPrerequisite,
          "prerequisites did not complete".to_string(),
        );
      }
    }
  }

  schedule.reports.into_iter().flatten().collect()
}
