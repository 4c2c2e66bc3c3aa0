//! Build results: per-command reports and the aggregated outcome of a request.
//!
//! # Submodules
//!
//! - [`log`] - structured log entries
//! - [`report`] - named timing measures

pub mod log;
pub mod report;

use std::fmt;
use std::time::{Duration, SystemTime};

use serde::Serialize;

use crate::cache::Fingerprint;
use crate::graph::{BuildGraph, CommandId, DefinitionError};

pub use log::{LogEntry, Severity};
pub use report::PerformanceReport;

/// Final status of a command or a whole request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum BuildStatus {
  Successful,
  Failed,
  Cancelled,
  /// Skipped because a prerequisite did not succeed.
  NotTriggeredPrerequisite,
}

impl fmt::Display for BuildStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      BuildStatus::Successful => "successful",
      BuildStatus::Failed => "failed",
      BuildStatus::Cancelled => "cancelled",
      BuildStatus::NotTriggeredPrerequisite => "not triggered (prerequisite)",
    };
    write!(f, "{}", s)
  }
}

/// Where a requested output can be read from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContentLocator {
  pub url: String,
  pub fingerprint: Fingerprint,
}

/// Outcome of one command.
#[derive(Debug, Clone, Serialize)]
pub struct CommandReport {
  pub id: CommandId,
  pub kind: String,
  pub url: String,
  pub status: BuildStatus,
  pub fingerprint: Option<Fingerprint>,
  /// Output was reused without executing.
  pub cache_hit: bool,
  /// `execute` ran for this command.
  pub executed: bool,
  /// `None` when the command never started.
  pub started_at: Option<SystemTime>,
  pub elapsed: Duration,
  pub log: Vec<LogEntry>,
}

impl CommandReport {
  pub(crate) fn new(id: CommandId, kind: &str, url: &str) -> Self {
    Self {
      id,
      kind: kind.to_string(),
      url: url.to_string(),
      status: BuildStatus::NotTriggeredPrerequisite,
      fingerprint: None,
      cache_hit: false,
      executed: false,
      started_at: None,
      elapsed: Duration::ZERO,
      log: Vec::new(),
    }
  }

  /// Report for a command that never started.
  pub(crate) fn skipped(id: CommandId, kind: &str, url: &str, status: BuildStatus, message: String) -> Self {
    let mut report = Self::new(id, kind, url);
    report.status = status;
    report.log.push(LogEntry::new(
      if status == BuildStatus::Cancelled {
        Severity::Info
      } else {
        Severity::Warning
      },
      message,
    ));
    report
  }
}

/// Aggregated outcome of a build request.
#[derive(Debug, Clone, Serialize)]
pub struct BuildResult {
  pub status: BuildStatus,
  /// Ordered by start time; commands that never started come last.
  pub commands: Vec<CommandReport>,
  /// Locators of requested outputs that were produced.
  pub outputs: Vec<ContentLocator>,
  /// Request-level messages (expansion warnings, definition errors).
  pub log: Vec<LogEntry>,
  pub elapsed: Duration,
  pub performance: PerformanceReport,
}

impl BuildResult {
  /// Result of a request that failed before anything executed.
  pub fn definition_failure(error: &DefinitionError, elapsed: Duration) -> Self {
    Self {
      status: BuildStatus::Failed,
      commands: Vec::new(),
      outputs: Vec::new(),
      log: vec![LogEntry::error(error.to_string())],
      elapsed,
      performance: PerformanceReport::new(),
    }
  }

  pub fn is_success(&self) -> bool {
    self.status == BuildStatus::Successful
  }

  pub fn command(&self, url: &str) -> Option<&CommandReport> {
    self.commands.iter().find(|c| c.url == url)
  }

  pub fn count(&self, status: BuildStatus) -> usize {
    self.commands.iter().filter(|c| c.status == status).count()
  }

  pub fn cache_hits(&self) -> usize {
    self.commands.iter().filter(|c| c.cache_hit).count()
  }

  pub fn executed(&self) -> usize {
    self.commands.iter().filter(|c| c.executed).count()
  }

  /// Every log entry, request-level first, each command's entries tagged by its URL.
  pub fn log_entries(&self) -> impl Iterator<Item = (Option<&str>, &LogEntry)> {
    self
      .log
      .iter()
      .map(|entry| (None, entry))
      .chain(self.commands.iter().flat_map(|c| c.log.iter().map(|entry| (Some(c.url.as_str()), entry))))
  }

  pub fn errors(&self) -> impl Iterator<Item = (Option<&str>, &LogEntry)> {
    self.log_entries().filter(|(_, entry)| entry.severity == Severity::Error)
  }
}

/// Fold finalized command reports into a request result.
///
/// `reports` is indexed by command id and holds exactly one report per command.
pub(crate) fn aggregate(
  graph: &BuildGraph,
  reports: Vec<CommandReport>,
  cancelled: bool,
  elapsed: Duration,
) -> BuildResult {
  let status = if reports.iter().any(|r| r.status == BuildStatus::Failed) {
    BuildStatus::Failed
  } else if cancelled && reports.iter().any(|r| r.status != BuildStatus::Successful) {
    BuildStatus::Cancelled
  } else if reports.iter().all(|r| r.status == BuildStatus::Successful) {
    BuildStatus::Successful
  } else {
    BuildStatus::Failed
  };

  let outputs = graph
    .roots()
    .iter()
    .filter_map(|&id| {
      let report = &reports[id.0];
      match (&report.status, &report.fingerprint) {
        (BuildStatus::Successful, Some(fingerprint)) => Some(ContentLocator {
          url: report.url.clone(),
          fingerprint: fingerprint.clone(),
        }),
        _ => None,
      }
    })
    .collect();

  let topo_rank: Vec<usize> = {
    let mut rank = vec![0; graph.len()];
    for (pos, id) in graph.topological_order().iter().enumerate() {
      rank[id.0] = pos;
    }
    rank
  };

  let mut commands = reports;
  commands.sort_by(|a, b| match (a.started_at, b.started_at) {
    (Some(x), Some(y)) => x.cmp(&y).then(a.id.cmp(&b.id)),
    (Some(_), None) => std::cmp::Ordering::Less,
    (None, Some(_)) => std::cmp::Ordering::Greater,
    (None, None) => topo_rank[a.id.0].cmp(&topo_rank[b.id.0]),
  });

  BuildResult {
    status,
    commands,
    outputs,
    log: Vec::new(),
    elapsed,
    performance: PerformanceReport::new(),
  }
}
