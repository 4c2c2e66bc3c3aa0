//! Lifecycle of a single node: fingerprint, cache check, execute, commit.
//!
//! Runs as its own task. All blocking work (stat/hash of inputs, store I/O, the command
//! body) happens on the blocking pool so the coordinator is never held up.

use std::any::Any;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Instant, SystemTime};

use tokio::task::spawn_blocking;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::cache::{CacheEntry, CacheError, CacheProbe, Fingerprint, InputState};
use crate::command::{Command, CommandError, ExecuteContext};
use crate::execute::ExecuteEnv;
use crate::graph::CommandId;
use crate::platform::TargetPlatform;
use crate::result::{BuildStatus, CommandReport, LogEntry};
use crate::store::{ContentBlob, InsertOutcome, StoreError};

pub(crate) struct NodeJob {
  pub id: CommandId,
  pub command: Arc<dyn Command>,
  /// Output URL to fingerprint of everything this command may load.
  pub upstream: BTreeMap<String, Fingerprint>,
  pub base_dir: PathBuf,
  pub platform: TargetPlatform,
  pub cancel: CancellationToken,
  pub env: ExecuteEnv,
}

pub(crate) async fn run(job: NodeJob) -> CommandReport {
  let mut report = CommandReport::new(job.id, job.command.kind(), job.command.output_url());

  let permit = tokio::select! {
    biased;
    _ = job.cancel.cancelled() => {
      report.status = BuildStatus::Cancelled;
      report.log.push(LogEntry::info("cancelled before start"));
      return report;
    }
    permit = job.env.workers.clone().acquire_owned() => permit,
  };
  let Ok(_permit) = permit else {
    report.status = BuildStatus::Failed;
    report.log.push(LogEntry::error("worker pool closed"));
    return report;
  };

  report.started_at = Some(SystemTime::now());
  let started = Instant::now();
  report.status = process(&job, &mut report).await;
  report.elapsed = started.elapsed();

  match report.status {
    BuildStatus::Successful => info!(
      url = %report.url,
      cached = report.cache_hit,
      elapsed_ms = report.elapsed.as_millis() as u64,
      "command succeeded"
    ),
    BuildStatus::Failed => error!(url = %report.url, "command failed"),
    _ => debug!(url = %report.url, status = %report.status, "command finished"),
  }

  report
}

async fn process(job: &NodeJob, report: &mut CommandReport) -> BuildStatus {
  if job.cancel.is_cancelled() {
    return cancelled(report);
  }

  let fingerprinted = {
    let command = job.command.clone();
    let base_dir = job.base_dir.clone();
    let marker = job.env.config.input_marker;
    let upstream: Vec<Fingerprint> = job.upstream.values().cloned().collect();
    spawn_blocking(move || Fingerprint::compute(&*command, &base_dir, marker, &upstream)).await
  };
  let (fingerprint, inputs) = match fingerprinted {
    Ok(Ok(result)) => result,
    Ok(Err(e)) => return failed(report, e.to_string()),
    Err(e) => return failed(report, format!("fingerprint task failed: {e}")),
  };
  report.fingerprint = Some(fingerprint.clone());

  // Identical work in flight elsewhere finishes first; we then observe its output
  let _claim = tokio::select! {
    biased;
    _ = job.cancel.cancelled() => return cancelled(report),
    claim = job.env.cache.claim(&fingerprint) => claim,
  };

  if let Some(entry) = lookup(job, &fingerprint, &inputs).await {
    let published = {
      let store = job.env.store.clone();
      let url = report.url.clone();
      let fingerprint = fingerprint.clone();
      spawn_blocking(move || store.map_url(&url, &fingerprint)).await
    };
    return match published {
      Ok(Ok(())) => {
        debug!(url = %report.url, fingerprint = %entry.fingerprint, "cache hit");
        report.cache_hit = true;
        BuildStatus::Successful
      }
      Ok(Err(e)) => failed(report, format!("failed to publish cached output: {e}")),
      Err(e) => failed(report, format!("publish task failed: {e}")),
    };
  }
  debug!(url = %report.url, fingerprint = %fingerprint, "cache miss");

  if job.cancel.is_cancelled() {
    return cancelled(report);
  }

  let executed = {
    let command = job.command.clone();
    let ctx = ExecuteContext::new(
      command.output_url(),
      job.platform,
      &job.base_dir,
      job.cancel.clone(),
      job.env.store.clone(),
      job.upstream.clone(),
    );
    report.executed = true;
    spawn_blocking(move || {
      let mut ctx = ctx;
      let result = command.execute(&mut ctx);
      (result, ctx.into_log())
    })
    .await
  };

  let blob = match executed {
    Ok((result, log)) => {
      report.log.extend(log);
      match result {
        Ok(blob) => blob,
        Err(CommandError::Cancelled) => return cancelled(report),
        Err(e) => return failed(report, e.to_string()),
      }
    }
    Err(e) if e.is_panic() => return failed(report, format!("command panicked: {}", panic_message(e.into_panic()))),
    Err(e) => return failed(report, format!("command task failed: {e}")),
  };

  let committed = {
    let command = job.command.clone();
    let env = job.env.clone();
    let fingerprint = fingerprint.clone();
    spawn_blocking(move || commit(&env, &*command, &fingerprint, inputs, &blob)).await
  };

  match committed {
    Ok(Ok(_)) => BuildStatus::Successful,
    Ok(Err(e)) => failed(report, format!("failed to commit output: {e}")),
    Err(e) => failed(report, format!("commit task failed: {e}")),
  }
}

async fn lookup(job: &NodeJob, fingerprint: &Fingerprint, inputs: &[InputState]) -> Option<CacheEntry> {
  let cache = job.env.cache.clone();
  let fingerprint = fingerprint.clone();
  let inputs = inputs.to_vec();
  let kind = job.command.kind();
  let version = job.command.version();
  spawn_blocking(move || {
    cache.lookup(
      &fingerprint,
      CacheProbe {
        kind,
        version,
        inputs: &inputs,
      },
    )
  })
  .await
  .ok()
  .flatten()
}

/// Store the blob, record the cache entry, then publish the URL.
fn commit(
  env: &ExecuteEnv,
  command: &dyn Command,
  fingerprint: &Fingerprint,
  inputs: Vec<InputState>,
  blob: &ContentBlob,
) -> Result<InsertOutcome, CacheError> {
  let outcome = env.store.insert(fingerprint, blob)?;
  let object = env.store.verify(fingerprint)?.ok_or_else(|| StoreError::NotFound {
    fingerprint: fingerprint.clone(),
  })?;

  env.cache.store(&CacheEntry {
    fingerprint: fingerprint.clone(),
    kind: command.kind().to_string(),
    version: command.version(),
    output_url: command.output_url().to_string(),
    inputs,
    content_hash: object.marker.content_hash,
    streams: object.marker.streams,
    created_at: SystemTime::now(),
  })?;

  env.store.map_url(command.output_url(), fingerprint)?;
  Ok(outcome)
}

fn cancelled(report: &mut CommandReport) -> BuildStatus {
  debug!(url = %report.url, "command cancelled");
  report.log.push(LogEntry::info("cancelled"));
  BuildStatus::Cancelled
}

fn failed(report: &mut CommandReport, message: String) -> BuildStatus {
  error!(url = %report.url, error = %message, "command error");
  report.log.push(LogEntry::error(message));
  BuildStatus::Failed
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
  if let Some(s) = payload.downcast_ref::<&str>() {
    s.to_string()
  } else if let Some(s) = payload.downcast_ref::<String>() {
    s.clone()
  } else {
    "unknown panic".to_string()
  }
}
