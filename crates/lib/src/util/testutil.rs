//! Test utilities for kiln-lib.
//!
//! [`TestCommand`] is a configurable command that counts its executions, so tests can
//! assert exactly which nodes ran and which were served from cache. Its configured
//! behavior is part of its parameters: commands that would produce different results
//! never share a fingerprint.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use crate::command::{Command, CommandError, ExecuteContext, InputFile, ParamValue, Params};
use crate::store::ContentBlob;

#[derive(Debug, Clone)]
enum Behavior {
  Succeed,
  Fail(String),
  WaitForCancel,
  Panic,
}

#[derive(Debug, Clone)]
pub struct TestCommand {
  kind: &'static str,
  version: u32,
  url: String,
  params: Params,
  inputs: Vec<PathBuf>,
  reads: Vec<String>,
  stream: bool,
  delay: Duration,
  behavior: Behavior,
  executions: Arc<AtomicUsize>,
}

impl TestCommand {
  pub fn new(url: &str) -> Self {
    Self {
      kind: "test",
      version: 1,
      url: url.to_string(),
      params: Params::new(),
      inputs: Vec::new(),
      reads: Vec::new(),
      stream: false,
      delay: Duration::ZERO,
      behavior: Behavior::Succeed,
      executions: Arc::new(AtomicUsize::new(0)),
    }
  }

  pub fn with_kind(mut self, kind: &'static str) -> Self {
    self.kind = kind;
    self
  }

  pub fn with_version(mut self, version: u32) -> Self {
    self.version = version;
    self
  }

  pub fn param(mut self, name: &str, value: impl Into<ParamValue>) -> Self {
    self.params.insert(name, value);
    self
  }

  pub fn input(mut self, path: impl Into<PathBuf>) -> Self {
    self.inputs.push(path.into());
    self
  }

  /// Load the output of `url` during execution and fold it into this output.
  pub fn reads(mut self, url: &str) -> Self {
    self.reads.push(url.to_string());
    self
  }

  /// Also emit a streamed part named `data`.
  pub fn streamed(mut self) -> Self {
    self.stream = true;
    self
  }

  pub fn delay(mut self, delay: Duration) -> Self {
    self.delay = delay;
    self
  }

  pub fn fails(self, message: &str) -> Self {
    self.behave(Behavior::Fail(message.to_string()), format!("fail: {message}"))
  }

  /// Block until the build is cancelled.
  pub fn waits_for_cancel(self) -> Self {
    self.behave(Behavior::WaitForCancel, "wait-for-cancel".to_string())
  }

  pub fn panics(self) -> Self {
    self.behave(Behavior::Panic, "panic".to_string())
  }

  fn behave(mut self, behavior: Behavior, label: String) -> Self {
    self.behavior = behavior;
    self.param("behavior", label)
  }

  /// Share an execution counter with other commands.
  pub fn counter(mut self, counter: Arc<AtomicUsize>) -> Self {
    self.executions = counter;
    self
  }

  pub fn executions(&self) -> usize {
    self.executions.load(Ordering::SeqCst)
  }

  fn sleep(&self, ctx: &ExecuteContext, duration: Duration) -> Result<(), CommandError> {
    let deadline = Instant::now() + duration;
    while Instant::now() < deadline {
      ctx.check_cancelled()?;
      std::thread::sleep(Duration::from_millis(2));
    }
    Ok(())
  }
}

impl Command for TestCommand {
  fn kind(&self) -> &'static str {
    self.kind
  }

  fn version(&self) -> u32 {
    self.version
  }

  fn params(&self) -> &Params {
    &self.params
  }

  fn output_url(&self) -> &str {
    &self.url
  }

  fn input_files(&self) -> Box<dyn Iterator<Item = InputFile> + '_> {
    Box::new(self.inputs.iter().map(|path| InputFile::new(path.clone())))
  }

  fn execute(&self, ctx: &mut ExecuteContext) -> Result<ContentBlob, CommandError> {
    self.executions.fetch_add(1, Ordering::SeqCst);
    ctx.debug(format!("executing {}", self.url));

    self.sleep(ctx, self.delay)?;

    match &self.behavior {
      Behavior::Succeed => {}
      Behavior::Fail(message) => return Err(CommandError::Failed(message.clone())),
      Behavior::WaitForCancel => {
        self.sleep(ctx, Duration::from_secs(10))?;
        return Err(CommandError::Failed("never cancelled".to_string()));
      }
      Behavior::Panic => panic!("test command panicked"),
    }

    let params = serde_json::to_string(&self.params).unwrap_or_default();
    let mut record = format!("{}:v{}:{}", self.kind, self.version, params).into_bytes();
    for input in &self.inputs {
      let path = ctx.resolve_path(input);
      let bytes = std::fs::read(&path).map_err(|source| CommandError::Read { path, source })?;
      record.extend_from_slice(&bytes);
    }
    for url in &self.reads {
      let upstream = ctx.load(url)?;
      record.extend_from_slice(&upstream.record);
    }

    let mut blob = ContentBlob::new(record);
    if self.stream {
      blob = blob.with_stream("data", format!("stream of {}", self.kind).into_bytes());
    }
    Ok(blob)
  }
}
