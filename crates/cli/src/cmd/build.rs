//! Implementation of the `kiln build` command.
//!
//! Loads the package, builds the requested assets and reports every command. Ctrl-C
//! cancels the request; commands already running stop at their next checkpoint.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use tokio_util::sync::CancellationToken;
use tracing::info;

use kiln_lib::asset::Package;
use kiln_lib::cache::InputMarker;
use kiln_lib::compiler::{CompilerRegistry, StreamingPolicy};
use kiln_lib::execute::ExecuteConfig;
use kiln_lib::platform::TargetPlatform;
use kiln_lib::{BuildRequest, BuildResult, BuildStatus, Engine, EngineConfig};

use crate::output::{
  OutputFormat, format_duration, print_command, print_error, print_info, print_json, print_stat, print_success,
  print_warning, symbols, truncate_hash,
};

#[derive(Debug, Args)]
pub struct BuildArgs {
  /// Asset locations to build (e.g. `textures/wood`)
  #[arg(required = true)]
  pub assets: Vec<String>,

  /// Package root directory
  #[arg(short, long, default_value = ".")]
  pub package: PathBuf,

  /// Target platform (defaults to the host)
  #[arg(long)]
  pub platform: Option<TargetPlatform>,

  /// Maximum number of commands executing at once
  #[arg(short, long)]
  pub jobs: Option<usize>,

  /// Fingerprint input files by content hash instead of modification time
  #[arg(long)]
  pub hash_inputs: bool,

  /// Stream texture payloads only when at least this many bytes
  #[arg(long, value_name = "BYTES")]
  pub stream_min_size: Option<u64>,

  /// Cancel the build after this long (e.g. `30s`, `5m`)
  #[arg(long, value_parser = humantime::parse_duration)]
  pub timeout: Option<Duration>,

  #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
  pub output: OutputFormat,
}

/// Run a build. Returns whether it was successful.
pub fn cmd_build(args: BuildArgs) -> Result<bool> {
  let package = Package::load(&args.package).with_context(|| format!("Failed to load package {}", args.package.display()))?;
  for skipped in package.skipped() {
    print_warning(&format!("Skipped {}: {}", skipped.path.display(), skipped.reason));
  }

  let mut execute = ExecuteConfig::default();
  if let Some(jobs) = args.jobs {
    execute = execute.with_parallelism(jobs);
  }
  if args.hash_inputs {
    execute = execute.with_input_marker(InputMarker::Content);
  }

  let policy = args.stream_min_size.map(StreamingPolicy::MinSize).unwrap_or_default();
  let config = EngineConfig::from_env().with_execute(execute);
  let engine = Engine::open(config, CompilerRegistry::with_defaults(policy)).context("Failed to open engine")?;

  let platform = args.platform.unwrap_or_default();
  let request = BuildRequest {
    assets: args.assets.clone(),
    platform,
  };

  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let result = rt.block_on(async {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
      if tokio::signal::ctrl_c().await.is_ok() {
        info!("interrupt received, cancelling build");
        trigger.cancel();
      }
    });
    if let Some(timeout) = args.timeout {
      let trigger = cancel.clone();
      tokio::spawn(async move {
        tokio::time::sleep(timeout).await;
        info!(timeout = %humantime::format_duration(timeout), "build timed out, cancelling");
        trigger.cancel();
      });
    }
    engine.build(&package, &request, &cancel).await
  });
  engine.shutdown();

  if args.output.is_json() {
    print_json(&result)?;
  } else {
    print_result(&result, platform);
  }

  Ok(result.is_success())
}

fn print_result(result: &BuildResult, platform: TargetPlatform) {
  if !result.commands.is_empty() {
    println!();
    print_info(&format!("Building for {platform}"));
    for command in &result.commands {
      print_command(command.status, &command.url, command.cache_hit, command.elapsed);
    }
  }

  for (url, entry) in result.errors() {
    match url {
      Some(url) => print_error(&format!("{url}: {}", entry.message)),
      None => print_error(&entry.message),
    }
  }

  if !result.outputs.is_empty() {
    println!();
    for output in &result.outputs {
      println!("  {} {} {}", symbols::ARROW, output.url, truncate_hash(&output.fingerprint.0));
    }
  }

  println!();
  match result.status {
    BuildStatus::Successful => print_success("Build complete!"),
    BuildStatus::Cancelled => print_warning("Build cancelled"),
    _ => print_error("Build failed"),
  }
  print_stat("Executed", &result.executed().to_string());
  print_stat("Cached", &result.cache_hits().to_string());
  print_stat("Failed", &result.count(BuildStatus::Failed).to_string());
  print_stat("Duration", &format_duration(result.elapsed));
}
