mod cmd;
mod output;

use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::output::{OutputFormat, print_error};

/// kiln - incremental asset build engine
#[derive(Parser)]
#[command(name = "kiln")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Enable verbose output
  #[arg(short, long, global = true)]
  verbose: bool,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Build assets of a package
  Build(cmd::BuildArgs),

  /// Write published content to stdout
  Cat {
    /// URL the content is published under (`<platform>/<asset>`, e.g. `linux/textures/wood`)
    url: String,

    /// Print a streamed part instead of the record
    #[arg(short, long)]
    stream: Option<String>,
  },

  /// Remove content no longer published under any URL
  Gc {
    /// Show what would be removed without deleting anything
    #[arg(long)]
    dry_run: bool,

    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    output: OutputFormat,
  },

  /// Show platform and store locations
  Info,
}

fn main() -> ExitCode {
  let cli = Cli::parse();

  let level = if cli.verbose { "debug" } else { "warn" };
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
    .with_writer(std::io::stderr)
    .without_time()
    .init();

  match run(cli.command) {
    Ok(true) => ExitCode::SUCCESS,
    Ok(false) => ExitCode::FAILURE,
    Err(e) => {
      print_error(&format!("{e:#}"));
      ExitCode::FAILURE
    }
  }
}

fn run(command: Commands) -> Result<bool> {
  match command {
    Commands::Build(args) => cmd::cmd_build(args),
    Commands::Cat { url, stream } => cmd::cmd_cat(&url, stream.as_deref()).map(|_| true),
    Commands::Gc { dry_run, output } => cmd::cmd_gc(dry_run, output).map(|_| true),
    Commands::Info => {
      cmd::cmd_info();
      Ok(true)
    }
  }
}
