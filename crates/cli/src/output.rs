//! Terminal output for the `kiln` commands.
//!
//! Status lines go to stdout, errors and warnings to stderr. Colors are applied only when
//! the target stream supports them.

use std::fmt::Display;
use std::time::Duration;

use anyhow::Context;
use clap::ValueEnum;
use owo_colors::{OwoColorize, Stream};

use kiln_lib::BuildStatus;

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
  #[default]
  Text,
  Json,
}

impl OutputFormat {
  pub fn is_json(self) -> bool {
    matches!(self, OutputFormat::Json)
  }
}

pub mod symbols {
  pub const SUCCESS: &str = "✓";
  pub const ERROR: &str = "✗";
  pub const WARNING: &str = "⚠";
  pub const INFO: &str = "•";
  pub const ARROW: &str = "→";
  pub const SKIPPED: &str = "-";
}

#[derive(Debug, Clone, Copy)]
enum Tone {
  Success,
  Error,
  Warning,
  Info,
  Muted,
}

fn paint(text: impl Display, tone: Tone, stream: Stream) -> String {
  match tone {
    Tone::Success => text.if_supports_color(stream, |t| t.green()).to_string(),
    Tone::Error => text.if_supports_color(stream, |t| t.red()).to_string(),
    Tone::Warning => text.if_supports_color(stream, |t| t.yellow()).to_string(),
    Tone::Info => text.if_supports_color(stream, |t| t.blue()).to_string(),
    Tone::Muted => text.if_supports_color(stream, |t| t.dimmed()).to_string(),
  }
}

/// First 12 characters of a fingerprint or hash.
pub fn truncate_hash(hash: &str) -> &str {
  &hash[..hash.len().min(12)]
}

pub fn format_bytes(bytes: u64) -> String {
  const UNITS: [&str; 3] = ["KB", "MB", "GB"];

  if bytes < 1024 {
    return format!("{bytes} B");
  }
  let mut value = bytes as f64 / 1024.0;
  let mut unit = 0;
  while value >= 1024.0 && unit < UNITS.len() - 1 {
    value /= 1024.0;
    unit += 1;
  }
  format!("{value:.1} {}", UNITS[unit])
}

pub fn format_duration(duration: Duration) -> String {
  let secs = duration.as_secs();
  match secs {
    60.. => format!("{}m {}s", secs / 60, secs % 60),
    1.. => format!("{secs}.{:02}s", duration.subsec_millis() / 10),
    0 => format!("{}ms", duration.subsec_millis()),
  }
}

/// One line per command: status symbol, URL, and either the cache marker or the elapsed
/// time or the final status.
pub fn print_command(status: BuildStatus, url: &str, cached: bool, elapsed: Duration) {
  let (symbol, tone) = match status {
    BuildStatus::Successful => (symbols::SUCCESS, Tone::Success),
    BuildStatus::Failed => (symbols::ERROR, Tone::Error),
    BuildStatus::Cancelled => (symbols::WARNING, Tone::Warning),
    BuildStatus::NotTriggeredPrerequisite => (symbols::SKIPPED, Tone::Muted),
  };

  let detail = match status {
    BuildStatus::Successful if cached => "cached".to_string(),
    BuildStatus::Successful => format_duration(elapsed),
    other => other.to_string(),
  };

  println!(
    "  {} {url} {}",
    paint(symbol, tone, Stream::Stdout),
    paint(format!("({detail})"), Tone::Muted, Stream::Stdout)
  );
}

pub fn print_success(message: &str) {
  println!("{} {message}", paint(symbols::SUCCESS, Tone::Success, Stream::Stdout));
}

pub fn print_info(message: &str) {
  println!("{} {message}", paint(symbols::INFO, Tone::Info, Stream::Stdout));
}

pub fn print_error(message: &str) {
  eprintln!(
    "{} {}",
    paint(symbols::ERROR, Tone::Error, Stream::Stderr),
    paint(message, Tone::Error, Stream::Stderr)
  );
}

pub fn print_warning(message: &str) {
  eprintln!(
    "{} {}",
    paint(symbols::WARNING, Tone::Warning, Stream::Stderr),
    paint(message, Tone::Warning, Stream::Stderr)
  );
}

pub fn print_stat(label: &str, value: &str) {
  println!("  {}: {value}", paint(label, Tone::Muted, Stream::Stdout));
}

pub fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
  let json = serde_json::to_string_pretty(value).context("Failed to serialize to JSON")?;
  println!("{json}");
  Ok(())
}
