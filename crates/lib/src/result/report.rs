//! Named timing measures for one build.

use std::fmt;
use std::time::{Duration, Instant};

use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct Measure {
  pub label: String,
  pub duration: Duration,
}

/// Ordered list of named phases and how long each took.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PerformanceReport {
  measures: Vec<Measure>,
  #[serde(skip)]
  open: Option<(String, Instant)>,
}

impl PerformanceReport {
  pub fn new() -> Self {
    Self::default()
  }

  /// Start timing `label`, closing any measure still open.
  pub fn begin(&mut self, label: impl Into<String>) {
    self.end();
    self.open = Some((label.into(), Instant::now()));
  }

  /// Close the open measure, if any.
  pub fn end(&mut self) {
    if let Some((label, started)) = self.open.take() {
      self.measures.push(Measure {
        label,
        duration: started.elapsed(),
      });
    }
  }

  pub fn record(&mut self, label: impl Into<String>, duration: Duration) {
    self.measures.push(Measure {
      label: label.into(),
      duration,
    });
  }

  pub fn measures(&self) -> &[Measure] {
    &self.measures
  }

  pub fn total(&self) -> Duration {
    self.measures.iter().map(|m| m.duration).sum()
  }
}

impl fmt::Display for PerformanceReport {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let total = self.total();
    writeln!(f, "Total time: {:.3}ms", total.as_secs_f64() * 1000.0)?;
    for measure in &self.measures {
      let share = if total.is_zero() {
        0.0
      } else {
        measure.duration.as_secs_f64() / total.as_secs_f64() * 100.0
      };
      writeln!(
        f,
        "  {:<24} {:>10.3}ms {:>6.2}%",
        measure.label,
        measure.duration.as_secs_f64() * 1000.0,
        share
      )?;
    }
    Ok(())
  }
}
