//! Types for build execution.
//!
//! This module defines the configuration, the per-step error types and the
//! aggregate failure returned when an execution does not succeed.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::warn;

use crate::consts::{ENV_FAIL_FAST, ENV_PARALLELISM};
use crate::diagnostic::{Diagnostic, DiagnosticList, Level};
use crate::store::StoreError;

/// A step failed in a way that makes finishing the build pointless.
///
/// Returning this error (or an `anyhow::Error` wrapping it) from a step action
/// cancels the build: no further step is started.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct FatalError(pub String);

impl FatalError {
  pub fn new(message: impl Into<String>) -> Self {
    Self(message.into())
  }
}

/// Why one step failed.
#[derive(Debug, Error)]
pub enum StepError {
  /// The action returned an error.
  #[error("{0:#}")]
  Action(anyhow::Error),

  /// The action panicked.
  #[error("panicked: {0}")]
  Panicked(String),

  /// The step's output conflicts with items already published.
  #[error(transparent)]
  Publish(#[from] StoreError),

  /// The worker running the step disappeared without reporting back.
  #[error("worker terminated without reporting a result")]
  Lost,
}

impl StepError {
  /// Whether this failure cancels the rest of the build.
  pub fn is_fatal(&self) -> bool {
    match self {
      StepError::Action(e) => e.chain().any(|cause| cause.is::<FatalError>()),
      _ => false,
    }
  }
}

/// A failed step and its error.
#[derive(Debug, Clone)]
pub struct StepFailure {
  pub step: String,
  pub error: Arc<StepError>,
}

impl fmt::Display for StepFailure {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "step \"{}\" failed: {}", self.step, self.error)
  }
}

/// Why a step did not run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SkipReason {
  /// A strong predecessor failed or was itself skipped. Names the step that failed.
  UpstreamFailure { step: String },
  /// The build was cancelled before the step was started.
  Cancelled,
}

impl fmt::Display for SkipReason {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      SkipReason::UpstreamFailure { step } => write!(f, "upstream failure of step \"{}\"", step),
      SkipReason::Cancelled => write!(f, "build cancelled"),
    }
  }
}

/// A step that was not run, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedStep {
  pub step: String,
  pub reason: SkipReason,
}

/// An execution that did not succeed.
///
/// Holds every step failure, every skipped step and the full diagnostic list.
/// No partial result is available.
#[derive(Debug, Error)]
#[error(
  "build failed: {} step(s) failed, {} step(s) skipped{}",
  .failures.len(),
  .skipped.len(),
  DiagnosticList(.diagnostics)
)]
pub struct BuildFailure {
  pub failures: Vec<StepFailure>,
  pub skipped: Vec<SkippedStep>,
  pub diagnostics: Vec<Diagnostic>,
}

impl BuildFailure {
  /// A failure raised before any step ran.
  pub(crate) fn rejected(diagnostics: Vec<Diagnostic>) -> Self {
    Self {
      failures: Vec::new(),
      skipped: Vec::new(),
      diagnostics,
    }
  }

  pub fn failed_steps(&self) -> Vec<&str> {
    self.failures.iter().map(|f| f.step.as_str()).collect()
  }

  pub fn skipped_steps(&self) -> Vec<&str> {
    self.skipped.iter().map(|s| s.step.as_str()).collect()
  }

  pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
    self.diagnostics.iter().filter(|d| d.level() == Level::Error)
  }

  /// A machine-readable summary of the failure.
  pub fn report(&self) -> serde_json::Value {
    serde_json::json!({
      "failed": self.failed_steps(),
      "skipped": self.skipped,
      "diagnostics": self.diagnostics,
    })
  }
}

/// Configuration for build execution.
#[derive(Debug, Clone)]
pub struct ExecuteConfig {
  /// Maximum number of steps running at the same time.
  pub parallelism: usize,

  /// Cancel the build at the first step failure instead of running every
  /// unaffected step.
  pub fail_fast: bool,
}

impl Default for ExecuteConfig {
  fn default() -> Self {
    Self {
      parallelism: num_cpus(),
      fail_fast: false,
    }
  }
}

impl ExecuteConfig {
  /// Default configuration with overrides from the environment.
  ///
  /// Reads `BUILDCHAIN_PARALLELISM` (positive integer) and
  /// `BUILDCHAIN_FAIL_FAST` (`1`, `true`, `0`, `false`). Invalid values are
  /// ignored with a warning.
  pub fn from_env() -> Self {
    let mut config = Self::default();

    if let Ok(value) = std::env::var(ENV_PARALLELISM) {
      match value.trim().parse::<usize>() {
        Ok(n) if n > 0 => config.parallelism = n,
        _ => warn!(var = ENV_PARALLELISM, value = %value, "ignoring invalid parallelism"),
      }
    }

    if let Ok(value) = std::env::var(ENV_FAIL_FAST) {
      match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" => config.fail_fast = true,
        "0" | "false" => config.fail_fast = false,
        _ => warn!(var = ENV_FAIL_FAST, value = %value, "ignoring invalid fail-fast flag"),
      }
    }

    config
  }

  /// Parallelism actually used: at least one worker.
  pub(crate) fn workers(&self) -> usize {
    self.parallelism.max(1)
  }
}

/// Get the number of CPUs for default parallelism.
fn num_cpus() -> usize {
  std::thread::available_parallelism().map(|p| p.get()).unwrap_or(4)
}
