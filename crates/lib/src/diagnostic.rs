//! Leveled, structured messages for validation and execution problems.
//!
//! The chain builder and the executor never fail on the first problem they
//! find. They push [`Diagnostic`]s into a [`Diagnostics`] accumulator and raise
//! one aggregate error at the end, so a single run reports every conflict.

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use serde::{Serialize, Serializer};

/// Severity of a diagnostic, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
  Note,
  Warn,
  Error,
}

impl fmt::Display for Level {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Level::Note => write!(f, "NOTE"),
      Level::Warn => write!(f, "WARN"),
      Level::Error => write!(f, "ERROR"),
    }
  }
}

/// Source location a diagnostic points at, usually where a step was registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Location {
  pub file: &'static str,
  pub line: u32,
  pub column: u32,
}

impl From<&'static std::panic::Location<'static>> for Location {
  fn from(loc: &'static std::panic::Location<'static>) -> Self {
    Self {
      file: loc.file(),
      line: loc.line(),
      column: loc.column(),
    }
  }
}

impl fmt::Display for Location {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}:{}:{}", self.file, self.line, self.column)
  }
}

/// A single leveled message.
///
/// Renders as `<location>: [<LEVEL>]: <message>[: <cause>]`.
#[derive(Debug, Clone, Serialize)]
pub struct Diagnostic {
  level: Level,
  #[serde(skip_serializing_if = "Option::is_none")]
  location: Option<Location>,
  message: String,
  #[serde(serialize_with = "serialize_cause", skip_serializing_if = "Option::is_none")]
  cause: Option<Arc<dyn StdError + Send + Sync>>,
}

impl Diagnostic {
  pub fn new(level: Level, message: impl Into<String>) -> Self {
    Self {
      level,
      location: None,
      message: message.into(),
      cause: None,
    }
  }

  pub fn error(message: impl Into<String>) -> Self {
    Self::new(Level::Error, message)
  }

  pub fn warn(message: impl Into<String>) -> Self {
    Self::new(Level::Warn, message)
  }

  pub fn note(message: impl Into<String>) -> Self {
    Self::new(Level::Note, message)
  }

  pub fn with_location(mut self, location: impl Into<Option<Location>>) -> Self {
    self.location = location.into();
    self
  }

  pub fn with_cause(self, cause: impl Into<Box<dyn StdError + Send + Sync>>) -> Self {
    self.with_shared_cause(Arc::from(cause.into()))
  }

  /// Attach a cause that is also referenced elsewhere, such as a step failure.
  pub fn with_shared_cause(mut self, cause: Arc<dyn StdError + Send + Sync>) -> Self {
    self.cause = Some(cause);
    self
  }

  pub fn level(&self) -> Level {
    self.level
  }

  pub fn location(&self) -> Option<&Location> {
    self.location.as_ref()
  }

  pub fn message(&self) -> &str {
    &self.message
  }

  pub fn cause(&self) -> Option<&(dyn StdError + Send + Sync)> {
    self.cause.as_deref()
  }

  pub fn is_error(&self) -> bool {
    self.level == Level::Error
  }
}

impl fmt::Display for Diagnostic {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if let Some(location) = &self.location {
      write!(f, "{}: ", location)?;
    }
    write!(f, "[{}]: {}", self.level, self.message)?;
    if let Some(cause) = &self.cause {
      write!(f, ": {}", error_chain(cause.as_ref()))?;
    }
    Ok(())
  }
}

/// An error and its sources, separated by `": "`.
pub fn error_chain(error: &(dyn StdError + 'static)) -> String {
  let mut rendered = error.to_string();
  let mut source = error.source();
  while let Some(inner) = source {
    rendered.push_str(": ");
    rendered.push_str(&inner.to_string());
    source = inner.source();
  }
  rendered
}

fn serialize_cause<S: Serializer>(
  cause: &Option<Arc<dyn StdError + Send + Sync>>,
  serializer: S,
) -> Result<S::Ok, S::Error> {
  match cause {
    Some(cause) => serializer.serialize_some(&error_chain(cause.as_ref())),
    None => serializer.serialize_none(),
  }
}

/// Accumulator for diagnostics, scoped to one chain build or one execution.
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
  items: Vec<Diagnostic>,
}

impl Diagnostics {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn push(&mut self, diagnostic: Diagnostic) {
    self.items.push(diagnostic);
  }

  pub fn extend(&mut self, diagnostics: impl IntoIterator<Item = Diagnostic>) {
    self.items.extend(diagnostics);
  }

  pub fn has_errors(&self) -> bool {
    self.items.iter().any(Diagnostic::is_error)
  }

  pub fn count(&self, level: Level) -> usize {
    self.items.iter().filter(|d| d.level == level).count()
  }

  /// The most severe level recorded, if any.
  pub fn max_level(&self) -> Option<Level> {
    self.items.iter().map(Diagnostic::level).max()
  }

  pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
    self.items.iter()
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn into_vec(self) -> Vec<Diagnostic> {
    self.items
  }
}

impl IntoIterator for Diagnostics {
  type Item = Diagnostic;
  type IntoIter = std::vec::IntoIter<Diagnostic>;

  fn into_iter(self) -> Self::IntoIter {
    self.items.into_iter()
  }
}

/// Renders diagnostics one per line, indented, each preceded by a newline.
pub(crate) struct DiagnosticList<'a>(pub &'a [Diagnostic]);

impl fmt::Display for DiagnosticList<'_> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for diagnostic in self.0 {
      write!(f, "\n  {}", diagnostic)?;
    }
    Ok(())
  }
}
