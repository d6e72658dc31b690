//! The outcome of a successful build execution.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::warn;

use crate::diagnostic::Diagnostic;
use crate::item::{BuildItem, ItemId};
use crate::store::ItemStore;

/// A build item wrapping a resource that needs explicit release.
///
/// Items produced with [`StepContext::produce_closeable`] are not released by
/// the executor when the build succeeds: the caller owns them through
/// [`BuildResult::closeables`]. When the build fails they are closed during
/// failure unwinding.
///
/// [`StepContext::produce_closeable`]: crate::execute::context::StepContext::produce_closeable
pub trait Closeable: Send + Sync {
  fn close(&self) -> anyhow::Result<()>;
}

/// Wall time spent in one step's action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepTiming {
  pub step: String,
  pub duration: Duration,
}

/// Every item produced by a build, plus the resources the caller must release.
pub struct BuildResult {
  items: ItemStore,
  closeables: Vec<Arc<dyn Closeable>>,
  timings: Vec<StepTiming>,
  duration: Duration,
  diagnostics: Vec<Diagnostic>,
}

impl BuildResult {
  pub(crate) fn new(
    items: ItemStore,
    closeables: Vec<Arc<dyn Closeable>>,
    timings: Vec<StepTiming>,
    duration: Duration,
    diagnostics: Vec<Diagnostic>,
  ) -> Self {
    Self {
      items,
      closeables,
      timings,
      duration,
      diagnostics,
    }
  }

  /// The simple item `T`, if it was produced or seeded.
  pub fn get<T: BuildItem>(&self) -> Option<&T> {
    self.items.get::<T>()
  }

  /// Every instance of the multi item `T`.
  ///
  /// Sorted with `T::ORDER` when the item type defines one; otherwise the
  /// order is unspecified.
  pub fn get_all<T: BuildItem>(&self) -> Vec<&T> {
    self.items.get_all::<T>()
  }

  /// Number of instances of `T`: at most one for simple and empty items.
  pub fn count<T: BuildItem>(&self) -> usize {
    self.items.count(&ItemId::of::<T>())
  }

  /// Whether any instance of `T` exists. This is how empty items are queried.
  pub fn contains<T: BuildItem>(&self) -> bool {
    self.items.contains(&ItemId::of::<T>())
  }

  /// Item types present in the result, sorted by name.
  pub fn item_ids(&self) -> Vec<ItemId> {
    let mut ids: Vec<ItemId> = self.items.item_ids().copied().collect();
    ids.sort();
    ids
  }

  pub fn closeables(&self) -> &[Arc<dyn Closeable>] {
    &self.closeables
  }

  /// Take ownership of the closeable resources, leaving none registered.
  pub fn take_closeables(&mut self) -> Vec<Arc<dyn Closeable>> {
    std::mem::take(&mut self.closeables)
  }

  /// Close every registered resource and return the errors.
  pub fn close_all(&mut self) -> Vec<anyhow::Error> {
    close_all(self.take_closeables())
  }

  /// Wall time of the whole execution.
  pub fn duration(&self) -> Duration {
    self.duration
  }

  /// Per-step action timings, in completion order.
  pub fn step_timings(&self) -> &[StepTiming] {
    &self.timings
  }

  /// Notes and warnings recorded while validating the chain.
  pub fn diagnostics(&self) -> &[Diagnostic] {
    &self.diagnostics
  }
}

impl fmt::Debug for BuildResult {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("BuildResult")
      .field("items", &self.item_ids())
      .field("closeables", &self.closeables.len())
      .field("duration", &self.duration)
      .finish()
  }
}

/// Close resources in reverse production order, collecting failures.
pub(crate) fn close_all(closeables: Vec<Arc<dyn Closeable>>) -> Vec<anyhow::Error> {
  let mut errors = Vec::new();
  for closeable in closeables.into_iter().rev() {
    if let Err(e) = closeable.close() {
      warn!(error = %e, "failed to close build resource");
      errors.push(e);
    }
  }
  errors
}
