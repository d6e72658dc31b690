//! The handle a running step uses to read its inputs and publish its outputs.

use std::collections::HashSet;
use std::sync::Arc;

use thiserror::Error;

use crate::item::{BuildItem, ItemId, ItemKind};
use crate::result::Closeable;
use crate::store::ItemStore;

/// Misuse of a [`StepContext`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContextError {
  #[error("step \"{step}\" does not declare production of item {item}")]
  NotProduced { step: String, item: ItemId },

  #[error("step \"{step}\" does not declare a readable consumption of item {item}")]
  NotConsumed { step: String, item: ItemId },

  #[error("item {item} is a {actual} item, not a {expected} item")]
  KindMismatch {
    item: ItemId,
    expected: ItemKind,
    actual: ItemKind,
  },

  #[error("step \"{step}\" already produced item {item}")]
  AlreadyProduced { step: String, item: ItemId },

  #[error("item {item} required by step \"{step}\" is not available")]
  Missing { step: String, item: ItemId },
}

/// What a finished step hands back to the scheduler.
pub(crate) struct StepOutput {
  pub items: ItemStore,
  pub closeables: Vec<Arc<dyn Closeable>>,
}

/// Execution context of one step.
///
/// Inputs are a snapshot taken when the step became ready: every item the
/// step may read is already final, so reading never blocks. Produced items
/// are buffered here and published by the scheduler once the step returns.
pub struct StepContext {
  step: Arc<str>,
  inputs: ItemStore,
  readable: HashSet<ItemId>,
  producible: HashSet<ItemId>,
  output: ItemStore,
  closeables: Vec<Arc<dyn Closeable>>,
}

impl StepContext {
  pub(crate) fn new(step: Arc<str>, inputs: ItemStore, readable: HashSet<ItemId>, producible: HashSet<ItemId>) -> Self {
    Self {
      step,
      inputs,
      readable,
      producible,
      output: ItemStore::new(),
      closeables: Vec::new(),
    }
  }

  pub fn step_id(&self) -> &str {
    &self.step
  }

  /// Produce an instance of `T`.
  ///
  /// Simple items may be produced once per step, multi items any number of
  /// times. Producing an empty item marks it present.
  pub fn produce<T: BuildItem>(&mut self, item: T) -> Result<(), ContextError> {
    self.produce_arc(Arc::new(item)).map(|_| ())
  }

  /// Produce an instance of `T` that holds a resource the caller must release.
  ///
  /// The item is registered with the build result's closeables. On a failed
  /// build it is closed by the executor.
  pub fn produce_closeable<T: BuildItem + Closeable>(&mut self, item: T) -> Result<(), ContextError> {
    let item = self.produce_arc(Arc::new(item))?;
    self.closeables.push(item);
    Ok(())
  }

  fn produce_arc<T: BuildItem>(&mut self, item: Arc<T>) -> Result<Arc<T>, ContextError> {
    let id = ItemId::of::<T>();
    if !self.producible.contains(&id) {
      return Err(ContextError::NotProduced {
        step: self.step.to_string(),
        item: id,
      });
    }
    self
      .output
      .insert(id, item.clone())
      .map_err(|_| ContextError::AlreadyProduced {
        step: self.step.to_string(),
        item: id,
      })?;
    Ok(item)
  }

  /// Read the simple item `T`, which must be present.
  pub fn consume<T: BuildItem>(&self) -> Result<&T, ContextError> {
    self.try_consume::<T>()?.ok_or_else(|| ContextError::Missing {
      step: self.step.to_string(),
      item: ItemId::of::<T>(),
    })
  }

  /// Read the simple item `T` if it was produced.
  ///
  /// Absent for an optional consumption whose producer did not run or failed.
  pub fn try_consume<T: BuildItem>(&self) -> Result<Option<&T>, ContextError> {
    self.check_readable::<T>(ItemKind::Simple)?;
    Ok(self.inputs.get::<T>())
  }

  /// Read every instance of the multi item `T`.
  ///
  /// Sorted with `T::ORDER` when the item type defines one; otherwise the
  /// order is unspecified.
  pub fn consume_all<T: BuildItem>(&self) -> Result<Vec<&T>, ContextError> {
    self.check_readable::<T>(ItemKind::Multi)?;
    Ok(self.inputs.get_all::<T>())
  }

  /// Whether any instance of `T` has been produced. Works for every kind of item.
  pub fn is_present<T: BuildItem>(&self) -> Result<bool, ContextError> {
    let id = ItemId::of::<T>();
    if !self.readable.contains(&id) {
      return Err(self.not_consumed(id));
    }
    Ok(self.inputs.contains(&id))
  }

  fn check_readable<T: BuildItem>(&self, expected: ItemKind) -> Result<(), ContextError> {
    let id = ItemId::of::<T>();
    if id.kind() != expected {
      return Err(ContextError::KindMismatch {
        item: id,
        expected,
        actual: id.kind(),
      });
    }
    if !self.readable.contains(&id) {
      return Err(self.not_consumed(id));
    }
    Ok(())
  }

  fn not_consumed(&self, item: ItemId) -> ContextError {
    ContextError::NotConsumed {
      step: self.step.to_string(),
      item,
    }
  }

  pub(crate) fn into_output(self) -> StepOutput {
    StepOutput {
      items: self.output,
      closeables: self.closeables,
    }
  }
}
