//! Type-indexed storage for produced build items.
//!
//! Items are kept type-erased behind `Arc<dyn Any + Send + Sync>`, keyed by
//! [`ItemId`]. Downcasting back to the concrete type happens only in this
//! module; everything outside goes through the typed accessors.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

use crate::item::{BuildItem, ItemId, ItemKind};

pub(crate) type ErasedItem = Arc<dyn Any + Send + Sync>;

/// Conflicting publication into an item store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
  /// A second instance of a simple item.
  #[error("item {0} has already been produced")]
  AlreadyPresent(ItemId),
}

#[derive(Debug, Clone)]
enum Slot {
  Single(ErasedItem),
  Many(Vec<ErasedItem>),
  Present,
}

/// Item slots of one build execution (or one step's view of it).
#[derive(Debug, Clone, Default)]
pub(crate) struct ItemStore {
  slots: HashMap<ItemId, Slot>,
}

impl ItemStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// Insert one erased instance of `id`.
  ///
  /// Simple items may only be inserted once, multi items append, empty items
  /// only record their presence.
  pub fn insert(&mut self, id: ItemId, item: ErasedItem) -> Result<(), StoreError> {
    match id.kind() {
      ItemKind::Simple => {
        if self.slots.contains_key(&id) {
          return Err(StoreError::AlreadyPresent(id));
        }
        self.slots.insert(id, Slot::Single(item));
      }
      ItemKind::Multi => match self.slots.entry(id).or_insert_with(|| Slot::Many(Vec::new())) {
        Slot::Many(items) => items.push(item),
        _ => return Err(StoreError::AlreadyPresent(id)),
      },
      ItemKind::Empty => {
        self.slots.insert(id, Slot::Present);
      }
    }
    Ok(())
  }

  /// Move every slot of `other` into this store.
  ///
  /// Nothing is inserted if any simple item of `other` conflicts.
  pub fn merge(&mut self, other: ItemStore) -> Result<(), StoreError> {
    for (id, slot) in &other.slots {
      if matches!(slot, Slot::Single(_)) && self.slots.contains_key(id) {
        return Err(StoreError::AlreadyPresent(*id));
      }
    }
    for (id, slot) in other.slots {
      match slot {
        Slot::Single(item) => {
          self.slots.insert(id, Slot::Single(item));
        }
        Slot::Many(items) => match self.slots.entry(id).or_insert_with(|| Slot::Many(Vec::new())) {
          Slot::Many(existing) => existing.extend(items),
          _ => return Err(StoreError::AlreadyPresent(id)),
        },
        Slot::Present => {
          self.slots.insert(id, Slot::Present);
        }
      }
    }
    Ok(())
  }

  /// Copy the slot for `id` from `source`, if it has one.
  ///
  /// Only the `Arc`s are cloned, the items themselves are shared.
  pub fn copy_slot(&mut self, source: &ItemStore, id: ItemId) {
    if let Some(slot) = source.slots.get(&id) {
      self.slots.insert(id, slot.clone());
    }
  }

  pub fn contains(&self, id: &ItemId) -> bool {
    self.slots.contains_key(id)
  }

  /// Number of instances stored for `id`.
  pub fn count(&self, id: &ItemId) -> usize {
    match self.slots.get(id) {
      Some(Slot::Many(items)) => items.len(),
      Some(_) => 1,
      None => 0,
    }
  }

  pub fn get<T: BuildItem>(&self) -> Option<&T> {
    match self.slots.get(&ItemId::of::<T>())? {
      Slot::Single(item) => item.downcast_ref::<T>(),
      _ => None,
    }
  }

  /// All instances of a multi item, sorted with `T::ORDER` when the type has one.
  pub fn get_all<T: BuildItem>(&self) -> Vec<&T> {
    let mut items: Vec<&T> = match self.slots.get(&ItemId::of::<T>()) {
      Some(Slot::Many(items)) => items.iter().filter_map(|item| item.downcast_ref::<T>()).collect(),
      _ => Vec::new(),
    };
    if let Some(order) = T::ORDER {
      items.sort_by(|a, b| order(*a, *b));
    }
    items
  }

  pub fn len(&self) -> usize {
    self.slots.len()
  }

  pub fn item_ids(&self) -> impl Iterator<Item = &ItemId> {
    self.slots.keys()
  }
}
