//! Build item taxonomy.
//!
//! A build item is an immutable value produced by one or more build steps and
//! consumed by others. Every item type is classified statically:
//!
//! - [`ItemKind::Simple`]: at most one producer, at most one instance
//! - [`ItemKind::Multi`]: any number of producers, consumers see the aggregated collection
//! - [`ItemKind::Empty`]: no payload, only its presence matters
//!
//! Items are indexed by exact type identity ([`TypeId`]), so there is no
//! subtyping between item types and every generic instantiation is a distinct
//! item type.

use std::any::{Any, TypeId};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::Serialize;

/// Static classification of a build item type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
  /// Single producer, single instance.
  Simple,
  /// Many producers, aggregated collection.
  Multi,
  /// Presence-only marker.
  Empty,
}

impl fmt::Display for ItemKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ItemKind::Simple => write!(f, "simple"),
      ItemKind::Multi => write!(f, "multi"),
      ItemKind::Empty => write!(f, "empty"),
    }
  }
}

/// A typed artifact exchanged between build steps.
///
/// # Example
///
/// ```
/// use buildchain_lib::item::{BuildItem, ItemKind};
///
/// struct Classpath(Vec<String>);
///
/// impl BuildItem for Classpath {
///   const KIND: ItemKind = ItemKind::Simple;
/// }
///
/// #[derive(PartialEq, Eq, PartialOrd, Ord)]
/// struct Feature(String);
///
/// impl BuildItem for Feature {
///   const KIND: ItemKind = ItemKind::Multi;
///   const ORDER: Option<fn(&Self, &Self) -> std::cmp::Ordering> = Some(Ord::cmp);
/// }
/// ```
pub trait BuildItem: Any + Send + Sync + 'static {
  /// How the graph treats producers and consumers of this item.
  const KIND: ItemKind;

  /// Natural order of a multi item collection.
  ///
  /// When set, every aggregated view handed to consumers is sorted with it.
  /// Otherwise the order of the collection is unspecified.
  const ORDER: Option<fn(&Self, &Self) -> Ordering> = None;
}

/// Identity of a build item type.
#[derive(Debug, Clone, Copy)]
pub struct ItemId {
  type_id: TypeId,
  name: &'static str,
  kind: ItemKind,
}

impl ItemId {
  /// The identity of item type `T`.
  pub fn of<T: BuildItem>() -> Self {
    Self {
      type_id: TypeId::of::<T>(),
      name: std::any::type_name::<T>(),
      kind: T::KIND,
    }
  }

  pub fn kind(&self) -> ItemKind {
    self.kind
  }

  /// Full type name of the item.
  pub fn name(&self) -> &'static str {
    self.name
  }

  /// Type name without its module path, used in diagnostics.
  pub fn short_name(&self) -> &'static str {
    short_type_name(self.name)
  }

  pub fn is_multi(&self) -> bool {
    self.kind == ItemKind::Multi
  }

  pub fn is_simple(&self) -> bool {
    self.kind == ItemKind::Simple
  }

  pub fn is_empty_marker(&self) -> bool {
    self.kind == ItemKind::Empty
  }
}

impl PartialEq for ItemId {
  fn eq(&self, other: &Self) -> bool {
    self.type_id == other.type_id
  }
}

impl Eq for ItemId {}

impl Hash for ItemId {
  fn hash<H: Hasher>(&self, state: &mut H) {
    self.type_id.hash(state);
  }
}

impl PartialOrd for ItemId {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
    Some(self.cmp(other))
  }
}

// Name first so that anything iterated in item order is stable across runs.
impl Ord for ItemId {
  fn cmp(&self, other: &Self) -> Ordering {
    self.name.cmp(other.name).then_with(|| self.type_id.cmp(&other.type_id))
  }
}

impl fmt::Display for ItemId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.short_name())
  }
}

/// Strip module paths from a type name, keeping generic arguments readable.
///
/// `a::b::Wrapper<c::Inner>` becomes `Wrapper<Inner>`.
fn short_type_name(name: &'static str) -> &'static str {
  if !name.contains('<') {
    return name.rsplit("::").next().unwrap_or(name);
  }
  // Only the outer path is stripped, generic arguments keep theirs.
  let head = name.split('<').next().unwrap_or(name);
  match head.rfind("::") {
    Some(pos) => &name[pos + 2..],
    None => name,
  }
}
