//! Build step declarations.
//!
//! A [`BuildStep`] names the items it produces and consumes and carries the
//! action to run. Declarations are plain data: nothing executes until the
//! chain built from them is executed.
//!
//! # Example
//!
//! ```
//! use buildchain_lib::item::{BuildItem, ItemKind};
//! use buildchain_lib::step::BuildStep;
//!
//! struct Sources(Vec<String>);
//! impl BuildItem for Sources {
//!   const KIND: ItemKind = ItemKind::Simple;
//! }
//!
//! struct Index(usize);
//! impl BuildItem for Index {
//!   const KIND: ItemKind = ItemKind::Simple;
//! }
//!
//! let step = BuildStep::new("index")
//!   .consumes::<Sources>()
//!   .produces::<Index>()
//!   .run(|ctx| {
//!     let count = ctx.consume::<Sources>()?.0.len();
//!     ctx.produce(Index(count))?;
//!     Ok(())
//!   });
//! assert_eq!(step.id(), "index");
//! ```

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::execute::context::StepContext;
use crate::item::{BuildItem, ItemId};

/// The work a step performs.
pub type StepAction = Arc<dyn Fn(&mut StepContext) -> anyhow::Result<()> + Send + Sync>;

/// How a step consumes an item. Ordered from weakest to strongest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsumeMode {
  /// Ordering only: run after the producers of the item, without reading it.
  Weak,
  /// Read the item if some producer made it.
  Optional,
  /// The item must be available before the step runs.
  Required,
}

impl ConsumeMode {
  /// Required consumption creates strong edges, everything else weak ones.
  pub fn edge_strength(self) -> EdgeStrength {
    match self {
      ConsumeMode::Required => EdgeStrength::Strong,
      ConsumeMode::Optional | ConsumeMode::Weak => EdgeStrength::Weak,
    }
  }

  /// Whether the consuming step may read the item.
  pub fn is_readable(self) -> bool {
    self != ConsumeMode::Weak
  }
}

impl fmt::Display for ConsumeMode {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ConsumeMode::Weak => write!(f, "weak"),
      ConsumeMode::Optional => write!(f, "optional"),
      ConsumeMode::Required => write!(f, "required"),
    }
  }
}

/// Strength of a dependency edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeStrength {
  /// Ordering only, failures do not propagate.
  Weak,
  /// The consumer cannot run without the producer's output.
  Strong,
}

/// Flags modifying a production.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProduceFlag {
  /// Only used when no non-overridable producer of the item exists.
  Overridable,
  /// Producing the item does not pull the step into a chain with final items.
  Weak,
}

/// Whether a production yields the item or only orders the step before its consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Constraint {
  OrderOnly,
  Real,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Produce {
  pub item: ItemId,
  pub constraint: Constraint,
  pub overridable: bool,
  pub weak: bool,
}

impl Produce {
  pub fn is_real(&self) -> bool {
    self.constraint == Constraint::Real
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Consume {
  pub item: ItemId,
  pub mode: ConsumeMode,
}

/// Declaration of one unit of work.
#[derive(Clone)]
pub struct BuildStep {
  id: String,
  produces: Vec<Produce>,
  consumes: Vec<Consume>,
  action: Option<StepAction>,
}

impl BuildStep {
  pub fn new(id: impl Into<String>) -> Self {
    Self {
      id: id.into(),
      produces: Vec::new(),
      consumes: Vec::new(),
      action: None,
    }
  }

  /// Declare that this step produces `T`.
  pub fn produces<T: BuildItem>(self) -> Self {
    self.produces_with::<T>(&[])
  }

  /// Declare that this step produces `T`, with flags.
  pub fn produces_with<T: BuildItem>(mut self, flags: &[ProduceFlag]) -> Self {
    self.add_produce(Produce {
      item: ItemId::of::<T>(),
      constraint: Constraint::Real,
      overridable: flags.contains(&ProduceFlag::Overridable),
      weak: flags.contains(&ProduceFlag::Weak),
    });
    self
  }

  /// Declare that this step runs before every consumer of `T` without producing it.
  pub fn before_consume<T: BuildItem>(mut self) -> Self {
    self.add_produce(Produce {
      item: ItemId::of::<T>(),
      constraint: Constraint::OrderOnly,
      overridable: false,
      weak: false,
    });
    self
  }

  /// Declare a required consumption of `T`.
  pub fn consumes<T: BuildItem>(mut self) -> Self {
    self.add_consume(ItemId::of::<T>(), ConsumeMode::Required);
    self
  }

  /// Declare an optional consumption of `T`.
  pub fn consumes_optional<T: BuildItem>(mut self) -> Self {
    self.add_consume(ItemId::of::<T>(), ConsumeMode::Optional);
    self
  }

  /// Declare that this step runs after every producer of `T` without reading it.
  pub fn after_produce<T: BuildItem>(mut self) -> Self {
    self.add_consume(ItemId::of::<T>(), ConsumeMode::Weak);
    self
  }

  /// Set the action run when the step executes.
  pub fn run<F>(mut self, action: F) -> Self
  where
    F: Fn(&mut StepContext) -> anyhow::Result<()> + Send + Sync + 'static,
  {
    self.action = Some(Arc::new(action));
    self
  }

  pub fn id(&self) -> &str {
    &self.id
  }

  pub fn produces_list(&self) -> &[Produce] {
    &self.produces
  }

  pub fn consumes_list(&self) -> &[Consume] {
    &self.consumes
  }

  pub fn action(&self) -> Option<&StepAction> {
    self.action.as_ref()
  }

  /// The production of `item`, if declared.
  pub fn production(&self, item: &ItemId) -> Option<&Produce> {
    self.produces.iter().find(|p| &p.item == item)
  }

  /// The consumption mode of `item`, if declared.
  pub fn consumption(&self, item: &ItemId) -> Option<ConsumeMode> {
    self.consumes.iter().find(|c| &c.item == item).map(|c| c.mode)
  }

  /// Repeated declarations merge: a real production wins over an order-only one,
  /// flags accumulate.
  fn add_produce(&mut self, produce: Produce) {
    match self.produces.iter_mut().find(|p| p.item == produce.item) {
      Some(existing) => {
        existing.constraint = existing.constraint.max(produce.constraint);
        existing.overridable |= produce.overridable;
        existing.weak |= produce.weak;
      }
      None => self.produces.push(produce),
    }
  }

  /// Repeated declarations merge: the strongest mode wins.
  fn add_consume(&mut self, item: ItemId, mode: ConsumeMode) {
    match self.consumes.iter_mut().find(|c| c.item == item) {
      Some(existing) => existing.mode = existing.mode.max(mode),
      None => self.consumes.push(Consume { item, mode }),
    }
  }
}

impl fmt::Debug for BuildStep {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("BuildStep")
      .field("id", &self.id)
      .field("produces", &self.produces)
      .field("consumes", &self.consumes)
      .field("has_action", &self.action.is_some())
      .finish()
  }
}
