//! Shared item types and helpers for chain integration tests.

use std::cmp::Ordering;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex};

use buildchain_lib::prelude::*;

#[derive(Debug, Clone, PartialEq)]
pub struct Sources(pub Vec<String>);

impl BuildItem for Sources {
  const KIND: ItemKind = ItemKind::Simple;
}

#[derive(Debug, Clone, PartialEq)]
pub struct Compiled(pub usize);

impl BuildItem for Compiled {
  const KIND: ItemKind = ItemKind::Simple;
}

#[derive(Debug, Clone, PartialEq)]
pub struct Packaged(pub String);

impl BuildItem for Packaged {
  const KIND: ItemKind = ItemKind::Simple;
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Feature(pub String);

impl BuildItem for Feature {
  const KIND: ItemKind = ItemKind::Multi;
  const ORDER: Option<fn(&Self, &Self) -> Ordering> = Some(Ord::cmp);
}

/// Multi item without a natural order.
#[derive(Debug, Clone, PartialEq)]
pub struct Contribution(pub usize);

impl BuildItem for Contribution {
  const KIND: ItemKind = ItemKind::Multi;
}

pub struct Ready;

impl BuildItem for Ready {
  const KIND: ItemKind = ItemKind::Empty;
}

/// A closeable resource that records whether it was released.
pub struct Resource {
  pub closed: Arc<AtomicBool>,
}

impl BuildItem for Resource {
  const KIND: ItemKind = ItemKind::Simple;
}

impl Closeable for Resource {
  fn close(&self) -> anyhow::Result<()> {
    self.closed.store(true, AtomicOrdering::SeqCst);
    Ok(())
  }
}

/// Records the order in which steps ran.
#[derive(Clone, Default)]
pub struct Recorder(Arc<Mutex<Vec<String>>>);

impl Recorder {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn record(&self, step: &str) {
    self.0.lock().unwrap().push(step.to_string());
  }

  pub fn events(&self) -> Vec<String> {
    self.0.lock().unwrap().clone()
  }

  pub fn position(&self, step: &str) -> Option<usize> {
    self.events().iter().position(|s| s == step)
  }

  /// A step that only records its own execution.
  pub fn step(&self, id: &str) -> BuildStep {
    let recorder = self.clone();
    BuildStep::new(id).run(move |ctx| {
      recorder.record(ctx.step_id());
      Ok(())
    })
  }
}

/// Build a chain from registrations made by `register`.
pub fn build(register: impl FnOnce(&mut BuildChainBuilder)) -> Result<BuildChain, ChainBuildError> {
  let mut builder = BuildChainBuilder::new();
  register(&mut builder);
  builder.build()
}

pub fn config(parallelism: usize) -> ExecuteConfig {
  ExecuteConfig {
    parallelism,
    fail_fast: false,
  }
}

pub fn error_messages(diagnostics: &[Diagnostic]) -> Vec<String> {
  diagnostics
    .iter()
    .filter(|d| d.level() == Level::Error)
    .map(|d| d.message().to_string())
    .collect()
}
