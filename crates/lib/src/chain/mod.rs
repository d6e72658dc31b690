//! Chain building: registration, validation and the validated dependency graph.
//!
//! Steps are registered on a [`BuildChainBuilder`]. [`BuildChainBuilder::build`]
//! validates every declaration, wires producers to consumers and either
//! returns a [`BuildChain`] ready to execute or a [`ChainBuildError`] listing
//! every problem found.

mod dot;
mod graph;

use std::collections::{BTreeSet, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::consts::ENV_GRAPH_OUTPUT;
use crate::diagnostic::{Diagnostic, DiagnosticList, Diagnostics, Location};
use crate::item::{BuildItem, ItemId};
use crate::provider::BuildProvider;
use crate::step::{BuildStep, ConsumeMode, EdgeStrength, StepAction};

pub(crate) use graph::ChainEdge;
use graph::Registered;

/// The chain failed validation. Nothing was executed.
#[derive(Debug, Error)]
#[error(
  "build chain validation failed with {} error(s){}",
  .diagnostics.iter().filter(|d| d.is_error()).count(),
  DiagnosticList(.diagnostics)
)]
pub struct ChainBuildError {
  diagnostics: Vec<Diagnostic>,
}

impl ChainBuildError {
  /// Every diagnostic recorded, not only the errors.
  pub fn diagnostics(&self) -> &[Diagnostic] {
    &self.diagnostics
  }

  pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
    self.diagnostics.iter().filter(|d| d.is_error())
  }
}

/// Collects step declarations, initial items and final items.
#[derive(Debug)]
pub struct BuildChainBuilder {
  steps: Vec<Registered>,
  initial: BTreeSet<ItemId>,
  finals: BTreeSet<ItemId>,
  graph_output: Option<PathBuf>,
  diagnostics: Diagnostics,
}

impl Default for BuildChainBuilder {
  fn default() -> Self {
    Self::new()
  }
}

impl BuildChainBuilder {
  /// An empty builder. The graph output path defaults to `BUILDCHAIN_GRAPH_OUTPUT`.
  pub fn new() -> Self {
    let graph_output = std::env::var_os(ENV_GRAPH_OUTPUT)
      .filter(|value| !value.is_empty())
      .map(PathBuf::from);

    Self {
      steps: Vec::new(),
      initial: BTreeSet::new(),
      finals: BTreeSet::new(),
      graph_output,
      diagnostics: Diagnostics::new(),
    }
  }

  /// Register a step. The caller's source location is recorded for diagnostics.
  #[track_caller]
  pub fn add_step(&mut self, step: BuildStep) -> &mut Self {
    let location = Location::from(std::panic::Location::caller());

    if let Some(existing) = self.steps.iter().find(|r| r.step.id() == step.id()) {
      self.diagnostics.push(
        Diagnostic::error(format!(
          "duplicate step id \"{}\" (first registered at {})",
          step.id(),
          existing.location
        ))
        .with_location(location),
      );
      return self;
    }

    if step.action().is_none() {
      self
        .diagnostics
        .push(Diagnostic::error(format!("step \"{}\" has no action", step.id())).with_location(location));
    }

    for produce in step.produces_list() {
      if produce.is_real() && produce.item.is_simple() && step.consumption(&produce.item).is_some() {
        self.diagnostics.push(
          Diagnostic::error(format!(
            "step \"{}\" both produces and consumes simple item {}",
            step.id(),
            produce.item
          ))
          .with_location(location),
        );
      }
    }

    debug!(step = step.id(), %location, "registered build step");
    self.steps.push(Registered { step, location });
    self
  }

  /// Declare `T` as an initial item, seeded by the caller at execution time.
  pub fn add_initial<T: BuildItem>(&mut self) -> &mut Self {
    self.initial.insert(ItemId::of::<T>());
    self
  }

  /// Declare `T` as a final item. Once any final item is declared, only the
  /// steps needed to produce final items are included.
  pub fn add_final<T: BuildItem>(&mut self) -> &mut Self {
    self.finals.insert(ItemId::of::<T>());
    self
  }

  pub fn add_provider(&mut self, provider: &dyn BuildProvider) -> &mut Self {
    provider.install(self);
    self
  }

  /// Write the validated graph as Graphviz DOT to `path`.
  pub fn graph_output(&mut self, path: impl Into<PathBuf>) -> &mut Self {
    self.graph_output = Some(path.into());
    self
  }

  /// Validate the declarations and wire the dependency graph.
  pub fn build(self) -> Result<BuildChain, ChainBuildError> {
    info!(
      step_count = self.steps.len(),
      initial = self.initial.len(),
      finals = self.finals.len(),
      "building chain"
    );

    let mut diagnostics = self.diagnostics;
    let wiring = graph::wire(&self.steps, &self.initial, &self.finals, &mut diagnostics);

    if diagnostics.has_errors() {
      error!(errors = diagnostics.count(crate::diagnostic::Level::Error), "build chain validation failed");
      return Err(ChainBuildError {
        diagnostics: diagnostics.into_vec(),
      });
    }

    // Node weights become positions in `steps`.
    let graph = wiring.graph.map(|node, _| node.index(), |_, edge| edge.clone());

    let mut steps = Vec::with_capacity(wiring.included.len());
    for (position, &idx) in wiring.included.iter().enumerate() {
      let registered = &self.steps[idx];
      let Some(action) = registered.step.action().cloned() else {
        return Err(ChainBuildError {
          diagnostics: vec![
            Diagnostic::error(format!("step \"{}\" has no action", registered.step.id()))
              .with_location(registered.location),
          ],
        });
      };
      steps.push(ChainStep::new(&registered.step, registered.location, action, &graph, position));
    }

    let chain = BuildChain {
      steps,
      graph,
      initial: self.initial,
      finals: self.finals,
      diagnostics: diagnostics.into_vec(),
    };

    info!(
      included = chain.len(),
      edges = chain.graph.edge_count(),
      diagnostics = chain.diagnostics.len(),
      "build chain ready"
    );

    if let Some(path) = &self.graph_output {
      match std::fs::write(path, chain.to_dot()) {
        Ok(()) => info!(path = %path.display(), "wrote build graph"),
        Err(e) => warn!(path = %path.display(), error = %e, "failed to write build graph"),
      }
    }

    Ok(chain)
  }
}

/// An included step with everything the executor needs.
pub(crate) struct ChainStep {
  pub id: Arc<str>,
  pub location: Location,
  pub action: StepAction,
  /// Items the step may read: required and optional consumptions.
  pub readable: HashSet<ItemId>,
  /// Items the step really produces.
  pub producible: HashSet<ItemId>,
  pub required: Vec<ItemId>,
  pub predecessors: usize,
  /// Positions of dependent steps, ascending.
  pub successors: Vec<(usize, EdgeStrength)>,
}

impl ChainStep {
  fn new(
    step: &BuildStep,
    location: Location,
    action: StepAction,
    graph: &DiGraph<usize, ChainEdge>,
    position: usize,
  ) -> Self {
    let node = NodeIndex::new(position);
    let mut successors: Vec<(usize, EdgeStrength)> = graph
      .edges_directed(node, Direction::Outgoing)
      .map(|edge| (graph[edge.target()], edge.weight().strength))
      .collect();
    successors.sort();

    Self {
      id: Arc::from(step.id()),
      location,
      action,
      readable: step
        .consumes_list()
        .iter()
        .filter(|c| c.mode.is_readable())
        .map(|c| c.item)
        .collect(),
      producible: step
        .produces_list()
        .iter()
        .filter(|p| p.is_real())
        .map(|p| p.item)
        .collect(),
      required: step
        .consumes_list()
        .iter()
        .filter(|c| c.mode == ConsumeMode::Required)
        .map(|c| c.item)
        .collect(),
      predecessors: graph.edges_directed(node, Direction::Incoming).count(),
      successors,
    }
  }
}

/// A validated, immutable dependency graph of build steps.
///
/// Execute it with [`BuildChain::execute`] or [`BuildChain::execute_blocking`],
/// as many times as needed.
pub struct BuildChain {
  steps: Vec<ChainStep>,
  graph: DiGraph<usize, ChainEdge>,
  initial: BTreeSet<ItemId>,
  finals: BTreeSet<ItemId>,
  diagnostics: Vec<Diagnostic>,
}

impl BuildChain {
  pub fn builder() -> BuildChainBuilder {
    BuildChainBuilder::new()
  }

  /// Ids of the included steps, in registration order.
  pub fn step_ids(&self) -> Vec<&str> {
    self.steps.iter().map(|s| &*s.id).collect()
  }

  pub fn len(&self) -> usize {
    self.steps.len()
  }

  pub fn is_empty(&self) -> bool {
    self.steps.is_empty()
  }

  /// Notes and warnings recorded during validation.
  pub fn diagnostics(&self) -> &[Diagnostic] {
    &self.diagnostics
  }

  pub fn initial_items(&self) -> &BTreeSet<ItemId> {
    &self.initial
  }

  pub fn final_items(&self) -> &BTreeSet<ItemId> {
    &self.finals
  }

  /// Direct dependencies of a step, with the strength of each edge.
  pub fn dependencies(&self, step: &str) -> Vec<(&str, EdgeStrength)> {
    let Some(position) = self.position(step) else {
      return Vec::new();
    };

    let mut deps: Vec<(usize, EdgeStrength)> = self
      .graph
      .edges_directed(NodeIndex::new(position), Direction::Incoming)
      .map(|edge| (self.graph[edge.source()], edge.weight().strength))
      .collect();
    deps.sort();
    deps
      .into_iter()
      .map(|(idx, strength)| (&*self.steps[idx].id, strength))
      .collect()
  }

  /// Steps grouped into waves that could run in parallel.
  ///
  /// Every step of a wave depends only on steps of earlier waves. Uses Kahn's
  /// algorithm level by level; each wave is in registration order.
  pub fn execution_waves(&self) -> Vec<Vec<&str>> {
    let mut in_degree: Vec<usize> = self.steps.iter().map(|s| s.predecessors).collect();
    let mut current: Vec<usize> = (0..self.steps.len()).filter(|&idx| in_degree[idx] == 0).collect();
    let mut waves = Vec::new();

    while !current.is_empty() {
      let mut next = Vec::new();
      for &idx in &current {
        for &(succ, _) in &self.steps[idx].successors {
          in_degree[succ] -= 1;
          if in_degree[succ] == 0 {
            next.push(succ);
          }
        }
      }
      next.sort_unstable();
      waves.push(current.iter().map(|&idx| &*self.steps[idx].id).collect());
      current = next;
    }

    waves
  }

  /// A topological order of the included steps.
  pub fn topological_order(&self) -> Vec<&str> {
    self.execution_waves().into_iter().flatten().collect()
  }

  /// The graph in Graphviz DOT format.
  pub fn to_dot(&self) -> String {
    dot::render(&self.steps, &self.graph)
  }

  fn position(&self, step: &str) -> Option<usize> {
    self.steps.iter().position(|s| &*s.id == step)
  }

  pub(crate) fn steps(&self) -> &[ChainStep] {
    &self.steps
  }
}

impl std::fmt::Debug for BuildChain {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("BuildChain")
      .field("steps", &self.step_ids())
      .field("edges", &self.graph.edge_count())
      .field("initial", &self.initial)
      .field("finals", &self.finals)
      .finish()
  }
}
