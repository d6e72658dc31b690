//! Build execution module.
//!
//! This module runs a validated [`BuildChain`]. It handles:
//! - seeding initial items and validating the seeds
//! - dispatching ready steps onto a bounded pool of blocking workers
//! - atomic publication of each step's output
//! - failure propagation, skip tracking and cancellation
//! - closing produced resources when the build fails
//!
//! One coordinator task owns the item store, the ready queue and every step
//! state. Workers only see a snapshot of their inputs and hand their output
//! back when they finish, so publication and successor wake-up happen in one
//! uninterrupted sequence on the coordinator.

pub mod context;
pub mod types;

use std::any::Any;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, info_span, warn};

use crate::chain::BuildChain;
use crate::diagnostic::{Diagnostic, Diagnostics};
use crate::item::{BuildItem, ItemId};
use crate::result::{BuildResult, Closeable, StepTiming, close_all};
use crate::step::EdgeStrength;
use crate::store::{ErasedItem, ItemStore};

use context::{StepContext, StepOutput};

pub use context::ContextError;
pub use types::{BuildFailure, ExecuteConfig, FatalError, SkipReason, SkippedStep, StepError, StepFailure};

/// Initial items handed to an execution.
#[derive(Clone, Default)]
pub struct Seeds {
  items: Vec<(ItemId, ErasedItem)>,
}

impl Seeds {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with<T: BuildItem>(mut self, item: T) -> Self {
    self.add(item);
    self
  }

  pub fn add<T: BuildItem>(&mut self, item: T) -> &mut Self {
    self.items.push((ItemId::of::<T>(), Arc::new(item)));
    self
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }
}

impl fmt::Debug for Seeds {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_list().entries(self.items.iter().map(|(id, _)| id)).finish()
  }
}

impl BuildChain {
  /// Execute the chain.
  ///
  /// Every execution starts from a fresh item store holding only `seeds`.
  /// Returns every produced item, or a [`BuildFailure`] listing each failed
  /// and skipped step.
  pub async fn execute(&self, seeds: Seeds, config: &ExecuteConfig) -> Result<BuildResult, BuildFailure> {
    let started = Instant::now();
    info!(
      step_count = self.len(),
      seeds = seeds.len(),
      parallelism = config.workers(),
      fail_fast = config.fail_fast,
      "starting build execution"
    );

    let store = match seed_store(self, seeds) {
      Ok(store) => store,
      Err(rejected) => {
        error!(errors = rejected.len(), "invalid seeds, no step was started");
        let mut diagnostics = self.diagnostics().to_vec();
        diagnostics.extend(rejected);
        return Err(BuildFailure::rejected(diagnostics));
      }
    };

    Coordinator::new(self, config, store).run(started).await
  }

  /// Execute the chain on a dedicated multi-threaded runtime.
  ///
  /// Must not be called from within an async context.
  pub fn execute_blocking(&self, seeds: Seeds, config: &ExecuteConfig) -> Result<BuildResult, BuildFailure> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
      .enable_all()
      .build()
      .map_err(|e| {
        BuildFailure::rejected(vec![
          Diagnostic::error("failed to start the build runtime").with_cause(e),
        ])
      })?;

    runtime.block_on(self.execute(seeds, config))
  }
}

/// Validate seeds against the chain's initial items and load them into a store.
fn seed_store(chain: &BuildChain, seeds: Seeds) -> Result<ItemStore, Diagnostics> {
  let mut diagnostics = Diagnostics::new();
  let mut store = ItemStore::new();

  for (id, item) in seeds.items {
    if !chain.initial_items().contains(&id) {
      diagnostics.push(Diagnostic::error(format!(
        "item {} is seeded but not declared as an initial item",
        id
      )));
      continue;
    }
    if store.insert(id, item).is_err() {
      diagnostics.push(Diagnostic::error(format!("initial item {} is seeded more than once", id)));
    }
  }

  // Empty items may also come from steps; only an unproduced one needs a seed.
  let produced = |item: &ItemId| chain.steps().iter().any(|step| step.producible.contains(item));
  let mut reported = HashSet::new();
  for step in chain.steps() {
    for item in &step.required {
      let needs_seed = item.is_simple() || (item.is_empty_marker() && !produced(item));
      if needs_seed && chain.initial_items().contains(item) && !store.contains(item) && reported.insert(*item) {
        diagnostics.push(
          Diagnostic::error(format!(
            "initial item {} is required by step \"{}\" but was not seeded",
            item, step.id
          ))
          .with_location(step.location),
        );
      }
    }
  }

  if diagnostics.has_errors() {
    Err(diagnostics)
  } else {
    Ok(store)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StepState {
  Pending,
  Ready,
  Running,
  Succeeded,
  Failed,
  Skipped,
  Cancelled,
}

/// What a worker hands back when its step returns.
struct Completion {
  index: usize,
  elapsed: Duration,
  output: StepOutput,
  error: Option<StepError>,
}

/// Owner of all mutable state of one execution.
struct Coordinator<'a> {
  chain: &'a BuildChain,
  config: &'a ExecuteConfig,
  store: ItemStore,
  states: Vec<StepState>,
  /// Predecessors not yet in a terminal state.
  remaining: Vec<usize>,
  /// The failed step that poisons a pending step through a strong edge.
  blocked_by: Vec<Option<usize>>,
  ready: VecDeque<usize>,
  aborting: bool,
  closeables: Vec<Arc<dyn Closeable>>,
  timings: Vec<StepTiming>,
  failures: Vec<StepFailure>,
  skipped: Vec<SkippedStep>,
  diagnostics: Diagnostics,
}

impl<'a> Coordinator<'a> {
  fn new(chain: &'a BuildChain, config: &'a ExecuteConfig, store: ItemStore) -> Self {
    let steps = chain.steps();
    let remaining: Vec<usize> = steps.iter().map(|s| s.predecessors).collect();
    let ready: VecDeque<usize> = (0..steps.len()).filter(|&idx| remaining[idx] == 0).collect();
    let mut states = vec![StepState::Pending; steps.len()];
    for &idx in &ready {
      states[idx] = StepState::Ready;
    }

    Self {
      chain,
      config,
      store,
      states,
      remaining,
      blocked_by: vec![None; steps.len()],
      ready,
      aborting: false,
      closeables: Vec::new(),
      timings: Vec::new(),
      failures: Vec::new(),
      skipped: Vec::new(),
      diagnostics: Diagnostics::new(),
    }
  }

  async fn run(mut self, started: Instant) -> Result<BuildResult, BuildFailure> {
    let semaphore = Arc::new(Semaphore::new(self.config.workers()));
    let mut tasks: JoinSet<Completion> = JoinSet::new();
    let mut running: HashMap<tokio::task::Id, usize> = HashMap::new();

    loop {
      while !self.aborting && !self.ready.is_empty() {
        let Ok(permit) = semaphore.clone().try_acquire_owned() else {
          break;
        };
        let Some(index) = self.ready.pop_front() else {
          break;
        };
        self.dispatch(index, permit, &mut tasks, &mut running);
      }

      let Some(joined) = tasks.join_next_with_id().await else {
        break;
      };

      match joined {
        Ok((id, completion)) => {
          running.remove(&id);
          self.complete(completion);
        }
        Err(e) => {
          error!(error = %e, "build worker terminated");
          if let Some(index) = running.remove(&e.id()) {
            self.fail(index, StepError::Lost);
          }
        }
      }
    }

    self.finish(started)
  }

  /// Hand a ready step to a blocking worker with a snapshot of its inputs.
  fn dispatch(
    &mut self,
    index: usize,
    permit: OwnedSemaphorePermit,
    tasks: &mut JoinSet<Completion>,
    running: &mut HashMap<tokio::task::Id, usize>,
  ) {
    let step = &self.chain.steps()[index];
    self.states[index] = StepState::Running;

    let mut inputs = ItemStore::new();
    for id in &step.readable {
      inputs.copy_slot(&self.store, *id);
    }
    let mut ctx = StepContext::new(step.id.clone(), inputs, step.readable.clone(), step.producible.clone());
    let action = step.action.clone();
    let id = step.id.clone();

    debug!(step = %id, "dispatching step");

    let handle = tasks.spawn_blocking(move || {
      let _permit = permit;
      let span = info_span!("build_step", step = %id);
      let _enter = span.enter();

      let started = Instant::now();
      let outcome = panic::catch_unwind(AssertUnwindSafe(|| action(&mut ctx)));
      let error = match outcome {
        Ok(Ok(())) => None,
        Ok(Err(e)) => Some(StepError::Action(e)),
        Err(payload) => Some(StepError::Panicked(panic_message(payload.as_ref()))),
      };

      Completion {
        index,
        elapsed: started.elapsed(),
        output: ctx.into_output(),
        error,
      }
    });
    running.insert(handle.id(), index);
  }

  /// Publish a finished step's output and wake its successors.
  fn complete(&mut self, completion: Completion) {
    let Completion {
      index,
      elapsed,
      output,
      error,
    } = completion;
    let chain = self.chain;
    let step = &chain.steps()[index];

    self.timings.push(StepTiming {
      step: step.id.to_string(),
      duration: elapsed,
    });
    self.closeables.extend(output.closeables);

    let error = match error {
      Some(e) => Some(e),
      None if self.aborting => {
        debug!(step = %step.id, "discarding output of step finished after cancellation");
        None
      }
      None => self.store.merge(output.items).err().map(StepError::from),
    };

    match error {
      Some(e) => self.fail(index, e),
      None => {
        debug!(step = %step.id, ?elapsed, "step succeeded");
        self.states[index] = StepState::Succeeded;
        if !self.aborting {
          self.release(index);
        }
      }
    }
  }

  fn fail(&mut self, index: usize, error: StepError) {
    let chain = self.chain;
    let step = &chain.steps()[index];
    let fatal = error.is_fatal();
    let error = Arc::new(error);

    error!(step = %step.id, error = %error, fatal, "step failed");
    self.states[index] = StepState::Failed;
    self.diagnostics.push(
      Diagnostic::error(format!("step \"{}\" failed", step.id))
        .with_location(step.location)
        .with_shared_cause(error.clone()),
    );
    self.failures.push(StepFailure {
      step: step.id.to_string(),
      error,
    });

    if fatal || self.config.fail_fast {
      self.abort(fatal);
    } else if !self.aborting {
      self.release(index);
    }
  }

  /// Stop dispatching. Ready steps are cancelled now, pending ones when the
  /// in-flight steps have drained.
  fn abort(&mut self, fatal: bool) {
    if self.aborting {
      return;
    }
    self.aborting = true;
    warn!(
      fatal,
      queued = self.ready.len(),
      "cancelling build, waiting for running steps"
    );
    for index in std::mem::take(&mut self.ready) {
      self.cancel(index);
    }
  }

  fn cancel(&mut self, index: usize) {
    let chain = self.chain;
    let step = &chain.steps()[index];
    warn!(step = %step.id, "step cancelled");
    self.states[index] = StepState::Cancelled;
    self.diagnostics.push(
      Diagnostic::warn(format!("step \"{}\" cancelled because the build is aborting", step.id))
        .with_location(step.location),
    );
    self.skipped.push(SkippedStep {
      step: step.id.to_string(),
      reason: SkipReason::Cancelled,
    });
  }

  /// Count a terminal step off its successors' remaining predecessors.
  ///
  /// Successors whose last predecessor finished become ready, or are skipped
  /// when a strong predecessor failed or was skipped. Skips cascade.
  fn release(&mut self, index: usize) {
    let chain = self.chain;
    let mut settled = VecDeque::from([index]);

    while let Some(done) = settled.pop_front() {
      let root = match self.states[done] {
        StepState::Failed => Some(done),
        StepState::Skipped => self.blocked_by[done],
        _ => None,
      };

      for &(succ, strength) in &chain.steps()[done].successors {
        if strength == EdgeStrength::Strong
          && let Some(root) = root
          && self.blocked_by[succ].is_none()
        {
          self.blocked_by[succ] = Some(root);
        }

        self.remaining[succ] -= 1;
        if self.remaining[succ] > 0 || self.states[succ] != StepState::Pending {
          continue;
        }

        match self.blocked_by[succ] {
          Some(root) => {
            self.skip(succ, root);
            settled.push_back(succ);
          }
          None => {
            self.states[succ] = StepState::Ready;
            self.ready.push_back(succ);
          }
        }
      }
    }
  }

  fn skip(&mut self, index: usize, root: usize) {
    let chain = self.chain;
    let step = &chain.steps()[index];
    let failed = &chain.steps()[root].id;

    warn!(step = %step.id, failed_dep = %failed, "skipping step due to failed dependency");
    self.states[index] = StepState::Skipped;
    self.diagnostics.push(
      Diagnostic::warn(format!(
        "step \"{}\" skipped due to upstream failure of step \"{}\"",
        step.id, failed
      ))
      .with_location(step.location),
    );
    self.skipped.push(SkippedStep {
      step: step.id.to_string(),
      reason: SkipReason::UpstreamFailure { step: failed.to_string() },
    });
  }

  fn finish(mut self, started: Instant) -> Result<BuildResult, BuildFailure> {
    let chain = self.chain;
    for index in 0..self.states.len() {
      if matches!(self.states[index], StepState::Pending | StepState::Ready) {
        self.cancel(index);
      }
    }

    let duration = started.elapsed();
    let mut diagnostics = chain.diagnostics().to_vec();

    if self.failures.is_empty() && self.skipped.is_empty() {
      info!(
        steps = chain.len(),
        items = self.store.len(),
        closeables = self.closeables.len(),
        ?duration,
        "build execution complete"
      );
      diagnostics.extend(self.diagnostics);
      return Ok(BuildResult::new(
        self.store,
        self.closeables,
        self.timings,
        duration,
        diagnostics,
      ));
    }

    for e in close_all(std::mem::take(&mut self.closeables)) {
      self
        .diagnostics
        .push(Diagnostic::warn("failed to close build resource").with_cause(e));
    }

    error!(
      failed = self.failures.len(),
      skipped = self.skipped.len(),
      ?duration,
      "build execution failed"
    );
    diagnostics.extend(self.diagnostics);
    Err(BuildFailure {
      failures: self.failures,
      skipped: self.skipped,
      diagnostics,
    })
  }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
  if let Some(message) = payload.downcast_ref::<&str>() {
    message.to_string()
  } else if let Some(message) = payload.downcast_ref::<String>() {
    message.clone()
  } else {
    "non-string panic payload".to_string()
  }
}
