//! Dependency wiring for a set of registered steps.
//!
//! Turns step declarations into a directed graph with an edge from every
//! producer of an item to every consumer of it, and records every problem
//! found on the way as a diagnostic:
//!
//! - ambiguous producers of simple items and productions of initial items
//! - required items nobody produces
//! - cycles through strong edges (weak edges closing a cycle are dropped)

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};

use petgraph::Direction;
use petgraph::algo::{has_path_connecting, tarjan_scc};
use petgraph::graph::{DiGraph, NodeIndex};
use tracing::debug;

use crate::diagnostic::{Diagnostic, Diagnostics, Location};
use crate::item::ItemId;
use crate::step::{BuildStep, ConsumeMode, EdgeStrength};

/// A step as registered with the chain builder.
#[derive(Debug, Clone)]
pub(crate) struct Registered {
  pub step: BuildStep,
  pub location: Location,
}

/// Edge payload: how strongly the consumer depends on the producer, and through which items.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ChainEdge {
  pub strength: EdgeStrength,
  pub items: Vec<ItemId>,
}

/// Result of wiring: the included steps and the graph between them.
///
/// Node `i` of `graph` carries the registration index `included[i]`.
pub(crate) struct Wiring {
  pub included: Vec<usize>,
  pub graph: DiGraph<usize, ChainEdge>,
}

struct Producers {
  /// Real producers actually used for each item, after overriding.
  effective: BTreeMap<ItemId, Vec<usize>>,
  /// Steps declaring `before_consume` for each item.
  order_only: BTreeMap<ItemId, Vec<usize>>,
}

/// Wire `steps` into a dependency graph.
///
/// Problems are pushed into `diagnostics`; the caller decides whether the
/// returned wiring is usable by checking for errors.
pub(crate) fn wire(
  steps: &[Registered],
  initial: &BTreeSet<ItemId>,
  finals: &BTreeSet<ItemId>,
  diagnostics: &mut Diagnostics,
) -> Wiring {
  let producers = extract_producers(steps, initial, diagnostics);
  let included = include_steps(steps, &producers, initial, finals, diagnostics);
  let unresolved = check_requirements(steps, &included, &producers, initial, diagnostics);

  let mut graph = DiGraph::new();
  let mut nodes = HashMap::new();
  for &idx in &included {
    nodes.insert(idx, graph.add_node(idx));
  }

  let edges = collect_edges(steps, &included, &producers);
  let (strong, weak): (Vec<_>, Vec<_>) = edges
    .into_iter()
    .partition(|(_, edge)| edge.strength == EdgeStrength::Strong);

  for ((from, to), edge) in strong {
    graph.add_edge(nodes[&from], nodes[&to], edge);
  }

  report_unreachable(steps, &graph, &nodes, &unresolved, diagnostics);
  detect_cycles(steps, &graph, diagnostics);

  // Strong edges are in place, so a weak edge can only be dropped, never a strong one.
  for ((from, to), edge) in weak {
    let (from_node, to_node) = (nodes[&from], nodes[&to]);
    if has_path_connecting(&graph, to_node, from_node, None) {
      diagnostics.push(
        Diagnostic::note(format!(
          "dropping ordering of step \"{}\" before step \"{}\" on {}: it would close a cycle",
          steps[from].step.id(),
          steps[to].step.id(),
          item_list(&edge.items),
        ))
        .with_location(steps[to].location),
      );
      debug!(from = steps[from].step.id(), to = steps[to].step.id(), "dropped weak edge closing a cycle");
      continue;
    }
    graph.add_edge(from_node, to_node, edge);
  }

  Wiring { included, graph }
}

/// Map items to their producers and validate producer cardinality.
fn extract_producers(steps: &[Registered], initial: &BTreeSet<ItemId>, diagnostics: &mut Diagnostics) -> Producers {
  let mut real: BTreeMap<ItemId, Vec<usize>> = BTreeMap::new();
  let mut order_only: BTreeMap<ItemId, Vec<usize>> = BTreeMap::new();

  for (idx, registered) in steps.iter().enumerate() {
    for produce in registered.step.produces_list() {
      let target = if produce.is_real() { &mut real } else { &mut order_only };
      target.entry(produce.item).or_default().push(idx);
    }
  }

  let mut effective = BTreeMap::new();
  for (item, producers) in real {
    if item.is_simple() && initial.contains(&item) {
      for &idx in &producers {
        diagnostics.push(
          Diagnostic::error(format!(
            "item {} is an initial item and cannot be produced by step \"{}\"",
            item,
            steps[idx].step.id()
          ))
          .with_location(steps[idx].location),
        );
      }
      continue;
    }

    let (overridable, fixed): (Vec<usize>, Vec<usize>) = producers.into_iter().partition(|&idx| {
      steps[idx]
        .step
        .production(&item)
        .is_some_and(|produce| produce.overridable)
    });

    if item.is_simple() {
      if fixed.len() > 1 {
        diagnostics.push(ambiguous_producers(steps, &item, &fixed, ""));
      } else if fixed.is_empty() && overridable.len() > 1 {
        diagnostics.push(ambiguous_producers(steps, &item, &overridable, "overridable "));
      }
    }

    if !fixed.is_empty() {
      for &idx in &overridable {
        diagnostics.push(
          Diagnostic::warn(format!(
            "overridable producer \"{}\" of item {} is overridden by {}",
            steps[idx].step.id(),
            item,
            step_list(steps, &fixed)
          ))
          .with_location(steps[idx].location),
        );
      }
      effective.insert(item, fixed);
    } else {
      effective.insert(item, overridable);
    }
  }

  Producers { effective, order_only }
}

fn ambiguous_producers(steps: &[Registered], item: &ItemId, producers: &[usize], qualifier: &str) -> Diagnostic {
  let listed: Vec<String> = producers
    .iter()
    .map(|&idx| format!("\"{}\" ({})", steps[idx].step.id(), steps[idx].location))
    .collect();
  let last = producers[producers.len() - 1];
  Diagnostic::error(format!(
    "multiple {}producers of item {}: {}",
    qualifier,
    item,
    listed.join(", ")
  ))
  .with_location(steps[last].location)
}

/// Decide which steps take part in the chain.
///
/// Without final items every step is included. With final items, only the
/// producers of final items are, plus, transitively, the producers of what the
/// included steps read. Weak consumptions and weak productions never pull a
/// step in.
fn include_steps(
  steps: &[Registered],
  producers: &Producers,
  initial: &BTreeSet<ItemId>,
  finals: &BTreeSet<ItemId>,
  diagnostics: &mut Diagnostics,
) -> Vec<usize> {
  if finals.is_empty() {
    return (0..steps.len()).collect();
  }

  let mut included = BTreeSet::new();
  let mut queue = VecDeque::new();

  let pull = |item: &ItemId, included: &mut BTreeSet<usize>, queue: &mut VecDeque<usize>| {
    let real = producers.effective.get(item).into_iter().flatten().filter(|&&idx| {
      steps[idx]
        .step
        .production(item)
        .is_some_and(|produce| !produce.weak)
    });
    let ordering = producers.order_only.get(item).into_iter().flatten();
    for &idx in real.chain(ordering) {
      if included.insert(idx) {
        queue.push_back(idx);
      }
    }
  };

  for item in finals {
    if !producers.effective.contains_key(item) && !initial.contains(item) {
      diagnostics.push(Diagnostic::error(format!(
        "no producers for final item {}",
        item
      )));
    }
    pull(item, &mut included, &mut queue);
  }

  while let Some(idx) = queue.pop_front() {
    for consume in steps[idx].step.consumes_list() {
      if consume.mode != ConsumeMode::Weak {
        pull(&consume.item, &mut included, &mut queue);
      }
    }
  }

  for (idx, registered) in steps.iter().enumerate() {
    if !included.contains(&idx) {
      diagnostics.push(
        Diagnostic::note(format!(
          "step \"{}\" is not needed for any final item and will not run",
          registered.step.id()
        ))
        .with_location(registered.location),
      );
    }
  }

  included.into_iter().collect()
}

/// Report required consumptions that nothing can satisfy.
///
/// Returns the registration indices of the offending steps.
fn check_requirements(
  steps: &[Registered],
  included: &[usize],
  producers: &Producers,
  initial: &BTreeSet<ItemId>,
  diagnostics: &mut Diagnostics,
) -> Vec<usize> {
  let included_set: HashSet<usize> = included.iter().copied().collect();
  let mut unresolved = Vec::new();

  for &idx in included {
    let registered = &steps[idx];
    for consume in registered.step.consumes_list() {
      if consume.mode != ConsumeMode::Required || initial.contains(&consume.item) {
        continue;
      }
      let produced = producers
        .effective
        .get(&consume.item)
        .is_some_and(|list| list.iter().any(|p| *p != idx && included_set.contains(p)));
      if !produced {
        diagnostics.push(
          Diagnostic::error(format!(
            "step \"{}\" requires item {}, but no step produces it and it is not an initial item",
            registered.step.id(),
            consume.item
          ))
          .with_location(registered.location),
        );
        if unresolved.last() != Some(&idx) {
          unresolved.push(idx);
        }
      }
    }
  }

  unresolved
}

/// One edge per (producer, consumer) pair; the strongest consumption wins.
fn collect_edges(steps: &[Registered], included: &[usize], producers: &Producers) -> BTreeMap<(usize, usize), ChainEdge> {
  let included_set: HashSet<usize> = included.iter().copied().collect();
  let mut edges: BTreeMap<(usize, usize), ChainEdge> = BTreeMap::new();

  let mut add = |from: usize, to: usize, strength: EdgeStrength, item: ItemId| {
    let edge = edges.entry((from, to)).or_insert_with(|| ChainEdge {
      strength,
      items: Vec::new(),
    });
    edge.strength = edge.strength.max(strength);
    if !edge.items.contains(&item) {
      edge.items.push(item);
    }
  };

  for &consumer in included {
    for consume in steps[consumer].step.consumes_list() {
      let real = producers.effective.get(&consume.item).into_iter().flatten();
      for &producer in real {
        if producer != consumer && included_set.contains(&producer) {
          add(producer, consumer, consume.mode.edge_strength(), consume.item);
        }
      }
      let ordering = producers.order_only.get(&consume.item).into_iter().flatten();
      for &producer in ordering {
        if producer != consumer && included_set.contains(&producer) {
          add(producer, consumer, EdgeStrength::Weak, consume.item);
        }
      }
    }
  }

  edges
}

/// Note every step that strongly depends, directly or not, on an unresolved step.
fn report_unreachable(
  steps: &[Registered],
  graph: &DiGraph<usize, ChainEdge>,
  nodes: &HashMap<usize, NodeIndex>,
  unresolved: &[usize],
  diagnostics: &mut Diagnostics,
) {
  let mut reported = HashSet::new();
  for &root in unresolved {
    let mut queue = VecDeque::from([nodes[&root]]);
    let mut seen = HashSet::from([nodes[&root]]);
    while let Some(node) = queue.pop_front() {
      for next in graph.neighbors_directed(node, Direction::Outgoing) {
        if !seen.insert(next) {
          continue;
        }
        queue.push_back(next);
        let idx = graph[next];
        if unresolved.contains(&idx) || !reported.insert(idx) {
          continue;
        }
        diagnostics.push(
          Diagnostic::note(format!(
            "step \"{}\" is unreachable: it depends on step \"{}\", whose required items cannot be satisfied",
            steps[idx].step.id(),
            steps[root].step.id()
          ))
          .with_location(steps[idx].location),
        );
      }
    }
  }
}

/// Report every strongly connected component of the strong-edge graph as a cycle.
fn detect_cycles(steps: &[Registered], graph: &DiGraph<usize, ChainEdge>, diagnostics: &mut Diagnostics) {
  let mut components: Vec<Vec<NodeIndex>> = tarjan_scc(graph).into_iter().filter(|c| c.len() > 1).collect();
  for component in &mut components {
    component.sort_by_key(|&node| graph[node]);
  }
  components.sort_by_key(|c| graph[c[0]]);

  for component in components {
    let path = cycle_path(graph, &component);
    let links: Vec<String> = path
      .windows(2)
      .map(|pair| {
        let edge = graph
          .find_edge(pair[0], pair[1])
          .map(|e| item_list(&graph[e].items))
          .unwrap_or_default();
        format!(
          "\"{}\" produces {} for \"{}\"",
          steps[graph[pair[0]]].step.id(),
          edge,
          steps[graph[pair[1]]].step.id()
        )
      })
      .collect();
    let start = graph[component[0]];
    diagnostics.push(
      Diagnostic::error(format!("dependency cycle detected: {}", links.join(", "))).with_location(steps[start].location),
    );
  }
}

/// A closed walk through `component`, starting and ending at its first node.
///
/// Breadth-first from the start node, restricted to the component, until an
/// edge leads back to the start.
fn cycle_path(graph: &DiGraph<usize, ChainEdge>, component: &[NodeIndex]) -> Vec<NodeIndex> {
  let members: HashSet<NodeIndex> = component.iter().copied().collect();
  let start = component[0];
  let mut parent: HashMap<NodeIndex, NodeIndex> = HashMap::new();
  let mut queue = VecDeque::from([start]);

  while let Some(node) = queue.pop_front() {
    let mut successors: Vec<NodeIndex> = graph
      .neighbors_directed(node, Direction::Outgoing)
      .filter(|n| members.contains(n))
      .collect();
    successors.sort_by_key(|&n| graph[n]);

    for next in successors {
      if next == start {
        let mut path = vec![start, node];
        let mut current = node;
        while let Some(&prev) = parent.get(&current) {
          path.push(prev);
          current = prev;
        }
        // path is start <- node <- ... <- start, reverse it.
        path.reverse();
        return path;
      }
      if !parent.contains_key(&next) {
        parent.insert(next, node);
        queue.push_back(next);
      }
    }
  }

  // Unreachable for a strongly connected component.
  component.to_vec()
}

fn item_list(items: &[ItemId]) -> String {
  items.iter().map(|item| item.to_string()).collect::<Vec<_>>().join(", ")
}

fn step_list(steps: &[Registered], indices: &[usize]) -> String {
  indices
    .iter()
    .map(|&idx| format!("\"{}\"", steps[idx].step.id()))
    .collect::<Vec<_>>()
    .join(", ")
}
