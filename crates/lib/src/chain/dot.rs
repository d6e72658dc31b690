//! Graphviz rendering of a validated chain.
//!
//! Steps without dependencies are ranked together on the left, steps nothing
//! depends on together on the right. Edges are labelled with the items that
//! link the two steps; weak edges are dashed.

use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;

use super::{ChainEdge, ChainStep};
use crate::step::EdgeStrength;

pub(crate) fn render(steps: &[ChainStep], graph: &DiGraph<usize, ChainEdge>) -> String {
  let mut out = String::new();
  out.push_str("digraph {\n");
  out.push_str("  node [shape=rectangle];\n");
  out.push_str("  rankdir=LR;\n");

  let degree = |idx: usize, direction: Direction| graph.edges_directed(NodeIndex::new(idx), direction).count();
  let start: Vec<usize> = (0..steps.len()).filter(|&idx| degree(idx, Direction::Incoming) == 0).collect();
  let end: Vec<usize> = (0..steps.len())
    .filter(|&idx| degree(idx, Direction::Outgoing) == 0 && degree(idx, Direction::Incoming) > 0)
    .collect();

  for group in [&start, &end] {
    if group.is_empty() {
      continue;
    }
    out.push_str("\n  { rank = same;");
    for &idx in group {
      out.push_str(&format!(" \"{}\";", escape(&steps[idx].id)));
    }
    out.push_str(" }\n");
  }

  let mut edges: Vec<_> = graph.edge_references().collect();
  edges.sort_by_key(|edge| (graph[edge.source()], graph[edge.target()]));
  if !edges.is_empty() {
    out.push('\n');
  }

  for edge in edges {
    let weight = edge.weight();
    let label = weight
      .items
      .iter()
      .map(|item| item.to_string())
      .collect::<Vec<_>>()
      .join(", ");
    out.push_str(&format!(
      "  \"{}\" -> \"{}\" [label=\"{}\"",
      escape(&steps[graph[edge.source()]].id),
      escape(&steps[graph[edge.target()]].id),
      escape(&label)
    ));
    if weight.strength == EdgeStrength::Weak {
      out.push_str(", style=dashed");
    }
    out.push_str("];\n");
  }

  out.push_str("}\n");
  out
}

fn escape(value: &str) -> String {
  value.replace('\\', "\\\\").replace('"', "\\\"")
}
