//! The step graph.
//!
//! Vertices are step fqns; an edge `from -> to` means `from` executes before
//! `to`. Edges are recorded while the graph is still being grown and
//! resolved in [`StepGraph::finalize`], which rejects edges to missing
//! vertices and dependency cycles before anything runs.

use std::collections::HashMap;

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use tracing::trace;

use super::errors::GraphError;

pub struct StepGraph {
  graph: DiGraph<String, ()>,
  nodes: HashMap<String, NodeIndex>,
  pending_edges: Vec<(String, String)>,
}

impl Default for StepGraph {
  fn default() -> Self {
    Self::new()
  }
}

impl StepGraph {
  pub fn new() -> Self {
    StepGraph {
      graph: DiGraph::new(),
      nodes: HashMap::new(),
      pending_edges: Vec::new(),
    }
  }

  /// Add a vertex. Returns false when it was already present.
  pub fn add_vertex(&mut self, fqn: &str) -> bool {
    if self.nodes.contains_key(fqn) {
      return false;
    }
    let idx = self.graph.add_node(fqn.to_string());
    self.nodes.insert(fqn.to_string(), idx);
    true
  }

  pub fn has_vertex(&self, fqn: &str) -> bool {
    self.nodes.contains_key(fqn)
  }

  /// Record a dependency edge. The vertex at `from` will execute before the
  /// vertex at `to`; both must exist by the time the graph is finalized.
  pub fn add_edge(&mut self, from: &str, to: &str) {
    trace!(%from, %to, "add edge");
    let edge = (from.to_string(), to.to_string());
    if !self.pending_edges.contains(&edge) {
      self.pending_edges.push(edge);
    }
  }

  pub fn len(&self) -> usize {
    self.nodes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.nodes.is_empty()
  }

  /// Resolve recorded edges and validate the graph: every edge endpoint must
  /// exist, and the graph must be acyclic.
  pub fn finalize(&mut self) -> Result<(), GraphError> {
    for (from, to) in std::mem::take(&mut self.pending_edges) {
      let Some(&from_idx) = self.nodes.get(&from) else {
        return Err(GraphError::MissingVertex { vertex: from, from: to });
      };
      let Some(&to_idx) = self.nodes.get(&to) else {
        return Err(GraphError::MissingVertex { vertex: to, from });
      };
      self.graph.update_edge(from_idx, to_idx, ());
    }

    toposort(&self.graph, None).map_err(|_| GraphError::CycleDetected)?;
    Ok(())
  }

  /// In-degree per vertex, for seeding the run queue.
  pub fn in_degrees(&self) -> HashMap<String, usize> {
    self
      .nodes
      .iter()
      .map(|(fqn, &idx)| {
        let count = self.graph.neighbors_directed(idx, Direction::Incoming).count();
        (fqn.clone(), count)
      })
      .collect()
  }

  /// Vertices that depend on `fqn`, i.e. become ready once it completes.
  pub fn successors(&self, fqn: &str) -> Vec<String> {
    let Some(&idx) = self.nodes.get(fqn) else {
      return Vec::new();
    };
    self
      .graph
      .neighbors_directed(idx, Direction::Outgoing)
      .map(|succ| self.graph[succ].clone())
      .collect()
  }

  /// All vertex names, sorted for deterministic scheduling.
  pub fn vertices(&self) -> Vec<String> {
    let mut names: Vec<String> = self.nodes.keys().cloned().collect();
    names.sort_unstable();
    names
  }
}
