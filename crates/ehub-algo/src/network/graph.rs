use std::collections::HashMap;

use petgraph::algo::connected_components;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;

/// Directed arcs of one network; edge weights index the network's arc list.
#[derive(Debug, Clone, Default)]
pub struct FlowGraph {
    graph: DiGraph<String, usize>,
    index: HashMap<String, NodeIndex>,
}

impl FlowGraph {
    pub fn new() -> Self {
        Self::default()
    }

    fn node(&mut self, name: &str) -> NodeIndex {
        if let Some(&idx) = self.index.get(name) {
            return idx;
        }
        let idx = self.graph.add_node(name.to_string());
        self.index.insert(name.to_string(), idx);
        idx
    }

    /// Add `from -> to` carrying arc id `arc`. Returns false if the arc
    /// already exists.
    pub fn add_arc(&mut self, from: &str, to: &str, arc: usize) -> bool {
        let a = self.node(from);
        let b = self.node(to);
        if self.graph.find_edge(a, b).is_some() {
            return false;
        }
        self.graph.add_edge(a, b, arc);
        true
    }

    fn arcs(&self, node: &str, direction: Direction) -> Vec<usize> {
        let Some(&idx) = self.index.get(node) else {
            return Vec::new();
        };
        let mut arcs: Vec<usize> = self
            .graph
            .edges_directed(idx, direction)
            .map(|e| *e.weight())
            .collect();
        arcs.sort_unstable();
        arcs
    }

    /// Arc ids ending at `node`.
    pub fn inbound(&self, node: &str) -> Vec<usize> {
        self.arcs(node, Direction::Incoming)
    }

    /// Arc ids starting at `node`.
    pub fn outbound(&self, node: &str) -> Vec<usize> {
        self.arcs(node, Direction::Outgoing)
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn arc_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Weakly connected parts of the network.
    pub fn components(&self) -> usize {
        connected_components(&self.graph)
    }
}
