//! Subgraph views over the scheduler's node graph.
//!
//! A view is a pair of bitsets: which nodes participate, and which
//! dependence edges are still active (not yet satisfied). Views are cheap to
//! clone, so the recursion passes them by value and mutation never
//! invalidates a caller's copy.

use crate::containers::BitSet;
use crate::graph::IndexGraph;

use super::LoopBlock;

#[derive(Clone, Debug)]
pub struct GraphView {
    pub node_ids: BitSet,
    pub active_edges: BitSet,
}

impl GraphView {
    pub fn sub(&self, nodes: &BitSet) -> GraphView {
        GraphView {
            node_ids: nodes.clone(),
            active_edges: self.active_edges.clone(),
        }
    }
    pub fn union_with(&mut self, other: &GraphView) {
        self.node_ids.union_with(&other.node_ids);
        // Active sets only shrink; the union keeps the intersection-free
        // semantics of the original bitset-or.
        self.active_edges.union_with(&other.active_edges);
    }
}

impl LoopBlock {
    pub(super) fn full_graph(&self) -> GraphView {
        GraphView {
            node_ids: BitSet::dense(self.nodes.len()),
            active_edges: BitSet::dense(self.edges.len()),
        }
    }
    /// Edge `e` does not constrain the view at `depth`: deactivated,
    /// exhausted by depth, or an endpoint is outside the view.
    pub(super) fn edge_inactive(&self, g: &GraphView, e: usize, depth: usize) -> bool {
        if !g.active_edges.contains(e) {
            return true;
        }
        let edge = &self.edges[e];
        if edge.is_inactive(depth) {
            return true;
        }
        match (self.mem_node[edge.input], self.mem_node[edge.output]) {
            (Some(a), Some(b)) => !(g.node_ids.contains(a) && g.node_ids.contains(b)),
            _ => true,
        }
    }
    pub(super) fn active_edge_ids(&self, g: &GraphView, depth: usize) -> Vec<usize> {
        (0..self.edges.len())
            .filter(|&e| !self.edge_inactive(g, e, depth))
            .collect()
    }
    pub(super) fn node_has_active_edges(&self, g: &GraphView, node: usize, depth: usize) -> bool {
        self.nodes[node].memory.iter().any(|m| {
            self.in_edge_ids(m)
                .chain(self.out_edge_ids(m))
                .any(|e| !self.edge_inactive(g, e, depth))
        })
    }
    pub(super) fn graph_max_depth(&self, g: &GraphView) -> usize {
        g.node_ids
            .iter()
            .map(|n| self.nodes[n].num_loops)
            .max()
            .unwrap_or(0)
    }
    /// Does edge `e` cross between the two views?
    pub(super) fn connects(&self, e: usize, g0: &GraphView, g1: &GraphView) -> bool {
        let edge = &self.edges[e];
        let (Some(a), Some(b)) = (self.mem_node[edge.input], self.mem_node[edge.output]) else {
            return false;
        };
        (g0.node_ids.contains(a) && g1.node_ids.contains(b))
            || (g1.node_ids.contains(a) && g0.node_ids.contains(b))
    }
}

/// Node graph restricted to a view, for SCC decomposition.
pub(super) struct NodeGraphView<'a> {
    pub lb: &'a LoopBlock,
    pub g: &'a GraphView,
}

impl IndexGraph for NodeGraphView<'_> {
    fn num_vertices(&self) -> usize {
        self.lb.nodes.len()
    }
    fn vertex_ids(&self) -> impl Iterator<Item = usize> + '_ {
        self.g.node_ids.iter()
    }
    fn in_neighbors(&self, v: usize) -> impl Iterator<Item = usize> + '_ {
        self.lb.nodes[v]
            .in_neighbors
            .iter()
            .filter(|&w| self.g.node_ids.contains(w))
    }
}
