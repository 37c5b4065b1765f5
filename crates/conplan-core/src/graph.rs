//! # Connectivity Graph
//!
//! The canonical sparse directed weighted graph every connectivity format is
//! normalized into.
//!
//! All data structures use `BTreeMap`/`BTreeSet` for deterministic ordering.
//! The node universe is explicit: a unit can be part of the graph without
//! having any edge (an isolated planning unit still receives metric values).

use crate::primitives::SUM_TOLERANCE;
use crate::{ConplanError, UnitId};
use std::collections::{BTreeMap, BTreeSet};

/// A directed weighted graph over a declared set of units.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnectivityGraph {
    /// Declared node universe.
    nodes: BTreeSet<UnitId>,

    /// Adjacency list: from -> (to -> weight)
    edges: BTreeMap<UnitId, BTreeMap<UnitId, f64>>,
}

impl ConnectivityGraph {
    /// Create a new empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a graph with the given node universe and no edges.
    #[must_use]
    pub fn with_nodes(nodes: impl IntoIterator<Item = UnitId>) -> Self {
        Self {
            nodes: nodes.into_iter().collect(),
            edges: BTreeMap::new(),
        }
    }

    /// Declare a node. Declaring an existing node is a no-op.
    pub fn insert_node(&mut self, id: UnitId) {
        self.nodes.insert(id);
    }

    /// Insert or replace an edge. Both endpoints join the node universe.
    pub fn insert_edge(&mut self, from: UnitId, to: UnitId, weight: f64) {
        self.nodes.insert(from);
        self.nodes.insert(to);
        self.edges.entry(from).or_default().insert(to, weight);
    }

    /// Add `weight` to an edge, creating it at zero first if needed.
    pub fn add_weight(&mut self, from: UnitId, to: UnitId, weight: f64) {
        self.nodes.insert(from);
        self.nodes.insert(to);
        *self
            .edges
            .entry(from)
            .or_default()
            .entry(to)
            .or_insert(0.0) += weight;
    }

    /// Weight of an edge, zero when absent.
    #[must_use]
    pub fn weight(&self, from: UnitId, to: UnitId) -> f64 {
        self.edges
            .get(&from)
            .and_then(|targets| targets.get(&to))
            .copied()
            .unwrap_or(0.0)
    }

    /// Check if an edge is stored (even with zero weight).
    #[must_use]
    pub fn contains_edge(&self, from: UnitId, to: UnitId) -> bool {
        self.edges
            .get(&from)
            .is_some_and(|targets| targets.contains_key(&to))
    }

    /// All nodes in ascending id order.
    pub fn nodes(&self) -> impl Iterator<Item = UnitId> + '_ {
        self.nodes.iter().copied()
    }

    /// The node universe.
    #[must_use]
    pub fn node_set(&self) -> &BTreeSet<UnitId> {
        &self.nodes
    }

    /// All edges ordered by (from, to).
    pub fn edges(&self) -> impl Iterator<Item = (UnitId, UnitId, f64)> + '_ {
        self.edges.iter().flat_map(|(from, targets)| {
            targets.iter().map(move |(to, weight)| (*from, *to, *weight))
        })
    }

    /// Outgoing edges of a node ordered by target.
    pub fn out_edges(&self, node: UnitId) -> impl Iterator<Item = (UnitId, f64)> + '_ {
        self.edges
            .get(&node)
            .into_iter()
            .flat_map(|targets| targets.iter().map(|(k, v)| (*k, *v)))
    }

    /// Total number of declared nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Total number of stored edges.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.edges.values().map(BTreeMap::len).sum()
    }

    /// Row sums (outgoing strength) of every node, zero for isolated nodes.
    #[must_use]
    pub fn row_sums(&self, include_self: bool) -> BTreeMap<UnitId, f64> {
        let mut sums: BTreeMap<UnitId, f64> = self.nodes.iter().map(|id| (*id, 0.0)).collect();
        for (from, to, weight) in self.edges() {
            if include_self || from != to {
                *sums.entry(from).or_insert(0.0) += weight;
            }
        }
        sums
    }

    /// Column sums (incoming strength) of every node, zero for isolated nodes.
    #[must_use]
    pub fn column_sums(&self, include_self: bool) -> BTreeMap<UnitId, f64> {
        let mut sums: BTreeMap<UnitId, f64> = self.nodes.iter().map(|id| (*id, 0.0)).collect();
        for (from, to, weight) in self.edges() {
            if include_self || from != to {
                *sums.entry(to).or_insert(0.0) += weight;
            }
        }
        sums
    }

    /// Nodes whose column sum differs from 1 by more than the tolerance.
    ///
    /// Migration matrices are expected to return an empty list.
    #[must_use]
    pub fn columns_not_summing_to_one(&self) -> Vec<UnitId> {
        self.column_sums(true)
            .into_iter()
            .filter(|(_, sum)| (sum - 1.0).abs() > SUM_TOLERANCE)
            .map(|(id, _)| id)
            .collect()
    }

    /// Nodes whose row sum differs from 1 by more than the tolerance.
    ///
    /// Probability matrices without mortality are expected to return an
    /// empty list.
    #[must_use]
    pub fn rows_not_summing_to_one(&self) -> Vec<UnitId> {
        self.row_sums(true)
            .into_iter()
            .filter(|(_, sum)| (sum - 1.0).abs() > SUM_TOLERANCE)
            .map(|(id, _)| id)
            .collect()
    }

    /// Fail if any node lies outside the given universe.
    pub fn ensure_within(&self, universe: &BTreeSet<UnitId>) -> Result<(), ConplanError> {
        let unknown: Vec<String> = self
            .nodes
            .difference(universe)
            .take(10)
            .map(ToString::to_string)
            .collect();
        if unknown.is_empty() {
            return Ok(());
        }
        Err(ConplanError::Format(format!(
            "Connectivity data references units missing from the unit set: {}",
            unknown.join(", ")
        )))
    }

    /// Edge-wise arithmetic mean of several graphs over the union of their
    /// nodes. An edge missing from a graph counts as zero in that graph.
    #[must_use]
    pub fn mean_of<'a>(graphs: impl IntoIterator<Item = &'a ConnectivityGraph>) -> Self {
        let mut mean = Self::new();
        let mut count = 0usize;
        for graph in graphs {
            count += 1;
            for node in graph.nodes() {
                mean.insert_node(node);
            }
            for (from, to, weight) in graph.edges() {
                mean.add_weight(from, to, weight);
            }
        }
        if count > 1 {
            let divisor = count as f64;
            for targets in mean.edges.values_mut() {
                for weight in targets.values_mut() {
                    *weight /= divisor;
                }
            }
        }
        mean
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_by_two() -> ConnectivityGraph {
        let mut g = ConnectivityGraph::new();
        g.insert_edge(UnitId(1), UnitId(1), 0.6);
        g.insert_edge(UnitId(1), UnitId(2), 0.4);
        g.insert_edge(UnitId(2), UnitId(1), 0.3);
        g.insert_edge(UnitId(2), UnitId(2), 0.7);
        g
    }

    #[test]
    fn sums_with_and_without_self_loops() {
        let g = two_by_two();
        let rows = g.row_sums(true);
        assert!((rows[&UnitId(1)] - 1.0).abs() < 1e-12);
        let rows = g.row_sums(false);
        assert!((rows[&UnitId(1)] - 0.4).abs() < 1e-12);
        let cols = g.column_sums(true);
        assert!((cols[&UnitId(1)] - 0.9).abs() < 1e-12);
        assert!((cols[&UnitId(2)] - 1.1).abs() < 1e-12);
    }

    #[test]
    fn type_invariant_checks() {
        let g = two_by_two();
        assert!(g.rows_not_summing_to_one().is_empty());
        assert_eq!(g.columns_not_summing_to_one(), vec![UnitId(1), UnitId(2)]);
    }

    #[test]
    fn isolated_nodes_are_kept() {
        let mut g = ConnectivityGraph::with_nodes([UnitId(3)]);
        g.insert_edge(UnitId(1), UnitId(2), 1.0);
        assert_eq!(g.node_count(), 3);
        assert_eq!(g.column_sums(true)[&UnitId(3)], 0.0);
    }

    #[test]
    fn ensure_within_reports_unknown_units() {
        let g = two_by_two();
        let universe: BTreeSet<UnitId> = [UnitId(1)].into_iter().collect();
        assert!(matches!(
            g.ensure_within(&universe),
            Err(ConplanError::Format(_))
        ));
    }

    #[test]
    fn mean_counts_missing_edges_as_zero() {
        let mut a = ConnectivityGraph::new();
        a.insert_edge(UnitId(1), UnitId(2), 2.0);
        let mut b = ConnectivityGraph::new();
        b.insert_edge(UnitId(1), UnitId(2), 4.0);
        b.insert_edge(UnitId(2), UnitId(1), 1.0);
        let mean = ConnectivityGraph::mean_of([&a, &b]);
        assert!((mean.weight(UnitId(1), UnitId(2)) - 3.0).abs() < 1e-12);
        assert!((mean.weight(UnitId(2), UnitId(1)) - 0.5).abs() < 1e-12);
    }
}
