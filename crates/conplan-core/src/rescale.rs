//! # Rescaling
//!
//! Transfers connectivity measured between connectivity units onto the
//! planning-unit grid by bilinear composition with a [`RescalingMapping`]:
//!
//! ```text
//! w'(p_i, p_j) = Σ_(a, b) M(a → p_i) · w(a, b) · M(b → p_j)
//! ```
//!
//! The sum runs over stored edges only, so the cost is proportional to
//! `edges × overlaps²` rather than the dense `n²` product.

use crate::formats::ConnectivityData;
use crate::graph::ConnectivityGraph;
use crate::progress::Progress;
use crate::spatial::RescalingMapping;
use std::convert::Infallible;

/// Rescale one graph. The result's node set is the mapping's planning-unit
/// universe; edges touching unmapped (orphan or excluded) units vanish.
#[must_use]
pub fn rescale_graph(
    graph: &ConnectivityGraph,
    mapping: &RescalingMapping,
    progress: &dyn Progress,
) -> ConnectivityGraph {
    let mut rescaled = ConnectivityGraph::with_nodes(mapping.planning_units().iter().copied());
    let rows: Vec<_> = graph.nodes().collect();
    let total = rows.len();

    for (n, from) in rows.into_iter().enumerate() {
        let sources: Vec<_> = mapping.targets(from).collect();
        if !sources.is_empty() {
            for (to, weight) in graph.out_edges(from) {
                for (pu_to, m_to) in mapping.targets(to) {
                    for &(pu_from, m_from) in &sources {
                        let contribution = m_from * weight * m_to;
                        if contribution != 0.0 {
                            rescaled.add_weight(pu_from, pu_to, contribution);
                        }
                    }
                }
            }
        }
        progress.report("rescale", n + 1, total);
    }

    tracing::debug!(
        source_edges = graph.edge_count(),
        rescaled_edges = rescaled.edge_count(),
        "rescaled graph"
    );
    rescaled
}

/// Rescale every graph held by `data` (typed layers, time slices and the
/// temporal mean), preserving its shape.
#[must_use]
pub fn rescale_data(
    data: &ConnectivityData,
    mapping: &RescalingMapping,
    progress: &dyn Progress,
) -> ConnectivityData {
    let result: Result<_, Infallible> = data.try_map(|g| Ok(rescale_graph(g, mapping, progress)));
    match result {
        Ok(rescaled) => rescaled,
        Err(never) => match never {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::UnitId;
    use crate::formats::TemporalConnectivity;
    use crate::progress::NoProgress;

    fn fine_graph() -> ConnectivityGraph {
        let mut g = ConnectivityGraph::with_nodes([UnitId(10), UnitId(11), UnitId(12)]);
        g.insert_edge(UnitId(10), UnitId(11), 4.0);
        g.insert_edge(UnitId(11), UnitId(12), 2.0);
        g.insert_edge(UnitId(12), UnitId(12), 1.0);
        g
    }

    #[test]
    fn identity_mapping_preserves_graph() {
        let g = fine_graph();
        let mapping = RescalingMapping::identity(g.nodes());
        assert_eq!(rescale_graph(&g, &mapping, &NoProgress), g);
    }

    #[test]
    fn split_unit_distributes_flow() {
        let mut mapping = RescalingMapping::new([UnitId(1), UnitId(2)]);
        mapping.set(UnitId(10), UnitId(1), 1.0);
        mapping.set(UnitId(11), UnitId(1), 0.5);
        mapping.set(UnitId(11), UnitId(2), 0.5);
        mapping.set(UnitId(12), UnitId(2), 1.0);

        let r = rescale_graph(&fine_graph(), &mapping, &NoProgress);
        assert_eq!(r.weight(UnitId(1), UnitId(1)), 2.0);
        assert_eq!(r.weight(UnitId(1), UnitId(2)), 3.0);
        assert_eq!(r.weight(UnitId(2), UnitId(2)), 2.0);
        assert_eq!(r.weight(UnitId(2), UnitId(1)), 0.0);
        // total mass is preserved when every unit is fully covered
        let total: f64 = r.edges().map(|(_, _, w)| w).sum();
        assert!((total - 7.0).abs() < 1e-12);
    }

    #[test]
    fn orphan_edges_vanish() {
        let mut mapping = RescalingMapping::new([UnitId(1)]);
        mapping.set(UnitId(10), UnitId(1), 1.0);
        let r = rescale_graph(&fine_graph(), &mapping, &NoProgress);
        assert_eq!(r.edge_count(), 0);
        assert!(r.node_set().contains(&UnitId(1)));
    }

    #[test]
    fn temporal_shape_is_preserved() {
        let data = ConnectivityData::Temporal(TemporalConnectivity::from_slices(vec![
            ("2001".to_string(), fine_graph()),
            ("2002".to_string(), ConnectivityGraph::with_nodes([UnitId(10)])),
        ]));
        let mapping = RescalingMapping::identity([UnitId(10), UnitId(11), UnitId(12)]);
        let r = rescale_data(&data, &mapping, &NoProgress);
        let slices = r.time_slices().expect("temporal");
        assert_eq!(slices.len(), 2);
        assert_eq!(r.primary().weight(UnitId(10), UnitId(11)), 2.0);
    }
}
