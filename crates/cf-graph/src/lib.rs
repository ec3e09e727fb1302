#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use cf_registry::DimensionId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How a dependent dimension's option set is recomputed when its parent
/// selection changes: from the in-memory metadata snapshot, or through a
/// keyed remote lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    ClientSide,
    Remote,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CascadeEdge {
    pub from: DimensionId,
    pub to: DimensionId,
    pub resolution: Resolution,
}

impl CascadeEdge {
    #[must_use]
    pub const fn client_side(from: DimensionId, to: DimensionId) -> Self {
        Self {
            from,
            to,
            resolution: Resolution::ClientSide,
        }
    }

    #[must_use]
    pub const fn remote(from: DimensionId, to: DimensionId) -> Self {
        Self {
            from,
            to,
            resolution: Resolution::Remote,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("cascade edges contain a cycle through {stuck:?}")]
    CycleDetected { stuck: Vec<DimensionId> },
    #[error("duplicate cascade edge {from} -> {to}")]
    DuplicateEdge { from: DimensionId, to: DimensionId },
}

/// The static dependency graph between filter dimensions. Validated to be a
/// DAG at construction; a cycle is a deployment configuration error and is
/// fatal at startup, never a runtime condition.
#[derive(Debug, Clone)]
pub struct CascadeGraph {
    children: BTreeMap<DimensionId, Vec<CascadeEdge>>,
    parents: BTreeMap<DimensionId, Vec<CascadeEdge>>,
    order: Vec<DimensionId>,
}

impl CascadeGraph {
    pub fn new(edges: Vec<CascadeEdge>) -> Result<Self, GraphError> {
        let mut children: BTreeMap<DimensionId, Vec<CascadeEdge>> = BTreeMap::new();
        let mut parents: BTreeMap<DimensionId, Vec<CascadeEdge>> = BTreeMap::new();

        for edge in &edges {
            let siblings = children.entry(edge.from).or_default();
            if siblings.iter().any(|existing| existing.to == edge.to) {
                return Err(GraphError::DuplicateEdge {
                    from: edge.from,
                    to: edge.to,
                });
            }
            siblings.push(*edge);
            parents.entry(edge.to).or_default().push(*edge);
        }

        let order = topological_sort(&children)?;
        Ok(Self {
            children,
            parents,
            order,
        })
    }

    /// The production graph: Team cascades into PIC from the metadata
    /// snapshot; every other edge requires a remote lookup.
    #[must_use]
    pub fn standard() -> Self {
        let edges = vec![
            CascadeEdge::client_side(DimensionId::Team, DimensionId::Pic),
            CascadeEdge::remote(DimensionId::Pic, DimensionId::Pid),
            CascadeEdge::remote(DimensionId::Pid, DimensionId::Mid),
            CascadeEdge::remote(DimensionId::Mid, DimensionId::Zid),
            CascadeEdge::remote(DimensionId::Pid, DimensionId::Pubname),
            CascadeEdge::remote(DimensionId::Mid, DimensionId::Medianame),
            CascadeEdge::remote(DimensionId::Zid, DimensionId::Zonename),
        ];
        match Self::new(edges) {
            Ok(graph) => graph,
            // The standard edge table is acyclic by inspection.
            Err(_) => unreachable!("standard cascade graph is a DAG"),
        }
    }

    #[must_use]
    pub fn children_of(&self, dimension: DimensionId) -> &[CascadeEdge] {
        self.children
            .get(&dimension)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    #[must_use]
    pub fn parents_of(&self, dimension: DimensionId) -> &[CascadeEdge] {
        self.parents
            .get(&dimension)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Every dimension that appears in the graph, parents before children.
    #[must_use]
    pub fn topological_order(&self) -> &[DimensionId] {
        &self.order
    }

    /// All dimensions reachable from `root` (excluding `root` itself), in
    /// topological order. This is the recompute set after a selection change
    /// at `root`.
    #[must_use]
    pub fn descendants_of(&self, root: DimensionId) -> Vec<DimensionId> {
        let mut reachable = std::collections::BTreeSet::new();
        let mut stack = vec![root];
        while let Some(node) = stack.pop() {
            for edge in self.children_of(node) {
                if reachable.insert(edge.to) {
                    stack.push(edge.to);
                }
            }
        }
        self.order
            .iter()
            .copied()
            .filter(|dimension| reachable.contains(dimension))
            .collect()
    }

    /// Longest path length in edges; the upper bound on reconciliation
    /// passes needed to reach a fixed point.
    #[must_use]
    pub fn depth(&self) -> usize {
        let mut depth: BTreeMap<DimensionId, usize> = BTreeMap::new();
        let mut max = 0;
        for dimension in &self.order {
            let here = depth.get(dimension).copied().unwrap_or(0);
            for edge in self.children_of(*dimension) {
                let child = depth.entry(edge.to).or_insert(0);
                *child = (*child).max(here + 1);
                max = max.max(*child);
            }
        }
        max
    }
}

fn topological_sort(
    children: &BTreeMap<DimensionId, Vec<CascadeEdge>>,
) -> Result<Vec<DimensionId>, GraphError> {
    let mut in_degree: BTreeMap<DimensionId, usize> = BTreeMap::new();
    for (from, edges) in children {
        in_degree.entry(*from).or_insert(0);
        for edge in edges {
            *in_degree.entry(edge.to).or_insert(0) += 1;
        }
    }

    let mut order = Vec::with_capacity(in_degree.len());
    // BTreeMap iteration keeps the walk deterministic across runs.
    while !in_degree.is_empty() {
        let Some(next) = in_degree
            .iter()
            .find(|(_, degree)| **degree == 0)
            .map(|(dimension, _)| *dimension)
        else {
            return Err(GraphError::CycleDetected {
                stuck: in_degree.keys().copied().collect(),
            });
        };
        in_degree.remove(&next);
        if let Some(edges) = children.get(&next) {
            for edge in edges {
                if let Some(degree) = in_degree.get_mut(&edge.to) {
                    *degree -= 1;
                }
            }
        }
        order.push(next);
    }
    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::{CascadeEdge, CascadeGraph, GraphError, Resolution};
    use cf_registry::DimensionId;

    #[test]
    fn standard_graph_orders_parents_before_children() {
        let graph = CascadeGraph::standard();
        let order = graph.topological_order();
        let position = |dimension: DimensionId| {
            order
                .iter()
                .position(|d| *d == dimension)
                .expect("in order")
        };

        assert!(position(DimensionId::Team) < position(DimensionId::Pic));
        assert!(position(DimensionId::Pic) < position(DimensionId::Pid));
        assert!(position(DimensionId::Pid) < position(DimensionId::Mid));
        assert!(position(DimensionId::Mid) < position(DimensionId::Zid));
        assert!(position(DimensionId::Pid) < position(DimensionId::Pubname));
        assert!(position(DimensionId::Zid) < position(DimensionId::Zonename));
    }

    #[test]
    fn team_to_pic_is_the_only_client_side_edge() {
        let graph = CascadeGraph::standard();
        let client_side: Vec<_> = graph
            .topological_order()
            .iter()
            .flat_map(|d| graph.children_of(*d))
            .filter(|edge| edge.resolution == Resolution::ClientSide)
            .collect();
        assert_eq!(client_side.len(), 1);
        assert_eq!(client_side[0].from, DimensionId::Team);
        assert_eq!(client_side[0].to, DimensionId::Pic);
    }

    #[test]
    fn descendants_follow_topological_order() {
        let graph = CascadeGraph::standard();
        assert_eq!(
            graph.descendants_of(DimensionId::Team),
            vec![
                DimensionId::Pic,
                DimensionId::Pid,
                DimensionId::Mid,
                DimensionId::Zid,
                DimensionId::Pubname,
                DimensionId::Medianame,
                DimensionId::Zonename,
            ]
        );
        assert_eq!(
            graph.descendants_of(DimensionId::Mid),
            vec![
                DimensionId::Zid,
                DimensionId::Medianame,
                DimensionId::Zonename
            ]
        );
        assert!(graph.descendants_of(DimensionId::Zonename).is_empty());
    }

    #[test]
    fn cycle_is_detected_at_construction() {
        let err = CascadeGraph::new(vec![
            CascadeEdge::remote(DimensionId::Pic, DimensionId::Pid),
            CascadeEdge::remote(DimensionId::Pid, DimensionId::Mid),
            CascadeEdge::remote(DimensionId::Mid, DimensionId::Pic),
        ])
        .expect_err("must fail");
        assert!(matches!(err, GraphError::CycleDetected { .. }));
    }

    #[test]
    fn duplicate_edges_are_rejected() {
        let err = CascadeGraph::new(vec![
            CascadeEdge::remote(DimensionId::Pic, DimensionId::Pid),
            CascadeEdge::client_side(DimensionId::Pic, DimensionId::Pid),
        ])
        .expect_err("must fail");
        assert_eq!(
            err,
            GraphError::DuplicateEdge {
                from: DimensionId::Pic,
                to: DimensionId::Pid
            }
        );
    }

    #[test]
    fn standard_graph_depth_bounds_reconciliation() {
        // team -> pic -> pid -> mid -> zid -> zonename is the longest chain.
        assert_eq!(CascadeGraph::standard().depth(), 5);
    }

    #[test]
    fn parents_of_reports_incoming_edges() {
        let graph = CascadeGraph::standard();
        let parents = graph.parents_of(DimensionId::Pid);
        assert_eq!(parents.len(), 1);
        assert_eq!(parents[0].from, DimensionId::Pic);
        assert!(graph.parents_of(DimensionId::Team).is_empty());
    }
}
