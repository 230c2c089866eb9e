//! Dependency graph over virtual points: each `VirtualPoint`
//! has edges to the points its formula reads. The graph must be a DAG at
//! all times - cycles are rejected at load time, not discovered mid-scan.

use collector_errors::{CollectorError, Result};
use collector_model::PointId;
use std::collections::{HashMap, HashSet};

#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("cycle detected through virtual point {0}")]
    Cycle(PointId),
}

impl From<GraphError> for CollectorError {
    fn from(e: GraphError) -> Self {
        CollectorError::config("virtual_point.inputs", e.to_string())
    }
}

/// Edges point from a virtual point to the points it reads (its inputs),
/// whether those are raw data points or other virtual points.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    edges: HashMap<PointId, Vec<PointId>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares that `virtual_point_id` reads `inputs`. Virtual points
    /// with no other virtual-point inputs are leaves of the graph.
    pub fn add_node(&mut self, virtual_point_id: PointId, inputs: Vec<PointId>) {
        self.edges.insert(virtual_point_id, inputs);
    }

    /// Topological order of all declared virtual points, inputs before
    /// dependents, erroring on the first cycle found (config that
    /// invariant: the graph is a DAG at all times).
    pub fn topological_order(&self) -> Result<Vec<PointId>> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Temporary,
            Permanent,
        }

        let mut marks: HashMap<PointId, Mark> = HashMap::new();
        let mut order = Vec::with_capacity(self.edges.len());

        fn visit(
            node: PointId,
            edges: &HashMap<PointId, Vec<PointId>>,
            marks: &mut HashMap<PointId, Mark>,
            order: &mut Vec<PointId>,
        ) -> Result<()> {
            match marks.get(&node) {
                Some(Mark::Permanent) => return Ok(()),
                Some(Mark::Temporary) => return Err(GraphError::Cycle(node).into()),
                None => {}
            }
            marks.insert(node, Mark::Temporary);
            if let Some(deps) = edges.get(&node) {
                for &dep in deps {
                    // Only recurse into nodes that are themselves virtual
                    // points (raw data points are leaves with no entry).
                    if edges.contains_key(&dep) {
                        visit(dep, edges, marks, order)?;
                    }
                }
            }
            marks.insert(node, Mark::Permanent);
            order.push(node);
            Ok(())
        }

        let mut nodes: Vec<PointId> = self.edges.keys().copied().collect();
        nodes.sort_unstable();
        for node in nodes {
            visit(node, &self.edges, &mut marks, &mut order)?;
        }
        Ok(order)
    }

    /// Virtual points transitively triggered by a change in `source`,
    /// each appearing once even if reachable through multiple paths
    /// (re-entrant triggers from the same scan are coalesced).
    pub fn downstream_of(&self, source: PointId) -> Vec<PointId> {
        let mut reverse: HashMap<PointId, Vec<PointId>> = HashMap::new();
        for (&vp, inputs) in &self.edges {
            for &input in inputs {
                reverse.entry(input).or_default().push(vp);
            }
        }

        let mut seen = HashSet::new();
        let mut stack = vec![source];
        let mut result = Vec::new();
        while let Some(node) = stack.pop() {
            if let Some(dependents) = reverse.get(&node) {
                for &dep in dependents {
                    if seen.insert(dep) {
                        result.push(dep);
                        stack.push(dep);
                    }
                }
            }
        }
        result
    }
}
