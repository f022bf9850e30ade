//! The road graph: owns nodes and streets, builds the adjacency bitmap, and
//! renumbers streets to the canonical `src*N + dst` id scheme.

use std::collections::HashMap;
use std::f64::consts::TAU;

use dsm_core::{wrap_unsigned, NodeId, StreetId};

use crate::error::{GraphError, GraphResult};
use crate::node::NodeVariant;
use crate::sparse_matrix::SparseMatrix;
use crate::street::StreetVariant;

/// Owns every node and street of the simulation's road network.
///
/// Streets are keyed by their *current* id, which is only canonical
/// (`src*N + dst`) after [`Graph::build_adj`] has run. The specification
/// forbids structural mutation after that point; this type does not enforce
/// it at the type level (the original doesn't either) but callers are
/// expected to call `build_adj` exactly once, after all nodes/streets are
/// added, before handing the graph to the dynamics layer.
#[derive(Clone, Debug, Default)]
pub struct Graph {
    nodes: HashMap<NodeId, NodeVariant>,
    streets: HashMap<StreetId, StreetVariant>,
    adjacency: SparseMatrix<bool>,
    built: bool,
}

impl Graph {
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
            streets: HashMap::new(),
            adjacency: SparseMatrix::new(0, 0),
            built: false,
        }
    }

    pub fn add_node(&mut self, id: NodeId, node: NodeVariant) {
        self.nodes.insert(id, node);
    }

    pub fn add_street(&mut self, street: StreetVariant) {
        let id = street.street().id();
        self.streets.insert(id, street);
    }

    pub fn node(&self, id: NodeId) -> Option<&NodeVariant> {
        self.nodes.get(&id)
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut NodeVariant> {
        self.nodes.get_mut(&id)
    }

    pub fn street(&self, id: StreetId) -> Option<&StreetVariant> {
        self.streets.get(&id)
    }

    pub fn street_mut(&mut self, id: StreetId) -> Option<&mut StreetVariant> {
        self.streets.get_mut(&id)
    }

    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.keys().copied()
    }

    pub fn street_ids(&self) -> impl Iterator<Item = StreetId> + '_ {
        self.streets.keys().copied()
    }

    pub fn n_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_built(&self) -> bool {
        self.built
    }

    pub fn adjacency(&self) -> &SparseMatrix<bool> {
        &self.adjacency
    }

    /// Find the street from `src` to `dst`, if one exists. `O(streets)`
    /// before `build_adj`; after `build_adj` this is `O(1)` via the
    /// canonical id.
    pub fn find_street(&self, src: NodeId, dst: NodeId) -> Option<StreetId> {
        if self.built {
            let n = self.n_nodes() as u32;
            let id = StreetId(src.0 * n + dst.0);
            return self.streets.contains_key(&id).then_some(id);
        }
        self.streets
            .values()
            .map(|s| s.street())
            .find(|s| s.src() == src && s.dst() == dst)
            .map(|s| s.id())
    }

    /// Every outgoing street id, its destination, and its length, for `node`.
    pub fn out_edges(&self, node: NodeId) -> Vec<(StreetId, NodeId, f64)> {
        self.streets
            .values()
            .map(|s| s.street())
            .filter(|s| s.src() == node)
            .map(|s| (s.id(), s.dst(), s.length()))
            .collect()
    }

    /// Every incoming street id, its source, and its length, for `node`.
    pub fn in_edges(&self, node: NodeId) -> Vec<(StreetId, NodeId, f64)> {
        self.streets
            .values()
            .map(|s| s.street())
            .filter(|s| s.dst() == node)
            .map(|s| (s.id(), s.src(), s.length()))
            .collect()
    }

    /// Renumber every street to the canonical `src*N + dst` id, rebuild the
    /// adjacency bitmap, recompute bearings from node coordinates where
    /// present, and mark the graph as built. Idempotent: calling it again
    /// after nothing has changed reproduces the same ids and bitmap.
    pub fn build_adj(&mut self) -> GraphResult<()> {
        let n = self.nodes.len() as u32;
        if n == 0 {
            return Err(GraphError::InvalidArgument("graph has no nodes".into()));
        }

        let mut renumbered = HashMap::with_capacity(self.streets.len());
        for (_, mut variant) in self.streets.drain() {
            let s = variant.street_mut();
            for &endpoint in &[s.src(), s.dst()] {
                if !self.nodes.contains_key(&endpoint) {
                    return Err(GraphError::InvalidArgument(format!(
                        "street endpoint {endpoint} is not a registered node"
                    )));
                }
            }
            let canonical = StreetId(s.src().0 * n + s.dst().0);
            s.set_id(canonical);
            renumbered.insert(canonical, variant);
        }
        self.streets = renumbered;

        let mut adjacency = SparseMatrix::new(n as usize, n as usize);
        for s in self.streets.values().map(|v| v.street()) {
            adjacency.insert_or_assign(s.src().index(), s.dst().index(), true)?;
        }
        self.adjacency = adjacency;

        let coords: HashMap<NodeId, (f64, f64)> = self
            .nodes
            .iter()
            .filter_map(|(&id, n)| n.core().coords().map(|c| (id, c)))
            .collect();
        for variant in self.streets.values_mut() {
            let s = variant.street_mut();
            if let (Some(&src_c), Some(&dst_c)) = (coords.get(&s.src()), coords.get(&s.dst())) {
                // coords are (lat, lon) <==> (y, x); bearing is atan2(Δlat, Δlon).
                let bearing = wrap_unsigned((dst_c.0 - src_c.0).atan2(dst_c.1 - src_c.1));
                s.set_bearing(bearing.rem_euclid(TAU));
            }
        }

        self.built = true;
        Ok(())
    }

    /// Total admission capacity summed over every street — the graph-wide
    /// ceiling on simultaneously alive agents.
    pub fn max_capacity(&self) -> u64 {
        self.streets.values().map(|s| s.street().capacity() as u64).sum()
    }
}
