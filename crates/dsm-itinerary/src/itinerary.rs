//! Destination-rooted shortest-path precomputation.
//!
//! [`update_paths`] runs a single-source Dijkstra from the destination over
//! the *reversed* adjacency (every incoming edge of a node is a step away
//! from the destination), then marks every outgoing edge of every node that
//! preserves the shortest distance. Ties are kept, so an itinerary's next-hop
//! matrix can route through any of several equally short paths.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

use dsm_core::{ItinId, NodeId};
use dsm_graph::{Graph, SparseMatrix};
use rayon::prelude::*;

use crate::error::{ItineraryError, ItineraryResult};

/// Destination plus the sparse boolean next-hop matrix computed for it.
#[derive(Clone, Debug)]
pub struct Itinerary {
    id: ItinId,
    destination: NodeId,
    path: SparseMatrix<bool>,
}

impl Itinerary {
    pub fn new(id: ItinId, destination: NodeId, n_nodes: usize) -> Self {
        Self { id, destination, path: SparseMatrix::new(n_nodes, n_nodes) }
    }

    pub fn id(&self) -> ItinId {
        self.id
    }

    pub fn destination(&self) -> NodeId {
        self.destination
    }

    pub fn path(&self) -> &SparseMatrix<bool> {
        &self.path
    }

    /// Outgoing neighbors of `node` that lie on some shortest path to this
    /// itinerary's destination.
    pub fn next_hops(&self, node: NodeId) -> Vec<NodeId> {
        self.path
            .get_row(node.index(), false)
            .into_iter()
            .filter(|&(_, &v)| v)
            .map(|(col, _)| NodeId(col as u32))
            .collect()
    }

    /// Recompute `path` from `graph`. Fails with `NoPathToDestination` if
    /// the destination is unreachable from every other node.
    pub fn update_path(&mut self, graph: &Graph) -> ItineraryResult<()> {
        self.path = compute_shortest_path_matrix(graph, self.destination)?;
        Ok(())
    }
}

#[derive(Copy, Clone, PartialEq)]
struct MinFloat(f64);

impl Eq for MinFloat {}

impl PartialOrd for MinFloat {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MinFloat {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.partial_cmp(&other.0).unwrap_or(Ordering::Equal)
    }
}

/// Distance from every node to `destination`, computed by Dijkstra over the
/// reversed adjacency (i.e. walking incoming edges backward from the
/// destination).
fn distances_to(graph: &Graph, destination: NodeId) -> HashMap<NodeId, f64> {
    let mut dist: HashMap<NodeId, f64> = HashMap::new();
    let mut heap: BinaryHeap<std::cmp::Reverse<(MinFloat, NodeId)>> = BinaryHeap::new();

    dist.insert(destination, 0.0);
    heap.push(std::cmp::Reverse((MinFloat(0.0), destination)));

    while let Some(std::cmp::Reverse((MinFloat(cost), node))) = heap.pop() {
        if cost > *dist.get(&node).unwrap_or(&f64::INFINITY) {
            continue;
        }
        for (_, src, length) in graph.in_edges(node) {
            let new_cost = cost + length;
            if new_cost < *dist.get(&src).unwrap_or(&f64::INFINITY) {
                dist.insert(src, new_cost);
                heap.push(std::cmp::Reverse((MinFloat(new_cost), src)));
            }
        }
    }

    dist
}

/// Build the `N x N` next-hop bitmap for `destination`.
fn compute_shortest_path_matrix(
    graph: &Graph,
    destination: NodeId,
) -> ItineraryResult<SparseMatrix<bool>> {
    const EPS: f64 = 1e-6;
    let dist = distances_to(graph, destination);
    let n = graph.n_nodes();
    let mut path = SparseMatrix::new(n, n);

    for u in graph.node_ids() {
        if u == destination {
            continue;
        }
        let Some(&du) = dist.get(&u) else { continue };
        for (_, v, length) in graph.out_edges(u) {
            if let Some(&dv) = dist.get(&v) {
                if (du - (length + dv)).abs() < EPS {
                    path.insert_or_assign(u.index(), v.index(), true)?;
                }
            }
        }
    }

    if path.is_empty() {
        return Err(ItineraryError::NoPathToDestination(destination));
    }
    Ok(path)
}

/// Recompute every itinerary's path against `graph` in parallel. Any single
/// failure aborts the whole batch (the first error encountered is returned).
///
/// This is the one place the kernel uses threads: each itinerary reads the
/// graph and writes its own disjoint sparse matrix, so there is no shared
/// mutable state across the fan-out.
pub fn update_paths(graph: &Graph, itineraries: &mut [Itinerary]) -> ItineraryResult<()> {
    let recomputed: Result<Vec<(usize, SparseMatrix<bool>)>, ItineraryError> = itineraries
        .par_iter()
        .enumerate()
        .map(|(i, it)| compute_shortest_path_matrix(graph, it.destination).map(|p| (i, p)))
        .collect();

    let recomputed = recomputed?;
    for (i, path) in recomputed {
        itineraries[i].path = path;
    }
    Ok(())
}
