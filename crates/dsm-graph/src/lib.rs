//! `dsm-graph` — the road graph: sparse matrix, street and node variants,
//! and the graph that owns them.
//!
//! | Module           | Contents                                         |
//! |-------------------|---------------------------------------------------|
//! | [`sparse_matrix`] | [`SparseMatrix`]                                  |
//! | [`street`]        | [`Street`], [`SpireStreet`], [`StreetVariant`]    |
//! | [`node`]          | [`Intersection`], [`TrafficLight`], [`Roundabout`], [`NodeVariant`] |
//! | [`graph`]         | [`Graph`]                                         |

pub mod error;
pub mod graph;
pub mod node;
pub mod sparse_matrix;
pub mod street;

pub use error::{GraphError, GraphResult};
pub use graph::Graph;
pub use node::{Intersection, NodeCore, NodeVariant, Roundabout, TrafficLight, TrafficLightCycle};
pub use sparse_matrix::SparseMatrix;
pub use street::{SpireStreet, Street, StreetVariant, DEFAULT_V_MAX};
