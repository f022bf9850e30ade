//! Error type for itinerary precomputation.

use dsm_core::NodeId;
use dsm_graph::GraphError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ItineraryError {
    #[error("no path to destination {0}")]
    NoPathToDestination(NodeId),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Graph(#[from] GraphError),
}

pub type ItineraryResult<T> = Result<T, ItineraryError>;
