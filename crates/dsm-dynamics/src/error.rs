//! Error type for the dynamics layer — the one crate whose errors a caller
//! running `evolve` in a loop actually has to handle.

use dsm_core::{AgentId, NodeId};
use dsm_graph::GraphError;
use dsm_itinerary::ItineraryError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DynamicsError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("overflow: {0}")]
    Overflow(String),

    #[error("programming error: {0}")]
    ProgrammingError(String),

    #[error("agent {0} not found")]
    AgentNotFound(AgentId),

    #[error("node {0} not found")]
    NodeNotFound(NodeId),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Itinerary(#[from] ItineraryError),
}

pub type DynamicsResult<T> = Result<T, DynamicsError>;
