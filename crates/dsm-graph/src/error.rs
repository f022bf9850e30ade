//! Error type for the graph layer.

use dsm_core::{DsmError, StreetId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("index out of range: {0}")]
    IndexOutOfRange(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("capacity exceeded")]
    Full,

    #[error("agent already present")]
    AlreadyPresent,

    #[error("agent not waiting")]
    NotWaiting,

    #[error("street {0} not found")]
    StreetNotFound(StreetId),

    #[error(transparent)]
    Core(#[from] DsmError),
}

pub type GraphResult<T> = Result<T, GraphError>;
