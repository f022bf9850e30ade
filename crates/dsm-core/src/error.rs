//! Shared error kinds for the `dsm-*` crates.
//!
//! Each downstream crate defines its own error enum for the failures local to
//! its layer and converts `DsmError` into a variant via `#[from]` rather than
//! boxing `dyn Error`. `DsmError` itself covers the handful of failure kinds
//! that are meaningful at every layer (bad arguments, capacity, overflow).

use thiserror::Error;

/// Error kinds common to every `dsm-*` crate.
#[derive(Debug, Error)]
pub enum DsmError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("index out of range: {0}")]
    IndexOutOfRange(String),

    #[error("capacity exceeded")]
    Full,

    #[error("overflow: {0}")]
    Overflow(String),

    #[error("programming error: {0}")]
    ProgrammingError(String),
}

/// Shorthand result type for `dsm-core`.
pub type DsmResult<T> = Result<T, DsmError>;
