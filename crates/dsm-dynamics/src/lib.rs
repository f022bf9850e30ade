//! `dsm-dynamics` — the per-tick traffic simulation kernel.
//!
//! | Module        | Contents                                               |
//! |-----------------|---------------------------------------------------------|
//! | [`agent`]       | [`Agent`]                                                |
//! | [`config`]      | [`RoadDynamicsConfig`], [`RoadDynamicsConfigBuilder`]    |
//! | [`measurement`] | [`Measurement`], [`Observables`]                         |
//! | [`dynamics`]    | [`RoadDynamics`], the four-stage tick and the optimizer  |

pub mod agent;
pub mod config;
pub mod dynamics;
pub mod error;
pub mod measurement;

pub use agent::Agent;
pub use config::{OptimizerMode, RoadDynamicsConfig, RoadDynamicsConfigBuilder};
pub use dynamics::RoadDynamics;
pub use error::{DynamicsError, DynamicsResult};
pub use measurement::{Measurement, Observables};
