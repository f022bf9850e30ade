//! `dsm-core` — foundational types for the `dsm` traffic microsimulation
//! kernel.
//!
//! This crate is a dependency of every other `dsm-*` crate. It intentionally
//! has no `dsm-*` dependencies and a minimal external footprint (`rand`,
//! `rand_distr`, `thiserror`).
//!
//! # What lives here
//!
//! | Module   | Contents                                              |
//! |----------|--------------------------------------------------------|
//! | [`ids`]  | `NodeId`, `StreetId`, `AgentId`, `ItinId`, `Delay`, `Time` |
//! | [`geo`]  | bearing wrapping, turn-direction classification        |
//! | [`rng`]  | `SimRng`, the kernel's one owned PRNG                   |
//! | [`error`]| `DsmError`, `DsmResult`                                 |

pub mod error;
pub mod geo;
pub mod ids;
pub mod rng;

pub use error::{DsmError, DsmResult};
pub use geo::{classify_turn, delta_angle, turn_key_centirad, wrap_signed, wrap_unsigned, Direction};
pub use ids::{AgentId, Delay, ItinId, NodeId, StreetId, Time};
pub use rng::SimRng;
