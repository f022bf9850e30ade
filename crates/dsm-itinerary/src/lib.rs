//! `dsm-itinerary` — destination-rooted shortest-path precomputation.
//!
//! | Module       | Contents                                    |
//! |---------------|----------------------------------------------|
//! | [`itinerary`] | [`Itinerary`], [`update_paths`]              |

pub mod error;
pub mod itinerary;

pub use error::{ItineraryError, ItineraryResult};
pub use itinerary::{update_paths, Itinerary};
