//! Scalar mean/stddev reducer used for observables, and the `Observables`
//! snapshot assembled from it each reporting period.

use std::collections::HashMap;

use dsm_core::{StreetId, Time};

/// Streaming mean/stddev accumulator (Welford's algorithm — numerically
/// stable and one-pass, so a reporting period never needs to retain the
/// individual samples it was built from).
#[derive(Clone, Copy, Debug, Default)]
pub struct Measurement {
    count: u64,
    mean: f64,
    m2: f64,
}

impl Measurement {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, x: f64) {
        self.count += 1;
        let delta = x - self.mean;
        self.mean += delta / self.count as f64;
        let delta2 = x - self.mean;
        self.m2 += delta * delta2;
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.mean
        }
    }

    /// Sample standard deviation; `0.0` for fewer than two samples.
    pub fn stddev(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            (self.m2 / (self.count - 1) as f64).sqrt()
        }
    }

    /// Standard error of the mean; `0.0` for fewer than two samples.
    pub fn stderr(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.stddev() / (self.count as f64).sqrt()
        }
    }
}

/// Aggregate observables for one reporting period, plus the per-street
/// breakdown an external collaborator would serialize.
#[derive(Clone, Debug)]
pub struct Observables {
    pub time: Time,
    pub n_agents: u64,
    pub mean_speed: f64,
    pub mean_speed_err: f64,
    pub mean_density: f64,
    pub mean_density_err: f64,
    pub mean_flow: f64,
    pub mean_flow_err: f64,
    pub mean_travel_time: f64,
    pub mean_travel_time_err: f64,
    pub mean_spire_flow: f64,
    pub mean_spire_flow_err: f64,
    pub per_street_density: HashMap<StreetId, f64>,
}
