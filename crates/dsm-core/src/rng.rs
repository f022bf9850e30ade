//! The simulation's single owned pseudo-random source.
//!
//! Per the concurrency model, the kernel is single-threaded and owns exactly
//! one `SimRng`; every stochastic choice (speed fluctuation, error/passage
//! probability gates, uniform next-street draws) pulls from it in a fixed
//! order so a run is fully reproducible from its seed.

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};

/// Owned, seeded PRNG backing all stochastic decisions in a `RoadDynamics`.
pub struct SimRng(SmallRng);

impl SimRng {
    pub fn new(seed: u64) -> Self {
        SimRng(SmallRng::seed_from_u64(seed))
    }

    #[inline]
    pub fn inner(&mut self) -> &mut SmallRng {
        &mut self.0
    }

    /// Uniform value in `range`.
    #[inline]
    pub fn gen_range<T, R>(&mut self, range: R) -> T
    where
        T: rand::distributions::uniform::SampleUniform,
        R: rand::distributions::uniform::SampleRange<T>,
    {
        self.0.gen_range(range)
    }

    /// `true` with probability `p`, clamped to `[0, 1]`.
    #[inline]
    pub fn gen_bool(&mut self, p: f64) -> bool {
        self.0.gen_bool(p.clamp(0.0, 1.0))
    }

    /// Sample `Normal(mean, mean * rel_std)`, or `mean` unchanged when
    /// `rel_std <= 0`. Used for the density-dependent assigned-speed draw.
    pub fn gen_gaussian(&mut self, mean: f64, rel_std: f64) -> f64 {
        if rel_std <= 0.0 {
            return mean;
        }
        let normal = Normal::new(mean, mean * rel_std).expect("finite mean/std");
        normal.sample(&mut self.0)
    }
}
