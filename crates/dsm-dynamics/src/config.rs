//! Dynamics configuration: the clamped parameter table from the
//! specification's callable surface, built fluently.

use std::collections::HashSet;

use dsm_core::{NodeId, Time};

/// Traffic-light retuning shift mode. `DoubleTail` additionally scales the
/// shift by the node's local-vs-global density ratio.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
pub enum OptimizerMode {
    #[default]
    SingleTail,
    DoubleTail,
}

/// Clamped, validated configuration for a [`crate::RoadDynamics`] run.
#[derive(Clone, Debug)]
pub struct RoadDynamicsConfig {
    pub seed: u64,
    pub error_probability: f64,
    pub passage_probability: f64,
    pub min_speed_ratio: f64,
    pub speed_fluctuation_std: f64,
    pub max_flow_percentage: f64,
    pub data_update_period: Option<Time>,
    pub force_priorities: bool,
    pub destination_nodes: HashSet<NodeId>,
    pub optimizer_threshold: f64,
    pub optimizer_density_tolerance: f64,
    pub optimizer_mode: OptimizerMode,
}

impl Default for RoadDynamicsConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            error_probability: 0.0,
            passage_probability: 1.0,
            min_speed_ratio: 0.0,
            speed_fluctuation_std: 0.0,
            max_flow_percentage: 1.0,
            data_update_period: None,
            force_priorities: false,
            destination_nodes: HashSet::new(),
            optimizer_threshold: 0.1,
            optimizer_density_tolerance: 0.1,
            optimizer_mode: OptimizerMode::SingleTail,
        }
    }
}

/// Fluent builder for [`RoadDynamicsConfig`]; every setter clamps its input
/// to the range the specification gives for that parameter.
#[derive(Clone, Debug, Default)]
pub struct RoadDynamicsConfigBuilder {
    config: RoadDynamicsConfig,
}

impl RoadDynamicsConfigBuilder {
    pub fn new() -> Self {
        Self { config: RoadDynamicsConfig::default() }
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.config.seed = seed;
        self
    }

    pub fn error_probability(mut self, p: f64) -> Self {
        self.config.error_probability = p.clamp(0.0, 1.0);
        self
    }

    pub fn passage_probability(mut self, p: f64) -> Self {
        self.config.passage_probability = p.clamp(0.0, 1.0);
        self
    }

    pub fn min_speed_ratio(mut self, sigma: f64) -> Self {
        self.config.min_speed_ratio = sigma.clamp(0.0, 1.0);
        self
    }

    pub fn speed_fluctuation_std(mut self, std: f64) -> Self {
        self.config.speed_fluctuation_std = std.max(0.0);
        self
    }

    pub fn max_flow_percentage(mut self, p: f64) -> Self {
        self.config.max_flow_percentage = p.clamp(f64::EPSILON, 1.0);
        self
    }

    pub fn data_update_period(mut self, period: Time) -> Self {
        self.config.data_update_period = Some(period.max(1));
        self
    }

    pub fn force_priorities(mut self, force: bool) -> Self {
        self.config.force_priorities = force;
        self
    }

    /// Replace the destination-node set wholesale. Calling this twice with
    /// the same set is equivalent to calling it once.
    pub fn destination_nodes(mut self, nodes: HashSet<NodeId>) -> Self {
        self.config.destination_nodes = nodes;
        self
    }

    pub fn optimizer_threshold(mut self, t: f64) -> Self {
        self.config.optimizer_threshold = t.clamp(0.0, 1.0);
        self
    }

    pub fn optimizer_density_tolerance(mut self, t: f64) -> Self {
        self.config.optimizer_density_tolerance = t.clamp(0.0, 1.0);
        self
    }

    pub fn optimizer_mode(mut self, mode: OptimizerMode) -> Self {
        self.config.optimizer_mode = mode;
        self
    }

    pub fn build(self) -> RoadDynamicsConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamps_out_of_range_probabilities() {
        let cfg = RoadDynamicsConfigBuilder::new()
            .error_probability(2.0)
            .passage_probability(-1.0)
            .build();
        assert_eq!(cfg.error_probability, 1.0);
        assert_eq!(cfg.passage_probability, 0.0);
    }

    #[test]
    fn destination_nodes_set_is_idempotent() {
        let mut s = HashSet::new();
        s.insert(NodeId(0));
        s.insert(NodeId(1));
        let once = RoadDynamicsConfigBuilder::new().destination_nodes(s.clone()).build();
        let twice = RoadDynamicsConfigBuilder::new()
            .destination_nodes(s.clone())
            .destination_nodes(s.clone())
            .build();
        assert_eq!(once.destination_nodes, twice.destination_nodes);
    }
}
