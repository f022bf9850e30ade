//! `RoadDynamics`: the simulation loop itself — agent injection, the
//! four-stage tick, next-street selection, turn bookkeeping, and the
//! traffic-light feedback controller.

use std::collections::{HashMap, HashSet};

use dsm_core::{classify_turn, delta_angle, turn_key_centirad, AgentId, Delay, Direction, ItinId, NodeId, SimRng, StreetId, Time};
use dsm_graph::node::{NodeVariant, TrafficLight};
use dsm_graph::Graph;
use dsm_itinerary::{update_paths, Itinerary};

use crate::agent::Agent;
use crate::config::{OptimizerMode, RoadDynamicsConfig};
use crate::error::{DynamicsError, DynamicsResult};
use crate::measurement::{Measurement, Observables};

/// The simulation kernel: owns the graph, every agent and itinerary, the
/// PRNG, and the per-tick bookkeeping the tick itself needs (pending
/// next-street memos, turn tallies, street tails for the optimizer).
pub struct RoadDynamics {
    graph: Graph,
    config: RoadDynamicsConfig,
    rng: SimRng,
    time: Time,
    previous_optimization_time: Time,

    agents: HashMap<AgentId, Agent>,
    next_agent_id: u32,
    injection_seq: u64,

    itineraries: HashMap<ItinId, Itinerary>,
    next_itin_id: u32,

    /// `m_agentNextStreetId`: the street an agent has committed to but not
    /// yet entered.
    agent_next_street: HashMap<AgentId, StreetId>,
    /// `[Right, Straight, Left, U]` per street, indexed by `Direction as usize`.
    turn_counts: HashMap<StreetId, [u64; 4]>,
    /// Per-street neighbor in each turn bucket, for reporting.
    turn_street_map: HashMap<StreetId, [Option<StreetId>; 4]>,
    street_tails: HashMap<StreetId, u64>,
    travel_times: Vec<f64>,
}

impl RoadDynamics {
    /// Build a `RoadDynamics` over an already-`build_adj`'d graph. Creates
    /// one identity itinerary per `config.destination_nodes` entry.
    pub fn new(graph: Graph, config: RoadDynamicsConfig) -> DynamicsResult<Self> {
        if !graph.is_built() {
            return Err(DynamicsError::InvalidArgument("graph must be built before use".into()));
        }
        let turn_street_map = build_turn_street_map(&graph);
        let turn_counts = graph.street_ids().map(|id| (id, [0u64; 4])).collect();
        let street_tails = graph.street_ids().map(|id| (id, 0u64)).collect();
        let rng = SimRng::new(config.seed);

        let destinations: Vec<NodeId> = config.destination_nodes.iter().copied().collect();
        let mut dynamics = Self {
            graph,
            config,
            rng,
            time: 0,
            previous_optimization_time: 0,
            agents: HashMap::new(),
            next_agent_id: 0,
            injection_seq: 0,
            itineraries: HashMap::new(),
            next_itin_id: 0,
            agent_next_street: HashMap::new(),
            turn_counts,
            turn_street_map,
            street_tails,
            travel_times: Vec::new(),
        };
        for destination in destinations {
            dynamics.add_itinerary(destination)?;
        }
        Ok(dynamics)
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn config(&self) -> &RoadDynamicsConfig {
        &self.config
    }

    pub fn time(&self) -> Time {
        self.time
    }

    pub fn agent(&self, id: AgentId) -> Option<&Agent> {
        self.agents.get(&id)
    }

    pub fn agents(&self) -> &HashMap<AgentId, Agent> {
        &self.agents
    }

    pub fn itinerary(&self, id: ItinId) -> Option<&Itinerary> {
        self.itineraries.get(&id)
    }

    pub fn itineraries(&self) -> &HashMap<ItinId, Itinerary> {
        &self.itineraries
    }

    pub fn turn_counts(&self) -> &HashMap<StreetId, [u64; 4]> {
        &self.turn_counts
    }

    pub fn turn_mapping(&self) -> &HashMap<StreetId, [Option<StreetId>; 4]> {
        &self.turn_street_map
    }

    /// Each street's turn fractions, `[Right, Straight, Left, U]`; all zero
    /// if the street has not been crossed yet. Optionally clears the tally.
    pub fn turn_probabilities(&mut self, reset: bool) -> HashMap<StreetId, [f64; 4]> {
        let mut out = HashMap::with_capacity(self.turn_counts.len());
        for (&street, counts) in self.turn_counts.iter() {
            let sum: u64 = counts.iter().sum();
            let mut probabilities = [0.0; 4];
            if sum != 0 {
                for (i, &c) in counts.iter().enumerate() {
                    probabilities[i] = c as f64 / sum as f64;
                }
            }
            out.insert(street, probabilities);
        }
        if reset {
            for counts in self.turn_counts.values_mut() {
                *counts = [0; 4];
            }
        }
        out
    }

    /// Register a new itinerary targeting `destination`, computing its
    /// initial shortest-path matrix immediately.
    pub fn add_itinerary(&mut self, destination: NodeId) -> DynamicsResult<ItinId> {
        let id = ItinId(self.next_itin_id);
        self.next_itin_id += 1;
        let mut itin = Itinerary::new(id, destination, self.graph.n_nodes());
        itin.update_path(&self.graph)?;
        self.itineraries.insert(id, itin);
        Ok(id)
    }

    /// Recompute every itinerary's shortest-path matrix against the current
    /// graph, in parallel.
    pub fn update_all_paths(&mut self) -> DynamicsResult<()> {
        let mut ids: Vec<ItinId> = self.itineraries.keys().copied().collect();
        ids.sort();
        let mut batch: Vec<Itinerary> = ids.iter().map(|id| self.itineraries[id].clone()).collect();
        update_paths(&self.graph, &mut batch)?;
        for (id, itin) in ids.into_iter().zip(batch) {
            self.itineraries.insert(id, itin);
        }
        Ok(())
    }

    /// Replace the destination-node set and the itineraries derived from it.
    /// Idempotent: calling twice with the same set reproduces the same
    /// itinerary ids and paths.
    pub fn set_destination_nodes(&mut self, nodes: HashSet<NodeId>) -> DynamicsResult<()> {
        if nodes == self.config.destination_nodes {
            return Ok(());
        }
        self.itineraries.clear();
        self.next_itin_id = 0;
        self.config.destination_nodes = nodes;
        let destinations: Vec<NodeId> = self.config.destination_nodes.iter().copied().collect();
        for destination in destinations {
            self.add_itinerary(destination)?;
        }
        Ok(())
    }

    fn alive_count(&self) -> u64 {
        self.agents.len() as u64
    }

    /// Inject a new agent at `source`. `itinerary = None` means "random": it
    /// picks exits uniformly, but still requires at least one itinerary to
    /// exist in the pool (mirrors the original's uniform itinerary-sampling
    /// injection path, which is the only injection route that ever produces
    /// a random agent).
    pub fn inject_agent(
        &mut self,
        source: NodeId,
        itinerary: Option<ItinId>,
        reinsert: bool,
    ) -> DynamicsResult<AgentId> {
        if self.graph.node(source).is_none() {
            return Err(DynamicsError::NodeNotFound(source));
        }
        if let Some(id) = itinerary {
            if !self.itineraries.contains_key(&id) {
                return Err(DynamicsError::InvalidArgument(format!("unknown itinerary {id}")));
            }
        } else if self.itineraries.is_empty() {
            return Err(DynamicsError::InvalidArgument(
                "cannot inject a random agent with no itineraries in the pool".into(),
            ));
        }
        if self.alive_count() >= self.graph.max_capacity() {
            return Err(DynamicsError::Overflow("graph is at maximum agent capacity".into()));
        }

        let id = AgentId(self.next_agent_id);
        self.next_agent_id += 1;
        let seq = self.injection_seq;
        self.injection_seq += 1;
        self.agents.insert(id, Agent::new(id, itinerary, source, reinsert, seq));
        Ok(id)
    }

    /// Mean over every street's normalized density.
    fn street_mean_density(&self) -> Measurement {
        let mut m = Measurement::new();
        for variant in self.graph.street_ids().filter_map(|id| self.graph.street(id)) {
            m.add(variant.street().density(true));
        }
        m
    }

    /// Draw a density-dependent entry speed for a street, per the speed
    /// rule: Gaussian around `v_max * (1 - sigma * density)`, negative
    /// draws clipped to `v_max * (1 - sigma)`.
    fn draw_entry_speed(&mut self, street_id: StreetId) -> f64 {
        let (v_max, density) = {
            let street = self.graph.street(street_id).expect("street exists").street();
            (street.v_max(), street.density(true))
        };
        let sigma = self.config.min_speed_ratio;
        let mean = v_max * (1.0 - sigma * density);
        let drawn = self.rng.gen_gaussian(mean, self.config.speed_fluctuation_std);
        if drawn < 0.0 {
            v_max * (1.0 - sigma)
        } else {
            drawn
        }
    }

    /// Mean speed of agents on `street`, per the §4.2 reporting rule: the
    /// closed form when nothing has reached the exit queues yet, otherwise
    /// the actual mean of every agent physically on the street plus any
    /// agent that has already been released to the downstream node but is
    /// still attributed to this street.
    fn street_mean_speed(&self, street_id: StreetId) -> f64 {
        let variant = self.graph.street(street_id).expect("street exists");
        let street = variant.street();
        if street.n_exiting_agents() == 0 {
            return street.mean_speed_closed_form(self.config.min_speed_ratio);
        }
        let mut m = Measurement::new();
        for id in street.agents_on_street() {
            if let Some(a) = self.agents.get(&id) {
                m.add(a.speed());
            }
        }
        if let Some(node) = self.graph.node(street.dst()) {
            for id in pending_agents_at(node) {
                if self.agents.get(&id).and_then(|a| a.current_street()) == Some(street_id) {
                    if let Some(a) = self.agents.get(&id) {
                        m.add(a.speed());
                    }
                }
            }
        }
        m.mean()
    }

    fn increase_turn_count(&mut self, street_id: StreetId, delta: f64) {
        let direction = classify_turn(delta);
        let entry = self.turn_counts.entry(street_id).or_insert([0; 4]);
        entry[direction as usize] = entry[direction as usize].saturating_add(1);
    }

    /// `m_nextStreetId`: pick a destination street out of `node`'s outgoing
    /// streets. Non-random agents use the itinerary row with probability
    /// `1 - error_probability`; otherwise (and for random agents) the full
    /// adjacency row is used. Rejects U-turns via resampling unless the node
    /// is a roundabout or only one candidate exists.
    fn next_street_id(
        &mut self,
        agent_id: AgentId,
        node: NodeId,
        prev_street: Option<StreetId>,
    ) -> DynamicsResult<StreetId> {
        let agent = self.agents.get(&agent_id).ok_or(DynamicsError::AgentNotFound(agent_id))?;
        let mut candidates: Vec<StreetId> = Vec::new();
        if !agent.is_random() {
            let roll: f64 = self.rng.gen_range(0.0..1.0);
            if !self.itineraries.is_empty() && roll > self.config.error_probability {
                let itin_id = agent.itinerary().expect("non-random agent has an itinerary");
                let itin = self
                    .itineraries
                    .get(&itin_id)
                    .ok_or_else(|| DynamicsError::InvalidArgument(format!("unknown itinerary {itin_id}")))?;
                if itin.destination() != node {
                    candidates = itin
                        .next_hops(node)
                        .into_iter()
                        .filter_map(|v| self.graph.find_street(node, v))
                        .collect();
                }
            }
        }
        if candidates.is_empty() {
            candidates = self.graph.out_edges(node).into_iter().map(|(id, _, _)| id).collect();
        }
        if candidates.is_empty() {
            return Err(DynamicsError::InvalidArgument(format!("node {node} has no outgoing streets")));
        }

        let is_roundabout = matches!(self.graph.node(node), Some(NodeVariant::Roundabout(_)));
        loop {
            let idx = self.rng.gen_range(0..candidates.len());
            let candidate = candidates[idx];
            if is_roundabout || prev_street.is_none() || candidates.len() <= 1 {
                return Ok(candidate);
            }
            let cand_dst = self.graph.street(candidate).expect("candidate exists").street().dst();
            let prev_src = self
                .graph
                .street(prev_street.expect("checked above"))
                .expect("prev street exists")
                .street()
                .src();
            if cand_dst != prev_src {
                return Ok(candidate);
            }
        }
    }

    /// Assign `agent_id` onto `street_id`: draw its entry speed, compute its
    /// delay, and register it in the street's waiting set.
    fn assign_agent_to_street(&mut self, agent_id: AgentId, street_id: StreetId) -> DynamicsResult<()> {
        let speed = self.draw_entry_speed(street_id);
        let length = self.graph.street(street_id).expect("street exists").street().length();
        let delay = (length / speed).ceil();
        if !delay.is_finite() || delay > Delay::MAX as f64 {
            return Err(DynamicsError::Overflow(format!("delay overflow entering street {street_id}")));
        }
        if let Some(a) = self.agents.get_mut(&agent_id) {
            a.set_current_street(Some(street_id));
            a.set_speed(speed);
            a.set_delay(delay as Delay);
        }
        self.graph
            .street_mut(street_id)
            .ok_or(DynamicsError::InvalidArgument(format!("unknown street {street_id}")))?
            .add_agent(agent_id)?;
        Ok(())
    }

    // ---- Stage A: streets ----------------------------------------------

    fn evolve_street(&mut self, street_id: StreetId, reinsert_agents: bool) -> DynamicsResult<()> {
        let n_lanes = self
            .graph
            .street(street_id)
            .ok_or(DynamicsError::InvalidArgument(format!("unknown street {street_id}")))?
            .street()
            .n_lanes();
        for lane in 0..n_lanes {
            self.evolve_street_lane(street_id, lane, reinsert_agents)?;
        }
        Ok(())
    }

    fn evolve_street_lane(&mut self, street_id: StreetId, lane: usize, reinsert_agents: bool) -> DynamicsResult<()> {
        let agent_id = match self.graph.street(street_id).and_then(|s| s.street().peek(lane)) {
            Some(id) => id,
            None => return Ok(()),
        };
        let agent_delay = self.agents.get(&agent_id).ok_or(DynamicsError::AgentNotFound(agent_id))?.delay();
        if agent_delay > 0 {
            return Ok(());
        }
        if let Some(a) = self.agents.get_mut(&agent_id) {
            a.set_speed(0.0);
        }

        let dst_node = self.graph.street(street_id).expect("street exists").street().dst();
        let dst_full = self.graph.node(dst_node).map(|n| n.is_full()).unwrap_or(true);
        if dst_full {
            return Ok(());
        }
        if let Some(NodeVariant::TrafficLight(tl)) = self.graph.node(dst_node) {
            let direction = self.graph.street(street_id).expect("street exists").street().lane_direction(lane);
            if !tl.is_green(street_id, direction)? {
                return Ok(());
            }
        }

        let can_pass = self.rng.gen_bool(self.config.passage_probability);
        let mut arrived = false;
        if !can_pass {
            let is_random = self.agents.get(&agent_id).expect("agent exists").is_random();
            if is_random {
                self.agent_next_street.remove(&agent_id);
                arrived = true;
            } else {
                return Ok(());
            }
        }
        if !arrived {
            let agent = self.agents.get(&agent_id).expect("agent exists");
            if !agent.is_random() {
                let itin_id = agent.itinerary().expect("non-random agent has an itinerary");
                if let Some(itin) = self.itineraries.get(&itin_id) {
                    if itin.destination() == dst_node {
                        arrived = true;
                    }
                }
            }
        }

        if arrived {
            self.graph.street_mut(street_id).expect("street exists").street_mut().dequeue(lane);
            let elapsed = self.agents.get(&agent_id).expect("agent exists").time() as f64;
            self.travel_times.push(elapsed);
            if reinsert_agents {
                if let Some(a) = self.agents.get_mut(&agent_id) {
                    a.reset_for_reinsertion();
                }
            } else {
                self.agents.remove(&agent_id);
            }
            self.agent_next_street.remove(&agent_id);
            return Ok(());
        }

        let next_street_id = *self
            .agent_next_street
            .get(&agent_id)
            .ok_or_else(|| DynamicsError::ProgrammingError(format!("agent {agent_id} has no pending next street")))?;
        let next_full = self.graph.street(next_street_id).map(|s| s.street().is_full()).unwrap_or(true);
        if next_full {
            return Ok(());
        }
        self.graph.street_mut(street_id).expect("street exists").street_mut().dequeue(lane);

        match self.graph.node(dst_node) {
            Some(NodeVariant::Intersection(_)) | Some(NodeVariant::TrafficLight(_)) => {
                let next_bearing = self.graph.street(next_street_id).expect("street exists").street().bearing();
                let cur_bearing = self.graph.street(street_id).expect("street exists").street().bearing();
                let delta = delta_angle(cur_bearing, next_bearing);
                self.increase_turn_count(street_id, delta);
                let turn_key = turn_key_centirad(delta);
                match self.graph.node_mut(dst_node) {
                    Some(NodeVariant::Intersection(inter)) => inter.add_agent(turn_key, agent_id)?,
                    Some(NodeVariant::TrafficLight(tl)) => tl.intersection_mut().add_agent(turn_key, agent_id)?,
                    _ => unreachable!("destination node variant did not change under &mut self"),
                }
            }
            Some(NodeVariant::Roundabout(_)) => {
                if let Some(NodeVariant::Roundabout(r)) = self.graph.node_mut(dst_node) {
                    r.enqueue(agent_id)?;
                }
            }
            None => return Err(DynamicsError::NodeNotFound(dst_node)),
        }
        Ok(())
    }

    // ---- Stage B: nodes --------------------------------------------------

    fn evolve_node_once(&mut self, node_id: NodeId) -> DynamicsResult<bool> {
        let is_roundabout = matches!(self.graph.node(node_id), Some(NodeVariant::Roundabout(_)));
        if is_roundabout {
            self.evolve_roundabout(node_id)
        } else {
            self.evolve_intersection(node_id)
        }
    }

    fn evolve_intersection(&mut self, node_id: NodeId) -> DynamicsResult<bool> {
        let pending: Vec<AgentId> = match self.graph.node(node_id) {
            Some(NodeVariant::Intersection(inter)) => inter.agents_in_order().collect(),
            Some(NodeVariant::TrafficLight(tl)) => tl.intersection().agents_in_order().collect(),
            _ => return Ok(false),
        };
        if pending.is_empty() {
            return Ok(false);
        }
        for agent_id in pending {
            let next_street_id = *self.agent_next_street.get(&agent_id).ok_or_else(|| {
                DynamicsError::ProgrammingError(format!("agent {agent_id} pending release has no next-street memo"))
            })?;
            let next_full = self.graph.street(next_street_id).map(|s| s.street().is_full()).unwrap_or(true);
            if next_full {
                if self.config.force_priorities {
                    return Ok(false);
                }
                continue;
            }
            match self.graph.node_mut(node_id) {
                Some(NodeVariant::Intersection(inter)) => inter.remove_agent(agent_id),
                Some(NodeVariant::TrafficLight(tl)) => tl.intersection_mut().remove_agent(agent_id),
                _ => {}
            }
            self.assign_agent_to_street(agent_id, next_street_id)?;
            self.agent_next_street.remove(&agent_id);
            return Ok(true);
        }
        Ok(false)
    }

    fn evolve_roundabout(&mut self, node_id: NodeId) -> DynamicsResult<bool> {
        let head = match self.graph.node(node_id) {
            Some(NodeVariant::Roundabout(r)) => r.peek(),
            _ => None,
        };
        let Some(agent_id) = head else {
            return Ok(false);
        };
        let next_street_id = *self.agent_next_street.get(&agent_id).ok_or_else(|| {
            DynamicsError::ProgrammingError(format!("agent {agent_id} pending release has no next-street memo"))
        })?;
        let next_full = self.graph.street(next_street_id).map(|s| s.street().is_full()).unwrap_or(true);
        if next_full {
            return Ok(false);
        }
        if let Some(prev_street) = self.agents.get(&agent_id).and_then(|a| a.current_street()) {
            let next_bearing = self.graph.street(next_street_id).expect("street exists").street().bearing();
            let prev_bearing = self.graph.street(prev_street).expect("street exists").street().bearing();
            let delta = delta_angle(prev_bearing, next_bearing);
            self.increase_turn_count(prev_street, delta);
        }
        if let Some(NodeVariant::Roundabout(r)) = self.graph.node_mut(node_id) {
            r.dequeue();
        }
        self.assign_agent_to_street(agent_id, next_street_id)?;
        self.agent_next_street.remove(&agent_id);
        Ok(true)
    }

    // ---- Stage C: agents --------------------------------------------------

    fn evolve_agents(&mut self) -> DynamicsResult<()> {
        let agent_ids: Vec<AgentId> = self.agents.keys().copied().collect();
        for agent_id in agent_ids {
            self.evolve_agent(agent_id)?;
        }
        Ok(())
    }

    fn evolve_agent(&mut self, agent_id: AgentId) -> DynamicsResult<()> {
        let Some(agent) = self.agents.get(&agent_id) else {
            return Ok(());
        };
        let delay = agent.delay();

        if delay > 0 {
            let street_id = agent
                .current_street()
                .ok_or_else(|| DynamicsError::ProgrammingError(format!("agent {agent_id} has delay but no street")))?;
            let speed = agent.speed();
            let length = self.graph.street(street_id).expect("street exists").street().length();
            if delay > 1 {
                if let Some(a) = self.agents.get_mut(&agent_id) {
                    a.add_distance(speed);
                }
            } else {
                let remainder = length % speed;
                let step = if remainder.abs() < f64::EPSILON { speed } else { remainder };
                if let Some(a) = self.agents.get_mut(&agent_id) {
                    a.add_distance(step);
                }
            }
            if let Some(a) = self.agents.get_mut(&agent_id) {
                a.decrement_delay();
            }
            if self.agents.get(&agent_id).expect("agent exists").delay() == 0 {
                self.commit_lane_assignment(agent_id, street_id)?;
            }
        } else if self.agents.get(&agent_id).expect("agent exists").is_at_source()
            && !self.agent_next_street.contains_key(&agent_id)
        {
            self.try_enter_from_source(agent_id)?;
        } else {
            if let Some(a) = self.agents.get_mut(&agent_id) {
                a.set_speed(0.0);
            }
        }

        if let Some(a) = self.agents.get_mut(&agent_id) {
            a.increment_time();
        }
        Ok(())
    }

    fn commit_lane_assignment(&mut self, agent_id: AgentId, street_id: StreetId) -> DynamicsResult<()> {
        let street_dst = self.graph.street(street_id).expect("street exists").street().dst();
        let n_lanes = self.graph.street(street_id).expect("street exists").street().n_lanes();

        let mut arrived = false;
        {
            let agent = self.agents.get(&agent_id).expect("agent exists");
            if !agent.is_random() {
                let itin_id = agent.itinerary().expect("non-random agent has an itinerary");
                if let Some(itin) = self.itineraries.get(&itin_id) {
                    if itin.destination() == street_dst {
                        arrived = true;
                    }
                }
            }
        }
        if arrived {
            let lane = self.rng.gen_range(0..n_lanes);
            self.graph.street_mut(street_id).expect("street exists").street_mut().enqueue(agent_id, lane)?;
            return Ok(());
        }

        let next_street_id = self.next_street_id(agent_id, street_dst, Some(street_id))?;
        let direction = {
            let next_bearing = self.graph.street(next_street_id).expect("street exists").street().bearing();
            let cur_bearing = self.graph.street(street_id).expect("street exists").street().bearing();
            classify_turn(delta_angle(cur_bearing, next_bearing))
        };
        let lane = if n_lanes == 1 {
            0
        } else {
            match direction {
                Direction::Right => 0,
                Direction::Left | Direction::UTurn => n_lanes - 1,
                Direction::Straight => self.rng.gen_range(0..n_lanes),
            }
        };
        self.agent_next_street.insert(agent_id, next_street_id);
        self.graph.street_mut(street_id).expect("street exists").street_mut().enqueue(agent_id, lane)?;
        Ok(())
    }

    fn try_enter_from_source(&mut self, agent_id: AgentId) -> DynamicsResult<()> {
        let source = self.agents.get(&agent_id).expect("agent exists").source_node();
        let node_full = self.graph.node(source).map(|n| n.is_full()).unwrap_or(true);
        if node_full {
            return Ok(());
        }
        let next_street_id = self.next_street_id(agent_id, source, None)?;
        let next_full = self.graph.street(next_street_id).map(|s| s.street().is_full()).unwrap_or(true);
        if next_full {
            return Ok(());
        }
        match self.graph.node_mut(source) {
            Some(NodeVariant::Intersection(inter)) => inter.add_agent(0, agent_id)?,
            Some(NodeVariant::TrafficLight(tl)) => tl.intersection_mut().add_agent(0, agent_id)?,
            Some(NodeVariant::Roundabout(r)) => r.enqueue(agent_id)?,
            None => return Err(DynamicsError::NodeNotFound(source)),
        }
        self.agent_next_street.insert(agent_id, next_street_id);
        Ok(())
    }

    // ---- the tick ----------------------------------------------------------

    /// Run one tick: streets release to nodes, nodes release to streets,
    /// agents advance their delay/distance and (re)commit to a street, then
    /// time advances. `reinsert_agents` controls whether an arriving agent
    /// is destroyed or reset back into pre-street limbo.
    pub fn evolve(&mut self, reinsert_agents: bool) -> DynamicsResult<()> {
        let update_tails = self.config.data_update_period.is_some_and(|p| self.time % p == 0);
        let street_ids: Vec<StreetId> = self.graph.street_ids().collect();
        for street_id in street_ids {
            if update_tails {
                let n_exiting = self.graph.street(street_id).expect("street exists").street().n_exiting_agents() as u64;
                let tail = self.street_tails.entry(street_id).or_insert(0);
                *tail = tail
                    .checked_add(n_exiting)
                    .ok_or_else(|| DynamicsError::Overflow(format!("tail counter overflow on street {street_id}")))?;
            }
            // one flow-cap roll per street per tick, not per capacity slot —
            // mirrors the original's single coin flip ahead of its street loop body.
            if !self.rng.gen_bool(self.config.max_flow_percentage) {
                continue;
            }
            let transport_capacity = self.graph.street(street_id).expect("street exists").street().transport_capacity();
            for _ in 0..transport_capacity {
                self.evolve_street(street_id, reinsert_agents)?;
            }
        }

        let node_ids: Vec<NodeId> = self.graph.node_ids().collect();
        for node_id in node_ids {
            let transport_capacity = self.graph.node(node_id).expect("node exists").core().transport_capacity();
            for _ in 0..transport_capacity {
                if !self.evolve_node_once(node_id)? {
                    break;
                }
            }
            if let Some(NodeVariant::TrafficLight(tl)) = self.graph.node_mut(node_id) {
                tl.advance();
            }
        }

        self.evolve_agents()?;

        self.time = self.time.checked_add(1).ok_or_else(|| DynamicsError::Overflow("time counter overflow".into()))?;
        Ok(())
    }

    /// Retune every traffic light's green/red split from the tail and queue
    /// imbalance observed since the last optimization, per the configured
    /// `OptimizerMode`. A no-op if `data_update_period` is unset.
    pub fn optimize_traffic_lights(&mut self) -> DynamicsResult<()> {
        let Some(period) = self.config.data_update_period else {
            return Ok(());
        };
        let threshold = self.config.optimizer_threshold;
        let density_tolerance = self.config.optimizer_density_tolerance;
        let mean_density_glob = self.street_mean_density().mean();
        let n_cycles = ((self.time.saturating_sub(self.previous_optimization_time)) as f64 / period as f64).max(1e-9);

        let node_ids: Vec<NodeId> = self.graph.node_ids().collect();
        for node_id in node_ids {
            if !matches!(self.graph.node(node_id), Some(NodeVariant::TrafficLight(_))) {
                continue;
            }
            self.optimize_one_traffic_light(node_id, threshold, density_tolerance, mean_density_glob, n_cycles)?;
        }

        for tail in self.street_tails.values_mut() {
            *tail = 0;
        }
        self.previous_optimization_time = self.time;
        Ok(())
    }

    fn optimize_one_traffic_light(
        &mut self,
        node_id: NodeId,
        threshold: f64,
        density_tolerance: f64,
        mean_density_glob: f64,
        n_cycles: f64,
    ) -> DynamicsResult<()> {
        let priorities = self.graph.node(node_id).expect("node exists").street_priorities();
        let incoming: Vec<StreetId> = self.graph.in_edges(node_id).into_iter().map(|(id, _, _)| id).collect();

        let mut green_sum = 0u64;
        let mut red_sum = 0u64;
        let mut green_queue = 0u64;
        let mut red_queue = 0u64;
        for &street_id in &incoming {
            let tail = self.street_tails.get(&street_id).copied().unwrap_or(0);
            let queued = self.graph.street(street_id).expect("street exists").street().n_exiting_agents() as u64;
            if priorities.contains(&street_id) {
                green_sum += tail;
                green_queue += queued;
            } else {
                red_sum += tail;
                red_queue += queued;
            }
        }

        let queue_gap = (green_queue as i64 - red_queue as i64).unsigned_abs() as f64;
        let delta_raw = (queue_gap / n_cycles).floor();
        if delta_raw <= 0.0 {
            return Ok(());
        }
        let delta = delta_raw.min(Delay::MAX as f64) as Delay;

        let smallest = green_sum.min(red_sum) as f64;
        let tail_gap = (green_sum as i64 - red_sum as i64).unsigned_abs() as f64;
        if tail_gap < threshold * smallest {
            if let Some(NodeVariant::TrafficLight(tl)) = self.graph.node_mut(node_id) {
                tl.reset_cycles();
            }
            return Ok(());
        }

        let (green_time, red_time) = {
            let tl = self.graph.node(node_id).expect("node exists").as_traffic_light().expect("is a traffic light");
            max_green_times(tl, &priorities)
        };

        match self.config.optimizer_mode {
            OptimizerMode::SingleTail => {
                self.apply_single_tail(node_id, green_sum, red_sum, green_queue, red_queue, green_time, red_time, delta);
            }
            OptimizerMode::DoubleTail => {
                self.apply_double_tail(
                    node_id,
                    green_sum,
                    red_sum,
                    green_time,
                    red_time,
                    delta,
                    mean_density_glob,
                    density_tolerance,
                );
            }
        }
        Ok(())
    }

    fn apply_single_tail(
        &mut self,
        node_id: NodeId,
        green_sum: u64,
        red_sum: u64,
        green_queue: u64,
        red_queue: u64,
        green_time: Delay,
        red_time: Delay,
        delta: Delay,
    ) {
        let tl = match self.graph.node_mut(node_id) {
            Some(NodeVariant::TrafficLight(tl)) => tl,
            _ => return,
        };
        if green_sum > red_sum && !(green_time > red_time) && red_time > delta && green_queue > red_queue {
            tl.increase_green_times(delta);
        } else if red_sum > green_sum && !(red_time > green_time) && green_time > delta && red_queue > green_queue {
            tl.decrease_green_times(delta);
        } else {
            tl.reset_cycles();
        }
    }

    fn apply_double_tail(
        &mut self,
        node_id: NodeId,
        green_sum: u64,
        red_sum: u64,
        green_time: Delay,
        red_time: Delay,
        delta: Delay,
        mean_density_glob: f64,
        density_tolerance: f64,
    ) {
        let out_edges: Vec<StreetId> = self.graph.out_edges(node_id).into_iter().map(|(id, _, _)| id).collect();
        let mut mean_density_streets = 0.0;
        for &s in &out_edges {
            mean_density_streets += self.graph.street(s).expect("street exists").street().density(true);
        }
        if out_edges.len() > 1 {
            mean_density_streets /= out_edges.len() as f64;
        }
        if mean_density_streets <= 0.0 {
            return;
        }
        let dyn_thresh = (mean_density_glob / mean_density_streets).tanh() * density_tolerance;
        if mean_density_glob * (1.0 + dyn_thresh) <= mean_density_streets {
            return;
        }

        let scaled = if mean_density_glob > mean_density_streets {
            delta
        } else {
            ((delta as f64) * dyn_thresh).round() as Delay
        };
        let tl = match self.graph.node_mut(node_id) {
            Some(NodeVariant::TrafficLight(tl)) => tl,
            _ => return,
        };
        if !(red_time > green_time) && red_sum > green_sum && green_time > delta {
            tl.decrease_green_times(scaled);
        } else if !(red_time < green_time) && green_sum > red_sum && red_time > delta {
            tl.increase_green_times(scaled);
        } else {
            tl.reset_cycles();
        }
    }

    /// Mean travel time over every arrival recorded so far, optionally
    /// clearing the backing sample.
    pub fn mean_travel_time(&mut self, clear: bool) -> Measurement {
        let mut m = Measurement::new();
        for &t in &self.travel_times {
            m.add(t);
        }
        if clear {
            self.travel_times.clear();
        }
        m
    }

    /// Snapshot the current aggregate and per-street observables.
    pub fn observables(&self) -> Observables {
        let mut speed = Measurement::new();
        let mut density = Measurement::new();
        let mut flow = Measurement::new();
        let mut spire_flow = Measurement::new();
        let mut travel_time = Measurement::new();
        let mut per_street_density = HashMap::new();

        for street_id in self.graph.street_ids() {
            let Some(variant) = self.graph.street(street_id) else { continue };
            let street = variant.street();
            let rho = street.density(true);
            density.add(rho);
            per_street_density.insert(street_id, rho);
            speed.add(self.street_mean_speed(street_id));
            flow.add(street.n_exiting_agents() as f64);
            if let Some(spire) = variant.as_spire() {
                spire_flow.add(spire.mean_flow() as f64);
            }
        }
        for &t in &self.travel_times {
            travel_time.add(t);
        }

        Observables {
            time: self.time,
            n_agents: self.alive_count(),
            mean_speed: speed.mean(),
            mean_speed_err: speed.stderr(),
            mean_density: density.mean(),
            mean_density_err: density.stderr(),
            mean_flow: flow.mean(),
            mean_flow_err: flow.stderr(),
            mean_travel_time: travel_time.mean(),
            mean_travel_time_err: travel_time.stderr(),
            mean_spire_flow: spire_flow.mean(),
            mean_spire_flow_err: spire_flow.stderr(),
            per_street_density,
        }
    }
}

/// Agent ids currently pending release at `node` (an intersection multimap
/// or traffic-light's underlying intersection, or a roundabout's FIFO).
fn pending_agents_at(node: &NodeVariant) -> Vec<AgentId> {
    match node {
        NodeVariant::Intersection(inter) => inter.agents_in_order().collect(),
        NodeVariant::TrafficLight(tl) => tl.intersection().agents_in_order().collect(),
        NodeVariant::Roundabout(r) => r.agents().iter().copied().collect(),
    }
}

/// For each street, which neighbor at its destination node corresponds to
/// each turn bucket — built once from the graph's static bearings, using
/// the same turn-classification convention `increase_turn_count` applies at
/// runtime so a caller can cross-reference `turn_counts` with the actual
/// street ids.
fn build_turn_street_map(graph: &Graph) -> HashMap<StreetId, [Option<StreetId>; 4]> {
    let mut map = HashMap::with_capacity(graph.street_ids().count());
    for street_id in graph.street_ids() {
        let street = graph.street(street_id).expect("street exists").street();
        let mut entry = [None; 4];
        for (candidate_id, _, _) in graph.out_edges(street.dst()) {
            let candidate = graph.street(candidate_id).expect("candidate exists").street();
            let delta = candidate.delta_angle(street.bearing());
            let direction = classify_turn(delta);
            entry[direction as usize] = Some(candidate_id);
        }
        map.insert(street_id, entry);
    }
    map
}

/// Maximum green time configured among a traffic light's priority streets
/// and among its non-priority streets, respectively.
fn max_green_times(tl: &TrafficLight, priorities: &HashSet<StreetId>) -> (Delay, Delay) {
    let mut green_max = 0;
    let mut red_max = 0;
    for (street, cycles) in tl.cycles() {
        let g = cycles.iter().map(|c| c.green_time()).max().unwrap_or(0);
        if priorities.contains(street) {
            green_max = green_max.max(g);
        } else {
            red_max = red_max.max(g);
        }
    }
    (green_max, red_max)
}
