//! Streets: directed edges carrying a waiting set and per-lane exit queues.

use std::collections::{HashSet, VecDeque};

use dsm_core::{delta_angle, AgentId, NodeId, StreetId};

use crate::error::{GraphError, GraphResult};

/// A directed edge of the road graph.
///
/// `capacity` is the street's total admission capacity: `is_full` holds
/// when `n_agents() == capacity`, matching the original framework (its
/// "per-lane" phrasing describes how that budget is distributed across
/// lanes during Stage A/B admission, not a second, larger ceiling).
#[derive(Clone, Debug)]
pub struct Street {
    id: StreetId,
    src: NodeId,
    dst: NodeId,
    length: f64,
    v_max: f64,
    capacity: u32,
    transport_capacity: u32,
    n_lanes: usize,
    bearing: f64,
    waiting: HashSet<AgentId>,
    exit_queues: Vec<VecDeque<AgentId>>,
}

/// Default free-flow speed, 50 km/h in m/s.
pub const DEFAULT_V_MAX: f64 = 13.888_888_888_9;

impl Street {
    pub fn new(
        id: StreetId,
        src: NodeId,
        dst: NodeId,
        length: f64,
        v_max: f64,
        capacity: u32,
        transport_capacity: u32,
        n_lanes: usize,
        bearing: f64,
    ) -> GraphResult<Self> {
        if length <= 0.0 {
            return Err(GraphError::InvalidArgument("street length must be > 0".into()));
        }
        if v_max <= 0.0 {
            return Err(GraphError::InvalidArgument("street v_max must be > 0".into()));
        }
        if capacity == 0 {
            return Err(GraphError::InvalidArgument("street capacity must be >= 1".into()));
        }
        if transport_capacity == 0 {
            return Err(GraphError::InvalidArgument(
                "street transport capacity must be >= 1".into(),
            ));
        }
        if n_lanes == 0 {
            return Err(GraphError::InvalidArgument("street must have >= 1 lane".into()));
        }
        Ok(Self {
            id,
            src,
            dst,
            length,
            v_max,
            capacity,
            transport_capacity,
            n_lanes,
            bearing,
            waiting: HashSet::new(),
            exit_queues: vec![VecDeque::new(); n_lanes],
        })
    }

    pub fn id(&self) -> StreetId {
        self.id
    }

    /// Renumber to the canonical `src*N + dst` id assigned by `Graph::build_adj`.
    pub(crate) fn set_id(&mut self, id: StreetId) {
        self.id = id;
    }

    pub fn src(&self) -> NodeId {
        self.src
    }

    pub fn dst(&self) -> NodeId {
        self.dst
    }

    pub fn length(&self) -> f64 {
        self.length
    }

    pub fn v_max(&self) -> f64 {
        self.v_max
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn transport_capacity(&self) -> u32 {
        self.transport_capacity
    }

    pub fn n_lanes(&self) -> usize {
        self.n_lanes
    }

    pub fn bearing(&self) -> f64 {
        self.bearing
    }

    pub(crate) fn set_bearing(&mut self, bearing: f64) {
        self.bearing = bearing;
    }

    pub fn waiting(&self) -> &HashSet<AgentId> {
        &self.waiting
    }

    pub fn queue(&self, lane: usize) -> &VecDeque<AgentId> {
        &self.exit_queues[lane]
    }

    fn is_present(&self, id: AgentId) -> bool {
        self.waiting.contains(&id) || self.exit_queues.iter().any(|q| q.contains(&id))
    }

    /// Add `id` to the waiting set.
    pub fn add_agent(&mut self, id: AgentId) -> GraphResult<()> {
        if self.is_present(id) {
            return Err(GraphError::AlreadyPresent);
        }
        self.waiting.insert(id);
        Ok(())
    }

    /// Move `id` from the waiting set into the exit queue of `lane`.
    pub fn enqueue(&mut self, id: AgentId, lane: usize) -> GraphResult<()> {
        if !self.waiting.contains(&id) {
            return Err(GraphError::NotWaiting);
        }
        self.waiting.remove(&id);
        self.exit_queues[lane].push_back(id);
        Ok(())
    }

    /// Pop the front of `lane`'s exit queue.
    pub fn dequeue(&mut self, lane: usize) -> Option<AgentId> {
        self.exit_queues[lane].pop_front()
    }

    /// Peek the front of `lane`'s exit queue without removing it.
    pub fn peek(&self, lane: usize) -> Option<AgentId> {
        self.exit_queues[lane].front().copied()
    }

    pub fn n_agents(&self) -> usize {
        self.waiting.len() + self.n_exiting_agents()
    }

    pub fn n_exiting_agents(&self) -> usize {
        self.exit_queues.iter().map(|q| q.len()).sum()
    }

    pub fn is_full(&self) -> bool {
        self.n_agents() == self.capacity as usize
    }

    /// Density, optionally normalized by capacity.
    pub fn density(&self, normalized: bool) -> f64 {
        let n = self.n_agents() as f64;
        if normalized {
            n / self.capacity as f64
        } else {
            n / self.length
        }
    }

    /// Signed angular difference between this street's bearing and a
    /// reference bearing, wrapped to `(-pi, pi]`.
    pub fn delta_angle(&self, reference_bearing: f64) -> f64 {
        delta_angle(reference_bearing, self.bearing)
    }

    /// Closed-form mean speed of agents entering this street, used when no
    /// agent has yet reached the exit queues: `v_max * n * (1 - sigma/(2C)
    /// * (n-1))` where `n = |waiting|` and `C` is lane capacity
    /// (`capacity / n_lanes`).
    pub fn mean_speed_closed_form(&self, sigma: f64) -> f64 {
        let n = self.waiting.len() as f64;
        if n == 0.0 {
            return self.v_max;
        }
        let lane_capacity = self.capacity as f64 / self.n_lanes as f64;
        self.v_max * n * (1.0 - 0.5 * (sigma / lane_capacity) * (n - 1.0))
    }

    /// Every agent physically on this street (waiting set plus every exit
    /// queue), in no particular order.
    pub fn agents_on_street(&self) -> impl Iterator<Item = AgentId> + '_ {
        self.waiting.iter().copied().chain(self.exit_queues.iter().flatten().copied())
    }

    pub fn is_spire(&self) -> bool {
        false
    }

    /// The turn direction a lane represents, inferred from its index rather
    /// than stored: lane 0 is the rightmost lane, the last lane serves left
    /// turns and U-turns, everything in between is straight-through. A
    /// single-lane street always reads as `Straight`.
    pub fn lane_direction(&self, lane: usize) -> dsm_core::Direction {
        use dsm_core::Direction;
        if self.n_lanes == 1 {
            Direction::Straight
        } else if lane == 0 {
            Direction::Right
        } else if lane == self.n_lanes - 1 {
            Direction::Left
        } else {
            Direction::Straight
        }
    }
}

/// A street that also counts ingress/egress events with two monotone
/// counters, for induction-loop-style observables.
#[derive(Clone, Debug)]
pub struct SpireStreet {
    street: Street,
    count_in: u64,
    count_out: u64,
}

impl SpireStreet {
    pub fn new(street: Street) -> Self {
        Self { street, count_in: 0, count_out: 0 }
    }

    pub fn street(&self) -> &Street {
        &self.street
    }

    pub fn street_mut(&mut self) -> &mut Street {
        &mut self.street
    }

    pub fn add_agent(&mut self, id: AgentId) -> GraphResult<()> {
        self.street.add_agent(id)?;
        self.count_in += 1;
        Ok(())
    }

    pub fn dequeue(&mut self, lane: usize) -> Option<AgentId> {
        let popped = self.street.dequeue(lane);
        if popped.is_some() {
            self.count_out += 1;
        }
        popped
    }

    /// Input count, optionally resetting both counters.
    pub fn input_counts(&mut self, reset: bool) -> u64 {
        let v = self.count_in;
        if reset {
            self.count_in = 0;
            self.count_out = 0;
        }
        v
    }

    /// Output count, optionally resetting both counters.
    pub fn output_counts(&mut self, reset: bool) -> u64 {
        let v = self.count_out;
        if reset {
            self.count_in = 0;
            self.count_out = 0;
        }
        v
    }

    /// `in - out` since the last reset; positive when more agents have
    /// entered than left.
    pub fn mean_flow(&self) -> i64 {
        self.count_in as i64 - self.count_out as i64
    }

    pub fn is_spire(&self) -> bool {
        true
    }
}

/// Either a plain [`Street`] or an instrumented [`SpireStreet`], dispatched
/// by match rather than virtual inheritance.
#[derive(Clone, Debug)]
pub enum StreetVariant {
    Plain(Street),
    Spire(SpireStreet),
}

impl StreetVariant {
    pub fn street(&self) -> &Street {
        match self {
            StreetVariant::Plain(s) => s,
            StreetVariant::Spire(s) => s.street(),
        }
    }

    pub fn street_mut(&mut self) -> &mut Street {
        match self {
            StreetVariant::Plain(s) => s,
            StreetVariant::Spire(s) => s.street_mut(),
        }
    }

    pub fn add_agent(&mut self, id: AgentId) -> GraphResult<()> {
        match self {
            StreetVariant::Plain(s) => s.add_agent(id),
            StreetVariant::Spire(s) => s.add_agent(id),
        }
    }

    pub fn dequeue(&mut self, lane: usize) -> Option<AgentId> {
        match self {
            StreetVariant::Plain(s) => s.dequeue(lane),
            StreetVariant::Spire(s) => s.dequeue(lane),
        }
    }

    pub fn is_spire(&self) -> bool {
        matches!(self, StreetVariant::Spire(_))
    }

    pub fn as_spire(&self) -> Option<&SpireStreet> {
        match self {
            StreetVariant::Spire(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_spire_mut(&mut self) -> Option<&mut SpireStreet> {
        match self {
            StreetVariant::Spire(s) => Some(s),
            _ => None,
        }
    }
}
