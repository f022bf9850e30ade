//! Node variants: `Intersection`, `TrafficLight`, `Roundabout`, dispatched
//! by match on a tagged enum rather than a class hierarchy with downcasts.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use dsm_core::{AgentId, Delay, Direction, StreetId, Time};

use crate::error::{GraphError, GraphResult};

/// One green/red window within a traffic light's cycle.
///
/// `reset` restores the `(green, phase)` pair captured at construction, the
/// snapshot the optimizer falls back to when queues are balanced.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TrafficLightCycle {
    green_time: Delay,
    phase: Delay,
    default_green_time: Delay,
    default_phase: Delay,
}

impl TrafficLightCycle {
    pub fn new(green_time: Delay, phase: Delay) -> Self {
        Self { green_time, phase, default_green_time: green_time, default_phase: phase }
    }

    pub fn green_time(&self) -> Delay {
        self.green_time
    }

    pub fn phase(&self) -> Delay {
        self.phase
    }

    /// `true` iff `counter` lies in `[phase, phase + green_time) mod cycle_time`.
    pub fn is_green(&self, cycle_time: Delay, counter: Delay) -> bool {
        let phase = self.phase as u32;
        let green = self.green_time as u32;
        let c = counter as u32;
        let t = cycle_time as u32;
        if t == 0 {
            return false;
        }
        let end = phase + green;
        if end <= t {
            c >= phase && c < end
        } else {
            // window wraps past the cycle boundary
            c >= phase || c < (end - t)
        }
    }

    /// Restore `green_time`/`phase` to the values captured at construction.
    pub fn reset(&mut self) {
        self.green_time = self.default_green_time;
        self.phase = self.default_phase;
    }

    /// Shift the green window by `delta` ticks, clamped to `[0, cycle_time]`.
    /// A growing window (`delta >= 0`) keeps its start fixed. A shrinking
    /// window (`delta < 0`) advances its phase by the actual shrink amount,
    /// so the window's *end* stays anchored rather than its start.
    fn shift(&mut self, delta: i32, cycle_time: Delay) {
        let t = cycle_time as i32;
        let old_green = self.green_time as i32;
        let new_green = (old_green + delta).clamp(0, t);
        if delta < 0 && t > 0 {
            let shrink = old_green - new_green;
            self.phase = (self.phase as i32 + shrink).rem_euclid(t) as Delay;
        }
        self.green_time = new_green as Delay;
    }
}

/// Shared "abstract node" state: capacity, transport capacity, optional
/// coordinates.
#[derive(Clone, Debug)]
pub struct NodeCore {
    capacity: u32,
    transport_capacity: u32,
    coords: Option<(f64, f64)>,
}

impl NodeCore {
    pub fn new(capacity: u32, transport_capacity: u32) -> GraphResult<Self> {
        if capacity == 0 {
            return Err(GraphError::InvalidArgument("node capacity must be >= 1".into()));
        }
        if transport_capacity == 0 {
            return Err(GraphError::InvalidArgument(
                "node transport capacity must be >= 1".into(),
            ));
        }
        Ok(Self { capacity, transport_capacity, coords: None })
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn transport_capacity(&self) -> u32 {
        self.transport_capacity
    }

    pub fn coords(&self) -> Option<(f64, f64)> {
        self.coords
    }

    pub fn set_coords(&mut self, coords: (f64, f64)) {
        self.coords = Some(coords);
    }
}

/// A plain priority intersection: pending agents ordered by signed turn key
/// (rightmost turn released first), plus a set of priority incoming streets.
#[derive(Clone, Debug)]
pub struct Intersection {
    core: NodeCore,
    agents: BTreeMap<i32, Vec<AgentId>>,
    street_priorities: HashSet<StreetId>,
}

impl Intersection {
    pub fn new(core: NodeCore) -> Self {
        Self { core, agents: BTreeMap::new(), street_priorities: HashSet::new() }
    }

    pub fn core(&self) -> &NodeCore {
        &self.core
    }

    pub fn core_mut(&mut self) -> &mut NodeCore {
        &mut self.core
    }

    fn occupancy(&self) -> usize {
        self.agents.values().map(|v| v.len()).sum()
    }

    pub fn is_full(&self) -> bool {
        self.occupancy() == self.core.capacity as usize
    }

    pub fn density(&self) -> f64 {
        self.occupancy() as f64 / self.core.capacity as f64
    }

    fn contains(&self, id: AgentId) -> bool {
        self.agents.values().any(|v| v.contains(&id))
    }

    /// Insert `id` keyed by its signed turn key (centi-radians).
    pub fn add_agent(&mut self, turn_key: i32, id: AgentId) -> GraphResult<()> {
        if self.contains(id) {
            return Err(GraphError::AlreadyPresent);
        }
        if self.is_full() {
            return Err(GraphError::Full);
        }
        self.agents.entry(turn_key).or_default().push(id);
        Ok(())
    }

    pub fn remove_agent(&mut self, id: AgentId) {
        self.agents.retain(|_, v| {
            v.retain(|&a| a != id);
            !v.is_empty()
        });
    }

    /// Ascending-turn-key iteration order: rightmost turn first.
    pub fn agents_in_order(&self) -> impl Iterator<Item = AgentId> + '_ {
        self.agents.iter().flat_map(|(_, v)| v.iter().copied())
    }

    pub fn street_priorities(&self) -> &HashSet<StreetId> {
        &self.street_priorities
    }

    pub fn set_street_priorities(&mut self, priorities: HashSet<StreetId>) {
        self.street_priorities = priorities;
    }

    pub fn add_street_priority(&mut self, street: StreetId) {
        self.street_priorities.insert(street);
    }

    pub fn is_priority_street(&self, street: StreetId) -> bool {
        self.street_priorities.contains(&street)
    }
}

/// A fixed-program traffic light: an [`Intersection`] extended with a
/// per-incoming-street, per-direction cycle program.
#[derive(Clone, Debug)]
pub struct TrafficLight {
    intersection: Intersection,
    cycles: HashMap<StreetId, [TrafficLightCycle; 3]>,
    cycle_time: Delay,
    counter: Delay,
    last_optimization: Time,
}

impl TrafficLight {
    pub fn new(intersection: Intersection, cycle_time: Delay) -> Self {
        Self {
            intersection,
            cycles: HashMap::new(),
            cycle_time,
            counter: 0,
            last_optimization: 0,
        }
    }

    pub fn intersection(&self) -> &Intersection {
        &self.intersection
    }

    pub fn intersection_mut(&mut self) -> &mut Intersection {
        &mut self.intersection
    }

    pub fn cycle_time(&self) -> Delay {
        self.cycle_time
    }

    pub fn counter(&self) -> Delay {
        self.counter
    }

    pub fn last_optimization(&self) -> Time {
        self.last_optimization
    }

    pub fn set_last_optimization(&mut self, time: Time) {
        self.last_optimization = time;
    }

    pub fn cycles(&self) -> &HashMap<StreetId, [TrafficLightCycle; 3]> {
        &self.cycles
    }

    /// Install the cycle for `(street, direction)`. U-turn aliases to `Left`.
    pub fn set_cycle(
        &mut self,
        street: StreetId,
        direction: Direction,
        cycle: TrafficLightCycle,
    ) -> GraphResult<()> {
        if cycle.green_time() > self.cycle_time {
            return Err(GraphError::InvalidArgument(format!(
                "green time {} exceeds cycle time {}",
                cycle.green_time(),
                self.cycle_time
            )));
        }
        if cycle.phase() >= self.cycle_time {
            return Err(GraphError::InvalidArgument(format!(
                "phase {} must be < cycle time {}",
                cycle.phase(),
                self.cycle_time
            )));
        }
        let slot = direction.cycle_index();
        let entry = self
            .cycles
            .entry(street)
            .or_insert_with(|| [TrafficLightCycle::new(0, 0); 3]);
        entry[slot] = cycle;
        Ok(())
    }

    /// Install, for `new_street`, the complementary cycle of `template_street`:
    /// green = cycle_time - existing green; phase = existing phase + (cycle_time
    /// - existing green), mod cycle_time.
    pub fn set_complementary_cycle(
        &mut self,
        new_street: StreetId,
        template_street: StreetId,
    ) -> GraphResult<()> {
        let template = *self
            .cycles
            .get(&template_street)
            .ok_or_else(|| GraphError::InvalidArgument("template street has no cycle".into()))?;
        let t = self.cycle_time as i32;
        let mut complementary = [TrafficLightCycle::new(0, 0); 3];
        for (slot, cycle) in template.iter().enumerate() {
            let green = t - cycle.green_time() as i32;
            let phase = (cycle.phase() as i32 + green).rem_euclid(t.max(1));
            complementary[slot] = TrafficLightCycle::new(green.max(0) as Delay, phase as Delay);
        }
        self.cycles.insert(new_street, complementary);
        Ok(())
    }

    /// Move a street's cycle program from one incoming street id to another,
    /// e.g. after the graph renumbers streets.
    pub fn move_cycle(&mut self, old_street: StreetId, new_street: StreetId) {
        if let Some(cycle) = self.cycles.remove(&old_street) {
            self.cycles.insert(new_street, cycle);
        }
    }

    /// `true` iff the cycle for `(street, direction)` is green at the
    /// current counter.
    pub fn is_green(&self, street: StreetId, direction: Direction) -> GraphResult<bool> {
        let cycles = self
            .cycles
            .get(&street)
            .ok_or(GraphError::StreetNotFound(street))?;
        Ok(cycles[direction.cycle_index()].is_green(self.cycle_time, self.counter))
    }

    /// Green for priority streets grows by `delta`, non-priority streets
    /// shrink by `delta`; clamped to `[0, cycle_time]`.
    pub fn increase_green_times(&mut self, delta: Delay) {
        let priorities = self.intersection.street_priorities().clone();
        let cycle_time = self.cycle_time;
        for (street, cycles) in self.cycles.iter_mut() {
            let signed = if priorities.contains(street) { delta as i32 } else { -(delta as i32) };
            for cycle in cycles.iter_mut() {
                cycle.shift(signed, cycle_time);
            }
        }
    }

    /// Inverse of [`TrafficLight::increase_green_times`].
    pub fn decrease_green_times(&mut self, delta: Delay) {
        let priorities = self.intersection.street_priorities().clone();
        let cycle_time = self.cycle_time;
        for (street, cycles) in self.cycles.iter_mut() {
            let signed = if priorities.contains(street) { -(delta as i32) } else { delta as i32 };
            for cycle in cycles.iter_mut() {
                cycle.shift(signed, cycle_time);
            }
        }
    }

    /// Restore every cycle's default `(green, phase)`.
    pub fn reset_cycles(&mut self) {
        for cycles in self.cycles.values_mut() {
            for cycle in cycles.iter_mut() {
                cycle.reset();
            }
        }
    }

    /// Advance the phase counter by one tick, modulo `cycle_time`.
    pub fn advance(&mut self) {
        if self.cycle_time > 0 {
            self.counter = (self.counter + 1) % self.cycle_time;
        }
    }
}

/// A single-FIFO roundabout: agents already inside always take priority
/// over new arrivals, which is just "the only agent ever offered a release
/// slot is the head of the queue".
#[derive(Clone, Debug)]
pub struct Roundabout {
    core: NodeCore,
    agents: VecDeque<AgentId>,
}

impl Roundabout {
    pub fn new(core: NodeCore) -> Self {
        Self { core, agents: VecDeque::new() }
    }

    pub fn core(&self) -> &NodeCore {
        &self.core
    }

    pub fn is_full(&self) -> bool {
        self.agents.len() == self.core.capacity as usize
    }

    pub fn density(&self) -> f64 {
        self.agents.len() as f64 / self.core.capacity as f64
    }

    pub fn enqueue(&mut self, id: AgentId) -> GraphResult<()> {
        if self.is_full() {
            return Err(GraphError::Full);
        }
        self.agents.push_back(id);
        Ok(())
    }

    pub fn dequeue(&mut self) -> Option<AgentId> {
        self.agents.pop_front()
    }

    pub fn peek(&self) -> Option<AgentId> {
        self.agents.front().copied()
    }

    pub fn agents(&self) -> &VecDeque<AgentId> {
        &self.agents
    }
}

/// A road-graph node, dispatched by match rather than a class hierarchy.
#[derive(Clone, Debug)]
pub enum NodeVariant {
    Intersection(Intersection),
    TrafficLight(TrafficLight),
    Roundabout(Roundabout),
}

impl NodeVariant {
    pub fn core(&self) -> &NodeCore {
        match self {
            NodeVariant::Intersection(n) => n.core(),
            NodeVariant::TrafficLight(n) => n.intersection().core(),
            NodeVariant::Roundabout(n) => n.core(),
        }
    }

    pub fn is_full(&self) -> bool {
        match self {
            NodeVariant::Intersection(n) => n.is_full(),
            NodeVariant::TrafficLight(n) => n.intersection().is_full(),
            NodeVariant::Roundabout(n) => n.is_full(),
        }
    }

    pub fn density(&self) -> f64 {
        match self {
            NodeVariant::Intersection(n) => n.density(),
            NodeVariant::TrafficLight(n) => n.intersection().density(),
            NodeVariant::Roundabout(n) => n.density(),
        }
    }

    pub fn is_traffic_light(&self) -> bool {
        matches!(self, NodeVariant::TrafficLight(_))
    }

    pub fn is_roundabout(&self) -> bool {
        matches!(self, NodeVariant::Roundabout(_))
    }

    pub fn as_traffic_light(&self) -> Option<&TrafficLight> {
        match self {
            NodeVariant::TrafficLight(tl) => Some(tl),
            _ => None,
        }
    }

    pub fn as_traffic_light_mut(&mut self) -> Option<&mut TrafficLight> {
        match self {
            NodeVariant::TrafficLight(tl) => Some(tl),
            _ => None,
        }
    }

    pub fn as_roundabout_mut(&mut self) -> Option<&mut Roundabout> {
        match self {
            NodeVariant::Roundabout(r) => Some(r),
            _ => None,
        }
    }

    /// Streets marked as priority at this node; empty for roundabouts,
    /// where priority is implicit.
    pub fn street_priorities(&self) -> HashSet<StreetId> {
        match self {
            NodeVariant::Intersection(n) => n.street_priorities().clone(),
            NodeVariant::TrafficLight(n) => n.intersection().street_priorities().clone(),
            NodeVariant::Roundabout(_) => HashSet::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn core() -> NodeCore {
        NodeCore::new(4, 2).unwrap()
    }

    #[test]
    fn intersection_releases_in_turn_key_order() {
        let mut n = Intersection::new(core());
        n.add_agent(50, AgentId(2)).unwrap();
        n.add_agent(-50, AgentId(1)).unwrap();
        n.add_agent(0, AgentId(0)).unwrap();
        let order: Vec<_> = n.agents_in_order().collect();
        assert_eq!(order, vec![AgentId(1), AgentId(0), AgentId(2)]);
    }

    #[test]
    fn intersection_full() {
        let mut n = Intersection::new(NodeCore::new(1, 1).unwrap());
        n.add_agent(0, AgentId(0)).unwrap();
        assert!(n.is_full());
        assert!(matches!(n.add_agent(1, AgentId(1)), Err(GraphError::Full)));
    }

    #[test]
    fn cycle_is_green_window() {
        let cycle = TrafficLightCycle::new(2, 0);
        assert!(cycle.is_green(4, 0));
        assert!(cycle.is_green(4, 1));
        assert!(!cycle.is_green(4, 2));
        assert!(!cycle.is_green(4, 3));
    }

    #[test]
    fn cycle_wrapping_window() {
        let cycle = TrafficLightCycle::new(2, 3);
        assert!(cycle.is_green(4, 3));
        assert!(cycle.is_green(4, 0));
        assert!(!cycle.is_green(4, 1));
    }

    #[test]
    fn complementary_cycle_matches_spec() {
        let mut tl = TrafficLight::new(Intersection::new(core()), 4);
        tl.set_cycle(StreetId(0), Direction::Straight, TrafficLightCycle::new(2, 0)).unwrap();
        tl.set_complementary_cycle(StreetId(1), StreetId(0)).unwrap();
        let comp = tl.cycles()[&StreetId(1)][Direction::Straight.cycle_index()];
        assert_eq!(comp.green_time(), 2);
        assert_eq!(comp.phase(), 2);
    }

    #[test]
    fn shrinking_shift_keeps_window_end_anchored() {
        let mut cycle = TrafficLightCycle::new(3, 1);
        let old_end = cycle.phase() as i32 + cycle.green_time() as i32;
        cycle.shift(-1, 4);
        assert_eq!(cycle.green_time(), 2);
        assert_eq!(cycle.phase(), 2);
        assert_eq!(cycle.phase() as i32 + cycle.green_time() as i32, old_end);
    }

    #[test]
    fn growing_shift_keeps_phase_fixed() {
        let mut cycle = TrafficLightCycle::new(1, 1);
        cycle.shift(2, 4);
        assert_eq!(cycle.green_time(), 3);
        assert_eq!(cycle.phase(), 1);
    }

    #[test]
    fn reset_cycles_restores_defaults() {
        let mut tl = TrafficLight::new(Intersection::new(core()), 4);
        tl.set_cycle(StreetId(0), Direction::Straight, TrafficLightCycle::new(2, 0)).unwrap();
        tl.increase_green_times(1);
        tl.reset_cycles();
        let c = tl.cycles()[&StreetId(0)][Direction::Straight.cycle_index()];
        assert_eq!(c.green_time(), 2);
        assert_eq!(c.phase(), 0);
    }

    #[test]
    fn counter_wraps_through_full_cycle() {
        let mut tl = TrafficLight::new(Intersection::new(core()), 4);
        for _ in 0..4 {
            tl.advance();
        }
        assert_eq!(tl.counter(), 0);
    }

    #[test]
    fn roundabout_fifo() {
        let mut r = Roundabout::new(core());
        r.enqueue(AgentId(0)).unwrap();
        r.enqueue(AgentId(1)).unwrap();
        assert_eq!(r.dequeue(), Some(AgentId(0)));
        assert_eq!(r.dequeue(), Some(AgentId(1)));
        assert_eq!(r.dequeue(), None);
    }
}
