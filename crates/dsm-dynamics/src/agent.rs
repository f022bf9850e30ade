//! The simulated vehicle.

use dsm_core::{AgentId, Delay, ItinId, NodeId, StreetId, Time};

/// A vehicle travelling the graph. Agents with no `itinerary` are "random":
/// they pick exits uniformly rather than following a shortest-path row.
#[derive(Clone, Debug)]
pub struct Agent {
    id: AgentId,
    itinerary: Option<ItinId>,
    source_node: NodeId,
    current_street: Option<StreetId>,
    lane: Option<usize>,
    speed: f64,
    delay: Delay,
    distance: f64,
    time: Time,
    reinsert: bool,
    /// Monotonically increasing injection sequence number, used only for
    /// measurement bookkeeping and tests — not part of any invariant.
    seq: u64,
}

impl Agent {
    pub fn new(id: AgentId, itinerary: Option<ItinId>, source_node: NodeId, reinsert: bool, seq: u64) -> Self {
        Self {
            id,
            itinerary,
            source_node,
            current_street: None,
            lane: None,
            speed: 0.0,
            delay: 0,
            distance: 0.0,
            time: 0,
            reinsert,
            seq,
        }
    }

    pub fn id(&self) -> AgentId {
        self.id
    }

    pub fn itinerary(&self) -> Option<ItinId> {
        self.itinerary
    }

    pub fn is_random(&self) -> bool {
        self.itinerary.is_none()
    }

    pub fn source_node(&self) -> NodeId {
        self.source_node
    }

    pub fn current_street(&self) -> Option<StreetId> {
        self.current_street
    }

    pub fn set_current_street(&mut self, street: Option<StreetId>) {
        self.current_street = street;
    }

    pub fn lane(&self) -> Option<usize> {
        self.lane
    }

    pub fn set_lane(&mut self, lane: Option<usize>) {
        self.lane = lane;
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    pub fn set_speed(&mut self, speed: f64) {
        self.speed = speed;
    }

    pub fn delay(&self) -> Delay {
        self.delay
    }

    pub fn set_delay(&mut self, delay: Delay) {
        self.delay = delay;
    }

    pub fn decrement_delay(&mut self) {
        self.delay = self.delay.saturating_sub(1);
    }

    pub fn distance(&self) -> f64 {
        self.distance
    }

    pub fn add_distance(&mut self, d: f64) {
        self.distance += d;
    }

    pub fn time(&self) -> Time {
        self.time
    }

    pub fn increment_time(&mut self) {
        self.time += 1;
    }

    pub fn reinsert(&self) -> bool {
        self.reinsert
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Reset position, delay, speed and distance to their just-injected
    /// values while keeping identity and source node, per the `reinsert`
    /// lifecycle: the agent re-enters the pre-street limbo rather than
    /// being destroyed.
    pub fn reset_for_reinsertion(&mut self) {
        self.current_street = None;
        self.lane = None;
        self.speed = 0.0;
        self.delay = 0;
        self.distance = 0.0;
        self.time = 0;
    }

    /// `true` once the agent is neither at its source (no street, no
    /// pending memo) nor travelling — i.e. parked at the stop line with a
    /// zero delay, awaiting release by Stage B.
    pub fn at_stop_line(&self) -> bool {
        self.current_street.is_some() && self.delay == 0
    }

    pub fn is_at_source(&self) -> bool {
        self.current_street.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reinsertion_resets_transient_fields_keeps_identity() {
        let mut a = Agent::new(AgentId(0), Some(ItinId(0)), NodeId(0), true, 0);
        a.set_current_street(Some(StreetId(1)));
        a.set_speed(10.0);
        a.set_delay(3);
        a.add_distance(42.0);
        a.increment_time();
        a.reset_for_reinsertion();
        assert_eq!(a.current_street(), None);
        assert_eq!(a.speed(), 0.0);
        assert_eq!(a.delay(), 0);
        assert_eq!(a.distance(), 0.0);
        assert_eq!(a.time(), 0);
        assert_eq!(a.id(), AgentId(0));
        assert_eq!(a.source_node(), NodeId(0));
    }

    #[test]
    fn random_agent_has_no_itinerary() {
        let a = Agent::new(AgentId(0), None, NodeId(0), false, 0);
        assert!(a.is_random());
    }
}
