//! Lane-change decisions.
//!
//! A vehicle first *requests* a lane change toward one side, which other
//! vehicles observe during the next cycle. One cycle later the request is
//! either committed, splicing the vehicle's buffer onto the adjacent lane, or
//! abandoned. After committing, the vehicle stays in `Committing` for a
//! cooldown before it may request again.

use log::debug;
use std::collections::HashMap;

use crate::config::LocalizationConfig;
use crate::geom::Location;
use crate::input::roadnetwork::{LaneKey, Side, WaypointGraph, WaypointId};
use super::buffer::PathBuffer;
use super::neighborhood::{Neighbor, Neighborhood};
use super::ActorId;

/// Speeds closer than this (m/s) do not count as slower.
const SPEED_MARGIN: f64 = 0.1;
const EPS: f64 = 1e-9;

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum LaneChangeState {
    None,
    Requested {
        side: Side,
        since: u64,
        target: LaneKey,
        merge: Location,
    },
    Committing {
        side: Side,
        until: u64,
        target: LaneKey,
        merge: Location,
    },
}

impl Default for LaneChangeState {
    fn default() -> Self {
        LaneChangeState::None
    }
}

impl LaneChangeState {
    pub fn name(&self) -> &'static str {
        match *self {
            LaneChangeState::None => "none",
            LaneChangeState::Requested { .. } => "requested",
            LaneChangeState::Committing { .. } => "committing",
        }
    }

    pub fn side(&self) -> Option<Side> {
        match *self {
            LaneChangeState::None => None,
            LaneChangeState::Requested { side, .. } | LaneChangeState::Committing { side, .. } => Some(side),
        }
    }

    pub fn target(&self) -> Option<LaneKey> {
        match *self {
            LaneChangeState::None => None,
            LaneChangeState::Requested { target, .. } | LaneChangeState::Committing { target, .. } => Some(target),
        }
    }
}

/// Upstream wishes for one vehicle.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct LaneChangeRequest {
    /// Change to this side as soon as it is safe.
    pub forced: Option<Side>,
    /// Change lanes on its own when blocked by a slower vehicle.
    pub auto: bool,
}

/// A possible lane change for one vehicle this cycle.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Candidate {
    pub side: Side,
    /// Buffer index from which the buffer is replaced.
    pub index: usize,
    pub waypoint: WaypointId,
    pub lane: LaneKey,
    pub merge: Location,
}

pub fn candidate<G: WaypointGraph + ?Sized>(graph: &G,
                                            buffer: &PathBuffer,
                                            side: Side,
                                            lane_change_distance: f64)
                                            -> Option<Candidate> {
    let front = buffer.front()?;
    if graph.is_junction(front.id) {
        return None;
    }
    let index = buffer.merge_index(lane_change_distance)?;
    let at = buffer.get(index)?.id;
    if graph.is_junction(at) {
        return None;
    }
    let waypoint = graph.adjacent_lane(at, side)?;
    if graph.is_junction(waypoint) {
        return None;
    }
    Some(Candidate {
        side: side,
        index: index,
        waypoint: waypoint,
        lane: graph.lane(waypoint),
        merge: graph.location(waypoint),
    })
}

/// Whether every occupant of the candidate's lane keeps the clearance to the
/// merge point, now and after `merge_time`.
pub fn gap_is_safe(ego: &Neighbor, c: &Candidate, neighborhood: &Neighborhood, config: &LocalizationConfig) -> bool {
    let heading = ego.kinematics.heading;
    let clearance = config.min_lane_change_clearance;
    neighborhood.occupants(c.lane)
        .filter(|(n, _)| n.actor != ego.actor)
        .all(|(n, point)| {
            let gap = (point - c.merge).dot(&heading);
            let closing = (n.kinematics.velocity - ego.kinematics.velocity).dot(&heading);
            let projected = gap + closing * config.merge_time;
            gap.abs() >= clearance && projected.abs() >= clearance && gap.signum() == projected.signum()
        })
}

/// Whether a slower vehicle is ahead of `ego` in its lane within the blocking
/// distance.
pub fn is_blocked(ego: &Neighbor, neighborhood: &Neighborhood, config: &LocalizationConfig) -> bool {
    let lane = match ego.lane {
        Some(lane) => lane,
        None => return false,
    };
    let heading = ego.kinematics.heading;
    let speed = ego.kinematics.velocity.dot(&heading);
    neighborhood.in_lane(lane)
        .filter(|n| n.actor != ego.actor)
        .any(|n| {
            let ahead = (n.kinematics.location - ego.kinematics.location).dot(&heading);
            ahead > 0.0 && ahead <= config.blocking_distance
                && n.kinematics.velocity.dot(&heading) < speed - SPEED_MARGIN
        })
}

/// Whether `a` has priority over `b` for the same gap: the one further ahead
/// along their mean heading wins, the lower actor id on a tie.
pub fn has_priority(a: &Neighbor, b: &Neighbor) -> bool {
    let axis = (a.kinematics.heading + b.kinematics.heading).normalized();
    let ahead = (a.kinematics.location - b.kinematics.location).dot(&axis);
    if ahead.abs() <= EPS {
        a.actor < b.actor
    } else {
        ahead > 0.0
    }
}

/// Per-vehicle lane-change states, read by all workers during a cycle and
/// updated between cycles.
#[derive(Debug, Default, Clone)]
pub struct LaneChangeArbiter {
    table: HashMap<ActorId, LaneChangeState>,
}

impl LaneChangeArbiter {
    pub fn with_capacity(capacity: usize) -> Self {
        LaneChangeArbiter { table: HashMap::with_capacity(capacity) }
    }

    pub fn state(&self, actor: ActorId) -> LaneChangeState {
        self.table.get(&actor).cloned().unwrap_or_default()
    }

    pub fn update(&mut self, actor: ActorId, state: LaneChangeState) {
        let old = self.state(actor);
        if old.name() != state.name() {
            debug!("vehicle {} lane change {} -> {}", actor, old.name(), state.name());
        }
        match state {
            LaneChangeState::None => {
                self.table.remove(&actor);
            }
            _ => {
                self.table.insert(actor, state);
            }
        }
    }

    pub fn remove(&mut self, actor: ActorId) {
        self.table.remove(&actor);
    }

    /// Vehicles with a lane change in progress.
    pub fn active(&self) -> usize {
        self.table.len()
    }

    /// Computes this cycle's lane-change state of `ego` and, when committing,
    /// splices `buffer` onto the adjacent lane. `buffer` must already be
    /// updated for this cycle. Reads only the table as of the start of the
    /// cycle, so vehicles may be decided in any order.
    pub fn decide<G: WaypointGraph + ?Sized>(&self,
                                             graph: &G,
                                             config: &LocalizationConfig,
                                             neighborhood: &Neighborhood,
                                             cycle: u64,
                                             ego: &Neighbor,
                                             request: LaneChangeRequest,
                                             buffer: &mut PathBuffer)
                                             -> LaneChangeState {
        match self.state(ego.actor) {
            LaneChangeState::Committing { until, .. } if cycle >= until => LaneChangeState::None,
            committing @ LaneChangeState::Committing { .. } => committing,

            LaneChangeState::None => {
                let sides = match request.forced {
                    Some(side) => vec![side],
                    None if request.auto && is_blocked(ego, neighborhood, config) => {
                        vec![config.lane_change_bias, config.lane_change_bias.opposite()]
                    }
                    None => return LaneChangeState::None,
                };
                for side in sides {
                    if let Some(c) = candidate(graph, buffer, side, config.lane_change_distance) {
                        if gap_is_safe(ego, &c, neighborhood, config) {
                            return LaneChangeState::Requested {
                                side: side,
                                since: cycle,
                                target: c.lane,
                                merge: c.merge,
                            };
                        }
                    }
                }
                LaneChangeState::None
            }

            LaneChangeState::Requested { side, since, merge, .. } => {
                let wanted = request.forced == Some(side)
                    || (request.auto && is_blocked(ego, neighborhood, config));
                if !wanted {
                    debug!("vehicle {} withdraws lane change {:?}", ego.actor, side);
                    return LaneChangeState::None;
                }

                let c = match candidate(graph, buffer, side, config.lane_change_distance) {
                    Some(c) if gap_is_safe(ego, &c, neighborhood, config) => c,
                    _ => {
                        debug!("vehicle {} aborts lane change {:?}: no safe gap", ego.actor, side);
                        return LaneChangeState::None;
                    }
                };

                let clearance = config.min_lane_change_clearance;
                let yields = neighborhood.requesting(c.lane)
                    .filter(|n| n.actor != ego.actor)
                    .filter(|n| match n.lane_change {
                        LaneChangeState::Requested { merge: other, .. } => other.distance(&merge) < clearance,
                        _ => false,
                    })
                    .any(|n| has_priority(n, ego));
                if yields {
                    if cycle.saturating_sub(since) >= config.lane_change_patience {
                        debug!("vehicle {} drops lane change {:?} after waiting", ego.actor, side);
                        return LaneChangeState::None;
                    }
                    return LaneChangeState::Requested { side: side, since: since, target: c.lane, merge: c.merge };
                }

                if !buffer.splice(graph, c.index, c.waypoint) {
                    return LaneChangeState::None;
                }
                buffer.extend(graph, config.junction_policy, ego.actor, config.max_horizon);
                LaneChangeState::Committing {
                    side: side,
                    until: cycle + config.lane_change_cooldown,
                    target: c.lane,
                    merge: c.merge,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geom::Vector3;
    use crate::input::roadnetwork::RoadNetwork;
    use crate::input::roadnetwork::NetworkNames;
    use crate::input::roadnetwork_parser::parse_road_network;
    use crate::traffic::platform::Kinematics;

    const LEFT: LaneKey = LaneKey { road: 1, section: 0, lane: 1 };
    const RIGHT: LaneKey = LaneKey { road: 1, section: 0, lane: 2 };

    fn two_lanes() -> (RoadNetwork, NetworkNames<String>) {
        parse_road_network("
            strip l road=1 section=0 lane=1 x=0.0 y=3.0 heading=0.0 spacing=1.0 count=100
            strip r road=1 section=0 lane=2 x=0.0 y=0.0 heading=0.0 spacing=1.0 count=100
            lanes l right r
        ").unwrap()
    }

    fn kin(x: f64, y: f64, v: f64) -> Kinematics {
        Kinematics {
            location: Vector3::new(x, y, 0.0),
            heading: Vector3::new(1.0, 0.0, 0.0),
            velocity: Vector3::new(v, 0.0, 0.0),
        }
    }

    fn buffer_at(net: &RoadNetwork, x: f64, y: f64) -> PathBuffer {
        let location = Vector3::new(x, y, 0.0);
        let mut b = PathBuffer::seed(net, net.nearest_waypoint(location).unwrap());
        b.update(net, crate::config::JunctionPolicy::Straightest, 0, location, 20.0);
        b
    }

    fn forced(side: Side) -> LaneChangeRequest {
        LaneChangeRequest { forced: Some(side), auto: false }
    }

    #[test]
    fn test_request_then_commit() {
        let (net, names) = two_lanes();
        let config = LocalizationConfig::default();
        let mut arbiter = LaneChangeArbiter::default();
        let vehicles = [(1, kin(0.0, 0.0, 10.0))];

        let n = Neighborhood::build(&net, &vehicles, &arbiter);
        let mut b = buffer_at(&net, 0.0, 0.0);
        let ego = n.get(1).unwrap();
        let s = arbiter.decide(&net, &config, &n, 1, ego, forced(Side::Left), &mut b);
        match s {
            LaneChangeState::Requested { side: Side::Left, since: 1, target, .. } => assert_eq!(target, LEFT),
            x => panic!("unexpected {:?}", x),
        }
        // Requesting does not touch the buffer.
        assert_eq!(b, buffer_at(&net, 0.0, 0.0));
        arbiter.update(1, s);

        let n = Neighborhood::build(&net, &vehicles, &arbiter);
        let ego = n.get(1).unwrap();
        let s = arbiter.decide(&net, &config, &n, 2, ego, forced(Side::Left), &mut b);
        match s {
            LaneChangeState::Committing { until, .. } => assert_eq!(until, 2 + config.lane_change_cooldown),
            x => panic!("unexpected {:?}", x),
        }
        assert_eq!(b.get(10).unwrap().id, names.waypoint_names["l10"]);
        assert_eq!(net.lane(b.back().unwrap().id), LEFT);
        arbiter.update(1, s);

        // Cooldown.
        let n = Neighborhood::build(&net, &vehicles, &arbiter);
        let ego = n.get(1).unwrap();
        assert_eq!(arbiter.decide(&net, &config, &n, 5, ego, forced(Side::Left), &mut b).name(), "committing");
        assert_eq!(arbiter.decide(&net, &config, &n, 12, ego, forced(Side::Left), &mut b), LaneChangeState::None);
    }

    #[test]
    fn test_withdrawn_request_aborts() {
        let (net, _) = two_lanes();
        let config = LocalizationConfig::default();
        let mut arbiter = LaneChangeArbiter::default();
        let vehicles = [(1, kin(0.0, 0.0, 10.0))];

        let n = Neighborhood::build(&net, &vehicles, &arbiter);
        let mut b = buffer_at(&net, 0.0, 0.0);
        let s = arbiter.decide(&net, &config, &n, 1, n.get(1).unwrap(), forced(Side::Left), &mut b);
        assert_eq!(s.name(), "requested");
        arbiter.update(1, s);

        let n = Neighborhood::build(&net, &vehicles, &arbiter);
        let before = b.clone();
        assert_eq!(arbiter.decide(&net, &config, &n, 2, n.get(1).unwrap(), LaneChangeRequest::default(), &mut b),
                   LaneChangeState::None);
        // Forcing the other side does not keep this request alive either.
        assert_eq!(arbiter.decide(&net, &config, &n, 2, n.get(1).unwrap(), forced(Side::Right), &mut b),
                   LaneChangeState::None);
        assert_eq!(b, before);
    }

    #[test]
    fn test_auto_request_dropped_when_no_longer_blocked() {
        let (net, _) = two_lanes();
        let config = LocalizationConfig::default();
        let mut arbiter = LaneChangeArbiter::default();
        let auto = LaneChangeRequest { forced: None, auto: true };

        let vehicles = [(1, kin(0.0, 0.0, 10.0)), (2, kin(8.0, 0.0, 4.0))];
        let n = Neighborhood::build(&net, &vehicles, &arbiter);
        let mut b = buffer_at(&net, 0.0, 0.0);
        let s = arbiter.decide(&net, &config, &n, 1, n.get(1).unwrap(), auto, &mut b);
        assert_eq!(s.name(), "requested");
        arbiter.update(1, s);

        // The slower vehicle has left the lane.
        let n = Neighborhood::build(&net, &[(1, kin(0.0, 0.0, 10.0))], &arbiter);
        assert_eq!(arbiter.decide(&net, &config, &n, 2, n.get(1).unwrap(), auto, &mut b), LaneChangeState::None);

        // Still blocked: the request goes on to commit.
        let n = Neighborhood::build(&net, &vehicles, &arbiter);
        assert_eq!(arbiter.decide(&net, &config, &n, 2, n.get(1).unwrap(), auto, &mut b).name(), "committing");
    }

    #[test]
    fn test_unsafe_gap_and_missing_lane() {
        let (net, _) = two_lanes();
        let config = LocalizationConfig::default();
        let arbiter = LaneChangeArbiter::default();
        // Vehicle 2 sits in the left lane right at vehicle 1's merge point.
        let vehicles = [(1, kin(0.0, 0.0, 10.0)), (2, kin(11.0, 3.0, 10.0))];
        let n = Neighborhood::build(&net, &vehicles, &arbiter);
        let mut b = buffer_at(&net, 0.0, 0.0);
        let before = b.clone();
        assert_eq!(arbiter.decide(&net, &config, &n, 1, n.get(1).unwrap(), forced(Side::Left), &mut b),
                   LaneChangeState::None);
        // No lane on the right.
        assert_eq!(arbiter.decide(&net, &config, &n, 1, n.get(1).unwrap(), forced(Side::Right), &mut b),
                   LaneChangeState::None);
        assert_eq!(b, before);

        // A fast vehicle far behind closes the gap within the merge time.
        let vehicles = [(1, kin(30.0, 0.0, 5.0)), (2, kin(26.0, 3.0, 15.0))];
        let n = Neighborhood::build(&net, &vehicles, &arbiter);
        let mut b = buffer_at(&net, 30.0, 0.0);
        assert_eq!(arbiter.decide(&net, &config, &n, 1, n.get(1).unwrap(), forced(Side::Left), &mut b),
                   LaneChangeState::None);
    }

    #[test]
    fn test_auto_when_blocked() {
        let (net, _) = two_lanes();
        let config = LocalizationConfig::default();
        let arbiter = LaneChangeArbiter::default();
        let auto = LaneChangeRequest { forced: None, auto: true };

        let vehicles = [(1, kin(0.0, 0.0, 10.0)), (2, kin(8.0, 0.0, 4.0))];
        let n = Neighborhood::build(&net, &vehicles, &arbiter);
        assert!(is_blocked(n.get(1).unwrap(), &n, &config));
        assert!(!is_blocked(n.get(2).unwrap(), &n, &config));
        let mut b = buffer_at(&net, 0.0, 0.0);
        assert_eq!(arbiter.decide(&net, &config, &n, 1, n.get(1).unwrap(), auto, &mut b).side(), Some(Side::Left));
        assert_eq!(arbiter.decide(&net, &config, &n, 1, n.get(1).unwrap(), LaneChangeRequest::default(), &mut b),
                   LaneChangeState::None);

        // Same speed ahead is not blocking.
        let vehicles = [(1, kin(0.0, 0.0, 10.0)), (2, kin(8.0, 0.0, 10.0))];
        let n = Neighborhood::build(&net, &vehicles, &arbiter);
        assert!(!is_blocked(n.get(1).unwrap(), &n, &config));
    }

    #[test]
    fn test_competing_requests() {
        let (net, _) = two_lanes();
        let mut config = LocalizationConfig::default();
        config.lane_change_patience = 2;
        let mut arbiter = LaneChangeArbiter::default();
        // Both in the right lane, 2 m apart, both going left.
        let vehicles = [(1, kin(0.0, 0.0, 10.0)), (2, kin(2.0, 0.0, 10.0))];
        let mut b1 = buffer_at(&net, 0.0, 0.0);
        let mut b2 = buffer_at(&net, 2.0, 0.0);

        let n = Neighborhood::build(&net, &vehicles, &arbiter);
        let s1 = arbiter.decide(&net, &config, &n, 1, n.get(1).unwrap(), forced(Side::Left), &mut b1);
        let s2 = arbiter.decide(&net, &config, &n, 1, n.get(2).unwrap(), forced(Side::Left), &mut b2);
        arbiter.update(1, s1);
        arbiter.update(2, s2);

        let n = Neighborhood::build(&net, &vehicles, &arbiter);
        let s1 = arbiter.decide(&net, &config, &n, 2, n.get(1).unwrap(), forced(Side::Left), &mut b1);
        let s2 = arbiter.decide(&net, &config, &n, 2, n.get(2).unwrap(), forced(Side::Left), &mut b2);
        // Vehicle 2 is ahead and wins.
        assert_eq!(s1.name(), "requested");
        assert_eq!(s2.name(), "committing");
        arbiter.update(1, s1);
        arbiter.update(2, s2);

        // Next cycle the winner occupies the gap.
        let n = Neighborhood::build(&net, &vehicles, &arbiter);
        let s1 = arbiter.decide(&net, &config, &n, 3, n.get(1).unwrap(), forced(Side::Left), &mut b1);
        assert_eq!(s1, LaneChangeState::None);
    }

    #[test]
    fn test_priority_ties() {
        let (net, _) = two_lanes();
        let arbiter = LaneChangeArbiter::default();
        let n = Neighborhood::build(&net, &[(4, kin(5.0, 0.0, 1.0)), (9, kin(5.0, 3.0, 1.0))], &arbiter);
        let a = n.get(4).unwrap();
        let b = n.get(9).unwrap();
        assert!(has_priority(a, b));
        assert!(!has_priority(b, a));
    }
}
