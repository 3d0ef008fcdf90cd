use std::collections::HashMap;

use crate::geom::Location;
use crate::input::roadnetwork::{LaneKey, WaypointGraph, WaypointId};
use super::arbiter::{LaneChangeArbiter, LaneChangeState};
use super::platform::Kinematics;
use super::ActorId;

/// What other vehicles may know about a vehicle during one cycle.
#[derive(Clone, Debug, PartialEq)]
pub struct Neighbor {
    pub actor: ActorId,
    pub kinematics: Kinematics,
    /// Nearest waypoint, and its lane, at the start of the cycle.
    pub waypoint: Option<WaypointId>,
    pub lane: Option<LaneKey>,
    pub lane_change: LaneChangeState,
}

/// Read-only snapshot of every live vehicle, taken in the Receiving phase
/// and shared by all workers.
#[derive(Debug, Default)]
pub struct Neighborhood {
    neighbors: Vec<Neighbor>,
    by_actor: HashMap<ActorId, usize>,
    /// Points occupied in each lane: current positions, plus the merge
    /// points of vehicles committing into the lane.
    occupied: HashMap<LaneKey, Vec<(usize, Location)>>,
    /// Vehicles by current lane.
    lanes: HashMap<LaneKey, Vec<usize>>,
    /// Vehicles with a pending request into each lane.
    requests: HashMap<LaneKey, Vec<usize>>,
}

impl Neighborhood {
    pub fn build<G: WaypointGraph + ?Sized>(graph: &G,
                                            vehicles: &[(ActorId, Kinematics)],
                                            arbiter: &LaneChangeArbiter)
                                            -> Neighborhood {
        let mut n = Neighborhood::default();
        for &(actor, kinematics) in vehicles {
            let waypoint = graph.nearest_waypoint(kinematics.location);
            let idx = n.neighbors.len();
            let neighbor = Neighbor {
                actor: actor,
                kinematics: kinematics,
                waypoint: waypoint,
                lane: waypoint.map(|w| graph.lane(w)),
                lane_change: arbiter.state(actor),
            };

            if let Some(lane) = neighbor.lane {
                n.occupied.entry(lane).or_insert_with(Vec::new).push((idx, kinematics.location));
                n.lanes.entry(lane).or_insert_with(Vec::new).push(idx);
            }
            match neighbor.lane_change {
                LaneChangeState::Committing { target, merge, .. } => {
                    let points = n.occupied.entry(target).or_insert_with(Vec::new);
                    if neighbor.lane != Some(target) {
                        points.push((idx, kinematics.location));
                    }
                    points.push((idx, merge));
                }
                LaneChangeState::Requested { target, .. } => {
                    n.requests.entry(target).or_insert_with(Vec::new).push(idx);
                }
                LaneChangeState::None => {}
            }

            n.by_actor.insert(actor, idx);
            n.neighbors.push(neighbor);
        }
        n
    }

    pub fn len(&self) -> usize {
        self.neighbors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.neighbors.is_empty()
    }

    pub fn get(&self, actor: ActorId) -> Option<&Neighbor> {
        self.by_actor.get(&actor).map(|&i| &self.neighbors[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Neighbor> {
        self.neighbors.iter()
    }

    /// Vehicles occupying `lane`, each with the point it occupies. A vehicle
    /// committing into the lane appears once for its position and once for
    /// its merge point.
    pub fn occupants(&self, lane: LaneKey) -> impl Iterator<Item = (&Neighbor, Location)> {
        self.occupied
            .get(&lane)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
            .iter()
            .map(move |&(i, point)| (&self.neighbors[i], point))
    }

    /// Vehicles whose current lane is `lane`.
    pub fn in_lane(&self, lane: LaneKey) -> impl Iterator<Item = &Neighbor> {
        self.lanes
            .get(&lane)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
            .iter()
            .map(move |&i| &self.neighbors[i])
    }

    /// Vehicles with a pending lane change into `lane`.
    pub fn requesting(&self, lane: LaneKey) -> impl Iterator<Item = &Neighbor> {
        self.requests
            .get(&lane)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
            .iter()
            .map(move |&i| &self.neighbors[i])
    }
}
