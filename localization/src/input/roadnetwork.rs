use smallvec::SmallVec;
use ordered_float::OrderedFloat;

use crate::geom::Location;

pub type WaypointId = usize;

use std::collections::HashMap;
use std::hash::Hash;
use std::fmt::Debug;

pub type NameMap<Ref> = HashMap<Ref, usize>;

/// Identity of a lane: road, lane section and signed lane number.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LaneKey {
    pub road: i32,
    pub section: i32,
    pub lane: i32,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }
}

/// The map service consumed by the localization stage.
///
/// Waypoints are referred to by identity only; the stage never copies or
/// mutates them. Implementations must be safe to query from all workers of
/// the stage at once.
pub trait WaypointGraph: Sync {
    fn nearest_waypoint(&self, location: Location) -> Option<WaypointId>;
    fn location(&self, wp: WaypointId) -> Location;
    fn lane(&self, wp: WaypointId) -> LaneKey;
    fn is_junction(&self, wp: WaypointId) -> bool;
    fn successors(&self, wp: WaypointId) -> SmallVec<[WaypointId; 2]>;
    fn predecessors(&self, wp: WaypointId) -> SmallVec<[WaypointId; 2]>;
    fn adjacent_lane(&self, wp: WaypointId, side: Side) -> Option<WaypointId>;

    fn distance(&self, a: WaypointId, b: WaypointId) -> f64 {
        self.location(a).distance(&self.location(b))
    }
}

#[derive(Debug, Clone)]
pub struct Waypoint {
    pub location: Location,
    pub lane: LaneKey,
    pub junction: bool,
    pub next: SmallVec<[WaypointId; 2]>,
    pub prev: SmallVec<[WaypointId; 2]>,
    pub left: Option<WaypointId>,
    pub right: Option<WaypointId>,
}

impl Waypoint {
    pub fn new(location: Location, lane: LaneKey) -> Self {
        Waypoint {
            location: location,
            lane: lane,
            junction: false,
            next: SmallVec::new(),
            prev: SmallVec::new(),
            left: None,
            right: None,
        }
    }
}

/// In-memory road network, sampled as a directed graph of waypoints.
#[derive(Debug, Default)]
pub struct RoadNetwork {
    pub waypoints: Vec<Waypoint>,
}

#[derive(Debug)]
pub struct NetworkNames<Ref: Hash + Eq + Debug> {
    pub waypoint_names: NameMap<Ref>,
}

impl RoadNetwork {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn add(&mut self, wp: Waypoint) -> WaypointId {
        self.waypoints.push(wp);
        self.waypoints.len() - 1
    }

    pub fn link(&mut self, from: WaypointId, to: WaypointId) {
        if !self.waypoints[from].next.contains(&to) {
            self.waypoints[from].next.push(to);
        }
        if !self.waypoints[to].prev.contains(&from) {
            self.waypoints[to].prev.push(from);
        }
    }

    /// Makes `other` the neighbor of `wp` on `side`, and `wp` the neighbor of
    /// `other` on the opposite side.
    pub fn set_adjacent(&mut self, wp: WaypointId, side: Side, other: WaypointId) {
        match side {
            Side::Left => {
                self.waypoints[wp].left = Some(other);
                self.waypoints[other].right = Some(wp);
            }
            Side::Right => {
                self.waypoints[wp].right = Some(other);
                self.waypoints[other].left = Some(wp);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.waypoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waypoints.is_empty()
    }
}

impl WaypointGraph for RoadNetwork {
    fn nearest_waypoint(&self, location: Location) -> Option<WaypointId> {
        self.waypoints
            .iter()
            .enumerate()
            .min_by_key(|(idx, wp)| (OrderedFloat(wp.location.distance(&location)), *idx))
            .map(|(idx, _)| idx)
    }

    fn location(&self, wp: WaypointId) -> Location {
        self.waypoints[wp].location
    }

    fn lane(&self, wp: WaypointId) -> LaneKey {
        self.waypoints[wp].lane
    }

    fn is_junction(&self, wp: WaypointId) -> bool {
        self.waypoints[wp].junction
    }

    fn successors(&self, wp: WaypointId) -> SmallVec<[WaypointId; 2]> {
        self.waypoints[wp].next.clone()
    }

    fn predecessors(&self, wp: WaypointId) -> SmallVec<[WaypointId; 2]> {
        self.waypoints[wp].prev.clone()
    }

    fn adjacent_lane(&self, wp: WaypointId, side: Side) -> Option<WaypointId> {
        match side {
            Side::Left => self.waypoints[wp].left,
            Side::Right => self.waypoints[wp].right,
        }
    }
}
