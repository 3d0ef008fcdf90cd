//! Per-cycle messages exchanged with the neighboring stages.

use std::sync::Arc;

use crate::geom::Location;
use crate::input::roadnetwork::WaypointId;
use super::arbiter::{LaneChangeRequest, LaneChangeState};
use super::directory::BufferDirectory;
use super::ActorId;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RosterEntry {
    pub actor: ActorId,
    pub request: LaneChangeRequest,
}

/// Upstream input of one cycle: the vehicles to localize.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Roster {
    pub entries: Vec<RosterEntry>,
}

impl Roster {
    pub fn actors(&self) -> impl Iterator<Item = ActorId> + '_ {
        self.entries.iter().map(|e| e.actor)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct PlannerMessage {
    pub actor: ActorId,
    /// Point on the buffer the vehicle should steer toward.
    pub target: Location,
    /// Signed angle (radians) from the vehicle heading to the target.
    pub deviation: f64,
    pub speed: f64,
    pub approaching_junction: bool,
    pub end_of_path: bool,
    pub lane_change: LaneChangeState,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CollisionMessage {
    pub actor: ActorId,
    /// Vehicles currently in a lane covered by this vehicle's buffer.
    pub overlapping: Vec<ActorId>,
    /// First non-junction waypoint after the next junction in the buffer.
    pub safe_point_after_junction: Option<WaypointId>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TrafficLightMessage {
    pub actor: ActorId,
    pub closest_waypoint: WaypointId,
    pub junction_look_ahead: WaypointId,
    pub approaching_junction: bool,
}

/// One cycle of messages, indexed by the vehicle slot of the registry. A
/// slot is `None` when the vehicle could not be localized this cycle.
#[derive(Clone, Debug, PartialEq)]
pub struct Frame<M> {
    pub cycle: u64,
    pub entries: Vec<Option<M>>,
}

impl<M> Frame<M> {
    pub fn get(&self, slot: usize) -> Option<&M> {
        self.entries.get(slot).and_then(|e| e.as_ref())
    }

    pub fn messages(&self) -> impl Iterator<Item = &M> {
        self.entries.iter().filter_map(|e| e.as_ref())
    }
}

pub type PlannerFrame = Frame<PlannerMessage>;
pub type TrafficLightFrame = Frame<TrafficLightMessage>;

/// Collision messages together with the Buffer Directory written in the same
/// cycle.
#[derive(Clone, Debug)]
pub struct CollisionFrame {
    pub frame: Frame<CollisionMessage>,
    pub buffers: Arc<BufferDirectory>,
}

impl<M: HasActor> Frame<M> {
    pub fn find(&self, actor: ActorId) -> Option<&M> {
        self.messages().find(|m| m.actor() == actor)
    }
}

pub trait HasActor {
    fn actor(&self) -> ActorId;
}

impl HasActor for PlannerMessage {
    fn actor(&self) -> ActorId {
        self.actor
    }
}

impl HasActor for CollisionMessage {
    fn actor(&self) -> ActorId {
        self.actor
    }
}

impl HasActor for TrafficLightMessage {
    fn actor(&self) -> ActorId {
        self.actor
    }
}
