//! Interfaces to the simulation platform: read-only vehicle state and
//! optional debug rendering.

use parking_lot::RwLock;
use std::collections::HashMap;

use crate::geom::{Location, Vector3};
use super::ActorId;

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Kinematics {
    pub location: Location,
    /// Unit forward vector.
    pub heading: Vector3,
    pub velocity: Vector3,
}

impl Kinematics {
    pub fn speed(&self) -> f64 {
        self.velocity.length()
    }
}

/// Current transform and velocity of live vehicles. `None` means the actor
/// is gone (destroyed or not yet visible to the platform).
pub trait VehicleStates: Sync {
    fn kinematics(&self, actor: ActorId) -> Option<Kinematics>;
}

/// Vehicle states kept in memory, written by whoever drives the vehicles.
#[derive(Debug, Default)]
pub struct KinematicTable {
    vehicles: RwLock<HashMap<ActorId, Kinematics>>,
}

impl KinematicTable {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn set(&self, actor: ActorId, k: Kinematics) {
        self.vehicles.write().insert(actor, k);
    }

    pub fn remove(&self, actor: ActorId) -> Option<Kinematics> {
        self.vehicles.write().remove(&actor)
    }
}

impl VehicleStates for KinematicTable {
    fn kinematics(&self, actor: ActorId) -> Option<Kinematics> {
        self.vehicles.read().get(&actor).cloned()
    }
}

/// Fire-and-forget rendering of diagnostics. Failures are ignored by the
/// caller.
pub trait DebugDraw: Send + Sync {
    fn draw_polyline(&self, actor: ActorId, points: &[Location]) -> Result<(), failure::Error>;
}

pub struct NoDraw;

impl DebugDraw for NoDraw {
    fn draw_polyline(&self, _actor: ActorId, _points: &[Location]) -> Result<(), failure::Error> {
        Ok(())
    }
}
