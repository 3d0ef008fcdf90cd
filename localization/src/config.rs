use std::str::FromStr;
use std::time::Duration;

use crate::input::roadnetwork::{Side, WaypointGraph, WaypointId};
use crate::traffic::ActorId;
use ordered_float::OrderedFloat;

#[derive(Debug, Fail)]
pub enum ConfigError {
    #[fail(display = "pool size must be at least one worker")]
    EmptyPool,
    #[fail(display = "vehicle capacity must be at least one")]
    NoCapacity,
    #[fail(display = "horizon bounds must satisfy 0 < min ({}) <= max ({})", _0, _1)]
    Horizon(f64, f64),
    #[fail(display = "{} must be positive, got {}", _0, _1)]
    NotPositive(&'static str, f64),
    #[fail(display = "unknown junction policy: {}", _0)]
    JunctionPolicy(String),
}

/// Tie-break among the successors of a waypoint at a junction.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum JunctionPolicy {
    /// Successor whose direction deviates least from the incoming
    /// direction, lowest waypoint id on ties.
    Straightest,
    /// Successors ordered by id, picked by `(actor + waypoint) mod n`,
    /// which spreads vehicles over the branches.
    Spread,
}

impl FromStr for JunctionPolicy {
    type Err = ConfigError;
    fn from_str(s: &str) -> Result<Self, ConfigError> {
        match s {
            "straightest" => Ok(JunctionPolicy::Straightest),
            "spread" => Ok(JunctionPolicy::Spread),
            _ => Err(ConfigError::JunctionPolicy(s.to_string())),
        }
    }
}

impl JunctionPolicy {
    pub fn choose<G: WaypointGraph + ?Sized>(&self,
                                             graph: &G,
                                             actor: ActorId,
                                             from: WaypointId,
                                             successors: &[WaypointId])
                                             -> Option<WaypointId> {
        if successors.len() <= 1 {
            return successors.first().cloned();
        }
        let mut sorted = successors.to_vec();
        sorted.sort();
        match *self {
            JunctionPolicy::Straightest => {
                let here = graph.location(from);
                let incoming = match graph.predecessors(from).iter().min() {
                    Some(&p) => (here - graph.location(p)).normalized(),
                    None => (graph.location(sorted[0]) - here).normalized(),
                };
                // Highest alignment wins; `min_by_key` keeps the lowest id on ties.
                sorted.iter()
                    .min_by_key(|&&s| OrderedFloat(-incoming.dot(&(graph.location(s) - here).normalized())))
                    .cloned()
            }
            JunctionPolicy::Spread => {
                Some(sorted[(actor as usize).wrapping_add(from) % sorted.len()])
            }
        }
    }
}

/// Options recognized by the localization stage.
#[derive(Debug, Clone)]
pub struct LocalizationConfig {
    pub pool_size: usize,
    pub min_horizon: f64,
    pub max_horizon: f64,
    pub vehicle_capacity: usize,
    pub min_lane_change_clearance: f64,
    pub lane_change_bias: Side,
    pub lane_change_distance: f64,
    pub lane_change_cooldown: u64,
    pub lane_change_patience: u64,
    pub blocking_distance: f64,
    pub merge_time: f64,
    pub reseed_distance: f64,
    pub junction_policy: JunctionPolicy,
    pub messenger_timeout: Duration,
    pub debug_draw: bool,
}

impl Default for LocalizationConfig {
    fn default() -> Self {
        LocalizationConfig {
            pool_size: 4,
            min_horizon: 10.0,
            max_horizon: 20.0,
            vehicle_capacity: 128,
            min_lane_change_clearance: 8.0,
            lane_change_bias: Side::Left,
            lane_change_distance: 10.0,
            lane_change_cooldown: 10,
            lane_change_patience: 5,
            blocking_distance: 15.0,
            merge_time: 2.0,
            reseed_distance: 10.0,
            junction_policy: JunctionPolicy::Straightest,
            messenger_timeout: Duration::from_secs(1),
            debug_draw: false,
        }
    }
}

impl LocalizationConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pool_size == 0 {
            return Err(ConfigError::EmptyPool);
        }
        if self.vehicle_capacity == 0 {
            return Err(ConfigError::NoCapacity);
        }
        if !(self.min_horizon > 0.0 && self.min_horizon <= self.max_horizon) {
            return Err(ConfigError::Horizon(self.min_horizon, self.max_horizon));
        }
        for &(name, value) in &[("min_lane_change_clearance", self.min_lane_change_clearance),
                                ("lane_change_distance", self.lane_change_distance),
                                ("blocking_distance", self.blocking_distance),
                                ("merge_time", self.merge_time),
                                ("reseed_distance", self.reseed_distance)] {
            if !(value > 0.0) {
                return Err(ConfigError::NotPositive(name, value));
            }
        }
        Ok(())
    }
}
