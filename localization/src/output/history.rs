use crate::geom::Location;
use crate::input::roadnetwork::{NetworkNames, WaypointId};
use crate::traffic::arbiter::LaneChangeState;
use crate::traffic::ActorId;

#[derive(Debug, Default)]
pub struct History {
    pub stage: Vec<StageLogEvent>,
    pub vehicles: Vec<(String, ActorId, Vec<VehicleLogEvent>)>,
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub enum StageLogEvent {
    /// A cycle was published: cycle number, vehicles, vehicles without output.
    Cycle(u64, usize, usize),
    /// The stage received nothing within its bounded wait.
    Idle,
}

#[derive(Debug, Clone, PartialEq)]
pub enum VehicleLogEvent {
    Spawn(WaypointId, f64), // spawn waypoint, speed
    Localized(Localization),
    LaneChange(u64, LaneChangeState),
    Stale(u64),
    Removed(u64),
}

/// What the consumers learned about a vehicle in one cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct Localization {
    pub cycle: u64,
    pub location: Location,
    pub closest_waypoint: WaypointId,
    pub target: Location,
    pub waypoints: usize,
    pub horizon: f64,
    pub end_of_path: bool,
    pub approaching_junction: bool,
}

impl History {
    pub fn vehicle(&self, name: &str) -> Option<&[VehicleLogEvent]> {
        self.vehicles.iter().find(|(n, _, _)| n == name).map(|(_, _, e)| e.as_slice())
    }
}

pub fn waypoint_name(names: &NetworkNames<String>, wp: WaypointId) -> String {
    names.waypoint_names
        .iter()
        .find(|&(_k, v)| *v == wp)
        .map(|(k, _)| k.clone())
        .unwrap_or_else(|| format!("#{}", wp))
}

/// Print one committed or abandoned lane change per line on the format
/// `vehicle cycle state side`.
pub fn lane_changes(h: &History) -> Result<String, failure::Error> {
    use std::fmt::Write;
    let mut s = String::new();
    for &(ref name, _, ref events) in &h.vehicles {
        let mut last = "none";
        for ev in events {
            if let VehicleLogEvent::LaneChange(cycle, state) = *ev {
                let side = match state.side() {
                    Some(side) => format!("{:?}", side).to_lowercase(),
                    None => "-".to_string(),
                };
                let label = match (last, state.name()) {
                    ("requested", "none") => "abandoned",
                    ("committing", "none") => "completed",
                    (_, other) => other,
                };
                write!(s, "{} {} {} {}\n", name, cycle, label, side)?;
                last = state.name();
            }
        }
    }
    Ok(s)
}
