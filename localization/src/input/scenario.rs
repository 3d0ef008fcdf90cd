use super::roadnetwork::{NetworkNames, Side, WaypointId};
use super::roadnetwork_parser::{regex, number, side, ParseError};

type VehicleName = String;

#[derive(Debug)]
pub struct Scenario {
    pub actions: Vec<ScenarioAction>,
}

#[derive(Debug)]
pub enum ScenarioAction {
    Spawn(VehicleName, WaypointId, f64), // vehicle name, spawn waypoint, speed
    ForceLaneChange(VehicleName, Side),
    AutoLaneChange(VehicleName, bool),
    Remove(VehicleName),
    Run(usize),
}

/// Parses the scenario format
///
/// * vehicle car1 at a0 v=10.0
/// * force car1 left
/// * auto car1 off
/// * remove car1
/// * run 20
///
pub fn parse_scenario(input: &str, names: &NetworkNames<String>) -> Result<Scenario, ParseError> {
    let mut actions = Vec::new();
    let empty_re = regex(r"^\s*(#.*)?$")?;
    let vehicle_re = regex(r"(?x) ^ \s* vehicle \s+ (?P<name>\w+) \s+
            at \s+ (?P<wp>\w+) \s+
            v \s* = \s* (?P<vel>[\d\.]+) \s* $")?;
    let force_re = regex(r"^\s*force\s+(\w+)\s+(left|right)\s*$")?;
    let auto_re = regex(r"^\s*auto\s+(\w+)\s+(on|off)\s*$")?;
    let remove_re = regex(r"^\s*remove\s+(\w+)\s*$")?;
    let run_re = regex(r"^\s*run\s+(\d+)\s*$")?;

    for line in input.lines() {
        if empty_re.is_match(line) {
            continue;
        }
        if let Some(groups) = vehicle_re.captures(line) {
            let wp = names.waypoint_names.get(&groups["wp"]).cloned()
                .ok_or_else(|| ParseError::UnknownName(groups["wp"].to_string(), "waypoint".to_string()))?;
            actions.push(ScenarioAction::Spawn(groups["name"].to_string(), wp, number(&groups["vel"])?));
            continue;
        }
        if let Some(groups) = force_re.captures(line) {
            actions.push(ScenarioAction::ForceLaneChange(groups[1].to_string(), side(&groups[2])?));
            continue;
        }
        if let Some(groups) = auto_re.captures(line) {
            actions.push(ScenarioAction::AutoLaneChange(groups[1].to_string(), &groups[2] == "on"));
            continue;
        }
        if let Some(groups) = remove_re.captures(line) {
            actions.push(ScenarioAction::Remove(groups[1].to_string()));
            continue;
        }
        if let Some(groups) = run_re.captures(line) {
            actions.push(ScenarioAction::Run(number(&groups[1])?));
            continue;
        }
        return Err(ParseError::Unrecognized(line.to_string()));
    }

    Ok(Scenario { actions: actions })
}
