extern crate smallvec;
extern crate ordered_float;
extern crate regex;
extern crate failure;
#[macro_use] extern crate failure_derive;

pub mod config;
pub mod geom;
pub mod input;
pub mod output;
pub mod pipeline;
pub mod traffic;


use log::{debug, info};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use config::LocalizationConfig;
use geom::Vector3;
use input::roadnetwork::{NetworkNames, RoadNetwork, WaypointGraph};
use input::scenario::{Scenario, ScenarioAction};
use output::history::{History, Localization, StageLogEvent, VehicleLogEvent};
use pipeline::stage::StageRunner;
use traffic::arbiter::{LaneChangeRequest, LaneChangeState};
use traffic::buffer::PathBuffer;
use traffic::frames::{Roster, RosterEntry};
use traffic::platform::{DebugDraw, KinematicTable, Kinematics};
use traffic::stage::{links, LocalizationStage, PeerLinks};
use traffic::ActorId;

pub type AppResult<T> = Result<T, failure::Error>;

struct ScenarioVehicle {
    name: String,
    actor: ActorId,
    speed: f64,
    live: bool,
    request: LaneChangeRequest,
    lane_change: LaneChangeState,
    log: Vec<VehicleLogEvent>,
}

/// Moves a vehicle `distance` meters along the polyline of its buffer,
/// stopping at the last waypoint.
pub fn advance<G: WaypointGraph + ?Sized>(graph: &G, buffer: &PathBuffer, k: Kinematics, speed: f64, distance: f64) -> Kinematics {
    let mut location = k.location;
    let mut heading = k.heading;
    let mut remaining = distance;
    for wp in buffer.iter() {
        let segment = graph.location(wp.id) - location;
        let length = segment.length();
        if length > 1e-9 {
            heading = segment.normalized();
        }
        if length >= remaining {
            location = location + heading * remaining;
            remaining = 0.0;
            break;
        }
        location = graph.location(wp.id);
        remaining -= length;
    }
    let velocity = if remaining > 1e-9 { Vector3::zero() } else { heading * speed };
    Kinematics { location: location, heading: heading, velocity: velocity }
}

/// Runs the localization stage on its own thread and plays the scenario
/// against it, acting as the upstream stage, as all three consumers, and as
/// the platform moving the vehicles `dt` seconds per cycle.
pub fn run_scenario(network: Arc<RoadNetwork>,
                    scenario: &Scenario,
                    config: &LocalizationConfig,
                    dt: f64,
                    draw: Box<dyn DebugDraw>)
                    -> AppResult<History> {
    let table = Arc::new(KinematicTable::new());
    let (stage_links, mut peers) = links(config.messenger_timeout);
    let mut stage = LocalizationStage::new(config.clone(), network.clone(), table.clone(), stage_links)?
        .with_debug_draw(draw);
    let running = Arc::new(AtomicBool::new(true));

    let stage_running = running.clone();
    let pool_size = config.pool_size;
    let stage_thread = thread::Builder::new()
        .name("localization".to_string())
        .spawn(move || -> Result<u64, pipeline::stage::StageError> {
            let mut runner = StageRunner::new("localization", pool_size)?;
            runner.run(&mut stage, &stage_running)
        })?;

    let mut history = History::default();
    let mut vehicles: Vec<ScenarioVehicle> = Vec::new();
    let played = play(&network, scenario, &table, &mut peers, &mut vehicles, &mut history, dt);

    running.store(false, Ordering::SeqCst);
    drop(peers);
    let stage_cycles = match stage_thread.join() {
        Ok(result) => result?,
        Err(_) => return Err(failure::err_msg("localization stage panicked")),
    };
    played?;
    info!("scenario finished after {} stage cycles", stage_cycles);

    history.vehicles = vehicles.into_iter().map(|v| (v.name, v.actor, v.log)).collect();
    Ok(history)
}

fn play(network: &RoadNetwork,
        scenario: &Scenario,
        table: &KinematicTable,
        peers: &mut PeerLinks,
        vehicles: &mut Vec<ScenarioVehicle>,
        history: &mut History,
        dt: f64)
        -> AppResult<()> {
    let mut next_actor: ActorId = 0;
    let mut cycles: u64 = 0;
    for action in &scenario.actions {
        match *action {
            ScenarioAction::Spawn(ref name, wp, speed) => {
                let location = network.location(wp);
                let heading = match network.successors(wp).iter().min() {
                    Some(&next) => (network.location(next) - location).normalized(),
                    None => Vector3::new(1.0, 0.0, 0.0),
                };
                table.set(next_actor, Kinematics { location: location, heading: heading, velocity: heading * speed });
                vehicles.push(ScenarioVehicle {
                    name: name.clone(),
                    actor: next_actor,
                    speed: speed,
                    live: true,
                    request: LaneChangeRequest::default(),
                    lane_change: LaneChangeState::None,
                    log: vec![VehicleLogEvent::Spawn(wp, speed)],
                });
                next_actor += 1;
            }
            ScenarioAction::ForceLaneChange(ref name, side) => {
                find(vehicles, name)?.request.forced = Some(side);
            }
            ScenarioAction::AutoLaneChange(ref name, on) => {
                find(vehicles, name)?.request.auto = on;
            }
            ScenarioAction::Remove(ref name) => {
                let v = find(vehicles, name)?;
                table.remove(v.actor);
                v.live = false;
                v.log.push(VehicleLogEvent::Removed(cycles));
            }
            ScenarioAction::Run(n) => {
                for _ in 0..n {
                    cycles += 1;
                    play_cycle(network, table, peers, vehicles, history, dt)?;
                }
            }
        }
    }
    Ok(())
}

fn find<'a>(vehicles: &'a mut [ScenarioVehicle], name: &str) -> AppResult<&'a mut ScenarioVehicle> {
    vehicles.iter_mut()
        .find(|v| v.name == name && v.live)
        .ok_or_else(|| failure::err_msg(format!("unknown vehicle {}", name)))
}

fn play_cycle(network: &RoadNetwork,
              table: &KinematicTable,
              peers: &mut PeerLinks,
              vehicles: &mut [ScenarioVehicle],
              history: &mut History,
              dt: f64)
              -> AppResult<()> {
    use traffic::platform::VehicleStates;

    let roster = Roster {
        entries: vehicles.iter()
            .filter(|v| v.live)
            .map(|v| RosterEntry { actor: v.actor, request: v.request })
            .collect(),
    };
    peers.roster.push(roster)?;

    let planner = peers.planner.pull()?;
    let collision = peers.collision.pull()?;
    let lights = peers.traffic_light.pull()?;
    if !planner.fresh {
        history.stage.push(StageLogEvent::Idle);
        return Ok(());
    }
    let stale = planner.entries.iter().filter(|e| e.is_none()).count();
    history.stage.push(StageLogEvent::Cycle(planner.cycle, planner.entries.len(), stale));

    for v in vehicles.iter_mut().filter(|v| v.live) {
        let (p, buffer) = match (planner.find(v.actor), collision.buffers.get(v.actor)) {
            (Some(p), Some(buffer)) => (p, buffer),
            _ => {
                v.log.push(VehicleLogEvent::Stale(planner.cycle));
                continue;
            }
        };
        let k = match table.kinematics(v.actor) {
            Some(k) => k,
            None => continue,
        };

        v.log.push(VehicleLogEvent::Localized(Localization {
            cycle: planner.cycle,
            location: k.location,
            closest_waypoint: lights.find(v.actor).map(|l| l.closest_waypoint).unwrap_or(0),
            target: p.target,
            waypoints: buffer.len(),
            horizon: buffer.horizon_length(),
            end_of_path: p.end_of_path,
            approaching_junction: p.approaching_junction,
        }));
        if p.lane_change.name() != v.lane_change.name() {
            v.log.push(VehicleLogEvent::LaneChange(planner.cycle, p.lane_change));
            debug!("{} lane change {}", v.name, p.lane_change.name());
        }
        v.lane_change = p.lane_change;
        if let LaneChangeState::Committing { side, .. } = p.lane_change {
            if v.request.forced == Some(side) {
                v.request.forced = None;
            }
        }

        table.set(v.actor, advance(network, buffer, k, v.speed, v.speed * dt));
    }
    Ok(())
}

pub fn read_file(f: &Path) -> AppResult<String> {
    use std::fs::File;
    use std::io::prelude::*;
    use std::io::BufReader;

    let file = File::open(f)?;
    let mut file = BufReader::new(&file);
    let mut contents = String::new();
    file.read_to_string(&mut contents)?;
    Ok(contents)
}

pub fn get_road_network(s: &Path) -> AppResult<(RoadNetwork, NetworkNames<String>)> {
    let contents = read_file(s)?;
    get_road_network_string(&contents)
}

pub fn get_road_network_string(s: &str) -> AppResult<(RoadNetwork, NetworkNames<String>)> {
    let model = input::roadnetwork_parser::parse_road_network(s)?;
    Ok(model)
}

pub fn get_scenario(s: &Path, names: &NetworkNames<String>) -> AppResult<Scenario> {
    let contents = read_file(s)?;
    let scenario = input::scenario::parse_scenario(&contents, names)?;
    Ok(scenario)
}
