//! The localization stage: keeps every vehicle's path buffer filled, decides
//! lane changes, and publishes the results to the planner, collision and
//! traffic-light stages.

use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{ConfigError, LocalizationConfig};
use crate::input::roadnetwork::{LaneKey, WaypointGraph};
use crate::pipeline::messenger::{self, MessengerError, Receiver, Sender};
use crate::pipeline::stage::{Batch, PipelineStage, Receipt, StageError};
use super::arbiter::{LaneChangeArbiter, LaneChangeRequest, LaneChangeState};
use super::buffer::PathBuffer;
use super::directory::{BufferDirectory, DirectoryPair};
use super::frames::*;
use super::neighborhood::Neighborhood;
use super::platform::{DebugDraw, NoDraw, VehicleStates};
use super::registry::VehicleRegistry;
use super::ActorId;

/// Seconds of travel to the steering target, and its minimum distance (m).
const TARGET_TIME_HORIZON: f64 = 0.5;
const MIN_TARGET_DISTANCE: f64 = 2.0;
/// Seconds of travel scanned for junctions, and the minimum distance (m).
const JUNCTION_TIME_HORIZON: f64 = 1.0;
const MIN_JUNCTION_LOOK_AHEAD: f64 = 5.0;

/// The stage's ends of its four links.
pub struct StageLinks {
    pub roster: Receiver<Roster>,
    pub planner: Sender<PlannerFrame>,
    pub collision: Sender<CollisionFrame>,
    pub traffic_light: Sender<TrafficLightFrame>,
}

/// The other ends: the upstream producer and the three consumers.
pub struct PeerLinks {
    pub roster: Sender<Roster>,
    pub planner: Receiver<PlannerFrame>,
    pub collision: Receiver<CollisionFrame>,
    pub traffic_light: Receiver<TrafficLightFrame>,
}

pub fn links(timeout: Duration) -> (StageLinks, PeerLinks) {
    let (roster_tx, roster_rx) = messenger::channel("roster", timeout);
    let (planner_tx, planner_rx) = messenger::channel("planner", timeout);
    let (collision_tx, collision_rx) = messenger::channel("collision", timeout);
    let (light_tx, light_rx) = messenger::channel("traffic_light", timeout);
    (StageLinks { roster: roster_rx, planner: planner_tx, collision: collision_tx, traffic_light: light_tx },
     PeerLinks { roster: roster_tx, planner: planner_rx, collision: collision_rx, traffic_light: light_rx })
}

/// Read-only input shared by all workers of one cycle.
#[derive(Debug)]
pub struct CycleContext {
    pub cycle: u64,
    pub neighborhood: Neighborhood,
    /// Buffers as published last cycle.
    pub previous: Arc<BufferDirectory>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Localized {
    pub planner: PlannerMessage,
    pub collision: CollisionMessage,
    pub traffic_light: TrafficLightMessage,
    pub lane_change: LaneChangeState,
}

/// One vehicle's slot in a cycle. Written only by the worker owning it.
#[derive(Clone, Debug, PartialEq)]
pub struct VehicleWork {
    pub slot: usize,
    pub actor: ActorId,
    pub request: LaneChangeRequest,
    /// `None` until the vehicle's first buffer is seeded.
    pub buffer: Option<PathBuffer>,
    pub result: Option<Localized>,
}

pub struct LocalizationStage<G, V> {
    config: LocalizationConfig,
    graph: Arc<G>,
    vehicles: Arc<V>,
    draw: Box<dyn DebugDraw>,
    links: StageLinks,
    registry: VehicleRegistry,
    directories: DirectoryPair,
    arbiter: LaneChangeArbiter,
    cycle: u64,
}

impl<G, V> LocalizationStage<G, V>
    where G: WaypointGraph + Send,
          V: VehicleStates + Send
{
    pub fn new(config: LocalizationConfig,
               graph: Arc<G>,
               vehicles: Arc<V>,
               links: StageLinks)
               -> Result<Self, ConfigError> {
        config.validate()?;
        let capacity = config.vehicle_capacity;
        Ok(LocalizationStage {
            config: config,
            graph: graph,
            vehicles: vehicles,
            draw: Box::new(NoDraw),
            links: links,
            registry: VehicleRegistry::with_capacity(capacity),
            directories: DirectoryPair::with_capacity(capacity),
            arbiter: LaneChangeArbiter::with_capacity(capacity),
            cycle: 0,
        })
    }

    pub fn with_debug_draw(mut self, draw: Box<dyn DebugDraw>) -> Self {
        self.draw = draw;
        self
    }

    pub fn config(&self) -> &LocalizationConfig {
        &self.config
    }

    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    pub fn registry(&self) -> &VehicleRegistry {
        &self.registry
    }

    pub fn arbiter(&self) -> &LaneChangeArbiter {
        &self.arbiter
    }

    /// The Buffer Directory published last.
    pub fn directory(&self) -> &Arc<BufferDirectory> {
        self.directories.active()
    }

    fn sync_registry(&mut self, roster: &Roster) {
        let change = self.registry.sync(roster.actors());
        for actor in &change.removed {
            self.arbiter.remove(*actor);
            self.directories.remove(*actor);
        }
        if !change.added.is_empty() || !change.removed.is_empty() {
            info!("registered {:?}, deregistered {:?}, {} vehicles",
                  change.added, change.removed, self.registry.len());
        }
        if self.registry.len() > self.config.vehicle_capacity {
            warn!("{} vehicles exceed the configured capacity of {}",
                  self.registry.len(), self.config.vehicle_capacity);
        }
    }

    /// Runs horizon maintenance and the lane-change decision for one vehicle.
    /// Leaves `work.result` empty when the vehicle has no state this cycle.
    pub fn localize(&self, context: &CycleContext, work: &mut VehicleWork) {
        let graph = &*self.graph;
        let config = &self.config;
        let actor = work.actor;
        let ego = match context.neighborhood.get(actor) {
            Some(ego) => ego,
            None => return,
        };
        let k = ego.kinematics;

        let far = match work.buffer.as_ref().and_then(|b| b.front()) {
            Some(front) => graph.location(front.id).distance(&k.location) > config.reseed_distance,
            None => true,
        };
        if far {
            match graph.nearest_waypoint(k.location) {
                Some(wp) => work.buffer = Some(PathBuffer::seed(graph, wp)),
                None => return,
            }
        }
        let buffer = match work.buffer.as_mut() {
            Some(buffer) => buffer,
            None => return,
        };
        if buffer.update(graph, config.junction_policy, actor, k.location, config.max_horizon) {
            if let Some(wp) = graph.nearest_waypoint(k.location) {
                *buffer = PathBuffer::seed(graph, wp);
                buffer.update(graph, config.junction_policy, actor, k.location, config.max_horizon);
            }
        }

        let lane_change = self.arbiter.decide(graph, config, &context.neighborhood, context.cycle,
                                              ego, work.request, buffer);

        let (front, start) = match buffer.front() {
            Some(front) => (front.id, front.progress),
            None => return,
        };
        let speed = k.speed();
        let target_distance = (speed * TARGET_TIME_HORIZON).max(MIN_TARGET_DISTANCE);
        let junction_distance = (speed * JUNCTION_TIME_HORIZON).max(MIN_JUNCTION_LOOK_AHEAD);

        let target = buffer.waypoint_ahead(target_distance).map(|w| graph.location(w.id)).unwrap_or(k.location);
        let look_ahead = buffer.waypoint_ahead(junction_distance).map(|w| w.id).unwrap_or(front);
        let approaching_junction = buffer.iter()
            .take_while(|w| w.progress - start <= junction_distance)
            .any(|w| graph.is_junction(w.id));
        let safe_point_after_junction = buffer.iter()
            .skip_while(|w| !graph.is_junction(w.id))
            .find(|w| !graph.is_junction(w.id))
            .map(|w| w.id);

        let mut lanes: Vec<LaneKey> = buffer.iter().map(|w| graph.lane(w.id)).collect();
        lanes.sort();
        lanes.dedup();
        let mut overlapping: Vec<ActorId> = lanes.iter()
            .flat_map(|&l| context.neighborhood.in_lane(l))
            .map(|n| n.actor)
            .filter(|&a| a != actor)
            .collect();
        overlapping.sort();
        overlapping.dedup();

        work.result = Some(Localized {
            planner: PlannerMessage {
                actor: actor,
                target: target,
                deviation: k.heading.signed_angle(&(target - k.location).normalized()),
                speed: speed,
                approaching_junction: approaching_junction,
                end_of_path: buffer.end_of_path(config.min_horizon),
                lane_change: lane_change,
            },
            collision: CollisionMessage {
                actor: actor,
                overlapping: overlapping,
                safe_point_after_junction: safe_point_after_junction,
            },
            traffic_light: TrafficLightMessage {
                actor: actor,
                closest_waypoint: front,
                junction_look_ahead: look_ahead,
                approaching_junction: approaching_junction,
            },
            lane_change: lane_change,
        });
    }
}

impl<G, V> PipelineStage for LocalizationStage<G, V>
    where G: WaypointGraph + Send,
          V: VehicleStates + Send
{
    type Context = CycleContext;
    type Work = VehicleWork;

    fn receive(&mut self) -> Result<Receipt<CycleContext, VehicleWork>, StageError> {
        let roster = match self.links.roster.pull() {
            Ok(ref pulled) if !pulled.fresh => return Ok(Receipt::Idle),
            Ok(pulled) => pulled,
            Err(MessengerError::Timeout { .. }) => return Ok(Receipt::Idle),
            Err(MessengerError::Disconnected { .. }) => return Ok(Receipt::Closed),
        };
        self.sync_registry(&roster);
        self.cycle += 1;

        let snapshot: Vec<_> = self.registry.actors()
            .iter()
            .filter_map(|&a| self.vehicles.kinematics(a).map(|k| (a, k)))
            .collect();
        let neighborhood = Neighborhood::build(&*self.graph, &snapshot, &self.arbiter);
        let previous = self.directories.active().clone();

        let requests: HashMap<ActorId, LaneChangeRequest> =
            roster.entries.iter().map(|e| (e.actor, e.request)).collect();
        let standby = self.directories.standby_mut();
        let mut work = Vec::with_capacity(self.registry.len());
        for (slot, &actor) in self.registry.actors().iter().enumerate() {
            let mut buffer = standby.remove(actor);
            match (previous.get(actor), buffer.as_mut()) {
                (Some(current), Some(b)) => b.clone_from(current),
                (Some(current), None) => buffer = Some(current.clone()),
                (None, _) => buffer = None,
            }
            work.push(VehicleWork {
                slot: slot,
                actor: actor,
                request: requests.get(&actor).cloned().unwrap_or_default(),
                buffer: buffer,
                result: None,
            });
        }

        Ok(Receipt::Batch(Batch {
            context: CycleContext { cycle: self.cycle, neighborhood: neighborhood, previous: previous },
            work: work,
        }))
    }

    fn action(&self, context: &CycleContext, work: &mut [VehicleWork]) {
        for item in work.iter_mut() {
            self.localize(context, item);
        }
    }

    fn send(&mut self, batch: Batch<CycleContext, VehicleWork>) -> Result<(), StageError> {
        let cycle = batch.context.cycle;
        let slots = batch.work.len();
        let mut planner = Vec::with_capacity(slots);
        let mut collision = Vec::with_capacity(slots);
        let mut traffic_light = Vec::with_capacity(slots);
        let mut stale = 0;

        {
            let standby = self.directories.standby_mut();
            for item in batch.work {
                if let Some(buffer) = item.buffer {
                    if self.config.debug_draw {
                        if let Err(e) = self.draw.draw_polyline(item.actor, &buffer.locations(&*self.graph)) {
                            warn!("debug draw for vehicle {} failed: {}", item.actor, e);
                        }
                    }
                    standby.insert(item.actor, buffer);
                }
                match item.result {
                    Some(r) => {
                        self.arbiter.update(item.actor, r.lane_change);
                        planner.push(Some(r.planner));
                        collision.push(Some(r.collision));
                        traffic_light.push(Some(r.traffic_light));
                    }
                    None => {
                        stale += 1;
                        planner.push(None);
                        collision.push(None);
                        traffic_light.push(None);
                    }
                }
            }
        }

        let buffers = self.directories.standby().clone();
        self.links.planner.push(Frame { cycle: cycle, entries: planner })?;
        self.links.collision.push(CollisionFrame {
            frame: Frame { cycle: cycle, entries: collision },
            buffers: buffers,
        })?;
        self.links.traffic_light.push(Frame { cycle: cycle, entries: traffic_light })?;
        self.directories.flip();

        debug!("cycle {}: {} vehicles, {} stale, {} lane changes in progress",
               cycle, slots, stale, self.arbiter.active());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geom::Vector3;
    use crate::input::roadnetwork::RoadNetwork;
    use crate::input::roadnetwork_parser::parse_road_network;
    use crate::pipeline::stage::{CycleOutcome, StageRunner};
    use crate::traffic::platform::{KinematicTable, Kinematics};

    fn setup(road: &str) -> (LocalizationStage<RoadNetwork, KinematicTable>, PeerLinks, Arc<KinematicTable>) {
        let (net, _) = parse_road_network(road).unwrap();
        let table = Arc::new(KinematicTable::new());
        let (stage_links, peers) = links(Duration::from_millis(50));
        let mut config = LocalizationConfig::default();
        config.pool_size = 2;
        let stage = LocalizationStage::new(config, Arc::new(net), table.clone(), stage_links).unwrap();
        (stage, peers, table)
    }

    fn roster(actors: &[ActorId]) -> Roster {
        Roster {
            entries: actors.iter().map(|&a| RosterEntry { actor: a, request: Default::default() }).collect(),
        }
    }

    fn moving(x: f64, y: f64) -> Kinematics {
        Kinematics {
            location: Vector3::new(x, y, 0.0),
            heading: Vector3::new(1.0, 0.0, 0.0),
            velocity: Vector3::new(10.0, 0.0, 0.0),
        }
    }

    const STRAIGHT: &str = "strip a road=1 section=0 lane=1 x=0.0 y=0.0 heading=0.0 spacing=1.0 count=300";

    #[test]
    fn test_cycle_publishes_all_frames() {
        let (mut stage, mut peers, table) = setup(STRAIGHT);
        let mut runner = StageRunner::new("localization", 2).unwrap();
        table.set(1, moving(0.0, 0.0));
        table.set(2, moving(50.0, 0.0));
        peers.roster.push(roster(&[1, 2, 3])).unwrap();
        assert_eq!(runner.cycle(&mut stage).unwrap(), CycleOutcome::Completed);

        let planner = peers.planner.pull().unwrap();
        let collision = peers.collision.pull().unwrap();
        let lights = peers.traffic_light.pull().unwrap();
        assert_eq!(planner.cycle, 1);
        assert_eq!(collision.frame.cycle, 1);
        assert_eq!(lights.cycle, 1);
        assert_eq!(planner.entries.len(), 3);
        // Vehicle 3 has no state on the platform.
        assert!(planner.get(2).is_none());
        assert!(collision.frame.get(2).is_none());

        let p1 = planner.find(1).unwrap();
        assert!(!p1.end_of_path);
        assert_eq!(p1.target, Vector3::new(5.0, 0.0, 0.0));
        assert!(p1.deviation.abs() < 1e-9);
        assert_eq!(collision.frame.find(1).unwrap().overlapping, vec![2]);
        assert_eq!(collision.buffers.get(1).unwrap().len(), 21);
        assert_eq!(lights.find(2).unwrap().closest_waypoint, 50);
        assert!(Arc::ptr_eq(&collision.buffers, stage.directory()));
        assert_eq!(stage.registry().len(), 3);
    }

    #[test]
    fn test_directory_instances_alternate() {
        let (mut stage, mut peers, table) = setup(STRAIGHT);
        let mut runner = StageRunner::new("localization", 2).unwrap();
        table.set(1, moving(0.0, 0.0));
        table.set(2, moving(30.0, 0.0));
        let mut published = Vec::new();
        for _ in 0..4 {
            peers.roster.push(roster(&[1, 2])).unwrap();
            runner.cycle(&mut stage).unwrap();
            peers.planner.pull().unwrap();
            let collision = peers.collision.pull().unwrap();
            published.push(Arc::as_ptr(&collision.buffers));
            peers.traffic_light.pull().unwrap();
        }
        // Two instances swap roles; none is copied once consumers let go.
        assert_ne!(published[0], published[1]);
        assert_eq!(published[0], published[2]);
        assert_eq!(published[1], published[3]);
    }

    #[test]
    fn test_idle_without_roster_and_closed() {
        let (mut stage, peers, _table) = setup(STRAIGHT);
        let mut runner = StageRunner::new("localization", 1).unwrap();
        assert_eq!(runner.cycle(&mut stage).unwrap(), CycleOutcome::Idle);
        drop(peers);
        assert_eq!(runner.cycle(&mut stage).unwrap(), CycleOutcome::Closed);
        assert_eq!(stage.cycle(), 0);
    }

    #[test]
    fn test_unresponsive_consumer_is_fatal() {
        let (mut stage, peers, table) = setup(STRAIGHT);
        let mut runner = StageRunner::new("localization", 1).unwrap();
        table.set(1, moving(0.0, 0.0));
        for _ in 0..2 {
            peers.roster.push(roster(&[1])).unwrap();
            assert_eq!(runner.cycle(&mut stage).unwrap(), CycleOutcome::Completed);
        }
        peers.roster.push(roster(&[1])).unwrap();
        match runner.cycle(&mut stage) {
            Err(StageError::Messenger(MessengerError::Timeout { ref link, .. })) => assert_eq!(link, "planner"),
            other => panic!("unexpected {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_deregistration_and_reseed() {
        let (mut stage, mut peers, table) = setup(STRAIGHT);
        let mut runner = StageRunner::new("localization", 2).unwrap();
        table.set(1, moving(0.0, 0.0));
        table.set(2, moving(10.0, 0.0));
        peers.roster.push(roster(&[1, 2])).unwrap();
        runner.cycle(&mut stage).unwrap();
        peers.planner.pull().unwrap();
        peers.collision.pull().unwrap();
        peers.traffic_light.pull().unwrap();

        // Vehicle 1 is teleported, vehicle 2 leaves.
        table.set(1, moving(200.0, 0.0));
        peers.roster.push(roster(&[1])).unwrap();
        runner.cycle(&mut stage).unwrap();
        let lights = peers.traffic_light.pull().unwrap();
        assert_eq!(lights.entries.len(), 1);
        assert_eq!(lights.find(1).unwrap().closest_waypoint, 200);
        assert!(!stage.directory().contains(2));
        assert_eq!(stage.directory().get(1).unwrap().front().unwrap().id, 200);
    }
}
