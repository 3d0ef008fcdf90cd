use std::collections::VecDeque;

use crate::config::JunctionPolicy;
use crate::geom::Location;
use crate::input::roadnetwork::{WaypointGraph, WaypointId};
use super::ActorId;

/// Shortest segment length accounted for between two buffered waypoints, so
/// that progress is strictly increasing even for coincident waypoints.
const MIN_STEP: f64 = 1e-4;
const EPS: f64 = 1e-6;
/// Drop/extend rounds per update. A vehicle that moved further than this
/// many horizons in one cycle is reseeded by the stage instead.
const MAX_PASSES: usize = 4;

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct BufferedWaypoint {
    pub id: WaypointId,
    /// Path distance from the seed waypoint.
    pub progress: f64,
    /// Length of the segment leading into this waypoint.
    pub step: f64,
}

/// The look-ahead horizon of one vehicle: waypoints in path order, front
/// nearest to the vehicle.
#[derive(Debug, PartialEq, Default)]
pub struct PathBuffer {
    waypoints: VecDeque<BufferedWaypoint>,
    exhausted: bool,
}

impl Clone for PathBuffer {
    fn clone(&self) -> Self {
        PathBuffer { waypoints: self.waypoints.clone(), exhausted: self.exhausted }
    }

    /// Reuses the allocation of `self`.
    fn clone_from(&mut self, source: &Self) {
        self.waypoints.clone_from(&source.waypoints);
        self.exhausted = source.exhausted;
    }
}

fn is_passed<G: WaypointGraph + ?Sized>(graph: &G, location: Location, a: WaypointId, b: WaypointId) -> bool {
    let la = graph.location(a);
    let lb = graph.location(b);
    (location - la).dot(&(lb - la)) > 0.0
}

impl PathBuffer {
    /// Buffer holding only `wp`.
    pub fn seed<G: WaypointGraph + ?Sized>(graph: &G, wp: WaypointId) -> PathBuffer {
        let step = graph.predecessors(wp)
            .iter()
            .min()
            .map(|&p| graph.distance(p, wp).max(MIN_STEP))
            .unwrap_or(0.0);
        let mut waypoints = VecDeque::new();
        waypoints.push_back(BufferedWaypoint { id: wp, progress: 0.0, step: step });
        PathBuffer { waypoints: waypoints, exhausted: false }
    }

    pub fn len(&self) -> usize {
        self.waypoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waypoints.is_empty()
    }

    pub fn front(&self) -> Option<&BufferedWaypoint> {
        self.waypoints.front()
    }

    pub fn back(&self) -> Option<&BufferedWaypoint> {
        self.waypoints.back()
    }

    pub fn get(&self, idx: usize) -> Option<&BufferedWaypoint> {
        self.waypoints.get(idx)
    }

    pub fn iter(&self) -> impl Iterator<Item = &BufferedWaypoint> {
        self.waypoints.iter()
    }

    pub fn ids(&self) -> impl Iterator<Item = WaypointId> + '_ {
        self.waypoints.iter().map(|w| w.id)
    }

    pub fn contains(&self, wp: WaypointId) -> bool {
        self.waypoints.iter().any(|w| w.id == wp)
    }

    /// True when the last fill stopped because the graph had no (new)
    /// successor.
    pub fn exhausted(&self) -> bool {
        self.exhausted
    }

    /// Path distance covered by the buffer, including the segment leading
    /// into the front waypoint.
    pub fn horizon_length(&self) -> f64 {
        match (self.waypoints.front(), self.waypoints.back()) {
            (Some(f), Some(b)) => b.progress - f.progress + f.step,
            _ => 0.0,
        }
    }

    pub fn end_of_path(&self, min_horizon: f64) -> bool {
        self.exhausted && self.horizon_length() < min_horizon
    }

    fn front_passed<G: WaypointGraph + ?Sized>(&self, graph: &G, location: Location) -> bool {
        match (self.waypoints.get(0), self.waypoints.get(1)) {
            (Some(a), Some(b)) => is_passed(graph, location, a.id, b.id),
            _ => false,
        }
    }

    /// Pops front waypoints the vehicle at `location` has already passed.
    /// The last waypoint is never dropped.
    pub fn drop_passed<G: WaypointGraph + ?Sized>(&mut self, graph: &G, location: Location) -> usize {
        let mut dropped = 0;
        while self.front_passed(graph, location) {
            self.waypoints.pop_front();
            dropped += 1;
        }
        dropped
    }

    /// Appends successors of the back waypoint while the horizon stays within
    /// `max_horizon`.
    pub fn extend<G: WaypointGraph + ?Sized>(&mut self,
                                             graph: &G,
                                             policy: JunctionPolicy,
                                             actor: ActorId,
                                             max_horizon: f64)
                                             -> usize {
        let mut added = 0;
        self.exhausted = false;
        while let Some(back) = self.waypoints.back().cloned() {
            let successors = graph.successors(back.id);
            let next = match policy.choose(graph, actor, back.id, &successors) {
                Some(next) if !self.contains(next) => next,
                _ => {
                    self.exhausted = true;
                    break;
                }
            };
            let step = graph.distance(back.id, next).max(MIN_STEP);
            if self.horizon_length() + step > max_horizon + EPS {
                break;
            }
            self.waypoints.push_back(BufferedWaypoint { id: next, progress: back.progress + step, step: step });
            added += 1;
        }
        added
    }

    /// Drops passed waypoints and refills the horizon. Returns whether the
    /// front is still behind the vehicle afterwards.
    pub fn update<G: WaypointGraph + ?Sized>(&mut self,
                                             graph: &G,
                                             policy: JunctionPolicy,
                                             actor: ActorId,
                                             location: Location,
                                             max_horizon: f64)
                                             -> bool {
        let mut passed = false;
        for _ in 0..MAX_PASSES {
            self.drop_passed(graph, location);
            self.extend(graph, policy, actor, max_horizon);
            passed = self.front_passed(graph, location);
            if self.exhausted || !passed {
                break;
            }
        }
        passed
    }

    /// Index of the first waypoint at least `distance` ahead of the front,
    /// never the front itself.
    pub fn merge_index(&self, distance: f64) -> Option<usize> {
        let start = self.waypoints.front()?.progress;
        self.waypoints
            .iter()
            .enumerate()
            .skip(1)
            .find(|(_, w)| w.progress - start >= distance - EPS)
            .map(|(i, _)| i)
    }

    /// First waypoint at least `distance` ahead of the front, or the back
    /// waypoint if the buffer is shorter.
    pub fn waypoint_ahead(&self, distance: f64) -> Option<&BufferedWaypoint> {
        let start = self.waypoints.front()?.progress;
        self.waypoints
            .iter()
            .find(|w| w.progress - start >= distance - EPS)
            .or_else(|| self.waypoints.back())
    }

    /// Replaces everything from `index` on with `wp` (a waypoint in another
    /// lane). The caller refills the horizon from there.
    pub fn splice<G: WaypointGraph + ?Sized>(&mut self, graph: &G, index: usize, wp: WaypointId) -> bool {
        if index == 0 || index > self.waypoints.len() {
            return false;
        }
        self.waypoints.truncate(index);
        let prev = match self.waypoints.back() {
            Some(prev) => *prev,
            None => return false,
        };
        let step = graph.distance(prev.id, wp).max(MIN_STEP);
        self.waypoints.push_back(BufferedWaypoint { id: wp, progress: prev.progress + step, step: step });
        self.exhausted = false;
        true
    }

    pub fn locations<G: WaypointGraph + ?Sized>(&self, graph: &G) -> Vec<Location> {
        self.waypoints.iter().map(|w| graph.location(w.id)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geom::Vector3;
    use crate::input::roadnetwork::RoadNetwork;
    use crate::input::roadnetwork_parser::parse_road_network;

    fn straight(count: usize) -> RoadNetwork {
        let input = format!("strip a road=1 section=0 lane=1 x=0.0 y=0.0 heading=0.0 spacing=1.0 count={}", count);
        parse_road_network(&input).unwrap().0
    }

    fn assert_increasing(b: &PathBuffer) {
        let w: Vec<_> = b.iter().cloned().collect();
        for pair in w.windows(2) {
            assert!(pair[1].progress > pair[0].progress);
            assert!(pair[0].id != pair[1].id);
        }
    }

    #[test]
    fn test_converges_to_max_horizon() {
        let net = straight(200);
        let mut b = PathBuffer::seed(&net, 0);
        assert_eq!(b.len(), 1);
        assert_eq!(b.horizon_length(), 0.0);

        b.update(&net, JunctionPolicy::Straightest, 1, Vector3::new(0.0, 0.0, 0.0), 20.0);
        // The seed has no predecessor, so its own segment is empty.
        assert_eq!(b.len(), 21);

        for i in 1..50 {
            let at = Vector3::new(i as f64 + 0.5, 0.2, 0.0);
            assert!(!b.update(&net, JunctionPolicy::Straightest, 1, at, 20.0));
            assert_eq!(b.len(), 20);
            assert!((b.horizon_length() - 20.0).abs() < 1e-9);
            assert_eq!(b.front().unwrap().id, i + 1);
            assert!(!b.exhausted());
            assert_increasing(&b);
        }
    }

    #[test]
    fn test_dead_end() {
        let net = straight(8);
        let mut b = PathBuffer::seed(&net, 0);
        b.update(&net, JunctionPolicy::Straightest, 1, Vector3::zero(), 20.0);
        assert_eq!(b.len(), 8);
        assert!(b.exhausted());
        assert!(b.end_of_path(10.0));
        assert!(!b.end_of_path(5.0));

        // Driving past the end keeps the last waypoint.
        b.update(&net, JunctionPolicy::Straightest, 1, Vector3::new(30.0, 0.0, 0.0), 20.0);
        assert_eq!(b.len(), 1);
        assert_eq!(b.front().unwrap().id, 7);
    }

    #[test]
    fn test_loop_stops_at_revisit() {
        let (net, _) = parse_road_network("
            waypoint a x=0.0 y=0.0 z=0.0 road=1 section=0 lane=1
            waypoint b x=1.0 y=0.0 z=0.0 road=1 section=0 lane=1
            waypoint c x=1.0 y=1.0 z=0.0 road=1 section=0 lane=1
            link a b
            link b c
            link c a
        ").unwrap();
        let mut b = PathBuffer::seed(&net, 0);
        b.extend(&net, JunctionPolicy::Straightest, 1, 50.0);
        assert_eq!(b.ids().collect::<Vec<_>>(), vec![0, 1, 2]);
        assert!(b.exhausted());
    }

    #[test]
    fn test_merge_index_and_splice() {
        let (net, names) = parse_road_network("
            strip l road=1 section=0 lane=1 x=0.0 y=3.0 heading=0.0 spacing=1.0 count=60
            strip r road=1 section=0 lane=2 x=0.0 y=0.0 heading=0.0 spacing=1.0 count=60
            lanes l right r
        ").unwrap();
        let r0 = names.waypoint_names["r0"];
        let mut b = PathBuffer::seed(&net, r0);
        b.update(&net, JunctionPolicy::Straightest, 1, Vector3::zero(), 20.0);

        let k = b.merge_index(10.0).unwrap();
        assert_eq!(k, 10);
        let target = net.adjacent_lane(b.get(k).unwrap().id, crate::input::roadnetwork::Side::Left).unwrap();
        assert_eq!(target, names.waypoint_names["l10"]);
        assert!(b.splice(&net, k, target));
        b.extend(&net, JunctionPolicy::Straightest, 1, 20.0);

        assert_eq!(b.get(k).unwrap().id, target);
        assert_eq!(b.get(k - 1).unwrap().id, names.waypoint_names["r9"]);
        assert!(b.horizon_length() <= 20.0 + 1e-9);
        assert_eq!(net.lane(b.back().unwrap().id).lane, 1);
        assert_increasing(&b);

        assert_eq!(b.merge_index(500.0), None);
        assert!(!b.splice(&net, 0, target));
        assert_eq!(b.waypoint_ahead(500.0), b.back());
    }
}
