use super::roadnetwork::*;
use crate::geom::{Location, Vector3};
use regex::Regex;
use std::collections::HashMap;
use std::str::FromStr;

#[derive(Debug, Fail)]
pub enum ParseError {
    #[fail(display = "error in regular expression: {}", _0)]
    RegexError(String),
    #[fail(display = "error converting number: {}", _0)]
    NumberError(String),
    #[fail(display = "unknown {} name: {}", _1, _0)]
    UnknownName(String, String),
    #[fail(display = "name defined twice: {}", _0)]
    DuplicateName(String),
    #[fail(display = "unrecognized line: {}", _0)]
    Unrecognized(String),
}

pub fn regex(re: &str) -> Result<Regex, ParseError> {
    Regex::new(re).map_err(|e| ParseError::RegexError(format!("{:?}", e)))
}

pub fn number<T: FromStr>(s: &str) -> Result<T, ParseError> {
    s.parse::<T>().map_err(|_e| ParseError::NumberError(s.to_string()))
}

pub fn side(s: &str) -> Result<Side, ParseError> {
    match s {
        "left" => Ok(Side::Left),
        "right" => Ok(Side::Right),
        _ => Err(ParseError::Unrecognized(s.to_string())),
    }
}

fn lookup(names: &HashMap<String, usize>, name: &str) -> Result<usize, ParseError> {
    names.get(name)
        .cloned()
        .ok_or_else(|| ParseError::UnknownName(name.to_string(), "waypoint".to_string()))
}

fn define(names: &mut HashMap<String, usize>, name: String, wp: WaypointId) -> Result<(), ParseError> {
    if names.contains_key(&name) {
        return Err(ParseError::DuplicateName(name));
    }
    names.insert(name, wp);
    Ok(())
}

/// Parses the road network format
///
/// * waypoint w1 x=0.0 y=0.0 z=0.0 road=1 section=0 lane=-1 [junction]
/// * link w1 w2
/// * strip a road=1 section=0 lane=-1 x=0.0 y=0.0 heading=0.0 spacing=1.0 count=100 [junction]
/// * lanes a left b
///
/// A strip is a straight lane of `count` linked waypoints named `a0`, `a1`, ...
/// `lanes` pairs two strips index by index as neighboring lanes.
pub fn parse_road_network(input: &str) -> Result<(RoadNetwork, NetworkNames<String>), ParseError> {
    let mut network = RoadNetwork::new();
    let mut names = HashMap::new();
    let mut strips: HashMap<String, Vec<WaypointId>> = HashMap::new();

    let empty_re = regex(r"^\s*(#.*)?$")?;
    let waypoint_re = regex(r"(?x) ^ \s* waypoint \s+ (?P<name>\w+) \s+
            x \s* = \s* (?P<x>-?[\d\.]+) \s+
            y \s* = \s* (?P<y>-?[\d\.]+) \s+
            z \s* = \s* (?P<z>-?[\d\.]+) \s+
            road \s* = \s* (?P<road>-?\d+) \s+
            section \s* = \s* (?P<section>-?\d+) \s+
            lane \s* = \s* (?P<lane>-?\d+)
            (?P<junction> \s+ junction)? \s* $")?;
    let link_re = regex(r"^\s*link\s+(\w+)\s+(\w+)\s*$")?;
    let strip_re = regex(r"(?x) ^ \s* strip \s+ (?P<prefix>\w+) \s+
            road \s* = \s* (?P<road>-?\d+) \s+
            section \s* = \s* (?P<section>-?\d+) \s+
            lane \s* = \s* (?P<lane>-?\d+) \s+
            x \s* = \s* (?P<x>-?[\d\.]+) \s+
            y \s* = \s* (?P<y>-?[\d\.]+) \s+
            heading \s* = \s* (?P<heading>-?[\d\.]+) \s+
            spacing \s* = \s* (?P<spacing>[\d\.]+) \s+
            count \s* = \s* (?P<count>\d+)
            (?P<junction> \s+ junction)? \s* $")?;
    let lanes_re = regex(r"^\s*lanes\s+(\w+)\s+(left|right)\s+(\w+)\s*$")?;

    for line in input.lines() {
        if empty_re.is_match(line) {
            continue;
        }
        if let Some(groups) = waypoint_re.captures(line) {
            let location = Vector3::new(number(&groups["x"])?, number(&groups["y"])?, number(&groups["z"])?);
            let lane = LaneKey {
                road: number(&groups["road"])?,
                section: number(&groups["section"])?,
                lane: number(&groups["lane"])?,
            };
            let mut wp = Waypoint::new(location, lane);
            wp.junction = groups.name("junction").is_some();
            let id = network.add(wp);
            define(&mut names, groups["name"].to_string(), id)?;
            continue;
        }
        if let Some(groups) = link_re.captures(line) {
            let from = lookup(&names, &groups[1])?;
            let to = lookup(&names, &groups[2])?;
            network.link(from, to);
            continue;
        }
        if let Some(groups) = strip_re.captures(line) {
            let prefix = groups["prefix"].to_string();
            if strips.contains_key(&prefix) {
                return Err(ParseError::DuplicateName(prefix));
            }
            let lane = LaneKey {
                road: number(&groups["road"])?,
                section: number(&groups["section"])?,
                lane: number(&groups["lane"])?,
            };
            let origin: Location = Vector3::new(number(&groups["x"])?, number(&groups["y"])?, 0.0);
            let direction = Vector3::from_yaw(number(&groups["heading"])?);
            let spacing: f64 = number(&groups["spacing"])?;
            let count: usize = number(&groups["count"])?;
            let junction = groups.name("junction").is_some();

            let mut ids = Vec::with_capacity(count);
            for i in 0..count {
                let mut wp = Waypoint::new(origin + direction * (spacing * i as f64), lane);
                wp.junction = junction;
                let id = network.add(wp);
                define(&mut names, format!("{}{}", prefix, i), id)?;
                if let Some(&prev) = ids.last() {
                    network.link(prev, id);
                }
                ids.push(id);
            }
            strips.insert(prefix, ids);
            continue;
        }
        if let Some(groups) = lanes_re.captures(line) {
            let a = strips.get(&groups[1])
                .ok_or_else(|| ParseError::UnknownName(groups[1].to_string(), "strip".to_string()))?;
            let b = strips.get(&groups[3])
                .ok_or_else(|| ParseError::UnknownName(groups[3].to_string(), "strip".to_string()))?;
            let side = side(&groups[2])?;
            for (&wa, &wb) in a.iter().zip(b.iter()) {
                network.set_adjacent(wa, side, wb);
            }
            continue;
        }
        return Err(ParseError::Unrecognized(line.to_string()));
    }

    Ok((network, NetworkNames { waypoint_names: names }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_waypoints_and_links() {
        let (net, names) = parse_road_network("
            # a small junction
            waypoint a x=0.0 y=0.0 z=0.0 road=1 section=0 lane=-1
            waypoint b x=1.0 y=0.0 z=0.0 road=1 section=0 lane=-1 junction
            waypoint c x=2.0 y=1.0 z=0.0 road=2 section=0 lane=-1
            link a b
            link b c
        ").unwrap();

        let a = names.waypoint_names["a"];
        let b = names.waypoint_names["b"];
        let c = names.waypoint_names["c"];
        assert_eq!(net.len(), 3);
        assert!(net.is_junction(b));
        assert!(!net.is_junction(a));
        assert_eq!(net.successors(b).as_slice(), &[c]);
        assert_eq!(net.lane(c), LaneKey { road: 2, section: 0, lane: -1 });
    }

    #[test]
    fn test_parse_strips() {
        let (net, names) = parse_road_network("
            strip l road=1 section=0 lane=1 x=0.0 y=3.5 heading=0.0 spacing=2.0 count=5
            strip r road=1 section=0 lane=2 x=0.0 y=0.0 heading=0.0 spacing=2.0 count=5
            lanes l right r
        ").unwrap();

        let l2 = names.waypoint_names["l2"];
        let r2 = names.waypoint_names["r2"];
        assert_eq!(net.len(), 10);
        assert_eq!(net.location(r2), Vector3::new(4.0, 0.0, 0.0));
        assert_eq!(net.successors(l2).as_slice(), &[names.waypoint_names["l3"]]);
        assert_eq!(net.adjacent_lane(l2, Side::Right), Some(r2));
        assert_eq!(net.adjacent_lane(r2, Side::Left), Some(l2));
        assert!(net.successors(names.waypoint_names["r4"]).is_empty());
    }

    #[test]
    fn test_parse_errors() {
        match parse_road_network("link a b") {
            Err(ParseError::UnknownName(ref n, _)) if n == "a" => {}
            other => panic!("unexpected {:?}", other.map(|_| ())),
        }
        match parse_road_network("strip a road=1 section=0 lane=1 x=0 y=0 heading=0 spacing=1 count=2\n\
                                  waypoint a0 x=0 y=0 z=0 road=1 section=0 lane=1") {
            Err(ParseError::DuplicateName(ref n)) if n == "a0" => {}
            other => panic!("unexpected {:?}", other.map(|_| ())),
        }
        match parse_road_network("teleport everything") {
            Err(ParseError::Unrecognized(_)) => {}
            other => panic!("unexpected {:?}", other.map(|_| ())),
        }
    }
}
