use failure::Error;
use super::history::{self, waypoint_name, StageLogEvent, VehicleLogEvent};
use crate::geom::Location;
use crate::input::roadnetwork::NetworkNames;

use std::io;

fn point(l: &Location) -> String {
    format!("[{}, {}, {}]", l.x, l.y, l.z)
}

pub fn json_history<W: io::Write>(names: &NetworkNames<String>,
                                  history: &history::History,
                                  f: &mut W)
                                  -> Result<(), Error> {
    write!(f, "{{ \"stage\": [")?;
    let mut first = true;
    for ev in &history.stage {
        if first { first = false; } else { write!(f, ", ")?; }
        match *ev {
            StageLogEvent::Cycle(cycle, vehicles, stale) => {
                write!(f, "{{ \"event\": \"cycle\", \"cycle\": {}, \"vehicles\": {}, \"stale\": {} }}",
                       cycle, vehicles, stale)?;
            }
            StageLogEvent::Idle => {
                write!(f, "{{ \"event\": \"idle\" }}")?;
            }
        }
    }
    write!(f, "],\n")?;

    write!(f, "\"vehicles\": {{ ")?;
    let mut firstvehicle = true;
    for &(ref name, actor, ref events) in &history.vehicles {
        if firstvehicle { firstvehicle = false; } else { write!(f, ",\n")?; }
        write!(f, " \"{}\": {{ \"actor\": {}, \"events\": [", name, actor)?;

        let mut first = true;
        for ev in events {
            if first { first = false; } else { write!(f, ", ")?; }
            match *ev {
                VehicleLogEvent::Spawn(wp, v) => {
                    write!(f, "{{ \"event\": \"spawn\", \"waypoint\": \"{}\", \"v\": {} }}",
                           waypoint_name(names, wp), v)?;
                }
                VehicleLogEvent::Localized(ref l) => {
                    write!(f,
                           "{{ \"event\": \"localized\", \"cycle\": {}, \"location\": {}, \
                            \"waypoint\": \"{}\", \"target\": {}, \"waypoints\": {}, \"horizon\": {}, \
                            \"end_of_path\": {}, \"approaching_junction\": {} }}",
                           l.cycle,
                           point(&l.location),
                           waypoint_name(names, l.closest_waypoint),
                           point(&l.target),
                           l.waypoints,
                           l.horizon,
                           l.end_of_path,
                           l.approaching_junction)?;
                }
                VehicleLogEvent::LaneChange(cycle, state) => {
                    write!(f, "{{ \"event\": \"lane_change\", \"cycle\": {}, \"state\": \"{}\", \"side\": {} }}",
                           cycle,
                           state.name(),
                           match state.side() {
                               Some(side) => format!("\"{}\"", format!("{:?}", side).to_lowercase()),
                               None => format!("null"),
                           })?;
                }
                VehicleLogEvent::Stale(cycle) => {
                    write!(f, "{{ \"event\": \"stale\", \"cycle\": {} }}", cycle)?;
                }
                VehicleLogEvent::Removed(cycle) => {
                    write!(f, "{{ \"event\": \"removed\", \"cycle\": {} }}", cycle)?;
                }
            }
        }
        write!(f, "] }}")?;
    }
    write!(f, " }} }}")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geom::Vector3;
    use crate::output::history::{History, Localization};
    use maplit::hashmap;

    #[test]
    fn test_json_history() {
        let names = NetworkNames { waypoint_names: hashmap!{ "a0".to_string() => 0, "a1".to_string() => 1 } };
        let h = History {
            stage: vec![StageLogEvent::Idle, StageLogEvent::Cycle(1, 1, 0)],
            vehicles: vec![("car".to_string(), 0, vec![
                VehicleLogEvent::Spawn(0, 5.0),
                VehicleLogEvent::Localized(Localization {
                    cycle: 1,
                    location: Vector3::new(0.5, 0.0, 0.0),
                    closest_waypoint: 1,
                    target: Vector3::new(2.0, 0.0, 0.0),
                    waypoints: 2,
                    horizon: 1.5,
                    end_of_path: true,
                    approaching_junction: false,
                }),
                VehicleLogEvent::Removed(2),
            ])],
        };
        let mut out = Vec::new();
        json_history(&names, &h, &mut out).unwrap();
        let s = String::from_utf8(out).unwrap();
        assert!(s.starts_with("{ \"stage\": [{ \"event\": \"idle\" }, { \"event\": \"cycle\", \"cycle\": 1"));
        assert!(s.contains("\"car\": { \"actor\": 0, \"events\": [{ \"event\": \"spawn\", \"waypoint\": \"a0\", \"v\": 5 }"));
        assert!(s.contains("\"waypoint\": \"a1\", \"target\": [2, 0, 0]"));
        assert!(s.contains("\"end_of_path\": true"));
        assert!(s.ends_with("{ \"event\": \"removed\", \"cycle\": 2 }] } } }"));
    }
}
