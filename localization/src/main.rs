extern crate localization;
extern crate failure;
extern crate structopt;

use localization::*;
use localization::config::{JunctionPolicy, LocalizationConfig};
use localization::geom::Location;
use localization::input::roadnetwork::Side;
use localization::traffic::platform::{DebugDraw, NoDraw};
use localization::traffic::ActorId;
use log::trace;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use structopt::StructOpt;

/// Localization -- path horizons and lane changes for simulated vehicles
#[derive(StructOpt, Debug)]
#[structopt(name="localization")]
struct Opt {
    /// Verbose mode (-v, -vv, -vvv)
    #[structopt(short = "v", long = "verbose", parse(from_occurrences))]
    verbose: u8,

    /// Road network file
    #[structopt(parse(from_os_str))]
    network: PathBuf,

    /// Scenario file
    #[structopt(parse(from_os_str))]
    scenario: PathBuf,

    /// Output JSON history file
    #[structopt(short = "j", long = "json", parse(from_os_str))]
    json: Option<PathBuf>,

    /// Output lane changes to file
    #[structopt(short = "c", long = "lane-changes", parse(from_os_str))]
    lane_changes: Option<PathBuf>,

    /// Simulated seconds per cycle
    #[structopt(short = "d", long = "time-step", default_value = "0.1")]
    timestep: f64,

    /// Worker threads
    #[structopt(long = "pool-size", default_value = "4")]
    pool_size: usize,

    /// Minimum horizon (m)
    #[structopt(long = "min-horizon", default_value = "10.0")]
    min_horizon: f64,

    /// Maximum horizon (m)
    #[structopt(long = "max-horizon", default_value = "20.0")]
    max_horizon: f64,

    #[structopt(long = "vehicle-capacity", default_value = "128")]
    vehicle_capacity: usize,

    /// Longitudinal clearance required in the target lane (m)
    #[structopt(long = "clearance", default_value = "8.0")]
    clearance: f64,

    /// Preferred lane change side: left | right
    #[structopt(long = "bias", default_value = "left")]
    bias: String,

    /// Distance from the vehicle to the merge point (m)
    #[structopt(long = "lane-change-distance", default_value = "10.0")]
    lane_change_distance: f64,

    /// Cycles spent committing a lane change
    #[structopt(long = "cooldown", default_value = "10")]
    cooldown: u64,

    /// Cycles a request waits for a competing vehicle
    #[structopt(long = "patience", default_value = "5")]
    patience: u64,

    /// Distance to a slower vehicle ahead that triggers a lane change (m)
    #[structopt(long = "blocking-distance", default_value = "15.0")]
    blocking_distance: f64,

    /// Seconds to project gaps forward
    #[structopt(long = "merge-time", default_value = "2.0")]
    merge_time: f64,

    /// Distance from the buffer at which a vehicle is relocated (m)
    #[structopt(long = "reseed-distance", default_value = "10.0")]
    reseed_distance: f64,

    /// Junction successor choice: straightest | spread
    #[structopt(long = "junction-policy", default_value = "straightest")]
    junction_policy: JunctionPolicy,

    /// Messenger timeout (ms)
    #[structopt(long = "timeout", default_value = "1000")]
    timeout: u64,

    /// Trace-log every buffer polyline
    #[structopt(long = "debug-draw")]
    debug_draw: bool,
}

impl Opt {
    fn config(&self) -> AppResult<LocalizationConfig> {
        let bias = match self.bias.as_str() {
            "left" => Side::Left,
            "right" => Side::Right,
            x => return Err(failure::err_msg(format!("unknown side {}", x))),
        };
        let config = LocalizationConfig {
            pool_size: self.pool_size,
            min_horizon: self.min_horizon,
            max_horizon: self.max_horizon,
            vehicle_capacity: self.vehicle_capacity,
            min_lane_change_clearance: self.clearance,
            lane_change_bias: bias,
            lane_change_distance: self.lane_change_distance,
            lane_change_cooldown: self.cooldown,
            lane_change_patience: self.patience,
            blocking_distance: self.blocking_distance,
            merge_time: self.merge_time,
            reseed_distance: self.reseed_distance,
            junction_policy: self.junction_policy,
            messenger_timeout: Duration::from_millis(self.timeout),
            debug_draw: self.debug_draw,
        };
        config.validate()?;
        Ok(config)
    }
}

struct TraceDraw;

impl DebugDraw for TraceDraw {
    fn draw_polyline(&self, actor: ActorId, points: &[Location]) -> Result<(), failure::Error> {
        let xy: Vec<(f64, f64)> = points.iter().map(|p| (p.x, p.y)).collect();
        trace!("buffer {}: {:?}", actor, xy);
        Ok(())
    }
}

fn run(opt: &Opt) -> AppResult<()> {
    let config = opt.config()?;

    let (network, names) = get_road_network(&opt.network)?;
    if opt.verbose >= 3 {
        println!("Road network:");
        for (i, x) in network.waypoints.iter().enumerate() {
            println!("  {} {:?}", output::history::waypoint_name(&names, i), x);
        }
    }

    let scenario = get_scenario(&opt.scenario, &names)?;
    if opt.verbose >= 1 {
        println!("Scenario:");
        for x in &scenario.actions { println!("  - {:?}", x); }
        println!("");
    }

    let draw: Box<dyn DebugDraw> = if opt.debug_draw { Box::new(TraceDraw) } else { Box::new(NoDraw) };
    let history = run_scenario(Arc::new(network), &scenario, &config, opt.timestep, draw)?;

    println!("# Stage history:");
    for x in &history.stage {
        println!("> {:?}", x);
    }
    for &(ref name, actor, ref x) in &history.vehicles {
        println!("## Vehicle \"{}\" ({}):", name, actor);
        for x in x {
            println!("> {:?}", x);
        }
    }

    if let Some(ref json) = opt.json {
        use std::fs::File;
        use std::io::BufWriter;
        let file = File::create(json)?;
        let mut writer = BufWriter::new(&file);
        output::json::json_history(&names, &history, &mut writer)?;
    }

    if let Some(ref lane_changes) = opt.lane_changes {
        use std::fs::File;
        use std::io::BufWriter;
        use std::io::Write;
        let file = File::create(lane_changes)?;
        let mut writer = BufWriter::new(&file);
        let string = output::history::lane_changes(&history)?;
        write!(writer, "{}", string)?;
    }

    Ok(())
}

pub fn main() {
    let opt = Opt::from_args();
    let level = match opt.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    match run(&opt) {
        Ok(()) => {},
        Err(e) => {
            println!("Error:\n{}", e.as_fail());
            std::process::exit(1);
        },
    }
}
