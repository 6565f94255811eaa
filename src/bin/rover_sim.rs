//! Drive a simulated rover through a goal queue.
//!
//! The odometry integrator runs in the background and writes the pose log;
//! with `--scan` the rover sweeps its range sensor at every reached goal and
//! corrects its estimate from re-observed room corners.
//!
//! Usage:
//!   rover_sim
//!   rover_sim --goals goals.txt --config rover.toml --scan

use anyhow::{bail, Context, Result};
use clap::Parser;
use rover_core::common::Pose2D;
use rover_core::config::RoverConfig;
use rover_core::control::goals::GoalQueue;
use rover_core::control::motion::MotionGoal;
use rover_core::control::{ControlEvent, ControlStack};
use rover_core::hardware::{Clock, SimulatedDrive, SimulatedRangeSensor, SystemClock};
use rover_core::perception::state::SharedEstimate;
use rover_core::perception::PerceptionStack;
use rover_core::RoverCore;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML configuration; defaults are used when absent
    #[arg(short, long)]
    config: Option<String>,

    /// Goal file: `theta`, `x,y` or `x,y,theta` per line
    #[arg(short, long)]
    goals: Option<String>,

    /// Pose log path, overriding the config
    #[arg(long)]
    pose_log: Option<String>,

    /// Side of the square room in cm
    #[arg(long, default_value_t = 182.88)]
    room: f64,

    /// Scan and correct at every reached goal
    #[arg(long)]
    scan: bool,

    /// Simulated cm/s per unit of commanded wheel speed
    #[arg(long, default_value_t = 1.0)]
    speed_scale: f64,

    /// Control steps allowed per goal
    #[arg(long, default_value_t = 20_000)]
    max_polls: usize,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => RoverConfig::load(path).with_context(|| format!("loading {}", path))?,
        None => RoverConfig::default(),
    };
    if let Some(path) = &args.pose_log {
        config.odometry.pose_log = Some(path.clone());
    }
    let goals = match &args.goals {
        Some(path) => {
            GoalQueue::load(path).with_context(|| format!("loading goals from {}", path))?
        }
        None => GoalQueue::square_tour(args.room),
    };

    let turn_step = config.controller.min_rotation_step(config.drive.base_width) * args.speed_scale;
    if turn_step >= 2.0 * config.controller.angle_tolerance {
        bail!(
            "speed scale {} makes each minimum-speed turn step {:.3} rad, \
             wider than the heading window",
            args.speed_scale,
            turn_step
        );
    }

    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
    let drive = Arc::new(
        SimulatedDrive::new(clock.clone(), config.drive.clone()).with_speed_scale(args.speed_scale),
    );
    let mut sensor = args.scan.then(|| {
        let walls = SimulatedRangeSensor::rectangular_room(args.room, args.room);
        SimulatedRangeSensor::new(drive.clone(), walls)
    });

    let (mut core, shared) = RoverCore::with_stacks(&config, drive.clone(), clock)
        .context("assembling rover stacks")?;
    core.init().context("starting rover")?;
    log::info!("{} goals queued, starting at {:?}", goals.len(), shared.pose());

    core.component_mut::<ControlStack>()
        .context("control stack not registered")?
        .extend_goals(goals);

    let outcome = drive_goals(&mut core, &drive, sensor.as_mut(), args.max_polls, &shared);
    let shutdown = core.shutdown().context("shutting down");
    outcome?;
    shutdown?;

    let estimate = shared.snapshot();
    let truth = drive.true_pose();
    log::info!(
        "final estimate ({:.2}, {:.2}, {:.3}), truth ({:.2}, {:.2}, {:.3}), {} writes",
        estimate.pose.x,
        estimate.pose.y,
        estimate.pose.theta,
        truth.x,
        truth.y,
        truth.theta,
        estimate.generation
    );
    Ok(())
}

fn drive_goals(
    core: &mut RoverCore,
    drive: &SimulatedDrive,
    mut sensor: Option<&mut SimulatedRangeSensor>,
    max_polls: usize,
    shared: &SharedEstimate,
) -> Result<()> {
    let mut polls = 0;
    loop {
        let event = core
            .component_mut::<ControlStack>()
            .context("control stack not registered")?
            .step()?;
        match event {
            ControlEvent::Idle => return Ok(()),
            ControlEvent::Pursuing(goal) => {
                polls += 1;
                if polls >= max_polls {
                    bail!("gave up on {:?} after {} control steps", goal, polls);
                }
            }
            ControlEvent::Reached(goal) => {
                polls = 0;
                report(&goal, &shared.pose(), &drive.true_pose());
                if let Some(sensor) = sensor.as_deref_mut() {
                    let scan = core
                        .component_mut::<PerceptionStack>()
                        .context("perception stack not registered")?
                        .process_sensor(sensor)?;
                    log::info!(
                        "scan: {} walls, {} corners, {} corrections",
                        scan.walls.len(),
                        scan.corners.len(),
                        scan.corrections
                    );
                }
            }
        }
    }
}

fn report(goal: &MotionGoal, estimate: &Pose2D, truth: &Pose2D) {
    log::info!(
        "reached {:?}: estimate ({:.1}, {:.1}, {:.3}), drift {:.2} cm",
        goal,
        estimate.x,
        estimate.y,
        estimate.theta,
        estimate.distance_to(&truth.position())
    );
}
