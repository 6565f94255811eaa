//! Simulated differential-drive robot
//!
//! Integrates commanded wheel speeds over `Clock` time into encoder counts and
//! a ground-truth pose. Under `ManualClock` every run is deterministic.

use super::{Clock, MotorInterface, PolarReading, RangeSensor, Wheel};
use crate::common::{wrap_angle, Point2D, Pose2D};
use crate::config::DriveConfig;
use crate::error::{Result, RoverError};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// Virtual clock whose `sleep` advances time instead of blocking
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Mutex<Duration>,
    frozen: Mutex<bool>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, duration: Duration) {
        *self.now.lock() += duration;
    }

    /// While frozen, `sleep` yields without advancing time
    pub fn set_frozen(&self, frozen: bool) {
        *self.frozen.lock() = frozen;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        *self.now.lock()
    }

    fn sleep(&self, duration: Duration) {
        if *self.frozen.lock() {
            std::thread::yield_now();
        } else {
            self.advance(duration);
        }
    }
}

#[derive(Debug)]
struct DriveState {
    last_update: Duration,
    left_speed: f64,
    right_speed: f64,
    left_travel: f64,
    right_travel: f64,
    pose: Pose2D,
    faulted: Option<Wheel>,
}

/// Kinematic differential-drive robot behind `MotorInterface`
pub struct SimulatedDrive {
    clock: Arc<dyn Clock>,
    geometry: DriveConfig,
    /// Converts commanded native speed into cm/s of wheel travel
    speed_scale: f64,
    state: Mutex<DriveState>,
}

impl SimulatedDrive {
    pub fn new(clock: Arc<dyn Clock>, geometry: DriveConfig) -> Self {
        let now = clock.now();
        let pose = geometry.initial_pose;
        SimulatedDrive {
            clock,
            geometry,
            speed_scale: 1.0,
            state: Mutex::new(DriveState {
                last_update: now,
                left_speed: 0.0,
                right_speed: 0.0,
                left_travel: 0.0,
                right_travel: 0.0,
                pose,
                faulted: None,
            }),
        }
    }

    pub fn with_speed_scale(mut self, speed_scale: f64) -> Self {
        self.speed_scale = speed_scale;
        self
    }

    /// Ground-truth pose of the simulated body
    pub fn true_pose(&self) -> Pose2D {
        let mut state = self.state.lock();
        self.advance(&mut state);
        state.pose
    }

    pub fn wheel_speeds(&self) -> (f64, f64) {
        let state = self.state.lock();
        (state.left_speed, state.right_speed)
    }

    /// Make every later encoder read of `wheel` fail
    pub fn inject_encoder_fault(&self, wheel: Wheel) {
        self.state.lock().faulted = Some(wheel);
    }

    fn advance(&self, state: &mut DriveState) {
        let now = self.clock.now();
        let dt = match now.checked_sub(state.last_update) {
            Some(dt) => dt.as_secs_f64(),
            None => 0.0,
        };
        state.last_update = now;
        if dt == 0.0 {
            return;
        }

        let d_left = state.left_speed * self.speed_scale * dt;
        let d_right = state.right_speed * self.speed_scale * dt;
        state.left_travel += d_left;
        state.right_travel += d_right;

        // exact arc integration for ground truth
        let distance = (d_left + d_right) / 2.0;
        let d_theta = (d_right - d_left) / self.geometry.base_width;
        let pose = state.pose;
        let (dx, dy) = if d_theta.abs() < 1e-9 {
            (distance * pose.theta.cos(), distance * pose.theta.sin())
        } else {
            let radius = distance / d_theta;
            (
                radius * ((pose.theta + d_theta).sin() - pose.theta.sin()),
                -radius * ((pose.theta + d_theta).cos() - pose.theta.cos()),
            )
        };
        state.pose = Pose2D::new(pose.x + dx, pose.y + dy, wrap_angle(pose.theta + d_theta));
    }

    fn travel_to_counts(&self, travel: f64) -> i64 {
        let circumference = std::f64::consts::PI * self.geometry.tire_diameter;
        (travel / circumference * self.geometry.counts_per_revolution).round() as i64
    }
}

impl MotorInterface for SimulatedDrive {
    fn set_wheel_velocity(&self, wheel: Wheel, speed: f64) -> Result<()> {
        let mut state = self.state.lock();
        self.advance(&mut state);
        match wheel {
            Wheel::Left => state.left_speed = speed,
            Wheel::Right => state.right_speed = speed,
        }
        Ok(())
    }

    fn get_encoder_position(&self, wheel: Wheel) -> Result<i64> {
        let mut state = self.state.lock();
        if state.faulted == Some(wheel) {
            return Err(RoverError::SensorFault(format!("{:?} encoder not responding", wheel)));
        }
        self.advance(&mut state);
        let travel = match wheel {
            Wheel::Left => state.left_travel,
            Wheel::Right => state.right_travel,
        };
        Ok(self.travel_to_counts(travel))
    }
}

/// Ray-casting range sensor riding on a `SimulatedDrive`
pub struct SimulatedRangeSensor {
    drive: Arc<SimulatedDrive>,
    walls: Vec<(Point2D, Point2D)>,
    beams: usize,
    max_range: f64,
}

impl SimulatedRangeSensor {
    pub fn new(drive: Arc<SimulatedDrive>, walls: Vec<(Point2D, Point2D)>) -> Self {
        SimulatedRangeSensor {
            drive,
            walls,
            beams: 72,
            max_range: 255.0,
        }
    }

    pub fn with_beams(mut self, beams: usize) -> Self {
        self.beams = beams.max(1);
        self
    }

    /// Axis-aligned rectangular room with a corner at the origin
    pub fn rectangular_room(width: f64, height: f64) -> Vec<(Point2D, Point2D)> {
        let a = Point2D::new(0.0, 0.0);
        let b = Point2D::new(width, 0.0);
        let c = Point2D::new(width, height);
        let d = Point2D::new(0.0, height);
        vec![(a, b), (b, c), (c, d), (d, a)]
    }

    fn cast(&self, pose: &Pose2D, relative_angle: f64) -> f64 {
        let heading = pose.theta + relative_angle;
        let (dir_y, dir_x) = heading.sin_cos();
        let mut nearest = self.max_range;
        for (p, q) in &self.walls {
            let (ex, ey) = (q.x - p.x, q.y - p.y);
            let denom = dir_x * ey - dir_y * ex;
            if denom.abs() < 1e-12 {
                continue;
            }
            let (wx, wy) = (p.x - pose.x, p.y - pose.y);
            let t = (wx * ey - wy * ex) / denom;
            let u = (wx * dir_y - wy * dir_x) / denom;
            if t >= 0.0 && (0.0..=1.0).contains(&u) && t < nearest {
                nearest = t;
            }
        }
        nearest
    }
}

impl RangeSensor for SimulatedRangeSensor {
    fn get_distance(&mut self) -> Result<f64> {
        let pose = self.drive.true_pose();
        Ok(self.cast(&pose, 0.0))
    }

    fn scan(&mut self) -> Result<Vec<PolarReading>> {
        let pose = self.drive.true_pose();
        let step = 2.0 * std::f64::consts::PI / self.beams as f64;
        Ok((0..self.beams)
            .map(|i| {
                let angle = i as f64 * step;
                PolarReading {
                    angle,
                    distance: self.cast(&pose, angle),
                }
            })
            .filter(|reading| reading.distance < self.max_range)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn drive_at_origin(clock: Arc<ManualClock>) -> SimulatedDrive {
        let geometry = DriveConfig {
            initial_pose: Pose2D::new(0.0, 0.0, 0.0),
            ..DriveConfig::default()
        };
        SimulatedDrive::new(clock, geometry)
    }

    #[test]
    fn test_straight_drive_counts() {
        let clock = Arc::new(ManualClock::new());
        let drive = drive_at_origin(clock.clone());
        drive.set_wheel_velocity(Wheel::Left, 5.8 * std::f64::consts::PI).unwrap();
        drive.set_wheel_velocity(Wheel::Right, 5.8 * std::f64::consts::PI).unwrap();
        clock.advance(Duration::from_secs(1));
        // one revolution per second
        assert_eq!(drive.get_encoder_position(Wheel::Left).unwrap(), 360);
        assert_eq!(drive.get_encoder_position(Wheel::Right).unwrap(), 360);
        let pose = drive.true_pose();
        assert_relative_eq!(pose.x, 5.8 * std::f64::consts::PI, epsilon = 1e-9);
        assert_relative_eq!(pose.y, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_spin_in_place() {
        let clock = Arc::new(ManualClock::new());
        let drive = drive_at_origin(clock.clone());
        drive.set_wheel_velocity(Wheel::Left, -10.0).unwrap();
        drive.set_wheel_velocity(Wheel::Right, 10.0).unwrap();
        clock.advance(Duration::from_millis(500));
        let pose = drive.true_pose();
        assert_relative_eq!(pose.x, 0.0, epsilon = 1e-9);
        assert_relative_eq!(pose.theta, 10.0 / 13.0, epsilon = 1e-9);
    }

    #[test]
    fn test_encoder_fault() {
        let clock = Arc::new(ManualClock::new());
        let drive = drive_at_origin(clock);
        drive.inject_encoder_fault(Wheel::Right);
        assert!(drive.get_encoder_position(Wheel::Left).is_ok());
        assert!(matches!(
            drive.get_encoder_position(Wheel::Right),
            Err(RoverError::SensorFault(_))
        ));
    }

    #[test]
    fn test_range_in_room() {
        let clock = Arc::new(ManualClock::new());
        let geometry = DriveConfig {
            initial_pose: Pose2D::new(60.0, 120.0, 0.0),
            ..DriveConfig::default()
        };
        let drive = Arc::new(SimulatedDrive::new(clock, geometry));
        let mut sensor = SimulatedRangeSensor::new(
            drive,
            SimulatedRangeSensor::rectangular_room(182.88, 182.88),
        )
        .with_beams(4);
        assert_relative_eq!(sensor.get_distance().unwrap(), 122.88, epsilon = 1e-9);
        let scan = sensor.scan().unwrap();
        // east, north, west, south
        assert_eq!(scan.len(), 4);
        assert_relative_eq!(scan[1].distance, 62.88, epsilon = 1e-9);
        assert_relative_eq!(scan[2].distance, 60.0, epsilon = 1e-9);
        assert_relative_eq!(scan[3].distance, 120.0, epsilon = 1e-9);
    }
}
