//! Hardware interfaces consumed by the rover core
//!
//! Drivers live outside this crate; the stacks only see these traits.
pub mod sim;

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Drive wheel selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Wheel {
    Left,
    Right,
}

/// Motor driver with encoder feedback.
///
/// Methods take `&self` so one driver can be shared between the odometry
/// thread (encoder reads) and the control loop (velocity writes).
pub trait MotorInterface: Send + Sync {
    /// Command a wheel speed in driver-native units; sign is direction
    fn set_wheel_velocity(&self, wheel: Wheel, speed: f64) -> Result<()>;

    /// Absolute encoder count for a wheel
    fn get_encoder_position(&self, wheel: Wheel) -> Result<i64>;

    fn stop(&self) -> Result<()> {
        self.set_wheel_velocity(Wheel::Left, 0.0)?;
        self.set_wheel_velocity(Wheel::Right, 0.0)
    }
}

/// One beam of a range scan, angle in the robot frame (radians)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PolarReading {
    pub angle: f64,
    pub distance: f64,
}

/// Range sensor on a rotating mount
pub trait RangeSensor: Send {
    /// Single reading straight ahead
    fn get_distance(&mut self) -> Result<f64>;

    /// Full sweep of `(angle, distance)` readings
    fn scan(&mut self) -> Result<Vec<PolarReading>>;
}

/// Time source for sampling and sleeping
pub trait Clock: Send + Sync {
    /// Monotonic time since the clock's epoch
    fn now(&self) -> Duration;

    fn sleep(&self, duration: Duration);
}

/// Wall clock backed by `Instant`
#[derive(Debug, Clone)]
pub struct SystemClock {
    epoch: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        SystemClock {
            epoch: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.epoch.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

pub use self::sim::{ManualClock, SimulatedDrive, SimulatedRangeSensor};
