//! Rover configuration
//!
//! All tunables live here and load from TOML. Every section has defaults
//! matching the reference robot, so a partial file only overrides what it names.
//! Lengths are in centimetres, speeds in motor-native units.

use crate::common::Pose2D;
use crate::error::{Result, RoverError};
use serde::{Deserialize, Serialize};
use std::f64::consts::FRAC_PI_2;
use std::path::Path;
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RoverConfig {
    pub drive: DriveConfig,
    pub odometry: OdometryConfig,
    pub ekf: EkfConfig,
    pub controller: ControllerConfig,
    pub ransac: RansacConfig,
    pub landmarks: LandmarkConfig,
}

impl RoverConfig {
    /// Load and validate a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config = Self::from_toml_str(&text)?;
        log::info!("Loaded config from {}", path.as_ref().display());
        Ok(config)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: RoverConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.drive.validate()?;
        self.odometry.validate()?;
        self.ekf.validate()?;
        self.controller.validate()?;
        // the body turns on the drive's wheel separation, not the controller's
        self.controller.check_rotation_step(self.drive.base_width)?;
        self.ransac.validate()?;
        self.landmarks.validate()
    }
}

fn require_positive(name: &str, value: f64) -> Result<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(RoverError::Config(format!("{} must be positive, got {}", name, value)))
    }
}

fn require_non_negative(name: &str, values: &[f64]) -> Result<()> {
    match values.iter().find(|v| !v.is_finite() || **v < 0.0) {
        Some(v) => Err(RoverError::Config(format!(
            "{} entries must be non-negative, got {}",
            name, v
        ))),
        None => Ok(()),
    }
}

/// Differential-drive geometry used by the odometry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DriveConfig {
    /// Distance between the wheel contact points
    pub base_width: f64,
    pub tire_diameter: f64,
    pub counts_per_revolution: f64,
    pub initial_pose: Pose2D,
}

impl Default for DriveConfig {
    fn default() -> Self {
        DriveConfig {
            base_width: 13.0,
            tire_diameter: 5.8,
            counts_per_revolution: 360.0,
            initial_pose: Pose2D::new(40.0, 0.0, FRAC_PI_2),
        }
    }
}

impl DriveConfig {
    pub fn wheel_radius(&self) -> f64 {
        self.tire_diameter / 2.0
    }

    /// Linear wheel travel for an encoder delta
    pub fn counts_to_distance(&self, counts: i64) -> f64 {
        let revolutions = counts as f64 / self.counts_per_revolution;
        revolutions * 2.0 * std::f64::consts::PI * self.wheel_radius()
    }

    pub fn validate(&self) -> Result<()> {
        require_positive("drive.base_width", self.base_width)?;
        require_positive("drive.tire_diameter", self.tire_diameter)?;
        require_positive("drive.counts_per_revolution", self.counts_per_revolution)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OdometryConfig {
    /// Integrator tick period in seconds
    pub tick_period_s: f64,
    /// Append-only pose log; `None` disables logging
    pub pose_log: Option<String>,
}

impl Default for OdometryConfig {
    fn default() -> Self {
        OdometryConfig {
            tick_period_s: 0.5,
            pose_log: Some("pose.csv".to_string()),
        }
    }
}

impl OdometryConfig {
    pub fn tick_period(&self) -> Duration {
        Duration::from_secs_f64(self.tick_period_s)
    }

    pub fn validate(&self) -> Result<()> {
        require_positive("odometry.tick_period_s", self.tick_period_s)
    }
}

/// Noise model and prior for the EKF
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EkfConfig {
    /// Diagonal of the initial covariance
    pub initial_covariance: [f64; 3],
    /// Diagonal of the process noise Q
    pub process_noise: [f64; 3],
    /// Diagonal of the measurement noise R
    pub measurement_noise: [f64; 2],
    pub singular_epsilon: f64,
}

impl Default for EkfConfig {
    fn default() -> Self {
        EkfConfig {
            initial_covariance: [0.1, 0.1, 0.1],
            process_noise: [0.01, 0.01, 0.0001],
            measurement_noise: [5.0, 5.0],
            singular_epsilon: crate::common::linalg::DEFAULT_SINGULAR_EPSILON,
        }
    }
}

impl EkfConfig {
    pub fn validate(&self) -> Result<()> {
        require_non_negative("ekf.initial_covariance", &self.initial_covariance)?;
        require_non_negative("ekf.process_noise", &self.process_noise)?;
        require_non_negative("ekf.measurement_noise", &self.measurement_noise)?;
        require_positive("ekf.singular_epsilon", self.singular_epsilon)
    }
}

/// Gains and limits for the pose regulation controller
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    pub k_rho: f64,
    pub k_alpha: f64,
    pub k_beta: f64,
    /// Wheel separation used to split the angular command
    pub base_width: f64,
    pub min_speed: f64,
    pub max_speed: f64,
    pub distance_tolerance: f64,
    /// Radians
    pub angle_tolerance: f64,
    /// Encoder sampling window per control step, seconds
    pub sample_period_s: f64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        ControllerConfig {
            k_rho: 0.3,
            k_alpha: 0.5,
            k_beta: -0.1,
            base_width: 14.5,
            min_speed: 20.0,
            max_speed: 70.0,
            distance_tolerance: 10.0,
            angle_tolerance: 3.0_f64.to_radians(),
            sample_period_s: 0.02,
        }
    }
}

impl ControllerConfig {
    pub fn sample_period(&self) -> Duration {
        Duration::from_secs_f64(self.sample_period_s)
    }

    pub fn validate(&self) -> Result<()> {
        require_positive("controller.base_width", self.base_width)?;
        require_positive("controller.max_speed", self.max_speed)?;
        require_positive("controller.distance_tolerance", self.distance_tolerance)?;
        require_positive("controller.angle_tolerance", self.angle_tolerance)?;
        require_positive("controller.sample_period_s", self.sample_period_s)?;
        require_non_negative("controller.min_speed", &[self.min_speed])?;
        if self.min_speed > self.max_speed {
            return Err(RoverError::Config(format!(
                "controller.min_speed ({}) exceeds max_speed ({})",
                self.min_speed, self.max_speed
            )));
        }
        self.check_rotation_step(self.base_width)
    }

    /// Heading change of one control step turning in place at `min_speed`,
    /// for a body with wheel separation `base_width`
    pub fn min_rotation_step(&self, base_width: f64) -> f64 {
        2.0 * self.min_speed / base_width * self.sample_period_s
    }

    /// A turn must be able to land inside the heading window; a step wider
    /// than the window swings across it forever
    pub fn check_rotation_step(&self, base_width: f64) -> Result<()> {
        let step = self.min_rotation_step(base_width);
        let window = 2.0 * self.angle_tolerance;
        if step >= window {
            return Err(RoverError::Config(format!(
                "controller: a min_speed turn step of {:.3} rad (sample_period_s {}) \
                 does not fit the {:.3} rad heading window",
                step, self.sample_period_s, window
            )));
        }
        Ok(())
    }
}

/// RANSAC wall extraction parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RansacConfig {
    /// Consecutive points drawn per iteration
    pub sample_size: usize,
    pub max_iterations: usize,
    /// Perpendicular distance for a point to count as an inlier
    pub inlier_threshold: f64,
    /// A line is kept only with strictly more inliers than this
    pub min_inliers: usize,
    /// Fixed RNG seed; `None` seeds from entropy
    pub seed: Option<u64>,
}

impl Default for RansacConfig {
    fn default() -> Self {
        RansacConfig {
            sample_size: 5,
            max_iterations: 200,
            inlier_threshold: 2.0,
            min_inliers: 8,
            seed: None,
        }
    }
}

impl RansacConfig {
    pub fn validate(&self) -> Result<()> {
        if self.sample_size < 2 {
            return Err(RoverError::Config(format!(
                "ransac.sample_size must be at least 2, got {}",
                self.sample_size
            )));
        }
        require_positive("ransac.inlier_threshold", self.inlier_threshold)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LandmarkConfig {
    /// Max distance for a sighting to be associated with a stored landmark
    pub association_gate: f64,
    /// Minimum heading difference between walls forming a corner, radians
    pub min_corner_angle: f64,
    /// How far past a segment end an intersection may lie and still count
    pub corner_margin: f64,
}

impl Default for LandmarkConfig {
    fn default() -> Self {
        LandmarkConfig {
            association_gate: 20.0,
            min_corner_angle: 30.0_f64.to_radians(),
            corner_margin: 15.0,
        }
    }
}

impl LandmarkConfig {
    pub fn validate(&self) -> Result<()> {
        require_positive("landmarks.association_gate", self.association_gate)?;
        require_positive("landmarks.min_corner_angle", self.min_corner_angle)?;
        require_non_negative("landmarks.corner_margin", &[self.corner_margin])
    }
}
