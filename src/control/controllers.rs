//! Controllers for the rover
//!
//! Polar-coordinate pose regulation: the error to the goal is expressed as
//! distance `rho`, bearing offset `alpha` and final-heading offset `beta`, and
//! a linear law on those gives forward and turning commands.

use crate::common::{clamp_magnitude, wrap_angle, Point2D, Pose2D};
use crate::config::ControllerConfig;
use crate::error::{Result, RoverError};
use std::collections::HashMap;

/// Goal error in polar form
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PolarError {
    pub rho: f64,
    pub alpha: f64,
    pub beta: f64,
}

/// Clamped wheel speeds in the motors' native units
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WheelCommand {
    pub left: f64,
    pub right: f64,
}

/// Polar feedback controller for a differential drive
#[derive(Debug, Clone)]
pub struct PoseRegulator {
    config: ControllerConfig,
}

impl PoseRegulator {
    pub fn new(config: ControllerConfig) -> Self {
        PoseRegulator { config }
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn name(&self) -> &str {
        "pose_regulator"
    }

    /// Override gains and limits at runtime.
    ///
    /// Unknown keys are rejected; on any error the controller is unchanged.
    pub fn configure(&mut self, params: &HashMap<String, f64>) -> Result<()> {
        let mut config = self.config.clone();
        for (key, &value) in params {
            let slot = match key.as_str() {
                "k_rho" => &mut config.k_rho,
                "k_alpha" => &mut config.k_alpha,
                "k_beta" => &mut config.k_beta,
                "base_width" => &mut config.base_width,
                "min_speed" => &mut config.min_speed,
                "max_speed" => &mut config.max_speed,
                "distance_tolerance" => &mut config.distance_tolerance,
                "angle_tolerance" => &mut config.angle_tolerance,
                "sample_period_s" => &mut config.sample_period_s,
                _ => {
                    return Err(RoverError::Config(format!(
                        "unknown controller parameter {:?}",
                        key
                    )))
                }
            };
            *slot = value;
        }

        if config.k_rho <= 0.0 {
            return Err(RoverError::Config("k_rho must be positive".to_string()));
        }
        if config.k_alpha <= 0.0 {
            return Err(RoverError::Config("k_alpha must be positive".to_string()));
        }
        if config.k_beta > 0.0 {
            return Err(RoverError::Config("k_beta must not be positive".to_string()));
        }
        config.validate()?;

        self.config = config;
        Ok(())
    }

    /// Error for turning in place to `heading`
    pub fn rotation_error(&self, current: &Pose2D, heading: f64) -> PolarError {
        let alpha = wrap_angle(heading - current.theta);
        PolarError {
            rho: 0.0,
            alpha,
            beta: wrap_angle(heading - current.theta - alpha),
        }
    }

    /// Error for driving to `target`; without a final `heading` the goal
    /// heading is the bearing to the target, so `beta` vanishes
    pub fn navigation_error(
        &self,
        current: &Pose2D,
        target: &Point2D,
        heading: Option<f64>,
    ) -> PolarError {
        let dx = target.x - current.x;
        let dy = target.y - current.y;
        let bearing = dy.atan2(dx);
        let alpha = wrap_angle(bearing - current.theta);
        let goal_heading = heading.unwrap_or(bearing);
        PolarError {
            rho: dx.hypot(dy),
            alpha,
            beta: wrap_angle(goal_heading - current.theta - alpha),
        }
    }

    /// Wheel speeds for a polar error
    pub fn command(&self, error: &PolarError) -> WheelCommand {
        let c = &self.config;
        let linear = c.k_rho * error.rho;
        let angular = c.k_alpha * wrap_angle(error.alpha) + c.k_beta * wrap_angle(error.beta);
        WheelCommand {
            left: clamp_magnitude(linear - angular * c.base_width, c.min_speed, c.max_speed),
            right: clamp_magnitude(linear + angular * c.base_width, c.min_speed, c.max_speed),
        }
    }

    pub fn rotate_toward(&self, current: &Pose2D, heading: f64) -> WheelCommand {
        self.command(&self.rotation_error(current, heading))
    }

    pub fn navigate_to(
        &self,
        current: &Pose2D,
        target: &Point2D,
        heading: Option<f64>,
    ) -> WheelCommand {
        self.command(&self.navigation_error(current, target, heading))
    }

    pub fn heading_reached(&self, current: &Pose2D, heading: f64) -> bool {
        wrap_angle(heading - current.theta).abs() < self.config.angle_tolerance
    }

    pub fn point_reached(&self, current: &Pose2D, target: &Point2D) -> bool {
        current.position().distance(target) < self.config.distance_tolerance
    }
}
