//! Common utilities and types for the rover core
pub mod linalg;
pub mod types;

pub use self::types::{Point2D, Pose2D};

use std::f64::consts::PI;

/// Wrap an angle into (-pi, pi].
///
/// Already-wrapped angles are returned untouched so the wrap is exactly idempotent.
pub fn wrap_angle(angle: f64) -> f64 {
    if angle > -PI && angle <= PI {
        return angle;
    }
    let wrapped = (angle + PI).rem_euclid(2.0 * PI) - PI;
    if wrapped <= -PI {
        wrapped + 2.0 * PI
    } else {
        wrapped
    }
}

/// Sign-preserving clamp of a magnitude into `[min, max]`.
///
/// Negative values clamp into `[-max, -min]`; zero counts as positive.
pub fn clamp_magnitude(value: f64, min: f64, max: f64) -> f64 {
    if value < 0.0 {
        value.min(-min).max(-max)
    } else {
        value.max(min).min(max)
    }
}
