//! Geometric value types shared across the stacks

use super::wrap_angle;
use serde::{Deserialize, Serialize};

/// A 2D point in centimetres
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point2D {
    pub x: f64,
    pub y: f64,
}

impl Point2D {
    pub const fn new(x: f64, y: f64) -> Self {
        Point2D { x, y }
    }

    pub fn distance(&self, other: &Point2D) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }

    /// Rotate about the origin by `angle` radians (counter-clockwise).
    pub fn rotated(&self, angle: f64) -> Point2D {
        let (s, c) = angle.sin_cos();
        Point2D::new(c * self.x - s * self.y, s * self.x + c * self.y)
    }
}

impl From<(f64, f64)> for Point2D {
    fn from((x, y): (f64, f64)) -> Self {
        Point2D::new(x, y)
    }
}

/// Robot pose: position plus heading in (-pi, pi]
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Pose2D {
    pub x: f64,
    pub y: f64,
    pub theta: f64,
}

impl Pose2D {
    /// Create a pose, wrapping the heading
    pub fn new(x: f64, y: f64, theta: f64) -> Self {
        Pose2D {
            x,
            y,
            theta: wrap_angle(theta),
        }
    }

    pub fn position(&self) -> Point2D {
        Point2D::new(self.x, self.y)
    }

    /// Distance between the positions of two poses
    pub fn distance_to(&self, point: &Point2D) -> f64 {
        self.position().distance(point)
    }

    /// Transform a point from the robot frame into the frame this pose lives in
    pub fn transform_point(&self, local: &Point2D) -> Point2D {
        let rotated = local.rotated(self.theta);
        Point2D::new(self.x + rotated.x, self.y + rotated.y)
    }

    /// Apply a motion expressed in this pose's own frame
    pub fn compose(&self, relative: &Pose2D) -> Pose2D {
        let moved = self.transform_point(&relative.position());
        Pose2D::new(moved.x, moved.y, self.theta + relative.theta)
    }

    pub fn to_array(&self) -> [f64; 3] {
        [self.x, self.y, self.theta]
    }

    /// Build from a state vector, wrapping the heading
    pub fn from_array(state: [f64; 3]) -> Self {
        Pose2D::new(state[0], state[1], state[2])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::{FRAC_PI_2, PI};

    #[test]
    fn test_pose_wraps_heading() {
        let pose = Pose2D::new(1.0, 2.0, 3.0 * FRAC_PI_2);
        assert_relative_eq!(pose.theta, -FRAC_PI_2, epsilon = 1e-12);
        let pose = Pose2D::from_array([0.0, 0.0, -PI]);
        assert_eq!(pose.theta, PI);
    }

    #[test]
    fn test_transform_point() {
        let pose = Pose2D::new(10.0, 5.0, FRAC_PI_2);
        let p = pose.transform_point(&Point2D::new(2.0, 0.0));
        assert_relative_eq!(p.x, 10.0, epsilon = 1e-12);
        assert_relative_eq!(p.y, 7.0, epsilon = 1e-12);
    }

    #[test]
    fn test_compose_is_associative() {
        let base = Pose2D::new(3.0, -1.0, 2.5);
        let a = Pose2D::new(4.0, 0.0, 1.0);
        let b = Pose2D::new(-2.0, 1.5, 2.8);
        let stepwise = base.compose(&a).compose(&b);
        let folded = base.compose(&a.compose(&b));
        assert_relative_eq!(stepwise.x, folded.x, epsilon = 1e-9);
        assert_relative_eq!(stepwise.y, folded.y, epsilon = 1e-9);
        assert_relative_eq!(stepwise.theta, folded.theta, epsilon = 1e-9);
    }
}
