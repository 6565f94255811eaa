//! Perception module for the rover
//!
//! Odometry and the EKF share one [`state::SharedEstimate`]; scans feed wall
//! extraction, corners from the walls become landmarks, and re-observed
//! landmarks correct the estimate.
pub mod filters;
pub mod landmarks;
pub mod localization;
pub mod odometry;
pub mod sensors;
pub mod state;
pub mod walls;

use self::filters::{Filter, SegmentMerger};
use self::landmarks::{corners_from_walls, LandmarkMap};
use self::localization::EkfLocalizer;
use self::state::SharedEstimate;
use self::walls::{WallExtractor, WallSegment};
use crate::common::Point2D;
use crate::config::{LandmarkConfig, RansacConfig};
use crate::error::{Result, RoverError};
use crate::hardware::RangeSensor;
use crate::lifecycle::{LifecycleNode, LifecycleNodeBase, State};
use std::any::Any;
use std::f64::consts::FRAC_PI_2;

/// What one processed scan produced
#[derive(Debug, Clone, Default)]
pub struct ScanReport {
    pub walls: Vec<WallSegment>,
    pub corners: Vec<Point2D>,
    /// EKF corrections committed to the shared estimate
    pub corrections: usize,
    /// Corrections dropped on a recoverable error, e.g. a singular innovation
    /// covariance
    pub skipped: usize,
}

/// Perception stack for the rover
pub struct PerceptionStack {
    base: LifecycleNodeBase,
    extractor: WallExtractor,
    merger: SegmentMerger,
    landmark_config: LandmarkConfig,
    landmarks: LandmarkMap,
    ekf: EkfLocalizer,
    shared: SharedEstimate,
}

impl PerceptionStack {
    /// Create a new perception stack
    pub fn new(
        ransac: RansacConfig,
        landmark_config: LandmarkConfig,
        ekf: EkfLocalizer,
        shared: SharedEstimate,
    ) -> Self {
        PerceptionStack {
            base: LifecycleNodeBase::new("perception_stack"),
            extractor: WallExtractor::new(ransac),
            merger: SegmentMerger::default(),
            landmarks: LandmarkMap::from_config(&landmark_config),
            landmark_config,
            ekf,
            shared,
        }
    }

    pub fn landmarks(&self) -> &LandmarkMap {
        &self.landmarks
    }

    /// Walls of every orientation: a direct pass plus a quarter-turn pass for
    /// steep walls, merged into one set
    pub fn extract_walls(&mut self, points: &[Point2D]) -> Result<Vec<WallSegment>> {
        let mut walls = self.extractor.extract(points)?;
        walls.extend(self.extractor.extract_rotated(points, FRAC_PI_2)?);
        Ok(self.merger.filter(walls))
    }

    /// Run one scan (global frame) through extraction, association and correction
    pub fn process_scan(&mut self, points: &[Point2D]) -> Result<ScanReport> {
        self.base.require(State::Active)?;

        let walls = self.extract_walls(points)?;
        let corners = landmarks::dedupe_points(
            &corners_from_walls(
                &walls,
                self.landmark_config.min_corner_angle,
                self.landmark_config.corner_margin,
            ),
            self.landmark_config.corner_margin,
        );
        let observations = self.landmarks.associate_all(&corners);

        let mut report = ScanReport {
            walls,
            corners,
            ..ScanReport::default()
        };
        for observation in &observations {
            let (dx, dy) = observation.displacement();
            log::debug!(
                "landmark at ({:.1}, {:.1}) moved by ({:.2}, {:.2})",
                observation.prev.x,
                observation.prev.y,
                dx,
                dy
            );
            match self.ekf.correct(&self.shared, observation) {
                Ok(_) => report.corrections += 1,
                Err(e) if e.is_recoverable() => {
                    log::warn!("skipping landmark correction: {}", e);
                    report.skipped += 1;
                }
                Err(e) => return Err(e),
            }
        }
        log::debug!(
            "scan: {} walls, {} corners, {} corrections",
            report.walls.len(),
            report.corners.len(),
            report.corrections
        );
        Ok(report)
    }

    /// Sweep `sensor` from the current pose estimate and process the scan
    pub fn process_sensor(&mut self, sensor: &mut dyn RangeSensor) -> Result<ScanReport> {
        let points = sensors::capture_scan(sensor, &self.shared.pose())?;
        self.process_scan(&points)
    }
}

impl LifecycleNode for PerceptionStack {
    fn name(&self) -> &str {
        &self.base.name
    }

    fn on_configure(&mut self) -> Result<()> {
        self.base.require(State::Unconfigured)?;
        self.extractor.config().validate()?;
        self.landmark_config.validate()?;
        self.base.transition(State::Inactive)
    }

    fn on_activate(&mut self) -> Result<()> {
        self.base.require(State::Inactive)?;
        self.base.transition(State::Active)
    }

    fn on_deactivate(&mut self) -> Result<()> {
        self.base.require(State::Active)?;
        self.base.transition(State::Inactive)
    }

    fn on_cleanup(&mut self) -> Result<()> {
        self.base.require(State::Inactive)?;
        self.landmarks.clear();
        self.base.transition(State::Unconfigured)
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::linalg::Matrix;
    use crate::common::Pose2D;
    use crate::config::EkfConfig;
    use crate::perception::state::PoseLog;

    fn room(width: f64, height: f64, step: f64) -> Vec<Point2D> {
        let mut points = Vec::new();
        let nx = (width / step) as usize;
        let ny = (height / step) as usize;
        for i in 0..=nx {
            points.push(Point2D::new(i as f64 * step, 0.0));
        }
        for i in 1..=ny {
            points.push(Point2D::new(width, i as f64 * step));
        }
        for i in (0..nx).rev() {
            points.push(Point2D::new(i as f64 * step, height));
        }
        for i in (1..ny).rev() {
            points.push(Point2D::new(0.0, i as f64 * step));
        }
        points
    }

    fn stack(shared: SharedEstimate) -> PerceptionStack {
        let ransac = RansacConfig {
            seed: Some(7),
            ..RansacConfig::default()
        };
        PerceptionStack::new(
            ransac,
            LandmarkConfig::default(),
            EkfLocalizer::new(EkfConfig::default()),
            shared,
        )
    }

    fn shared() -> SharedEstimate {
        SharedEstimate::new(
            Pose2D::new(30.0, 30.0, 0.0),
            Matrix::diagonal(&[0.1, 0.1, 0.1]),
            PoseLog::disabled(),
        )
        .unwrap()
    }

    #[test]
    fn test_requires_active() {
        let mut stack = stack(shared());
        assert!(matches!(
            stack.process_scan(&room(100.0, 100.0, 5.0)),
            Err(RoverError::Lifecycle(_))
        ));
    }

    #[test]
    fn test_first_scan_maps_corners_second_corrects() {
        let shared = shared();
        let mut stack = stack(shared.clone());
        stack.on_configure().unwrap();
        stack.on_activate().unwrap();

        let points = room(100.0, 100.0, 5.0);
        let first = stack.process_scan(&points).unwrap();
        assert_eq!(first.corners.len(), 4);
        assert_eq!(first.corrections, 0);
        assert_eq!(stack.landmarks().len(), 4);
        for corner in [(0.0, 0.0), (100.0, 0.0), (100.0, 100.0), (0.0, 100.0)] {
            let corner = Point2D::new(corner.0, corner.1);
            assert!(first.corners.iter().any(|c| c.distance(&corner) < 1.0));
        }

        // same room seen shifted: the estimate moves against the shift
        let shifted: Vec<Point2D> = points.iter().map(|p| Point2D::new(p.x + 2.0, p.y)).collect();
        let before = shared.pose();
        let second = stack.process_scan(&shifted).unwrap();
        assert_eq!(second.corrections, 4);
        assert!(shared.pose().x < before.x);
        assert_eq!(stack.landmarks().len(), 4);
    }

    #[test]
    fn test_singular_corrections_are_skipped() {
        let ekf = EkfLocalizer::new(EkfConfig {
            initial_covariance: [0.0, 0.0, 0.0],
            measurement_noise: [0.0, 0.0],
            ..EkfConfig::default()
        });
        let shared = SharedEstimate::new(
            Pose2D::new(30.0, 30.0, 0.0),
            ekf.initial_covariance(),
            PoseLog::disabled(),
        )
        .unwrap();
        let ransac = RansacConfig {
            seed: Some(7),
            ..RansacConfig::default()
        };
        let mut stack =
            PerceptionStack::new(ransac, LandmarkConfig::default(), ekf, shared.clone());
        stack.on_configure().unwrap();
        stack.on_activate().unwrap();

        let points = room(100.0, 100.0, 5.0);
        stack.process_scan(&points).unwrap();
        let before = shared.snapshot();
        let shifted: Vec<Point2D> = points.iter().map(|p| Point2D::new(p.x + 2.0, p.y)).collect();
        let report = stack.process_scan(&shifted).unwrap();
        assert_eq!(report.corrections, 0);
        assert_eq!(report.skipped, 4);
        assert_eq!(shared.snapshot(), before);
    }
}
