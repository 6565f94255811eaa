//! RANSAC wall extraction
//!
//! Each iteration draws a run of *consecutive* scan points (one arc of a
//! sweep usually lies on one wall), fits a least-squares line in slope/intercept
//! form, collects every scan point within the inlier threshold, and if enough
//! points agree refits on them and emits a segment clipped to their x-extent.
//!
//! Overlapping or duplicate segments are emitted as found; see
//! [`super::filters::SegmentMerger`] for an optional merge pass.
//!
//! Slope/intercept cannot represent vertical walls. Such samples fail with
//! `UnsupportedOrientation` and are skipped; use
//! [`WallExtractor::extract_rotated`] to extract vertical walls.

use crate::common::Point2D;
use crate::config::RansacConfig;
use crate::error::{Result, RoverError};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Fit denominators below this are treated as a vertical line
const DEGENERATE_SPREAD: f64 = 1e-12;

/// Line `y = slope * x + intercept`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineFit {
    pub slope: f64,
    pub intercept: f64,
}

impl LineFit {
    /// Ordinary least squares over `points`
    pub fn fit(points: &[Point2D]) -> Result<LineFit> {
        if points.len() < 2 {
            return Err(RoverError::InsufficientPoints {
                needed: 2,
                available: points.len(),
            });
        }
        let n = points.len() as f64;
        let x_mean = points.iter().map(|p| p.x).sum::<f64>() / n;
        let y_mean = points.iter().map(|p| p.y).sum::<f64>() / n;

        let (mut sxy, mut sxx) = (0.0, 0.0);
        for p in points {
            let dx = p.x - x_mean;
            sxy += dx * (p.y - y_mean);
            sxx += dx * dx;
        }
        if sxx < DEGENERATE_SPREAD {
            return Err(RoverError::UnsupportedOrientation);
        }

        let slope = sxy / sxx;
        Ok(LineFit {
            slope,
            intercept: y_mean - slope * x_mean,
        })
    }

    pub fn y_at(&self, x: f64) -> f64 {
        self.slope * x + self.intercept
    }

    /// Perpendicular distance from `point` to the line
    pub fn distance(&self, point: &Point2D) -> f64 {
        (self.slope * point.x - point.y + self.intercept).abs() / self.slope.hypot(1.0)
    }
}

/// Wall segment between two endpoints
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WallSegment {
    pub start: Point2D,
    pub end: Point2D,
    /// Number of scan points supporting the segment
    pub inliers: usize,
}

impl WallSegment {
    pub fn length(&self) -> f64 {
        self.start.distance(&self.end)
    }

    /// Direction of the segment in (-pi, pi]
    pub fn heading(&self) -> f64 {
        (self.end.y - self.start.y).atan2(self.end.x - self.start.x)
    }

    pub fn midpoint(&self) -> Point2D {
        Point2D::new(
            (self.start.x + self.end.x) / 2.0,
            (self.start.y + self.end.y) / 2.0,
        )
    }

    /// Slope/intercept form; `None` for vertical or zero-length segments
    pub fn line(&self) -> Option<LineFit> {
        let dx = self.end.x - self.start.x;
        if dx.abs() < DEGENERATE_SPREAD {
            return None;
        }
        let slope = (self.end.y - self.start.y) / dx;
        Some(LineFit {
            slope,
            intercept: self.start.y - slope * self.start.x,
        })
    }

    /// Distance from `point` to the infinite line through the segment
    pub fn line_distance(&self, point: &Point2D) -> f64 {
        let (dx, dy) = (self.end.x - self.start.x, self.end.y - self.start.y);
        let length = dx.hypot(dy);
        if length == 0.0 {
            return self.start.distance(point);
        }
        ((point.x - self.start.x) * dy - (point.y - self.start.y) * dx).abs() / length
    }

    pub fn rotated(&self, angle: f64) -> WallSegment {
        WallSegment {
            start: self.start.rotated(angle),
            end: self.end.rotated(angle),
            inliers: self.inliers,
        }
    }
}

/// RANSAC wall extractor
#[derive(Debug, Clone)]
pub struct WallExtractor {
    config: RansacConfig,
}

impl WallExtractor {
    pub fn new(config: RansacConfig) -> Self {
        WallExtractor { config }
    }

    pub fn config(&self) -> &RansacConfig {
        &self.config
    }

    /// Lazily yield walls using the caller's RNG
    pub fn walls<'a, R: Rng>(
        &'a self,
        points: &'a [Point2D],
        rng: &'a mut R,
    ) -> Result<Walls<'a, R>> {
        if points.len() < self.config.sample_size {
            return Err(RoverError::InsufficientPoints {
                needed: self.config.sample_size,
                available: points.len(),
            });
        }
        Ok(Walls {
            config: &self.config,
            points,
            rng,
            remaining: self.config.max_iterations,
            skipped: 0,
        })
    }

    pub fn extract_with_rng<R: Rng>(
        &self,
        points: &[Point2D],
        rng: &mut R,
    ) -> Result<Vec<WallSegment>> {
        let mut walls = self.walls(points, rng)?;
        let found: Vec<WallSegment> = walls.by_ref().collect();
        if walls.skipped() > 0 {
            log::debug!(
                "RANSAC skipped {} degenerate samples of {}",
                walls.skipped(),
                self.config.max_iterations
            );
        }
        Ok(found)
    }

    /// Extract with an RNG seeded from the config (or entropy when unseeded)
    pub fn extract(&self, points: &[Point2D]) -> Result<Vec<WallSegment>> {
        let mut rng = match self.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        self.extract_with_rng(points, &mut rng)
    }

    /// Extract in a frame rotated by `angle`, returning segments in the input frame.
    ///
    /// Rotating by a quarter turn makes vertical walls representable.
    pub fn extract_rotated(&self, points: &[Point2D], angle: f64) -> Result<Vec<WallSegment>> {
        let rotated: Vec<Point2D> = points.iter().map(|p| p.rotated(-angle)).collect();
        Ok(self
            .extract(&rotated)?
            .into_iter()
            .map(|segment| segment.rotated(angle))
            .collect())
    }
}

/// Iterator over RANSAC walls; each `next` runs iterations until one yields a wall
pub struct Walls<'a, R> {
    config: &'a RansacConfig,
    points: &'a [Point2D],
    rng: &'a mut R,
    remaining: usize,
    skipped: usize,
}

impl<'a, R: Rng> Walls<'a, R> {
    /// Iterations abandoned because the fit was degenerate
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    fn attempt(&mut self) -> Result<Option<WallSegment>> {
        let size = self.config.sample_size;
        let start = self.rng.gen_range(0..=self.points.len() - size);
        let line = LineFit::fit(&self.points[start..start + size])?;

        let inliers: Vec<Point2D> = self
            .points
            .iter()
            .copied()
            .filter(|p| line.distance(p) < self.config.inlier_threshold)
            .collect();
        if inliers.len() <= self.config.min_inliers {
            return Ok(None);
        }

        let line = LineFit::fit(&inliers)?;
        let (x_min, x_max) = inliers
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), p| {
                (lo.min(p.x), hi.max(p.x))
            });
        Ok(Some(WallSegment {
            start: Point2D::new(x_min, line.y_at(x_min)),
            end: Point2D::new(x_max, line.y_at(x_max)),
            inliers: inliers.len(),
        }))
    }
}

impl<'a, R: Rng> Iterator for Walls<'a, R> {
    type Item = WallSegment;

    fn next(&mut self) -> Option<WallSegment> {
        while self.remaining > 0 {
            self.remaining -= 1;
            match self.attempt() {
                Ok(Some(segment)) => return Some(segment),
                Ok(None) => {}
                Err(RoverError::UnsupportedOrientation) => self.skipped += 1,
                Err(e) => {
                    log::warn!("RANSAC iteration failed: {}", e);
                    self.skipped += 1;
                }
            }
        }
        None
    }
}
