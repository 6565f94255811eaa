//! Corner landmarks and scan-to-scan association

use super::walls::WallSegment;
use crate::common::Point2D;
use crate::config::LandmarkConfig;
use std::f64::consts::PI;

/// A landmark seen again: where it is now and where it was last time
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LandmarkObservation {
    pub new: Point2D,
    pub prev: Point2D,
}

impl LandmarkObservation {
    /// Apparent motion of the landmark between the two sightings
    pub fn displacement(&self) -> (f64, f64) {
        (self.new.x - self.prev.x, self.new.y - self.prev.y)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Landmark {
    pub id: usize,
    pub position: Point2D,
    pub sightings: usize,
}

/// Landmarks from earlier scans, matched by nearest neighbour within a gate
#[derive(Debug, Clone)]
pub struct LandmarkMap {
    gate: f64,
    landmarks: Vec<Landmark>,
    next_id: usize,
}

impl LandmarkMap {
    pub fn new(gate: f64) -> Self {
        LandmarkMap {
            gate,
            landmarks: Vec::new(),
            next_id: 0,
        }
    }

    pub fn from_config(config: &LandmarkConfig) -> Self {
        Self::new(config.association_gate)
    }

    pub fn len(&self) -> usize {
        self.landmarks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.landmarks.is_empty()
    }

    pub fn landmarks(&self) -> &[Landmark] {
        &self.landmarks
    }

    /// Match `position` against the map.
    ///
    /// A hit returns the observation and moves the stored landmark to
    /// `position`; a miss inserts a new landmark and returns `None`.
    pub fn associate(&mut self, position: Point2D) -> Option<LandmarkObservation> {
        let gate = self.gate;
        let nearest = self
            .landmarks
            .iter_mut()
            .map(|l| (l.position.distance(&position), l))
            .filter(|(d, _)| *d <= gate)
            .min_by(|a, b| a.0.total_cmp(&b.0));

        match nearest {
            Some((_, landmark)) => {
                let prev = landmark.position;
                landmark.position = position;
                landmark.sightings += 1;
                Some(LandmarkObservation { new: position, prev })
            }
            None => {
                log::debug!(
                    "new landmark {} at ({:.1}, {:.1})",
                    self.next_id,
                    position.x,
                    position.y
                );
                self.landmarks.push(Landmark {
                    id: self.next_id,
                    position,
                    sightings: 1,
                });
                self.next_id += 1;
                None
            }
        }
    }

    /// Associate every position, returning the re-observed ones
    pub fn associate_all(&mut self, positions: &[Point2D]) -> Vec<LandmarkObservation> {
        positions.iter().filter_map(|p| self.associate(*p)).collect()
    }

    pub fn clear(&mut self) {
        self.landmarks.clear();
    }
}

/// Corners where two walls meet at no less than `min_angle`.
///
/// The intersection of the two infinite lines counts only when it lies within
/// `margin` of both segments.
pub fn corners_from_walls(walls: &[WallSegment], min_angle: f64, margin: f64) -> Vec<Point2D> {
    let mut corners = Vec::new();
    for (i, a) in walls.iter().enumerate() {
        for b in &walls[i + 1..] {
            let between = (a.heading() - b.heading()).rem_euclid(PI);
            if between.min(PI - between) < min_angle {
                continue;
            }
            let Some(corner) = intersect(a, b) else {
                continue;
            };
            if segment_distance(a, &corner) <= margin && segment_distance(b, &corner) <= margin {
                corners.push(corner);
            }
        }
    }
    corners
}

/// Drop points within `radius` of an earlier kept point
pub fn dedupe_points(points: &[Point2D], radius: f64) -> Vec<Point2D> {
    let mut kept: Vec<Point2D> = Vec::with_capacity(points.len());
    for p in points {
        if kept.iter().all(|k| k.distance(p) > radius) {
            kept.push(*p);
        }
    }
    kept
}

fn intersect(a: &WallSegment, b: &WallSegment) -> Option<Point2D> {
    let (ax, ay) = (a.end.x - a.start.x, a.end.y - a.start.y);
    let (bx, by) = (b.end.x - b.start.x, b.end.y - b.start.y);
    let cross = ax * by - ay * bx;
    if cross.abs() < 1e-12 {
        return None;
    }
    let t = ((b.start.x - a.start.x) * by - (b.start.y - a.start.y) * bx) / cross;
    Some(Point2D::new(a.start.x + t * ax, a.start.y + t * ay))
}

fn segment_distance(segment: &WallSegment, point: &Point2D) -> f64 {
    let (dx, dy) = (segment.end.x - segment.start.x, segment.end.y - segment.start.y);
    let length_sq = dx * dx + dy * dy;
    if length_sq == 0.0 {
        return segment.start.distance(point);
    }
    let t = (((point.x - segment.start.x) * dx + (point.y - segment.start.y) * dy) / length_sq)
        .clamp(0.0, 1.0);
    point.distance(&Point2D::new(segment.start.x + t * dx, segment.start.y + t * dy))
}
