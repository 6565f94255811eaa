//! Post-processing filters for extracted walls

use super::walls::WallSegment;
use crate::common::Point2D;

/// A generic filter interface
pub trait Filter<T> {
    /// Filter the input data
    fn filter(&self, input: T) -> T;
}

/// Merges duplicate and overlapping wall segments.
///
/// Two segments belong to the same wall when their directions differ by less
/// than `max_angle` and each midpoint lies within `max_offset` of the other's line.
#[derive(Debug, Clone)]
pub struct SegmentMerger {
    pub max_angle: f64,
    pub max_offset: f64,
}

impl SegmentMerger {
    pub fn new(max_angle: f64, max_offset: f64) -> Self {
        SegmentMerger {
            max_angle,
            max_offset,
        }
    }

    fn same_wall(&self, a: &WallSegment, b: &WallSegment) -> bool {
        // directions are undirected, so compare modulo pi
        let diff = (a.heading() - b.heading()).rem_euclid(std::f64::consts::PI);
        let diff = diff.min(std::f64::consts::PI - diff);
        diff < self.max_angle
            && a.line_distance(&b.midpoint()) < self.max_offset
            && b.line_distance(&a.midpoint()) < self.max_offset
    }
}

impl Default for SegmentMerger {
    fn default() -> Self {
        SegmentMerger::new(5.0_f64.to_radians(), 3.0)
    }
}

/// Weighted line through a cluster, spanning the extreme endpoint projections
fn merge_cluster(cluster: &[WallSegment]) -> WallSegment {
    let weight = |s: &WallSegment| s.inliers.max(1) as f64;
    let total: f64 = cluster.iter().map(weight).sum();

    // average doubled angles so opposite-facing duplicates agree
    let (mut c2, mut s2, mut cx, mut cy) = (0.0, 0.0, 0.0, 0.0);
    for segment in cluster {
        let w = weight(segment);
        let h = segment.heading();
        c2 += w * (2.0 * h).cos();
        s2 += w * (2.0 * h).sin();
        let mid = segment.midpoint();
        cx += w * mid.x;
        cy += w * mid.y;
    }
    let heading = 0.5 * s2.atan2(c2);
    let (dir_y, dir_x) = heading.sin_cos();
    let centroid = Point2D::new(cx / total, cy / total);

    let (lo, hi) = cluster
        .iter()
        .flat_map(|s| [s.start, s.end])
        .map(|p| (p.x - centroid.x) * dir_x + (p.y - centroid.y) * dir_y)
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), t| {
            (lo.min(t), hi.max(t))
        });

    WallSegment {
        start: Point2D::new(centroid.x + lo * dir_x, centroid.y + lo * dir_y),
        end: Point2D::new(centroid.x + hi * dir_x, centroid.y + hi * dir_y),
        inliers: cluster.iter().map(|s| s.inliers).max().unwrap_or(0),
    }
}

impl Filter<Vec<WallSegment>> for SegmentMerger {
    fn filter(&self, mut input: Vec<WallSegment>) -> Vec<WallSegment> {
        input.sort_by(|a, b| b.inliers.cmp(&a.inliers));
        let mut clusters: Vec<Vec<WallSegment>> = Vec::new();
        for segment in input {
            match clusters.iter_mut().find(|c| self.same_wall(&c[0], &segment)) {
                Some(cluster) => cluster.push(segment),
                None => clusters.push(vec![segment]),
            }
        }
        clusters.iter().map(|c| merge_cluster(c)).collect()
    }
}
