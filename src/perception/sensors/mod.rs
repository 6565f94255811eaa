//! Scan capture and scan file I/O

use crate::common::{Point2D, Pose2D};
use crate::error::{Result, RoverError};
use crate::hardware::{PolarReading, RangeSensor};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Convert polar readings to Cartesian points.
///
/// With `pose` the points are placed in the pose's frame, otherwise they stay
/// in the robot frame. Non-finite and non-positive distances are dropped.
pub fn polar_to_points(readings: &[PolarReading], pose: Option<&Pose2D>) -> Vec<Point2D> {
    readings
        .iter()
        .filter(|r| r.distance.is_finite() && r.distance > 0.0)
        .map(|r| {
            let local = Point2D::new(r.distance * r.angle.cos(), r.distance * r.angle.sin());
            match pose {
                Some(pose) => pose.transform_point(&local),
                None => local,
            }
        })
        .collect()
}

/// Sweep the sensor and return points in the frame of `pose`
pub fn capture_scan(sensor: &mut dyn RangeSensor, pose: &Pose2D) -> Result<Vec<Point2D>> {
    let readings = sensor.scan()?;
    let points = polar_to_points(&readings, Some(pose));
    log::debug!(
        "captured scan: {} readings, {} usable points",
        readings.len(),
        points.len()
    );
    Ok(points)
}

/// Parse `x,y` lines; blank lines are skipped
pub fn parse_scan(text: &str) -> Result<Vec<Point2D>> {
    let mut points = Vec::new();
    for (index, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let parse_error = |message: String| RoverError::Parse {
            line: index + 1,
            message,
        };
        let mut fields = line.split(',').map(str::trim);
        let (x, y) = match (fields.next(), fields.next(), fields.next()) {
            (Some(x), Some(y), None) => (x, y),
            _ => return Err(parse_error(format!("expected `x,y`, got {:?}", line))),
        };
        let x: f64 = x.parse().map_err(|e| parse_error(format!("{:?}: {}", x, e)))?;
        let y: f64 = y.parse().map_err(|e| parse_error(format!("{:?}: {}", y, e)))?;
        points.push(Point2D::new(x, y));
    }
    Ok(points)
}

pub fn read_scan_file(path: impl AsRef<Path>) -> Result<Vec<Point2D>> {
    parse_scan(&std::fs::read_to_string(path.as_ref())?)
}

/// Write points in the same `x,y` format `read_scan_file` accepts
pub fn write_scan_file(path: impl AsRef<Path>, points: &[Point2D]) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path.as_ref())?);
    for p in points {
        writeln!(writer, "{},{}", p.x, p.y)?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::FRAC_PI_2;

    #[test]
    fn test_polar_to_points_frames() {
        let readings = [
            PolarReading {
                angle: 0.0,
                distance: 10.0,
            },
            PolarReading {
                angle: FRAC_PI_2,
                distance: 5.0,
            },
            PolarReading {
                angle: 1.0,
                distance: f64::INFINITY,
            },
        ];
        let local = polar_to_points(&readings, None);
        assert_eq!(local.len(), 2);
        assert_relative_eq!(local[0].x, 10.0);
        assert_relative_eq!(local[1].y, 5.0);

        let pose = Pose2D::new(100.0, 50.0, FRAC_PI_2);
        let global = polar_to_points(&readings, Some(&pose));
        assert_relative_eq!(global[0].x, 100.0, epsilon = 1e-9);
        assert_relative_eq!(global[0].y, 60.0, epsilon = 1e-9);
        assert_relative_eq!(global[1].x, 95.0, epsilon = 1e-9);
    }

    #[test]
    fn test_parse_scan() {
        let points = parse_scan("1.5,2\n\n -3 , 4.25 \n").unwrap();
        assert_eq!(points, vec![Point2D::new(1.5, 2.0), Point2D::new(-3.0, 4.25)]);
    }

    #[test]
    fn test_parse_scan_errors_carry_line() {
        assert!(matches!(
            parse_scan("1,2\n3\n"),
            Err(RoverError::Parse { line: 2, .. })
        ));
        assert!(matches!(
            parse_scan("1,2\n3,x\n"),
            Err(RoverError::Parse { line: 2, .. })
        ));
        assert!(matches!(
            parse_scan("1,2,3\n"),
            Err(RoverError::Parse { line: 1, .. })
        ));
    }

    #[test]
    fn test_scan_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("map.txt");
        let points = vec![Point2D::new(0.0, 182.88), Point2D::new(60.96, -1.5)];
        write_scan_file(&path, &points).unwrap();
        assert_eq!(read_scan_file(&path).unwrap(), points);
    }
}
