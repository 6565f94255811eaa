//! Lock-guarded pose estimate shared by odometry, EKF and control
//!
//! Pose, covariance and the pose log sit behind one mutex. Writers go through
//! [`SharedEstimate::transact`], which computes the whole commit before touching
//! anything, so a failed step leaves the estimate exactly as it was.

use crate::common::linalg::Matrix;
use crate::common::Pose2D;
use crate::error::{Result, RoverError};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Copy of the estimate taken under the lock
#[derive(Debug, Clone, PartialEq)]
pub struct EstimateSnapshot {
    pub pose: Pose2D,
    pub covariance: Matrix,
    /// Incremented on every committed write; equals the pose log line count
    pub generation: u64,
    /// Clock time the pose refers to: the end of the odometry window that
    /// produced it. Corrections keep the stamp of the pose they correct.
    pub stamp: Duration,
}

/// Values a transaction writes.
///
/// Every commit carries a pose, which is logged, so log line `g` is the pose
/// of generation `g`. `None` leaves the covariance or stamp untouched.
#[derive(Debug, Clone)]
pub struct Commit {
    pub pose: Pose2D,
    pub covariance: Option<Matrix>,
    pub stamp: Option<Duration>,
}

impl Commit {
    pub fn new(pose: Pose2D) -> Self {
        Commit {
            pose,
            covariance: None,
            stamp: None,
        }
    }

    pub fn with_covariance(mut self, covariance: Matrix) -> Self {
        self.covariance = Some(covariance);
        self
    }

    pub fn stamped(mut self, stamp: Duration) -> Self {
        self.stamp = Some(stamp);
        self
    }
}

/// Append-only `x,y,theta` trajectory log
pub struct PoseLog {
    writer: Option<Box<dyn Write + Send>>,
}

impl PoseLog {
    pub fn disabled() -> Self {
        PoseLog { writer: None }
    }

    /// Open `path` for appending, creating it if needed
    pub fn append_to(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path.as_ref())?;
        Ok(PoseLog {
            writer: Some(Box::new(file)),
        })
    }

    pub fn from_writer(writer: Box<dyn Write + Send>) -> Self {
        PoseLog {
            writer: Some(writer),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.writer.is_some()
    }

    fn append(&mut self, pose: &Pose2D) -> Result<()> {
        if let Some(writer) = self.writer.as_mut() {
            writeln!(writer, "{},{},{}", pose.x, pose.y, pose.theta)?;
            writer.flush()?;
        }
        Ok(())
    }
}

/// Parse a pose log back into poses, for replay and inspection
pub fn read_pose_log(path: impl AsRef<Path>) -> Result<Vec<Pose2D>> {
    let reader = BufReader::new(File::open(path.as_ref())?);
    let mut poses = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        if fields.len() != 3 {
            return Err(RoverError::Parse {
                line: index + 1,
                message: format!("expected 3 fields, found {}", fields.len()),
            });
        }
        let mut values = [0.0; 3];
        for (slot, field) in values.iter_mut().zip(&fields) {
            *slot = field.parse().map_err(|e| RoverError::Parse {
                line: index + 1,
                message: format!("{:?}: {}", field, e),
            })?;
        }
        poses.push(Pose2D::from_array(values));
    }
    Ok(poses)
}

struct Inner {
    snapshot: EstimateSnapshot,
    log: PoseLog,
}

/// Handle to the single authoritative pose estimate
#[derive(Clone)]
pub struct SharedEstimate {
    inner: Arc<Mutex<Inner>>,
}

impl SharedEstimate {
    pub fn new(pose: Pose2D, covariance: Matrix, log: PoseLog) -> Result<Self> {
        check_covariance_shape(&covariance)?;
        Ok(SharedEstimate {
            inner: Arc::new(Mutex::new(Inner {
                snapshot: EstimateSnapshot {
                    pose: Pose2D::new(pose.x, pose.y, pose.theta),
                    covariance,
                    generation: 0,
                    stamp: Duration::ZERO,
                },
                log,
            })),
        })
    }

    pub fn snapshot(&self) -> EstimateSnapshot {
        self.inner.lock().snapshot.clone()
    }

    pub fn pose(&self) -> Pose2D {
        self.inner.lock().snapshot.pose
    }

    pub fn covariance(&self) -> Matrix {
        self.inner.lock().snapshot.covariance.clone()
    }

    pub fn generation(&self) -> u64 {
        self.inner.lock().snapshot.generation
    }

    /// Run `step` against the current estimate and commit its result atomically.
    ///
    /// The pose log line is written before the in-memory state changes; if
    /// `step` or the log write fails nothing is modified.
    pub fn transact<F>(&self, step: F) -> Result<EstimateSnapshot>
    where
        F: FnOnce(&EstimateSnapshot) -> Result<Commit>,
    {
        let mut inner = self.inner.lock();
        let commit = step(&inner.snapshot)?;
        if let Some(covariance) = commit.covariance.as_ref() {
            check_covariance_shape(covariance)?;
        }
        let pose = Pose2D::new(commit.pose.x, commit.pose.y, commit.pose.theta);
        inner.log.append(&pose)?;

        let snapshot = &mut inner.snapshot;
        snapshot.pose = pose;
        if let Some(covariance) = commit.covariance {
            snapshot.covariance = covariance;
        }
        if let Some(stamp) = commit.stamp {
            snapshot.stamp = stamp;
        }
        snapshot.generation += 1;
        Ok(snapshot.clone())
    }

    /// Overwrite the pose at the current stamp, e.g. after an external
    /// relocalisation
    pub fn set_pose(&self, pose: Pose2D) -> Result<EstimateSnapshot> {
        self.transact(|_| Ok(Commit::new(pose)))
    }
}

fn check_covariance_shape(covariance: &Matrix) -> Result<()> {
    if covariance.shape() != (3, 3) {
        return Err(RoverError::DimensionMismatch {
            operation: "covariance",
            left: covariance.shape(),
            right: (3, 3),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::PI;

    fn estimate(log: PoseLog) -> SharedEstimate {
        SharedEstimate::new(
            Pose2D::new(0.0, 0.0, 0.0),
            Matrix::diagonal(&[0.1, 0.1, 0.1]),
            log,
        )
        .unwrap()
    }

    #[test]
    fn test_transact_commits_and_bumps_generation() {
        let shared = estimate(PoseLog::disabled());
        let snap = shared
            .transact(|s| {
                Ok(Commit::new(Pose2D {
                    x: s.pose.x + 1.0,
                    y: 2.0,
                    theta: 3.0 * PI,
                })
                .stamped(Duration::from_millis(500)))
            })
            .unwrap();
        assert_eq!(snap.generation, 1);
        assert_eq!(snap.stamp, Duration::from_millis(500));
        assert_eq!(shared.pose().x, 1.0);
        // heading wrapped on commit
        assert!(shared.pose().theta <= PI && shared.pose().theta > -PI);
    }

    #[test]
    fn test_failed_transaction_leaves_state_untouched() {
        let shared = estimate(PoseLog::disabled());
        let before = shared.snapshot();
        let result = shared.transact(|_| Err(RoverError::SingularMatrix { determinant: 0.0 }));
        assert!(result.is_err());
        assert_eq!(shared.snapshot(), before);

        let bad_shape = shared.transact(|_| {
            Ok(Commit::new(Pose2D::new(9.0, 9.0, 0.0)).with_covariance(Matrix::identity(2)))
        });
        assert!(matches!(bad_shape, Err(RoverError::DimensionMismatch { .. })));
        assert_eq!(shared.snapshot(), before);
    }

    #[test]
    fn test_pose_log_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pose.csv");
        let shared = estimate(PoseLog::append_to(&path).unwrap());
        shared.set_pose(Pose2D::new(1.5, -2.0, 0.25)).unwrap();
        shared.set_pose(Pose2D::new(3.0, 4.0, -1.0)).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "1.5,-2,0.25\n3,4,-1\n");

        let poses = read_pose_log(&path).unwrap();
        assert_eq!(poses.len(), 2);
        assert_relative_eq!(poses[1].theta, -1.0);
    }

    #[test]
    fn test_every_generation_has_a_log_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pose.csv");
        let shared = estimate(PoseLog::append_to(&path).unwrap());
        let grown = Matrix::diagonal(&[0.5, 0.5, 0.2]);
        shared
            .transact(|s| Ok(Commit::new(s.pose).with_covariance(grown.clone())))
            .unwrap();
        shared.set_pose(Pose2D::new(1.0, 0.0, 0.0)).unwrap();

        let snapshot = shared.snapshot();
        assert_eq!(snapshot.covariance, grown);
        assert_eq!(snapshot.stamp, Duration::ZERO);
        let poses = read_pose_log(&path).unwrap();
        assert_eq!(poses.len() as u64, snapshot.generation);
        assert_eq!(poses[0], Pose2D::new(0.0, 0.0, 0.0));
    }

    #[test]
    fn test_read_pose_log_reports_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pose.csv");
        std::fs::write(&path, "1,2,3\n\n4,five,6\n").unwrap();
        match read_pose_log(&path) {
            Err(RoverError::Parse { line, .. }) => assert_eq!(line, 3),
            other => panic!("unexpected {:?}", other.map(|p| p.len())),
        }
    }
}
