//! EKF localization
//!
//! Covariance propagation follows the unicycle motion Jacobian; corrections come
//! from re-observed landmarks, treating the landmark's apparent displacement as
//! drift of the robot's own position estimate.

use super::landmarks::LandmarkObservation;
use super::state::{Commit, EstimateSnapshot, SharedEstimate};
use crate::common::linalg::Matrix;
use crate::common::{Point2D, Pose2D};
use crate::config::EkfConfig;
use crate::error::Result;

/// Result of one EKF measurement update
#[derive(Debug, Clone)]
pub struct Correction {
    pub state: Pose2D,
    pub covariance: Matrix,
    pub gain: Matrix,
    pub innovation: [f64; 2],
}

/// A localizer for the robot
#[derive(Debug, Clone)]
pub struct EkfLocalizer {
    config: EkfConfig,
    process_noise: Matrix,
    measurement_noise: Matrix,
    measurement_jacobian: Matrix,
}

impl EkfLocalizer {
    /// Create a new localizer
    pub fn new(config: EkfConfig) -> Self {
        let process_noise = Matrix::diagonal(&config.process_noise);
        let measurement_noise = Matrix::diagonal(&config.measurement_noise);
        let mut measurement_jacobian = Matrix::zeros(2, 3);
        measurement_jacobian.set(0, 0, 1.0);
        measurement_jacobian.set(1, 1, 1.0);
        EkfLocalizer {
            config,
            process_noise,
            measurement_noise,
            measurement_jacobian,
        }
    }

    pub fn config(&self) -> &EkfConfig {
        &self.config
    }

    /// Diagonal prior the shared estimate starts from
    pub fn initial_covariance(&self) -> Matrix {
        Matrix::diagonal(&self.config.initial_covariance)
    }

    /// `G·P·Gᵗ + Q` for a step of `velocity` over `dt` at `heading`
    pub fn propagate(
        &self,
        velocity: f64,
        dt: f64,
        heading: f64,
        covariance: &Matrix,
    ) -> Result<Matrix> {
        let g = Matrix::from_rows(&[
            [1.0, 0.0, -velocity * heading.sin() * dt],
            [0.0, 1.0, velocity * heading.cos() * dt],
            [0.0, 0.0, 1.0],
        ])?;
        let predicted = g
            .multiply(covariance)?
            .multiply(&g.transpose())?
            .add(&self.process_noise)?;
        sanitize_covariance(predicted)
    }

    /// Measurement update from a landmark seen at `new_landmark` whose last
    /// known position was `prev_landmark`.
    ///
    /// Fails with `SingularMatrix` when the innovation covariance cannot be inverted.
    pub fn update(
        &self,
        new_landmark: Point2D,
        covariance: &Matrix,
        prev_landmark: Point2D,
        state: Pose2D,
    ) -> Result<Correction> {
        let h = &self.measurement_jacobian;
        let h_t = h.transpose();

        let innovation_covariance = h
            .multiply(covariance)?
            .multiply(&h_t)?
            .add(&self.measurement_noise)?;
        let gain = covariance
            .multiply(&h_t)?
            .multiply(&innovation_covariance.invert_with_epsilon(self.config.singular_epsilon)?)?;

        let innovation = [
            -(new_landmark.x - prev_landmark.x),
            -(new_landmark.y - prev_landmark.y),
        ];
        let delta = gain.multiply(&Matrix::column(&innovation))?;
        let corrected = state.to_array();
        let corrected = Pose2D::from_array([
            corrected[0] + delta.get(0, 0).unwrap_or(0.0),
            corrected[1] + delta.get(1, 0).unwrap_or(0.0),
            corrected[2] + delta.get(2, 0).unwrap_or(0.0),
        ]);

        let covariance = Matrix::identity(3)
            .subtract(&gain.multiply(h)?)?
            .multiply(covariance)?;

        Ok(Correction {
            state: corrected,
            covariance: sanitize_covariance(covariance)?,
            gain,
            innovation,
        })
    }

    /// Apply a landmark correction to the shared estimate.
    ///
    /// Pose and covariance are written together; on error neither changes.
    pub fn correct(
        &self,
        shared: &SharedEstimate,
        observation: &LandmarkObservation,
    ) -> Result<EstimateSnapshot> {
        shared.transact(|current| {
            let correction = self.update(
                observation.new,
                &current.covariance,
                observation.prev,
                current.pose,
            )?;
            log::debug!(
                "EKF correction: innovation ({:.3}, {:.3}) -> pose ({:.2}, {:.2}, {:.3})",
                correction.innovation[0],
                correction.innovation[1],
                correction.state.x,
                correction.state.y,
                correction.state.theta
            );
            Ok(Commit::new(correction.state).with_covariance(correction.covariance))
        })
    }
}

/// Force exact symmetry and a non-negative diagonal
fn sanitize_covariance(covariance: Matrix) -> Result<Matrix> {
    let mut covariance = covariance.symmetrized()?;
    for i in 0..covariance.nrows() {
        let value = covariance.get(i, i).unwrap_or(0.0);
        if value < 0.0 {
            log::warn!("Clamping negative covariance diagonal [{}] = {:e}", i, value);
            covariance.set(i, i, 0.0);
        }
    }
    Ok(covariance)
}
