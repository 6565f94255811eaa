//! Error types for the rover core

use thiserror::Error;

/// Errors surfaced by the rover core
#[derive(Error, Debug)]
pub enum RoverError {
    /// Matrix inversion hit a numerically zero determinant
    #[error("singular matrix (determinant {determinant:e})")]
    SingularMatrix { determinant: f64 },

    /// Operand shapes do not fit the requested operation
    #[error("dimension mismatch in {operation}: {left:?} vs {right:?}")]
    DimensionMismatch {
        operation: &'static str,
        left: (usize, usize),
        right: (usize, usize),
    },

    /// Least-squares line fit is degenerate (vertical line in slope/intercept form)
    #[error("unsupported line orientation: fit denominator is zero")]
    UnsupportedOrientation,

    #[error("not enough scan points: need {needed}, have {available}")]
    InsufficientPoints { needed: usize, available: usize },

    /// Encoder, range or clock read failure
    #[error("sensor fault: {0}")]
    SensorFault(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("parse error on line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("lifecycle error: {0}")]
    Lifecycle(String),

    /// A blocking wait on a motion gave up
    #[error("goal not reached after {polls} control steps")]
    GoalTimeout { polls: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RoverError {
    /// Whether the caller can skip the current step and carry on.
    ///
    /// Matrix and fit errors are local decisions; sensor faults stop the owning task.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::SingularMatrix { .. } | Self::UnsupportedOrientation
        )
    }
}

impl From<toml::de::Error> for RoverError {
    fn from(e: toml::de::Error) -> Self {
        RoverError::Config(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RoverError>;
