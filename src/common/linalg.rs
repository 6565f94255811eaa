//! Small dense matrix primitives
//!
//! Checked wrappers over `nalgebra::DMatrix<f64>`: every operation validates
//! operand shapes and reports `DimensionMismatch` instead of panicking, and
//! inversion reports `SingularMatrix` when the determinant is numerically zero.

use crate::error::{Result, RoverError};
use nalgebra::DMatrix;

/// Determinant magnitude below which a matrix is treated as singular
pub const DEFAULT_SINGULAR_EPSILON: f64 = 1e-12;

/// Row-major dense matrix of `f64`
#[derive(Debug, Clone, PartialEq)]
pub struct Matrix {
    inner: DMatrix<f64>,
}

impl Matrix {
    /// Build from a row-major sequence of rows. Ragged or empty input is rejected.
    pub fn from_rows<R: AsRef<[f64]>>(rows: &[R]) -> Result<Self> {
        let nrows = rows.len();
        let ncols = rows.first().map(|r| r.as_ref().len()).unwrap_or(0);
        if nrows == 0 || ncols == 0 {
            return Err(RoverError::DimensionMismatch {
                operation: "from_rows",
                left: (nrows, ncols),
                right: (1, 1),
            });
        }
        for row in rows {
            let len = row.as_ref().len();
            if len != ncols {
                return Err(RoverError::DimensionMismatch {
                    operation: "from_rows",
                    left: (nrows, ncols),
                    right: (1, len),
                });
            }
        }
        let inner = DMatrix::from_fn(nrows, ncols, |r, c| rows[r].as_ref()[c]);
        Ok(Matrix { inner })
    }

    pub fn identity(n: usize) -> Self {
        Matrix {
            inner: DMatrix::identity(n, n),
        }
    }

    pub fn zeros(nrows: usize, ncols: usize) -> Self {
        Matrix {
            inner: DMatrix::zeros(nrows, ncols),
        }
    }

    /// Square matrix with `values` on the diagonal
    pub fn diagonal(values: &[f64]) -> Self {
        let n = values.len();
        Matrix {
            inner: DMatrix::from_fn(n, n, |r, c| if r == c { values[r] } else { 0.0 }),
        }
    }

    /// Column vector
    pub fn column(values: &[f64]) -> Self {
        Matrix {
            inner: DMatrix::from_column_slice(values.len(), 1, values),
        }
    }

    pub fn nrows(&self) -> usize {
        self.inner.nrows()
    }

    pub fn ncols(&self) -> usize {
        self.inner.ncols()
    }

    pub fn shape(&self) -> (usize, usize) {
        self.inner.shape()
    }

    pub fn is_square(&self) -> bool {
        self.nrows() == self.ncols()
    }

    /// Element access; `None` when out of bounds
    pub fn get(&self, row: usize, col: usize) -> Option<f64> {
        self.inner.get((row, col)).copied()
    }

    pub fn to_rows(&self) -> Vec<Vec<f64>> {
        (0..self.nrows())
            .map(|r| (0..self.ncols()).map(|c| self.inner[(r, c)]).collect())
            .collect()
    }

    pub fn diagonal_values(&self) -> Vec<f64> {
        self.inner.diagonal().iter().copied().collect()
    }

    pub fn multiply(&self, other: &Matrix) -> Result<Matrix> {
        if self.ncols() != other.nrows() {
            return Err(RoverError::DimensionMismatch {
                operation: "multiply",
                left: self.shape(),
                right: other.shape(),
            });
        }
        Ok(Matrix {
            inner: &self.inner * &other.inner,
        })
    }

    pub fn add(&self, other: &Matrix) -> Result<Matrix> {
        self.check_same_shape("add", other)?;
        Ok(Matrix {
            inner: &self.inner + &other.inner,
        })
    }

    pub fn subtract(&self, other: &Matrix) -> Result<Matrix> {
        self.check_same_shape("subtract", other)?;
        Ok(Matrix {
            inner: &self.inner - &other.inner,
        })
    }

    pub fn transpose(&self) -> Matrix {
        Matrix {
            inner: self.inner.transpose(),
        }
    }

    pub fn scale(&self, factor: f64) -> Matrix {
        Matrix {
            inner: &self.inner * factor,
        }
    }

    pub fn determinant(&self) -> Result<f64> {
        if !self.is_square() {
            return Err(RoverError::DimensionMismatch {
                operation: "determinant",
                left: self.shape(),
                right: (self.nrows(), self.nrows()),
            });
        }
        Ok(self.inner.determinant())
    }

    pub fn invert(&self) -> Result<Matrix> {
        self.invert_with_epsilon(DEFAULT_SINGULAR_EPSILON)
    }

    /// Invert, treating `|det| < epsilon` as singular
    pub fn invert_with_epsilon(&self, epsilon: f64) -> Result<Matrix> {
        let determinant = self.determinant()?;
        if !determinant.is_finite() || determinant.abs() < epsilon {
            return Err(RoverError::SingularMatrix { determinant });
        }
        self.inner
            .clone()
            .try_inverse()
            .map(|inner| Matrix { inner })
            .ok_or(RoverError::SingularMatrix { determinant })
    }

    /// `(A + Aᵗ) / 2`, used to scrub round-off asymmetry from covariances
    pub fn symmetrized(&self) -> Result<Matrix> {
        let sum = self.add(&self.transpose())?;
        Ok(sum.scale(0.5))
    }

    pub fn is_symmetric(&self, tolerance: f64) -> bool {
        self.is_square()
            && (0..self.nrows()).all(|r| {
                (0..r).all(|c| (self.inner[(r, c)] - self.inner[(c, r)]).abs() <= tolerance)
            })
    }

    /// Largest absolute element-wise difference; `None` when shapes differ
    pub fn max_abs_diff(&self, other: &Matrix) -> Option<f64> {
        if self.shape() != other.shape() {
            return None;
        }
        Some(
            self.inner
                .iter()
                .zip(other.inner.iter())
                .fold(0.0_f64, |acc, (a, b)| acc.max((a - b).abs())),
        )
    }

    pub(crate) fn set(&mut self, row: usize, col: usize, value: f64) {
        self.inner[(row, col)] = value;
    }

    fn check_same_shape(&self, operation: &'static str, other: &Matrix) -> Result<()> {
        if self.shape() != other.shape() {
            return Err(RoverError::DimensionMismatch {
                operation,
                left: self.shape(),
                right: other.shape(),
            });
        }
        Ok(())
    }
}

pub fn multiply(a: &Matrix, b: &Matrix) -> Result<Matrix> {
    a.multiply(b)
}

pub fn add(a: &Matrix, b: &Matrix) -> Result<Matrix> {
    a.add(b)
}

pub fn transpose(a: &Matrix) -> Matrix {
    a.transpose()
}

pub fn invert(a: &Matrix) -> Result<Matrix> {
    a.invert()
}
