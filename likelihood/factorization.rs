//! Jittered Cholesky factorization of a covariance matrix.
//!
//! `C` is never inverted. Solves, the log-determinant and trace terms all go
//! through the lower-triangular factor `L` with `C + jitter I = L L^T`.

use crate::config::JitterSchedule;
use faer::linalg::solvers::{Llt, Solve};
use faer::{Mat, MatRef, Side};
use ndarray::{Array1, Array2, ArrayBase, Data, Ix2};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FactorizationError {
    #[error("Cannot factor a non-square {rows}x{cols} matrix.")]
    NotSquare { rows: usize, cols: usize },

    #[error("Covariance entry ({row}, {col}) is not finite: {value}.")]
    NonFinite { row: usize, col: usize, value: f64 },

    #[error(
        "Covariance matrix of dimension {dim} is not positive definite after {attempts} attempts (last jitter {last_jitter:e})."
    )]
    NotPositiveDefinite {
        dim: usize,
        attempts: usize,
        last_jitter: f64,
    },
}

/// `C + jitter I = L L^T`, with the log-determinant taken from the pivots.
pub struct CholeskyFactorization {
    llt: Llt<f64>,
    dim: usize,
    jitter: f64,
    log_det: f64,
}

impl CholeskyFactorization {
    /// Factors `c`, retrying with growing diagonal jitter per `schedule`.
    pub fn factorize<S: Data<Elem = f64>>(
        c: &ArrayBase<S, Ix2>,
        schedule: &JitterSchedule,
    ) -> Result<Self, FactorizationError> {
        let (rows, cols) = c.dim();
        if rows != cols {
            return Err(FactorizationError::NotSquare { rows, cols });
        }
        if let Some(((row, col), &value)) = c.indexed_iter().find(|(_, v)| !v.is_finite()) {
            return Err(FactorizationError::NonFinite { row, col, value });
        }

        let base = to_faer(c);
        if let Some((llt, log_det)) = try_factor(base.as_ref()) {
            return Ok(Self {
                llt,
                dim: rows,
                jitter: 0.0,
                log_det,
            });
        }

        let scale = diagonal_scale(c);
        let mut last_jitter = 0.0;
        for attempt in 1..=schedule.max_retries {
            let jitter = schedule.jitter_for(attempt, scale);
            last_jitter = jitter;
            log::warn!(
                "Cholesky factorization of {rows}x{rows} covariance failed; retry {attempt}/{} with jitter {jitter:e}",
                schedule.max_retries
            );
            if let Some((llt, log_det)) = try_factor(with_jitter(base.as_ref(), jitter).as_ref()) {
                return Ok(Self {
                    llt,
                    dim: rows,
                    jitter,
                    log_det,
                });
            }
        }

        Err(FactorizationError::NotPositiveDefinite {
            dim: rows,
            attempts: schedule.max_retries + 1,
            last_jitter,
        })
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Diagonal jitter that was needed, `0.0` when the first attempt succeeded.
    pub fn jitter(&self) -> f64 {
        self.jitter
    }

    /// `ln det C = 2 sum_i ln L_ii`.
    pub fn log_det(&self) -> f64 {
        self.log_det
    }

    /// `C^-1 b`.
    pub fn solve_vec(&self, rhs: &Array1<f64>) -> Array1<f64> {
        let b = Mat::from_fn(rhs.len(), 1, |i, _| rhs[i]);
        let x = self.llt.solve(b.as_ref());
        Array1::from_shape_fn(rhs.len(), |i| x[(i, 0)])
    }

    /// `C^-1 B`, column by column.
    pub fn solve_mat<S: Data<Elem = f64>>(&self, rhs: &ArrayBase<S, Ix2>) -> Array2<f64> {
        let x = self.llt.solve(to_faer(rhs).as_ref());
        to_array(x.as_ref())
    }

    /// `trace(C^-1 M)`.
    pub fn trace_of_solve<S: Data<Elem = f64>>(&self, m: &ArrayBase<S, Ix2>) -> f64 {
        let x = self.llt.solve(to_faer(m).as_ref());
        (0..x.nrows().min(x.ncols())).map(|i| x[(i, i)]).sum()
    }

    /// The lower-triangular factor with explicit zeros above the diagonal.
    pub fn lower(&self) -> Array2<f64> {
        let l = self.llt.L();
        Array2::from_shape_fn((self.dim, self.dim), |(i, j)| {
            if j <= i { l[(i, j)] } else { 0.0 }
        })
    }
}

fn to_faer<S: Data<Elem = f64>>(a: &ArrayBase<S, Ix2>) -> Mat<f64> {
    Mat::from_fn(a.nrows(), a.ncols(), |i, j| a[(i, j)])
}

fn with_jitter(c: MatRef<'_, f64>, jitter: f64) -> Mat<f64> {
    Mat::from_fn(c.nrows(), c.ncols(), |i, j| {
        if i == j { c[(i, j)] + jitter } else { c[(i, j)] }
    })
}

fn to_array(m: MatRef<'_, f64>) -> Array2<f64> {
    Array2::from_shape_fn((m.nrows(), m.ncols()), |(i, j)| m[(i, j)])
}

/// A factor counts only when every pivot is positive and finite. Returns the
/// factor with its log-determinant.
fn try_factor(c: MatRef<'_, f64>) -> Option<(Llt<f64>, f64)> {
    let llt = match Llt::new(c, Side::Lower) {
        Ok(llt) => llt,
        Err(err) => {
            log::debug!("LLT failed: {err:?}");
            return None;
        }
    };
    let l = llt.L();
    let mut log_det = 0.0;
    for i in 0..l.nrows() {
        let pivot = l[(i, i)];
        if !(pivot.is_finite() && pivot > 0.0) {
            log::debug!("Rejecting factor with pivot {pivot:e} at {i}");
            return None;
        }
        log_det += 2.0 * pivot.ln();
    }
    Some((llt, log_det))
}

/// Mean absolute diagonal, so the jitter is relative to the matrix magnitude.
fn diagonal_scale<S: Data<Elem = f64>>(c: &ArrayBase<S, Ix2>) -> f64 {
    let n = c.nrows();
    if n == 0 {
        return 1.0;
    }
    let scale = c.diag().iter().map(|v| v.abs()).sum::<f64>() / n as f64;
    if scale.is_finite() && scale > 0.0 {
        scale
    } else {
        1.0
    }
}
