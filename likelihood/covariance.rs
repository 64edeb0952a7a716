//! Covariance matrix `C` and its partials over a precomputed distance matrix.
//!
//! Only the upper triangle is evaluated; each entry is mirrored, so `C` and
//! every derivative matrix are exactly symmetric.

use crate::kernels::{KernelError, KernelKind, MAX_ARITY};
use ndarray::{Array2, ArrayView2};
use thiserror::Error;

/// Relative tolerance for distance-matrix symmetry.
const SYMMETRY_TOLERANCE: f64 = 1e-10;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CovarianceError {
    #[error("Distance matrix must be square, got {rows}x{cols}.")]
    NotSquare { rows: usize, cols: usize },

    #[error("Distance matrix entry ({row}, {col}) must be finite and non-negative, got {value}.")]
    InvalidDistance { row: usize, col: usize, value: f64 },

    #[error("Distance matrix is not symmetric at ({row}, {col}): {upper} vs {lower}.")]
    Asymmetric {
        row: usize,
        col: usize,
        upper: f64,
        lower: f64,
    },

    #[error(transparent)]
    Kernel(#[from] KernelError),
}

/// Whether the derivative matrices are needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Complexity {
    ValueOnly,
    WithDerivatives,
}

#[derive(Debug, Clone)]
pub struct GpCovariance {
    /// `K + (sigma^2 + nugget) I`.
    pub c: Array2<f64>,
    /// `dC/dphi_p`, one per hyperparameter. Empty for [`Complexity::ValueOnly`].
    pub dc_dphi: Vec<Array2<f64>>,
    /// `dC/dsigma = 2 sigma I`. `None` for [`Complexity::ValueOnly`].
    pub dc_dsigma: Option<Array2<f64>>,
}

impl GpCovariance {
    pub fn dim(&self) -> usize {
        self.c.nrows()
    }

    /// Derivative matrices in gradient order: every `phi` entry, then `sigma`.
    pub fn derivative_matrices(&self) -> Vec<&Array2<f64>> {
        self.dc_dphi.iter().chain(self.dc_dsigma.iter()).collect()
    }
}

/// Checks that `dist` is square, finite, non-negative and symmetric.
pub fn validate_distance_matrix(dist: ArrayView2<f64>) -> Result<(), CovarianceError> {
    let (rows, cols) = dist.dim();
    if rows != cols {
        return Err(CovarianceError::NotSquare { rows, cols });
    }
    for ((row, col), &value) in dist.indexed_iter() {
        if !(value.is_finite() && value >= 0.0) {
            return Err(CovarianceError::InvalidDistance { row, col, value });
        }
    }
    for row in 0..rows {
        for col in (row + 1)..cols {
            let upper = dist[(row, col)];
            let lower = dist[(col, row)];
            let scale = upper.abs().max(lower.abs()).max(1.0);
            if (upper - lower).abs() > SYMMETRY_TOLERANCE * scale {
                return Err(CovarianceError::Asymmetric {
                    row,
                    col,
                    upper,
                    lower,
                });
            }
        }
    }
    Ok(())
}

/// Builds `C`, and with [`Complexity::WithDerivatives`] also `dC/dphi_p` and
/// `dC/dsigma`, for `kernel` with hyperparameters `phi`.
///
/// The diagonal uses `k(0)` regardless of the stored self-distances.
pub fn build_covariance(
    dist: ArrayView2<f64>,
    kernel: KernelKind,
    phi: &[f64],
    sigma: f64,
    nugget: f64,
    complexity: Complexity,
) -> Result<GpCovariance, CovarianceError> {
    validate_distance_matrix(dist)?;
    kernel.validate(phi)?;

    let n = dist.nrows();
    let m = phi.len();
    let with_derivatives = complexity == Complexity::WithDerivatives;

    let mut c = Array2::<f64>::zeros((n, n));
    let mut dc_dphi = if with_derivatives {
        vec![Array2::<f64>::zeros((n, n)); m]
    } else {
        Vec::new()
    };
    let mut grad = [0.0; MAX_ARITY];
    let grad = &mut grad[..m];

    for i in 0..n {
        for j in i..n {
            let d = if i == j { 0.0 } else { dist[(i, j)] };
            let k = kernel.evaluate_into(d, phi, grad)?;
            c[(i, j)] = k;
            c[(j, i)] = k;
            for (dc, &g) in dc_dphi.iter_mut().zip(grad.iter()) {
                dc[(i, j)] = g;
                dc[(j, i)] = g;
            }
        }
    }

    let noise = sigma * sigma + nugget;
    c.diag_mut().mapv_inplace(|v| v + noise);

    let dc_dsigma = with_derivatives.then(|| Array2::from_diag_elem(n, 2.0 * sigma));

    log::trace!(
        "Built {n}x{n} covariance for kernel '{kernel}' with {} derivative matrices",
        dc_dphi.len() + usize::from(dc_dsigma.is_some())
    );

    Ok(GpCovariance {
        c,
        dc_dphi,
        dc_dsigma,
    })
}
