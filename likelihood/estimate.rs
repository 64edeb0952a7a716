// likelihood/estimate.rs

//! # Marginal log-likelihood and gradient over `(phi, sigma)`
//!
//! For observations `Y` (one row per output channel, columns aligned with the
//! distance matrix) and covariance `C = K(phi) + (sigma^2 + nugget) I`, every
//! row contributes
//!
//! ```text
//! ll_row = -0.5 (y^T C^-1 y + ln det C + n ln 2 pi)
//! ```
//!
//! and the gradient with respect to a hyperparameter `theta` is
//!
//! ```text
//! d ll / d theta = 0.5 (sum_rows a^T dC a - rows * trace(C^-1 dC)),   a = C^-1 y
//! ```
//!
//! with `dC/dsigma = 2 sigma I`. All rows share `phi` and `sigma`;
//! [`phisigllik_per_channel`] gives every row its own `phi` block instead.
//!
//! Hyperparameters arrive packed in one vector. By default the noise scale is
//! the last element (`phisig = [phi..., sigma]`); passing `Some(sigma)` means
//! the vector holds `phi` only. The gradient always has one entry per `phi`
//! element followed by `d/dsigma`.

use crate::config::{ConfigError, EvaluatorConfig};
use crate::containers::{ContainerError, Matrix, Vector};
use crate::covariance::{Complexity, CovarianceError, build_covariance, validate_distance_matrix};
use crate::factorization::{CholeskyFactorization, FactorizationError};
use crate::kernels::{KernelError, KernelKind};
use ndarray::{Array1, ArrayView1, ArrayView2, s};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use thiserror::Error;

/// Value and gradient, ordered `[d/dphi_0, ..., d/dphi_{m-1}, d/dsigma]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LikelihoodResult {
    pub value: f64,
    pub gradient: Array1<f64>,
}

/// Coarse failure class, for callers that react by category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Shape,
    Domain,
    UnsupportedKernel,
    Factorization,
}

#[derive(Error, Debug)]
pub enum LikelihoodError {
    #[error("Unsupported kernel '{0}'.")]
    UnsupportedKernel(String),

    #[error(
        "Kernel '{kernel}' expects a hyperparameter vector of length {expected}, but got {found}."
    )]
    PhiArity {
        kernel: KernelKind,
        expected: usize,
        found: usize,
    },

    #[error("Hyperparameter {index} ({name}) must be positive and finite, got {value}.")]
    Domain {
        index: usize,
        name: &'static str,
        value: f64,
    },

    #[error("Distance matrix must be square, got {rows}x{cols}.")]
    DistanceNotSquare { rows: usize, cols: usize },

    #[error("Distance matrix entry ({row}, {col}) must be finite and non-negative, got {value}.")]
    InvalidDistance { row: usize, col: usize, value: f64 },

    #[error("Distance matrix is not symmetric at ({row}, {col}).")]
    AsymmetricDistance { row: usize, col: usize },

    #[error(
        "Observations have {columns} columns, but the distance matrix covers {points} points."
    )]
    ObservationMismatch { columns: usize, points: usize },

    #[error("Observation matrix is empty ({rows}x{cols}).")]
    EmptyObservations { rows: usize, cols: usize },

    #[error("Covariance factorization failed: {0}")]
    Factorization(#[from] FactorizationError),

    #[error("Likelihood evaluation produced a non-finite {0}.")]
    NonFiniteResult(&'static str),

    #[error(transparent)]
    Container(#[from] ContainerError),

    #[error("Kernel evaluation failed: {0}")]
    Kernel(KernelError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl LikelihoodError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LikelihoodError::UnsupportedKernel(_) => ErrorKind::UnsupportedKernel,
            LikelihoodError::PhiArity { .. }
            | LikelihoodError::DistanceNotSquare { .. }
            | LikelihoodError::AsymmetricDistance { .. }
            | LikelihoodError::ObservationMismatch { .. }
            | LikelihoodError::InvalidDistance { .. }
            | LikelihoodError::EmptyObservations { .. }
            | LikelihoodError::Container(_) => ErrorKind::Shape,
            LikelihoodError::Domain { .. }
            | LikelihoodError::Kernel(_)
            | LikelihoodError::Config(_) => ErrorKind::Domain,
            LikelihoodError::Factorization(_) | LikelihoodError::NonFiniteResult(_) => {
                ErrorKind::Factorization
            }
        }
    }
}

impl From<KernelError> for LikelihoodError {
    fn from(err: KernelError) -> Self {
        match err {
            KernelError::Unsupported(name) => LikelihoodError::UnsupportedKernel(name),
            KernelError::Arity {
                kernel,
                expected,
                found,
            } => LikelihoodError::PhiArity {
                kernel,
                expected,
                found,
            },
            KernelError::Domain {
                index, name, value, ..
            } => LikelihoodError::Domain { index, name, value },
            other => LikelihoodError::Kernel(other),
        }
    }
}

impl From<CovarianceError> for LikelihoodError {
    fn from(err: CovarianceError) -> Self {
        match err {
            CovarianceError::NotSquare { rows, cols } => {
                LikelihoodError::DistanceNotSquare { rows, cols }
            }
            CovarianceError::InvalidDistance { row, col, value } => {
                LikelihoodError::InvalidDistance { row, col, value }
            }
            CovarianceError::Asymmetric { row, col, .. } => {
                LikelihoodError::AsymmetricDistance { row, col }
            }
            CovarianceError::Kernel(inner) => inner.into(),
        }
    }
}

/// Marginal log-likelihood and gradient with the default configuration.
///
/// # Arguments
/// * `phisig`: `[phi..., sigma]` when `sigma` is `None`, otherwise `phi` alone.
/// * `yobs`: observations, one row per output channel.
/// * `dist`: pairwise distances between the observation points.
/// * `kernel_name`: one of the identifiers listed in [`crate::kernels`].
pub fn phisigllik(
    phisig: &Vector,
    yobs: &Matrix,
    dist: &Matrix,
    kernel_name: &str,
    sigma: Option<f64>,
) -> Result<LikelihoodResult, LikelihoodError> {
    phisigllik_with_config(
        phisig,
        yobs,
        dist,
        kernel_name,
        sigma,
        &EvaluatorConfig::default(),
    )
}

pub fn phisigllik_with_config(
    phisig: &Vector,
    yobs: &Matrix,
    dist: &Matrix,
    kernel_name: &str,
    sigma: Option<f64>,
    config: &EvaluatorConfig,
) -> Result<LikelihoodResult, LikelihoodError> {
    let kernel: KernelKind = kernel_name.parse()?;
    phisigllik_view(
        phisig.view(),
        yobs.view(),
        dist.view(),
        kernel,
        sigma,
        config,
    )
}

/// Same as [`phisigllik_with_config`] over borrowed `ndarray` data.
pub fn phisigllik_view(
    phisig: ArrayView1<f64>,
    yobs: ArrayView2<f64>,
    dist: ArrayView2<f64>,
    kernel: KernelKind,
    sigma: Option<f64>,
    config: &EvaluatorConfig,
) -> Result<LikelihoodResult, LikelihoodError> {
    config.validate()?;
    let packed = phisig.to_vec();
    let (phi, sigma) = split_phisig(&packed, kernel, sigma, 1)?;
    evaluate(phi, sigma, yobs, dist, kernel, config, Complexity::WithDerivatives)
}

/// The log-likelihood alone. Derivative matrices and trace solves are skipped.
pub fn phisig_loglik_value(
    phisig: &Vector,
    yobs: &Matrix,
    dist: &Matrix,
    kernel_name: &str,
    sigma: Option<f64>,
) -> Result<f64, LikelihoodError> {
    phisig_loglik_value_with_config(
        phisig,
        yobs,
        dist,
        kernel_name,
        sigma,
        &EvaluatorConfig::default(),
    )
}

pub fn phisig_loglik_value_with_config(
    phisig: &Vector,
    yobs: &Matrix,
    dist: &Matrix,
    kernel_name: &str,
    sigma: Option<f64>,
    config: &EvaluatorConfig,
) -> Result<f64, LikelihoodError> {
    let kernel: KernelKind = kernel_name.parse()?;
    config.validate()?;
    let packed = phisig.to_vec();
    let (phi, sigma) = split_phisig(&packed, kernel, sigma, 1)?;
    let result = evaluate(
        phi,
        sigma,
        yobs.view(),
        dist.view(),
        kernel,
        config,
        Complexity::ValueOnly,
    )?;
    Ok(result.value)
}

/// Multi-output likelihood where each row of `yobs` has its own `phi` block
/// and all rows share `sigma`.
///
/// `phisig = [phi_row0..., phi_row1..., ..., sigma]` (or without the trailing
/// `sigma` when it is passed explicitly). The value is the sum of the per-row
/// likelihoods. Gradient blocks follow the `phi` layout, and the last entry is
/// `d/dsigma` summed over rows.
pub fn phisigllik_per_channel(
    phisig: &Vector,
    yobs: &Matrix,
    dist: &Matrix,
    kernel_name: &str,
    sigma: Option<f64>,
) -> Result<LikelihoodResult, LikelihoodError> {
    phisigllik_per_channel_with_config(
        phisig,
        yobs,
        dist,
        kernel_name,
        sigma,
        &EvaluatorConfig::default(),
    )
}

pub fn phisigllik_per_channel_with_config(
    phisig: &Vector,
    yobs: &Matrix,
    dist: &Matrix,
    kernel_name: &str,
    sigma: Option<f64>,
    config: &EvaluatorConfig,
) -> Result<LikelihoodResult, LikelihoodError> {
    let kernel: KernelKind = kernel_name.parse()?;
    config.validate()?;
    let yobs = yobs.view();
    let dist = dist.view();
    let rows = yobs.nrows();
    if rows == 0 {
        return Err(LikelihoodError::EmptyObservations {
            rows,
            cols: yobs.ncols(),
        });
    }

    let packed = phisig.to_vec();
    let (phi_blocks, sigma) = split_phisig(&packed, kernel, sigma, rows)?;
    let m = kernel.arity();

    let per_row = (0..rows)
        .into_par_iter()
        .map(|row| {
            let phi = &phi_blocks[row * m..(row + 1) * m];
            let y = yobs.slice(s![row..row + 1, ..]);
            evaluate(
                phi,
                sigma,
                y,
                dist,
                kernel,
                config,
                Complexity::WithDerivatives,
            )
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut gradient = Array1::zeros(rows * m + 1);
    let mut value = 0.0;
    for (row, result) in per_row.iter().enumerate() {
        value += result.value;
        gradient
            .slice_mut(s![row * m..(row + 1) * m])
            .assign(&result.gradient.slice(s![..m]));
        gradient[rows * m] += result.gradient[m];
    }

    log::debug!(
        "Per-channel likelihood for kernel '{kernel}' over {rows} channels: {value:.6}"
    );
    Ok(LikelihoodResult { value, gradient })
}

/// Splits the packed hyperparameters into `phi` (for `blocks` rows) and `sigma`,
/// checking lengths and domains before any matrix work.
fn split_phisig(
    phisig: &[f64],
    kernel: KernelKind,
    sigma: Option<f64>,
    blocks: usize,
) -> Result<(&[f64], f64), LikelihoodError> {
    let m = kernel.arity();
    let phi_len = m * blocks;
    let expected = phi_len + usize::from(sigma.is_none());
    if phisig.len() != expected {
        return Err(LikelihoodError::PhiArity {
            kernel,
            expected,
            found: phisig.len(),
        });
    }
    let (phi, sigma) = match sigma {
        Some(sigma) => (phisig, sigma),
        None => (&phisig[..phi_len], phisig[phi_len]),
    };
    for (block, chunk) in phi.chunks(m).enumerate() {
        kernel.validate(chunk).map_err(|err| match err {
            KernelError::Domain {
                index, name, value, ..
            } => LikelihoodError::Domain {
                index: block * m + index,
                name,
                value,
            },
            other => other.into(),
        })?;
    }
    if !(sigma.is_finite() && sigma > 0.0) {
        return Err(LikelihoodError::Domain {
            index: phi_len,
            name: "sigma",
            value: sigma,
        });
    }
    Ok((phi, sigma))
}

fn evaluate(
    phi: &[f64],
    sigma: f64,
    yobs: ArrayView2<f64>,
    dist: ArrayView2<f64>,
    kernel: KernelKind,
    config: &EvaluatorConfig,
    complexity: Complexity,
) -> Result<LikelihoodResult, LikelihoodError> {
    validate_distance_matrix(dist)?;
    let (rows, n) = yobs.dim();
    if rows == 0 || n == 0 {
        return Err(LikelihoodError::EmptyObservations { rows, cols: n });
    }
    if n != dist.nrows() {
        return Err(LikelihoodError::ObservationMismatch {
            columns: n,
            points: dist.nrows(),
        });
    }

    let cov = build_covariance(dist, kernel, phi, sigma, config.nugget, complexity)?;
    let chol = CholeskyFactorization::factorize(&cov.c, &config.jitter)?;

    // One column of alpha per channel.
    let y_t = yobs.t();
    let alpha = chol.solve_mat(&y_t);
    let quad = (&y_t * &alpha).sum();
    let rows_f = rows as f64;
    let value = -0.5 * (quad + rows_f * (chol.log_det() + n as f64 * (2.0 * PI).ln()));
    if !value.is_finite() {
        return Err(LikelihoodError::NonFiniteResult("log-likelihood"));
    }

    let gradient: Vec<f64> = cov
        .derivative_matrices()
        .par_iter()
        .map(|dc| {
            let quad_p = (&alpha * &dc.dot(&alpha)).sum();
            let trace_p = chol.trace_of_solve(*dc);
            0.5 * (quad_p - rows_f * trace_p)
        })
        .collect();
    for (p, g) in gradient.iter().enumerate() {
        log::trace!("d ll / d theta[{p}] = {g:.6e}");
    }
    if gradient.iter().any(|g| !g.is_finite()) {
        return Err(LikelihoodError::NonFiniteResult("gradient"));
    }

    log::debug!(
        "Likelihood for kernel '{kernel}' (n = {n}, rows = {rows}, jitter = {:e}): {value:.6}",
        chol.jitter()
    );
    Ok(LikelihoodResult {
        value,
        gradient: Array1::from(gradient),
    })
}
