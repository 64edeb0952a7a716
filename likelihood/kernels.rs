// likelihood/kernels.rs

//! # Stationary covariance kernels with exact hyperparameter partials
//!
//! Each kernel maps a distance `d >= 0` and a position-significant
//! hyperparameter vector `phi` to a covariance value `k(d; phi)` together with
//! `[dk/dphi_0, ..., dk/dphi_{m-1}]`. Every family puts the signal variance in
//! `phi[0]`, so `dk/dphi_0 = k / phi[0]`, and a length scale (or compact
//! support radius) in `phi[1]`.
//!
//! | name                | phi                                  |
//! |---------------------|--------------------------------------|
//! | `matern`            | `[variance, lengthscale]`, nu = 5/2  |
//! | `rbf`               | `[variance, lengthscale]`            |
//! | `rationalQuadratic` | `[variance, lengthscale, alpha]`     |
//! | `compact1`          | `[variance, support]`                |
//! | `compact2`          | `[variance, support]`                |
//! | `generalMatern`     | `[variance, lengthscale]`, nu = 2.01 |
//! | `periodicMatern`    | `[variance, lengthscale, period]`    |
//!
//! Derivatives are always analytic.

use crate::special::{BesselError, bessel_k, bessel_k_pair};
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use statrs::function::gamma::gamma;
use std::f64::consts::PI;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Smoothness of the `generalMatern` family, the value used by the GPDS samplers.
pub const GENERAL_MATERN_DF: f64 = 2.01;

/// Input-space dimension the Wendland kernels are positive definite in.
const WENDLAND_DIMENSION: usize = 3;

const SQRT_5: f64 = 2.236_067_977_499_79;

/// Decay exponent past which `exp(-x)` is treated as zero. `exp(-700)` is
/// near the smallest normal `f64`, and the polynomial factors overflow beyond.
const DECAY_CUTOFF: f64 = 700.0;

/// The most hyperparameters any family takes.
pub const MAX_ARITY: usize = 3;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum KernelError {
    #[error("Unsupported kernel '{0}'. Expected one of: {names}.", names = KernelKind::names().join(", "))]
    Unsupported(String),

    #[error("Kernel '{kernel}' takes {expected} hyperparameters, but {found} were supplied.")]
    Arity {
        kernel: KernelKind,
        expected: usize,
        found: usize,
    },

    #[error("Hyperparameter {index} ({name}) of kernel '{kernel}' must be positive and finite, got {value}.")]
    Domain {
        kernel: KernelKind,
        index: usize,
        name: &'static str,
        value: f64,
    },

    #[error("Distances must be finite and non-negative, got {0}.")]
    InvalidDistance(f64),

    #[error("Special function evaluation failed: {0}")]
    Special(#[from] BesselError),
}

/// The closed set of supported kernel families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum KernelKind {
    /// Matern with smoothness nu = 5/2.
    Matern,
    /// Squared exponential.
    Rbf,
    RationalQuadratic,
    /// Wendland phi_{3,1}: C^2 and compactly supported on `d < support`.
    Compact1,
    /// Wendland phi_{3,2}: C^4 and compactly supported on `d < support`.
    Compact2,
    /// Matern in its Bessel form with nu = [`GENERAL_MATERN_DF`].
    GeneralMatern,
    /// Matern 5/2 applied to `|sin(pi d / period)|`.
    PeriodicMatern,
}

impl KernelKind {
    pub const ALL: [KernelKind; 7] = [
        KernelKind::Matern,
        KernelKind::Rbf,
        KernelKind::RationalQuadratic,
        KernelKind::Compact1,
        KernelKind::Compact2,
        KernelKind::GeneralMatern,
        KernelKind::PeriodicMatern,
    ];

    /// The exact, case-sensitive identifier accepted by [`KernelKind::from_name`].
    pub fn name(self) -> &'static str {
        match self {
            KernelKind::Matern => "matern",
            KernelKind::Rbf => "rbf",
            KernelKind::RationalQuadratic => "rationalQuadratic",
            KernelKind::Compact1 => "compact1",
            KernelKind::Compact2 => "compact2",
            KernelKind::GeneralMatern => "generalMatern",
            KernelKind::PeriodicMatern => "periodicMatern",
        }
    }

    pub fn names() -> Vec<&'static str> {
        Self::ALL.iter().map(|kind| kind.name()).collect()
    }

    pub fn from_name(name: &str) -> Result<Self, KernelError> {
        Self::ALL
            .iter()
            .copied()
            .find(|kind| kind.name() == name)
            .ok_or_else(|| KernelError::Unsupported(name.to_string()))
    }

    pub fn arity(self) -> usize {
        self.parameter_names().len()
    }

    pub fn parameter_names(self) -> &'static [&'static str] {
        match self {
            KernelKind::Matern | KernelKind::Rbf | KernelKind::GeneralMatern => {
                &["variance", "lengthscale"]
            }
            KernelKind::RationalQuadratic => &["variance", "lengthscale", "alpha"],
            KernelKind::Compact1 | KernelKind::Compact2 => &["variance", "support"],
            KernelKind::PeriodicMatern => &["variance", "lengthscale", "period"],
        }
    }

    /// Checks arity first, then that every entry is positive and finite.
    pub fn validate(self, phi: &[f64]) -> Result<(), KernelError> {
        if phi.len() != self.arity() {
            return Err(KernelError::Arity {
                kernel: self,
                expected: self.arity(),
                found: phi.len(),
            });
        }
        for (index, (&value, &name)) in phi.iter().zip(self.parameter_names()).enumerate() {
            if !(value.is_finite() && value > 0.0) {
                return Err(KernelError::Domain {
                    kernel: self,
                    index,
                    name,
                    value,
                });
            }
        }
        Ok(())
    }

    /// Covariance at distance `d`.
    pub fn value(self, d: f64, phi: &[f64]) -> Result<f64, KernelError> {
        let mut scratch = [0.0; MAX_ARITY];
        self.validate(phi)?;
        check_distance(d)?;
        self.evaluate_into(d, phi, &mut scratch[..phi.len()])
    }

    /// Partial derivatives of the covariance at distance `d`, in `phi` order.
    pub fn gradient(self, d: f64, phi: &[f64]) -> Result<Array1<f64>, KernelError> {
        let mut grad = Array1::zeros(phi.len());
        self.validate(phi)?;
        check_distance(d)?;
        if let Some(slice) = grad.as_slice_mut() {
            self.evaluate_into(d, phi, slice)?;
        }
        Ok(grad)
    }

    /// Writes the partials into `grad` and returns the covariance value.
    ///
    /// `phi` must already have passed [`KernelKind::validate`], `d` must be
    /// finite and non-negative, and `grad.len()` must equal the arity.
    pub fn evaluate_into(self, d: f64, phi: &[f64], grad: &mut [f64]) -> Result<f64, KernelError> {
        let value = match self {
            KernelKind::Matern => matern52(d, phi[0], phi[1], grad),
            KernelKind::Rbf => rbf(d, phi[0], phi[1], grad),
            KernelKind::RationalQuadratic => rational_quadratic(d, phi[0], phi[1], phi[2], grad),
            KernelKind::Compact1 => wendland_k1(d, phi[0], phi[1], grad),
            KernelKind::Compact2 => wendland_k2(d, phi[0], phi[1], grad),
            KernelKind::GeneralMatern => {
                general_matern(d, phi[0], phi[1], GENERAL_MATERN_DF, grad)?
            }
            KernelKind::PeriodicMatern => periodic_matern(d, phi[0], phi[1], phi[2], grad),
        };
        Ok(value)
    }
}

impl fmt::Display for KernelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for KernelKind {
    type Err = KernelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s)
    }
}

pub(crate) fn check_distance(d: f64) -> Result<(), KernelError> {
    if d.is_finite() && d >= 0.0 {
        Ok(())
    } else {
        Err(KernelError::InvalidDistance(d))
    }
}

/// `k = v (1 + a + a^2/3) exp(-a)` with `a = sqrt(5) d / l`.
///
/// `dk/dl` is the product rule over the polynomial and the exponential:
/// `dk/da = -v a (1 + a) exp(-a) / 3` and `da/dl = -a / l`.
fn matern52(d: f64, v: f64, l: f64, grad: &mut [f64]) -> f64 {
    let a = SQRT_5 * d / l;
    if a > DECAY_CUTOFF {
        return vanished(grad);
    }
    let decay = (-a).exp();
    let poly = 1.0 + a + a * a / 3.0;
    grad[0] = poly * decay;
    grad[1] = v * a * a * (1.0 + a) * decay / (3.0 * l);
    v * poly * decay
}

fn rbf(d: f64, v: f64, l: f64, grad: &mut [f64]) -> f64 {
    let d2 = d * d;
    let exponent = d2 / (2.0 * l * l);
    if exponent > DECAY_CUTOFF {
        return vanished(grad);
    }
    let shape = (-exponent).exp();
    let k = v * shape;
    grad[0] = shape;
    grad[1] = k * d2 / (l * l * l);
    k
}

/// `k = v u^(-alpha)` with `u = 1 + d^2 / (2 alpha l^2)`.
fn rational_quadratic(d: f64, v: f64, l: f64, alpha: f64, grad: &mut [f64]) -> f64 {
    let d2 = d * d;
    let t = d2 / (2.0 * alpha * l * l);
    let u = 1.0 + t;
    if alpha * u.ln() > DECAY_CUTOFF {
        return vanished(grad);
    }
    let shape = u.powf(-alpha);
    let k = v * shape;
    grad[0] = shape;
    grad[1] = v * d2 * u.powf(-alpha - 1.0) / (l * l * l);
    grad[2] = k * (t / u - u.ln());
    k
}

/// Past the decay cutoff the value and every partial are zero.
fn vanished(grad: &mut [f64]) -> f64 {
    grad.iter_mut().for_each(|g| *g = 0.0);
    0.0
}

/// Wendland `(1-r)_+^(q+1) ((q+1) r + 1)`, `q = floor(D/2) + 2`.
fn wendland_k1(d: f64, v: f64, support: f64, grad: &mut [f64]) -> f64 {
    let q = (WENDLAND_DIMENSION / 2 + 2) as f64;
    let r = d / support;
    if r >= 1.0 {
        grad[0] = 0.0;
        grad[1] = 0.0;
        return 0.0;
    }
    let one_minus = 1.0 - r;
    let base = one_minus.powf(q);
    let shape = base * one_minus * ((q + 1.0) * r + 1.0);
    grad[0] = shape;
    grad[1] = v * (q + 1.0) * (q + 2.0) * r * r * base / support;
    v * shape
}

/// Wendland `(1-r)_+^(q+2) ((q^2+4q+3) r^2 + (3q+6) r + 3) / 3`, `q = floor(D/2) + 3`.
fn wendland_k2(d: f64, v: f64, support: f64, grad: &mut [f64]) -> f64 {
    let q = (WENDLAND_DIMENSION / 2 + 3) as f64;
    let r = d / support;
    if r >= 1.0 {
        grad[0] = 0.0;
        grad[1] = 0.0;
        return 0.0;
    }
    let one_minus = 1.0 - r;
    let base = one_minus.powf(q + 1.0);
    let poly = ((q * q + 4.0 * q + 3.0) * r * r + (3.0 * q + 6.0) * r + 3.0) / 3.0;
    let shape = base * one_minus * poly;
    grad[0] = shape;
    grad[1] = v * (q + 3.0) * (q + 4.0) / 3.0 * r * r * ((q + 1.0) * r + 1.0) * base / support;
    v * shape
}

/// `k = v 2^(1-nu) / Gamma(nu) x^nu K_nu(x)`, `x = sqrt(2 nu) d / l`.
///
/// Uses `d/dx [x^nu K_nu(x)] = -x^nu K_(nu-1)(x)`, so
/// `dk/dl = v 2^(1-nu) / Gamma(nu) x^(nu+1) K_(nu-1)(x) / l`.
fn general_matern(
    d: f64,
    v: f64,
    l: f64,
    nu: f64,
    grad: &mut [f64],
) -> Result<f64, BesselError> {
    if d == 0.0 {
        grad[0] = 1.0;
        grad[1] = 0.0;
        return Ok(v);
    }
    let x = (2.0 * nu).sqrt() * d / l;
    if x > DECAY_CUTOFF {
        return Ok(vanished(grad));
    }
    let norm = 2f64.powf(1.0 - nu) / gamma(nu);
    let (k_lower, k_nu) = if nu >= 1.0 {
        bessel_k_pair(nu - 1.0, x)?
    } else {
        // K_(nu-1) = K_(1-nu)
        (bessel_k(1.0 - nu, x)?, bessel_k(nu, x)?)
    };
    let x_pow = x.powf(nu);
    let shape = norm * x_pow * k_nu;
    grad[0] = shape;
    grad[1] = v * norm * x_pow * x * k_lower / l;
    Ok(v * shape)
}

/// Matern 5/2 in `r = |sin(pi d / period)|`.
fn periodic_matern(d: f64, v: f64, l: f64, period: f64, grad: &mut [f64]) -> f64 {
    let angle = PI * d / period;
    let s = angle.sin();
    let r = s.abs();
    let a = SQRT_5 * r / l;
    if a > DECAY_CUTOFF {
        return vanished(grad);
    }
    let decay = (-a).exp();
    let poly = 1.0 + a + a * a / 3.0;
    let dk_da = -v * a * (1.0 + a) * decay / 3.0;
    let dr_dperiod = s.signum() * angle.cos() * (-angle / period);
    grad[0] = poly * decay;
    grad[1] = v * a * a * (1.0 + a) * decay / (3.0 * l);
    grad[2] = dk_da * (SQRT_5 / l) * dr_dperiod;
    v * poly * decay
}
