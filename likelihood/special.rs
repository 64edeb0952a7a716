//! Modified Bessel function of the second kind, `K_nu(x)`, for real order
//! `nu >= 0` and `x > 0`.
//!
//! The general Matern kernel needs `K_nu` at non-half-integer orders, where no
//! polynomial closed form exists. The evaluation follows Temme's series for
//! `x < 2` and Steed's continued fraction (CF2) for `x >= 2`, both at the
//! reduced order `mu = nu - round(nu)` in `[-1/2, 1/2]`, followed by upward
//! recurrence `K_{mu+1} = 2 mu / x K_mu + K_{mu-1}`, which is stable for `K`.

use statrs::function::gamma::gamma;
use std::f64::consts::PI;
use thiserror::Error;

const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;
const SERIES_EPS: f64 = 1e-16;
const MAX_ITERATIONS: usize = 10_000;
const TEMME_CUTOFF: f64 = 2.0;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BesselError {
    #[error("K_nu requires a non-negative finite order, got {0}.")]
    InvalidOrder(f64),
    #[error("K_nu requires a positive finite argument, got {0}.")]
    InvalidArgument(f64),
    #[error("Bessel series did not converge within {0} iterations.")]
    NoConvergence(usize),
}

/// Returns `(K_nu(x), K_{nu+1}(x))`.
pub fn bessel_k_pair(nu: f64, x: f64) -> Result<(f64, f64), BesselError> {
    if !(nu.is_finite() && nu >= 0.0) {
        return Err(BesselError::InvalidOrder(nu));
    }
    if !(x.is_finite() && x > 0.0) {
        return Err(BesselError::InvalidArgument(x));
    }

    let nl = (nu + 0.5).floor() as usize;
    let mu = nu - nl as f64;

    let (mut k_mu, mut k_mu1) = if x < TEMME_CUTOFF {
        temme_series(mu, x)?
    } else {
        steed_continued_fraction(mu, x)?
    };

    let two_over_x = 2.0 / x;
    for i in 1..=nl {
        let next = (mu + i as f64) * two_over_x * k_mu1 + k_mu;
        k_mu = k_mu1;
        k_mu1 = next;
    }
    Ok((k_mu, k_mu1))
}

/// `K_nu(x)` alone.
pub fn bessel_k(nu: f64, x: f64) -> Result<f64, BesselError> {
    bessel_k_pair(nu, x).map(|(k, _)| k)
}

/// `gam1 = (1/Gamma(1-mu) - 1/Gamma(1+mu)) / (2 mu)` and
/// `gam2 = (1/Gamma(1-mu) + 1/Gamma(1+mu)) / 2`, with the reciprocal gammas.
fn temme_gammas(mu: f64) -> (f64, f64, f64, f64) {
    let recip_plus = 1.0 / gamma(1.0 + mu);
    let recip_minus = 1.0 / gamma(1.0 - mu);
    let gam1 = if mu.abs() < 1e-6 {
        -EULER_GAMMA
    } else {
        (recip_minus - recip_plus) / (2.0 * mu)
    };
    let gam2 = 0.5 * (recip_minus + recip_plus);
    (gam1, gam2, recip_plus, recip_minus)
}

fn temme_series(mu: f64, x: f64) -> Result<(f64, f64), BesselError> {
    let mu2 = mu * mu;
    let half_x = 0.5 * x;
    let pimu = PI * mu;
    let fact = if pimu.abs() < SERIES_EPS {
        1.0
    } else {
        pimu / pimu.sin()
    };
    let d = -half_x.ln();
    let e = mu * d;
    let fact2 = if e.abs() < SERIES_EPS {
        1.0
    } else {
        e.sinh() / e
    };
    let (gam1, gam2, recip_plus, recip_minus) = temme_gammas(mu);

    let mut ff = fact * (gam1 * e.cosh() + gam2 * fact2 * d);
    let mut sum = ff;
    let e = e.exp();
    let mut p = 0.5 * e / recip_plus;
    let mut q = 0.5 / (e * recip_minus);
    let mut c = 1.0;
    let d = half_x * half_x;
    let mut sum1 = p;

    for i in 1..=MAX_ITERATIONS {
        let fi = i as f64;
        ff = (fi * ff + p + q) / (fi * fi - mu2);
        c *= d / fi;
        p /= fi - mu;
        q /= fi + mu;
        let del = c * ff;
        sum += del;
        sum1 += c * (p - fi * ff);
        if del.abs() < sum.abs() * SERIES_EPS {
            return Ok((sum, sum1 * 2.0 / x));
        }
    }
    Err(BesselError::NoConvergence(MAX_ITERATIONS))
}

fn steed_continued_fraction(mu: f64, x: f64) -> Result<(f64, f64), BesselError> {
    let mu2 = mu * mu;
    let mut b = 2.0 * (1.0 + x);
    let mut d = 1.0 / b;
    let mut delh = d;
    let mut h = d;
    let mut q1 = 0.0;
    let mut q2 = 1.0;
    let a1 = 0.25 - mu2;
    let mut q = a1;
    let mut c = a1;
    let mut a = -a1;
    let mut s = 1.0 + q * delh;

    for i in 1..=MAX_ITERATIONS {
        let fi = i as f64;
        a -= 2.0 * fi;
        c = -a * c / (fi + 1.0);
        let qnew = (q1 - b * q2) / a;
        q1 = q2;
        q2 = qnew;
        q += c * qnew;
        b += 2.0;
        d = 1.0 / (b + a * d);
        delh = (b * d - 1.0) * delh;
        h += delh;
        let dels = q * delh;
        s += dels;
        if (dels / s).abs() < SERIES_EPS {
            let h = a1 * h;
            let k_mu = (PI / (2.0 * x)).sqrt() * (-x).exp() / s;
            let k_mu1 = k_mu * (mu + x + 0.5 - h) / x;
            return Ok((k_mu, k_mu1));
        }
    }
    Err(BesselError::NoConvergence(MAX_ITERATIONS))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn integer_orders_match_tabulated_values() {
        let (k0, k1) = bessel_k_pair(0.0, 1.0).unwrap();
        assert_relative_eq!(k0, 0.421_024_438_240_708_3, max_relative = 1e-12);
        assert_relative_eq!(k1, 0.601_907_230_197_234_6, max_relative = 1e-12);

        let (k2, k3) = bessel_k_pair(2.0, 0.5).unwrap();
        assert_relative_eq!(k2, 7.550_183_551_240_869, max_relative = 1e-12);
        assert_relative_eq!(k3, 62.057_909_529_930_25, max_relative = 1e-12);

        assert_relative_eq!(
            bessel_k(2.0, 3.0).unwrap(),
            0.061_510_458_471_742_02,
            max_relative = 1e-12
        );
    }

    #[test]
    fn half_order_has_closed_form() {
        for &x in &[0.1, 0.9, 1.3, 2.0, 4.5, 12.0] {
            let expected = (PI / (2.0 * x)).sqrt() * (-x).exp();
            assert_relative_eq!(bessel_k(0.5, x).unwrap(), expected, max_relative = 1e-12);
        }
    }

    #[test]
    fn both_regimes_agree_at_the_cutoff() {
        let below = bessel_k(2.01, TEMME_CUTOFF - 1e-9).unwrap();
        let above = bessel_k(2.01, TEMME_CUTOFF).unwrap();
        assert_relative_eq!(below, above, max_relative = 1e-7);
    }

    #[test]
    fn recurrence_is_consistent() {
        // K_{nu+1} = K_{nu-1} + 2 nu / x K_nu
        let nu = 2.01;
        let x = 0.7;
        let (k_prev, k_nu) = bessel_k_pair(nu - 1.0, x).unwrap();
        let (k_nu_again, k_next) = bessel_k_pair(nu, x).unwrap();
        assert_relative_eq!(k_nu, k_nu_again, max_relative = 1e-12);
        assert_relative_eq!(k_next, k_prev + 2.0 * nu / x * k_nu, max_relative = 1e-12);
    }

    #[test]
    fn invalid_inputs_are_rejected() {
        assert_eq!(bessel_k(-1.0, 1.0), Err(BesselError::InvalidOrder(-1.0)));
        assert_eq!(bessel_k(1.0, 0.0), Err(BesselError::InvalidArgument(0.0)));
        assert!(bessel_k(1.0, f64::NAN).is_err());
    }
}
