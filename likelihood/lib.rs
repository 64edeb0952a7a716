#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]

//! Marginal log-likelihood and analytic gradient of a Gaussian process over its
//! kernel hyperparameters `phi` and observation-noise scale `sigma`.
//!
//! The crate is organised leaves first:
//!
//! - [`containers`]: `Vector` / `Matrix` value types with checked access.
//! - [`special`]: modified Bessel function of the second kind.
//! - [`kernels`]: closed-form covariance functions and their exact partials.
//! - [`covariance`]: covariance and derivative matrices over a distance matrix.
//! - [`factorization`]: jittered Cholesky factorization, solves and log-determinant.
//! - [`config`]: jitter schedule and nugget, loadable from TOML.
//! - [`estimate`]: the `phisigllik` evaluator.
//! - [`objective`]: a thread-safe memoizing wrapper for optimizers and samplers.

pub mod config;
pub mod containers;
pub mod covariance;
pub mod estimate;
pub mod factorization;
pub mod kernels;
pub mod objective;
pub mod special;

pub use config::{ConfigError, EvaluatorConfig, JitterSchedule};
pub use containers::{ContainerError, Matrix, Vector};
pub use estimate::{
    ErrorKind, LikelihoodError, LikelihoodResult, phisig_loglik_value,
    phisig_loglik_value_with_config, phisigllik, phisigllik_per_channel,
    phisigllik_per_channel_with_config, phisigllik_view, phisigllik_with_config,
};
pub use kernels::{KernelError, KernelKind};
pub use objective::PhiSigmaObjective;
