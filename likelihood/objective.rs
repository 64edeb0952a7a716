//! A memoizing `(phi, sigma)` objective for outer optimizers and samplers.
//!
//! Line searches and leapfrog steps often re-query the same point, once for the
//! value and once for the gradient. Results are cached by the exact bit pattern
//! of the packed hyperparameters, so only bit-identical inputs hit.

use crate::config::EvaluatorConfig;
use crate::containers::Matrix;
use crate::covariance::validate_distance_matrix;
use crate::estimate::{LikelihoodError, LikelihoodResult, phisigllik_view};
use crate::kernels::KernelKind;
use ndarray::{Array1, Array2};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

const DEFAULT_CACHE_CAPACITY: usize = 1024;

pub struct PhiSigmaObjective {
    yobs: Arc<Array2<f64>>,
    dist: Arc<Array2<f64>>,
    kernel: KernelKind,
    sigma: Option<f64>,
    config: EvaluatorConfig,
    cache_capacity: usize,
    cache: Mutex<HashMap<Vec<u64>, LikelihoodResult>>,
}

impl PhiSigmaObjective {
    /// Takes ownership of the data. The kernel name and distance matrix are
    /// checked once here rather than on every evaluation.
    pub fn new(
        yobs: Matrix,
        dist: Matrix,
        kernel_name: &str,
        sigma: Option<f64>,
    ) -> Result<Self, LikelihoodError> {
        Self::from_shared(
            Arc::new(yobs.into_array()),
            Arc::new(dist.into_array()),
            kernel_name.parse()?,
            sigma,
        )
    }

    /// Builds an objective over data already shared with other owners.
    pub fn from_shared(
        yobs: Arc<Array2<f64>>,
        dist: Arc<Array2<f64>>,
        kernel: KernelKind,
        sigma: Option<f64>,
    ) -> Result<Self, LikelihoodError> {
        validate_distance_matrix(dist.view())?;
        Ok(Self {
            yobs,
            dist,
            kernel,
            sigma,
            config: EvaluatorConfig::default(),
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            cache: Mutex::new(HashMap::new()),
        })
    }

    pub fn with_config(mut self, config: EvaluatorConfig) -> Self {
        self.config = config;
        self.lock_cache().clear();
        self
    }

    /// Maximum number of cached points. The cache is cleared when it fills up;
    /// a capacity of zero disables caching.
    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self.lock_cache().clear();
        self
    }

    pub fn kernel(&self) -> KernelKind {
        self.kernel
    }

    /// Length of the packed hyperparameter vector this objective expects.
    pub fn dimension(&self) -> usize {
        self.kernel.arity() + usize::from(self.sigma.is_none())
    }

    pub fn cached_points(&self) -> usize {
        self.lock_cache().len()
    }

    /// Log-likelihood and gradient at `phisig`.
    pub fn evaluate(&self, phisig: &Array1<f64>) -> Result<LikelihoodResult, LikelihoodError> {
        let key: Vec<u64> = phisig.iter().map(|&v| v.to_bits()).collect();
        if let Some(cached) = self.lock_cache().get(&key) {
            log::trace!("Objective cache hit");
            return Ok(cached.clone());
        }

        // The lock is not held while evaluating, so threads never serialize on
        // the linear algebra. Two threads may compute the same point; both
        // results are identical.
        let result = phisigllik_view(
            phisig.view(),
            self.yobs.view(),
            self.dist.view(),
            self.kernel,
            self.sigma,
            &self.config,
        )?;

        if self.cache_capacity > 0 {
            let mut cache = self.lock_cache();
            if cache.len() >= self.cache_capacity {
                log::debug!("Objective cache reached {} entries; clearing", cache.len());
                cache.clear();
            }
            cache.insert(key, result.clone());
        }
        Ok(result)
    }

    pub fn value(&self, phisig: &Array1<f64>) -> Result<f64, LikelihoodError> {
        self.evaluate(phisig).map(|result| result.value)
    }

    /// Negated log-likelihood and gradient, for minimizers.
    pub fn cost_and_gradient(
        &self,
        phisig: &Array1<f64>,
    ) -> Result<(f64, Array1<f64>), LikelihoodError> {
        let result = self.evaluate(phisig)?;
        Ok((-result.value, -result.gradient))
    }

    fn lock_cache(&self) -> MutexGuard<'_, HashMap<Vec<u64>, LikelihoodResult>> {
        // Entries are inserted whole, so a poisoned map is still consistent.
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
