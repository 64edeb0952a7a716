//! Evaluator configuration: the jitter schedule used when a covariance matrix
//! fails to factor, and the fixed nugget added to every covariance diagonal.
//!
//! Both have defaults matching the GPDS samplers, so most callers never touch
//! this module. When they do, the configuration round-trips through TOML.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read or write configuration file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse TOML configuration: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Failed to serialize configuration to TOML format: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
    #[error("Invalid evaluator configuration: {0}")]
    Invalid(String),
}

/// Diagonal regularisation retried when Cholesky factorization fails.
///
/// The first retry adds `initial * scale` to the diagonal, where `scale` is the
/// mean absolute diagonal entry of the matrix. Each further retry multiplies the
/// added amount by `growth`, up to `max_retries` retries.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JitterSchedule {
    pub initial: f64,
    pub growth: f64,
    pub max_retries: usize,
}

impl Default for JitterSchedule {
    fn default() -> Self {
        Self {
            initial: 1e-6,
            growth: 10.0,
            max_retries: 6,
        }
    }
}

impl JitterSchedule {
    /// A schedule that never perturbs the matrix.
    pub fn disabled() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// The jitter added on retry `attempt` (1-based) for a matrix of the given diagonal scale.
    pub fn jitter_for(&self, attempt: usize, scale: f64) -> f64 {
        let exponent = attempt.saturating_sub(1) as i32;
        self.initial * scale * self.growth.powi(exponent)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.initial.is_finite() && self.initial > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "jitter.initial must be positive and finite, got {}",
                self.initial
            )));
        }
        if !(self.growth.is_finite() && self.growth > 1.0) {
            return Err(ConfigError::Invalid(format!(
                "jitter.growth must be finite and greater than 1, got {}",
                self.growth
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluatorConfig {
    pub jitter: JitterSchedule,
    /// Constant added to every covariance diagonal on top of `sigma^2`.
    pub nugget: f64,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            jitter: JitterSchedule::default(),
            nugget: 1e-7,
        }
    }
}

impl EvaluatorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.jitter.validate()?;
        if !(self.nugget.is_finite() && self.nugget >= 0.0) {
            return Err(ConfigError::Invalid(format!(
                "nugget must be non-negative and finite, got {}",
                self.nugget
            )));
        }
        Ok(())
    }

    /// Parses and validates a configuration. Missing keys take their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Loads a configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let toml_string = fs::read_to_string(path)?;
        Self::from_toml_str(&toml_string)
    }

    /// Saves the configuration to a file in TOML format.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let toml_string = self.to_toml_string()?;
        let mut file = BufWriter::new(fs::File::create(path)?);
        file.write_all(toml_string.as_bytes())?;
        Ok(())
    }
}
