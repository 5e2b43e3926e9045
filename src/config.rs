//! # Model Configuration
//!
//! Configuration for a [`RegimeModel`](crate::RegimeModel): the number of hidden
//! states, the optional seed, and the iteration caps and numerical floors of each
//! estimation tier.

use crate::errors::{validate_positive, validate_state_count, RegimeError, RegimeResult};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Configuration accepted by a regime model at construction.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RegimeModelConfig {
    /// Number of hidden states (regimes)
    pub state_count: usize,
    /// Seed for every randomized step; `None` draws a fresh seed from OS entropy per fit
    pub seed: Option<u64>,
    /// Maximum Baum-Welch iterations for the primary HMM tier
    pub max_iterations: usize,
    /// Log-likelihood gain below which Baum-Welch stops
    pub convergence_tolerance: f64,
    /// Floor added to the diagonal of every HMM state covariance
    pub min_covariance: f64,
    /// Maximum EM iterations for the Gaussian mixture tier
    pub mixture_max_iterations: usize,
    /// Change in per-sample log-likelihood below which the mixture stops
    pub mixture_tolerance: f64,
    /// Floor added to the diagonal of every mixture component covariance
    pub mixture_regularization: f64,
    /// Maximum Lloyd iterations for k-means
    pub kmeans_max_iterations: usize,
    /// Largest centroid shift below which k-means stops
    pub kmeans_tolerance: f64,
}

impl Default for RegimeModelConfig {
    fn default() -> Self {
        Self {
            state_count: 2,
            seed: None,
            max_iterations: 100,
            convergence_tolerance: 1e-2,
            min_covariance: 1e-3,
            mixture_max_iterations: 100,
            mixture_tolerance: 1e-3,
            mixture_regularization: 1e-6,
            kmeans_max_iterations: 300,
            kmeans_tolerance: 1e-4,
        }
    }
}

impl RegimeModelConfig {
    /// Default configuration with the given number of states.
    pub fn new(state_count: usize) -> Self {
        Self {
            state_count,
            ..Self::default()
        }
    }

    /// Lower iteration caps for quick fits on small series.
    pub fn fast(state_count: usize) -> Self {
        Self {
            state_count,
            max_iterations: 25,
            mixture_max_iterations: 25,
            kmeans_max_iterations: 50,
            ..Self::default()
        }
    }

    /// Set the seed shared by every estimation tier.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Set the Baum-Welch iteration cap.
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Check every field for a usable value.
    pub fn validate(&self) -> RegimeResult<()> {
        validate_state_count(self.state_count)?;

        for (name, value) in [
            ("max_iterations", self.max_iterations),
            ("mixture_max_iterations", self.mixture_max_iterations),
            ("kmeans_max_iterations", self.kmeans_max_iterations),
        ] {
            if value == 0 {
                return Err(RegimeError::InvalidParameter {
                    parameter: name.to_string(),
                    value: 0.0,
                    constraint: ">= 1".to_string(),
                });
            }
        }

        validate_positive(self.convergence_tolerance, "convergence_tolerance")?;
        validate_positive(self.min_covariance, "min_covariance")?;
        validate_positive(self.mixture_tolerance, "mixture_tolerance")?;
        validate_positive(self.mixture_regularization, "mixture_regularization")?;
        validate_positive(self.kmeans_tolerance, "kmeans_tolerance")?;
        Ok(())
    }
}
