//! Core Hidden Markov Model implementation for regime detection.
//!
//! This module contains the Gaussian-emission HMM used by the primary estimation
//! tier: scaled forward-backward, Baum-Welch parameter estimation and Viterbi
//! decoding.
//!
//! Numerical notes:
//! - Emission likelihoods are shifted by their per-step maximum before leaving log
//!   space, and the shift is added back into the scale factors. Long sequences and
//!   very peaked densities therefore cannot overflow or underflow the recursion.
//! - Every M-step covariance gets `min_covariance` on its diagonal, so identical
//!   rows still yield a factorable covariance.
//! - Viterbi runs entirely in log space.

use crate::{
    clustering::kmeans,
    config::RegimeModelConfig,
    emission_models::{weighted_moments, GaussianEmission},
    errors::{validate_row_count, RegimeError, RegimeResult},
    feature_matrix::FeatureMatrix,
};
use nalgebra::DMatrix;
use rand::Rng;

/// Transition rows or state weights smaller than this are treated as empty.
const MIN_MASS: f64 = 1e-100;

/// Hidden Markov model with one full-covariance Gaussian emission per state.
#[derive(Debug, Clone)]
pub struct GaussianHmm {
    /// Number of hidden states (regimes)
    pub num_states: usize,
    /// Initial state probabilities
    pub initial_probs: Vec<f64>,
    /// Transition probability matrix (state i to state j)
    pub transition_matrix: Vec<Vec<f64>>,
    /// Emission density of each state
    pub emissions: Vec<GaussianEmission>,
    /// Convergence tolerance on the log-likelihood gain
    pub convergence_tolerance: f64,
    /// Maximum number of EM iterations
    pub max_iterations: usize,
    /// Diagonal floor for every state covariance
    pub min_covariance: f64,
}

/// Outcome of a Baum-Welch run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HmmFitReport {
    /// Log-likelihood of the sequence under the final parameters
    pub log_likelihood: f64,
    /// EM iterations performed
    pub iterations: usize,
    /// Whether the gain dropped below tolerance before the iteration cap
    pub converged: bool,
}

/// Scaled forward and backward variables of one sequence.
#[derive(Debug, Clone)]
pub struct ForwardBackward {
    /// Normalized forward variables, one row per time step
    pub alpha: Vec<Vec<f64>>,
    /// Backward variables scaled by the forward normalizers
    pub beta: Vec<Vec<f64>>,
    /// Per-step normalizers of the shifted emission likelihoods
    pub scale: Vec<f64>,
    /// Emission likelihoods divided by their per-step maximum
    pub emission: Vec<Vec<f64>>,
    /// Log-likelihood of the whole sequence
    pub log_likelihood: f64,
}

impl ForwardBackward {
    /// Posterior state probabilities, one row per time step.
    pub fn gamma(&self) -> Vec<Vec<f64>> {
        self.alpha
            .iter()
            .zip(&self.beta)
            .map(|(a, b)| {
                let mut row: Vec<f64> = a.iter().zip(b).map(|(x, y)| x * y).collect();
                let sum: f64 = row.iter().sum();
                if sum > MIN_MASS {
                    row.iter_mut().for_each(|v| *v /= sum);
                }
                row
            })
            .collect()
    }
}

impl GaussianHmm {
    /// Create an HMM whose state means come from a seeded k-means run on the data.
    ///
    /// Start probabilities and transition rows are uniform. Every state starts from
    /// the full-data covariance plus the configured diagonal floor.
    pub fn new_with_initialization<R: Rng>(
        observations: &FeatureMatrix,
        config: &RegimeModelConfig,
        rng: &mut R,
    ) -> RegimeResult<Self> {
        let num_states = config.state_count;
        validate_row_count(observations.n_rows(), num_states)?;

        let clusters = kmeans(
            observations.rows(),
            num_states,
            config.kmeans_max_iterations,
            config.kmeans_tolerance,
            rng,
        )?;

        let d = observations.n_features();
        let data_cov = observations.covariance();
        let mut covariance = DMatrix::from_fn(d, d, |i, j| data_cov[i][j]);
        for i in 0..d {
            covariance[(i, i)] += config.min_covariance;
        }

        let emissions = clusters
            .centroids
            .into_iter()
            .map(|mean| GaussianEmission::new(mean, covariance.clone()))
            .collect::<RegimeResult<Vec<_>>>()?;

        let uniform = 1.0 / num_states as f64;
        Ok(Self {
            num_states,
            initial_probs: vec![uniform; num_states],
            transition_matrix: vec![vec![uniform; num_states]; num_states],
            emissions,
            convergence_tolerance: config.convergence_tolerance,
            max_iterations: config.max_iterations,
            min_covariance: config.min_covariance,
        })
    }

    /// Fit the model to one observation sequence with the Baum-Welch algorithm.
    pub fn fit(&mut self, observations: &FeatureMatrix) -> RegimeResult<HmmFitReport> {
        self.check_dimension(observations)?;

        let mut prev_log_likelihood = f64::NEG_INFINITY;
        let mut iterations = 0;
        let mut converged = false;

        while iterations < self.max_iterations {
            iterations += 1;

            // E-step
            let fb = self.forward_backward(observations)?;

            // M-step
            self.update_parameters(observations, &fb)?;

            let gain = fb.log_likelihood - prev_log_likelihood;
            log::trace!(
                "baum-welch iteration {}: log-likelihood {:.6}, gain {:.3e}",
                iterations,
                fb.log_likelihood,
                gain
            );
            if gain < self.convergence_tolerance {
                converged = true;
                break;
            }
            prev_log_likelihood = fb.log_likelihood;
        }

        self.check_parameters()?;
        let log_likelihood = self.score(observations)?;
        log::debug!(
            "baum-welch finished after {} iterations (converged = {}), log-likelihood {:.4}",
            iterations,
            converged,
            log_likelihood
        );

        Ok(HmmFitReport {
            log_likelihood,
            iterations,
            converged,
        })
    }

    /// Log-likelihood of a sequence under the current parameters.
    pub fn score(&self, observations: &FeatureMatrix) -> RegimeResult<f64> {
        self.check_dimension(observations)?;
        Ok(self.forward_backward(observations)?.log_likelihood)
    }

    /// Posterior state probabilities of every time step.
    pub fn posteriors(&self, observations: &FeatureMatrix) -> RegimeResult<Vec<Vec<f64>>> {
        self.check_dimension(observations)?;
        Ok(self.forward_backward(observations)?.gamma())
    }

    /// Decode the most likely state sequence using the Viterbi algorithm.
    pub fn decode(&self, observations: &FeatureMatrix) -> RegimeResult<Vec<usize>> {
        self.check_dimension(observations)?;
        let t = observations.n_rows();
        let n = self.num_states;
        let log_trans: Vec<Vec<f64>> = self
            .transition_matrix
            .iter()
            .map(|row| row.iter().map(|p| p.ln()).collect())
            .collect();

        let mut delta = vec![vec![0.0; n]; t];
        let mut psi = vec![vec![0usize; n]; t];

        // Initialize
        for j in 0..n {
            delta[0][j] =
                self.initial_probs[j].ln() + self.emissions[j].log_pdf(observations.row(0));
        }

        // Recursion
        for i in 1..t {
            for j in 0..n {
                let mut max_val = f64::NEG_INFINITY;
                let mut max_idx = 0;
                for k in 0..n {
                    let val = delta[i - 1][k] + log_trans[k][j];
                    if val > max_val {
                        max_val = val;
                        max_idx = k;
                    }
                }
                delta[i][j] = max_val + self.emissions[j].log_pdf(observations.row(i));
                psi[i][j] = max_idx;
            }
        }

        // Find best final state
        let mut best_final_state = 0;
        for j in 1..n {
            if delta[t - 1][j] > delta[t - 1][best_final_state] {
                best_final_state = j;
            }
        }

        // Backtrack
        let mut path = vec![0; t];
        path[t - 1] = best_final_state;
        for i in (0..t - 1).rev() {
            path[i] = psi[i + 1][path[i + 1]];
        }

        Ok(path)
    }

    /// Mean vector of every state.
    pub fn state_means(&self) -> Vec<Vec<f64>> {
        self.emissions.iter().map(|e| e.mean.clone()).collect()
    }

    /// Feature dimension of the emissions.
    pub fn n_features(&self) -> usize {
        self.emissions.first().map(GaussianEmission::dim).unwrap_or(0)
    }

    /// Scaled forward-backward pass.
    pub fn forward_backward(&self, observations: &FeatureMatrix) -> RegimeResult<ForwardBackward> {
        let t = observations.n_rows();
        let n = self.num_states;

        let mut emission = vec![vec![0.0; n]; t];
        let mut shifts = vec![0.0; t];
        for i in 0..t {
            let row = observations.row(i);
            let log_probs: Vec<f64> = self.emissions.iter().map(|e| e.log_pdf(row)).collect();
            let shift = log_probs.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
            if !shift.is_finite() {
                return Err(RegimeError::numerical(
                    format!("emission log-density is {} at step {}", shift, i),
                    "forward_backward",
                ));
            }
            shifts[i] = shift;
            for j in 0..n {
                emission[i][j] = (log_probs[j] - shift).exp();
            }
        }

        // Forward pass
        let mut alpha = vec![vec![0.0; n]; t];
        let mut scale = vec![0.0; t];
        for i in 0..t {
            for j in 0..n {
                let prior = if i == 0 {
                    self.initial_probs[j]
                } else {
                    (0..n)
                        .map(|k| alpha[i - 1][k] * self.transition_matrix[k][j])
                        .sum()
                };
                alpha[i][j] = prior * emission[i][j];
            }

            let c: f64 = alpha[i].iter().sum();
            if !(c > MIN_MASS) || !c.is_finite() {
                return Err(RegimeError::numerical(
                    format!("forward normalizer vanished at step {}", i),
                    "forward_backward",
                ));
            }
            scale[i] = c;
            alpha[i].iter_mut().for_each(|a| *a /= c);
        }

        // Backward pass
        let mut beta = vec![vec![0.0; n]; t];
        beta[t - 1].iter_mut().for_each(|b| *b = 1.0);
        for i in (0..t - 1).rev() {
            for j in 0..n {
                let mut acc = 0.0;
                for k in 0..n {
                    acc += self.transition_matrix[j][k] * emission[i + 1][k] * beta[i + 1][k];
                }
                beta[i][j] = acc / scale[i + 1];
            }
        }

        let log_likelihood: f64 = scale
            .iter()
            .zip(&shifts)
            .map(|(c, shift)| c.ln() + shift)
            .sum();
        if !log_likelihood.is_finite() {
            return Err(RegimeError::numerical(
                "log-likelihood is not finite",
                "forward_backward",
            ));
        }

        Ok(ForwardBackward {
            alpha,
            beta,
            scale,
            emission,
            log_likelihood,
        })
    }

    /// M-step: re-estimate start, transition and emission parameters.
    fn update_parameters(
        &mut self,
        observations: &FeatureMatrix,
        fb: &ForwardBackward,
    ) -> RegimeResult<()> {
        let t = observations.n_rows();
        let n = self.num_states;
        let gamma = fb.gamma();

        // Expected transition counts, accumulated without storing the xi tensor
        let mut transition_counts = vec![vec![0.0; n]; n];
        let mut xi = vec![vec![0.0; n]; n];
        for i in 0..t - 1 {
            let mut xi_sum = 0.0;
            for j in 0..n {
                for k in 0..n {
                    xi[j][k] = fb.alpha[i][j]
                        * self.transition_matrix[j][k]
                        * fb.emission[i + 1][k]
                        * fb.beta[i + 1][k];
                    xi_sum += xi[j][k];
                }
            }
            if xi_sum > MIN_MASS {
                for j in 0..n {
                    for k in 0..n {
                        transition_counts[j][k] += xi[j][k] / xi_sum;
                    }
                }
            }
        }

        self.initial_probs = gamma[0].clone();

        // Rows with no expected outgoing transitions keep their previous values.
        for (row, counts) in self.transition_matrix.iter_mut().zip(&transition_counts) {
            let total: f64 = counts.iter().sum();
            if total > MIN_MASS {
                for (p, c) in row.iter_mut().zip(counts) {
                    *p = c / total;
                }
            }
        }

        let rows = observations.rows();
        for j in 0..n {
            if let Some((mean, cov)) = weighted_moments(rows, |i| gamma[i][j], self.min_covariance) {
                self.emissions[j] = GaussianEmission::new(mean, cov)?;
            }
        }

        Ok(())
    }

    fn check_dimension(&self, observations: &FeatureMatrix) -> RegimeResult<()> {
        let expected = self.n_features();
        if observations.n_features() != expected {
            return Err(RegimeError::DimensionMismatch {
                expected,
                actual: observations.n_features(),
            });
        }
        Ok(())
    }

    fn check_parameters(&self) -> RegimeResult<()> {
        let finite_probs = self.initial_probs.iter().all(|p| p.is_finite())
            && self
                .transition_matrix
                .iter()
                .all(|row| row.iter().all(|p| p.is_finite() && *p >= 0.0));
        let finite_means = self
            .emissions
            .iter()
            .all(|e| e.mean.iter().all(|m| m.is_finite()));
        if !(finite_probs && finite_means) {
            return Err(RegimeError::numerical(
                "fitted HMM parameters are not finite",
                "baum_welch",
            ));
        }
        Ok(())
    }
}
