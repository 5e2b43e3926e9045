//! Tiered parameter estimation.
//!
//! Estimators implement [`EstimationStrategy`] and are tried in order by an
//! [`EstimationChain`]. The first one that succeeds supplies the model
//! parameters. The standard chain is:
//!
//! 1. [`PrimaryHmm`]: Baum-Welch on a full-covariance Gaussian HMM
//! 2. [`MixtureClustering`]: Gaussian mixture labels plus empirical transitions
//! 3. [`CentroidClustering`]: k-means labels plus empirical transitions
//! 4. [`RandomAssignment`]: uniformly random labels and zero means
//!
//! The last tier only needs a non-empty matrix and at least one state, so the
//! standard chain fails only on malformed input.

use crate::{
    clustering::{group_means, kmeans, GaussianMixture},
    config::RegimeModelConfig,
    errors::{RegimeError, RegimeResult},
    feature_matrix::FeatureMatrix,
    hmm_core::GaussianHmm,
    seeded_rng::{streams, SeededRng},
};
use rand::Rng;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::fmt;

/// Tolerance for checking that a transition row sums to one.
const ROW_SUM_TOLERANCE: f64 = 1e-6;

/// Which estimation tier produced the current parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum EstimationMode {
    /// Gaussian HMM fitted by expectation-maximization
    Primary,
    /// Gaussian mixture clustering with empirical transitions
    FallbackMixture,
    /// Centroid clustering with empirical transitions
    FallbackCluster,
    /// Random labels, zero means, empirical transitions
    FallbackRandom,
}

impl EstimationMode {
    /// Whether the parameters came from a fallback tier.
    pub fn is_fallback(&self) -> bool {
        !matches!(self, EstimationMode::Primary)
    }

    /// Short name for logs and error messages.
    pub fn name(&self) -> &'static str {
        match self {
            EstimationMode::Primary => "gaussian_hmm",
            EstimationMode::FallbackMixture => "gaussian_mixture",
            EstimationMode::FallbackCluster => "kmeans",
            EstimationMode::FallbackRandom => "random_assignment",
        }
    }
}

impl fmt::Display for EstimationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How a fitted model maps a feature matrix to state labels.
#[derive(Debug, Clone)]
pub enum StateDecoder {
    /// Viterbi decoding under the fitted HMM.
    Viterbi(GaussianHmm),
    /// Labels produced while fitting, valid only for the exact fit matrix.
    Cached {
        /// Fingerprint of the matrix the labels belong to
        fingerprint: u64,
        /// One label per row of that matrix
        labels: Vec<usize>,
    },
}

/// Parameters produced by one estimation tier.
#[derive(Debug, Clone)]
pub struct RegimeEstimate {
    /// Tier that produced these parameters
    pub mode: EstimationMode,
    /// Row-stochastic `k × k` transition matrix
    pub transition_matrix: Vec<Vec<f64>>,
    /// `k × d` per-state mean emission vectors
    pub state_means: Vec<Vec<f64>>,
    /// State decoder for `predict_states`
    pub decoder: StateDecoder,
    /// Log-likelihood of the fit matrix, when the tier has one
    pub log_likelihood: Option<f64>,
}

impl RegimeEstimate {
    /// Build a fallback estimate from per-row labels.
    ///
    /// The transition matrix is the empirical one of the label sequence and the
    /// labels are cached against the matrix fingerprint.
    pub fn from_labels(
        mode: EstimationMode,
        x: &FeatureMatrix,
        labels: Vec<usize>,
        state_means: Vec<Vec<f64>>,
        log_likelihood: Option<f64>,
    ) -> Self {
        let k = state_means.len();
        Self {
            mode,
            transition_matrix: empirical_transition_matrix(&labels, k),
            state_means,
            decoder: StateDecoder::Cached {
                fingerprint: x.fingerprint(),
                labels,
            },
            log_likelihood,
        }
    }

    /// Labels decoded while fitting, for fallback tiers.
    pub fn decoded_states(&self) -> Option<&[usize]> {
        match &self.decoder {
            StateDecoder::Cached { labels, .. } => Some(labels),
            StateDecoder::Viterbi(_) => None,
        }
    }

    /// Check the shape and stochasticity of the parameters.
    pub fn validate(&self, state_count: usize, n_features: usize, n_rows: usize) -> RegimeResult<()> {
        let operation = self.mode.name();
        if self.transition_matrix.len() != state_count
            || self.transition_matrix.iter().any(|row| row.len() != state_count)
        {
            return Err(RegimeError::numerical(
                format!("transition matrix is not {0}x{0}", state_count),
                operation,
            ));
        }
        for (i, row) in self.transition_matrix.iter().enumerate() {
            let sum: f64 = row.iter().sum();
            if row.iter().any(|p| !p.is_finite() || *p < 0.0 || *p > 1.0)
                || (sum - 1.0).abs() > ROW_SUM_TOLERANCE
            {
                return Err(RegimeError::numerical(
                    format!("transition row {} is not a distribution (sum {})", i, sum),
                    operation,
                ));
            }
        }
        if self.state_means.len() != state_count
            || self
                .state_means
                .iter()
                .any(|m| m.len() != n_features || m.iter().any(|v| !v.is_finite()))
        {
            return Err(RegimeError::numerical(
                format!("state means are not a finite {}x{} matrix", state_count, n_features),
                operation,
            ));
        }
        if let StateDecoder::Cached { labels, .. } = &self.decoder {
            if labels.len() != n_rows || labels.iter().any(|&s| s >= state_count) {
                return Err(RegimeError::numerical(
                    "cached labels do not cover the fit matrix",
                    operation,
                ));
            }
        }
        Ok(())
    }
}

/// Empirical transition matrix of a label sequence.
///
/// Counts every consecutive pair `(labels[t], labels[t + 1])` and divides each
/// row by its total. Rows with no outgoing transitions become uniform.
///
/// # Example
/// ```rust
/// use market_regime::estimation::empirical_transition_matrix;
///
/// let a = empirical_transition_matrix(&[0, 0, 1, 0], 3);
/// assert_eq!(a[0], vec![0.5, 0.5, 0.0]);
/// assert_eq!(a[1], vec![1.0, 0.0, 0.0]);
/// assert_eq!(a[2], vec![1.0 / 3.0; 3]);
/// ```
pub fn empirical_transition_matrix(labels: &[usize], k: usize) -> Vec<Vec<f64>> {
    let mut counts = vec![vec![0.0; k]; k];
    for pair in labels.windows(2) {
        counts[pair[0]][pair[1]] += 1.0;
    }
    for row in counts.iter_mut() {
        let total: f64 = row.iter().sum();
        if total > 0.0 {
            row.iter_mut().for_each(|c| *c /= total);
        } else {
            row.iter_mut().for_each(|c| *c = 1.0 / k as f64);
        }
    }
    counts
}

/// One way of turning a feature matrix into regime parameters.
pub trait EstimationStrategy: fmt::Debug + Send + Sync {
    /// Mode recorded when this strategy succeeds.
    fn mode(&self) -> EstimationMode;

    /// Estimate parameters for `config.state_count` states.
    ///
    /// Randomized steps must draw from `rng`, never from an unseeded source.
    fn estimate(
        &self,
        x: &FeatureMatrix,
        config: &RegimeModelConfig,
        rng: &SeededRng,
    ) -> RegimeResult<RegimeEstimate>;
}

/// Gaussian HMM with full covariance, fitted by Baum-Welch.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrimaryHmm;

impl EstimationStrategy for PrimaryHmm {
    fn mode(&self) -> EstimationMode {
        EstimationMode::Primary
    }

    fn estimate(
        &self,
        x: &FeatureMatrix,
        config: &RegimeModelConfig,
        rng: &SeededRng,
    ) -> RegimeResult<RegimeEstimate> {
        let mut stream = rng.stream(streams::PRIMARY);
        let mut hmm = GaussianHmm::new_with_initialization(x, config, &mut stream)?;
        let report = hmm.fit(x)?;

        Ok(RegimeEstimate {
            mode: self.mode(),
            transition_matrix: hmm.transition_matrix.clone(),
            state_means: hmm.state_means(),
            decoder: StateDecoder::Viterbi(hmm),
            log_likelihood: Some(report.log_likelihood),
        })
    }
}

/// Gaussian mixture clustering; temporal order only enters through the
/// empirical transition matrix.
#[derive(Debug, Clone, Copy, Default)]
pub struct MixtureClustering;

impl EstimationStrategy for MixtureClustering {
    fn mode(&self) -> EstimationMode {
        EstimationMode::FallbackMixture
    }

    fn estimate(
        &self,
        x: &FeatureMatrix,
        config: &RegimeModelConfig,
        rng: &SeededRng,
    ) -> RegimeResult<RegimeEstimate> {
        let mut stream = rng.stream(streams::MIXTURE);
        let gmm = GaussianMixture::fit(
            x.rows(),
            config.state_count,
            config.mixture_max_iterations,
            config.mixture_tolerance,
            config.mixture_regularization,
            &mut stream,
        )?;
        let labels = gmm.predict(x.rows());
        let log_likelihood = gmm.mean_log_likelihood * x.n_rows() as f64;

        Ok(RegimeEstimate::from_labels(
            self.mode(),
            x,
            labels,
            gmm.means(),
            Some(log_likelihood),
        ))
    }
}

/// k-means clustering; state means are the empirical group means.
#[derive(Debug, Clone, Copy, Default)]
pub struct CentroidClustering;

impl EstimationStrategy for CentroidClustering {
    fn mode(&self) -> EstimationMode {
        EstimationMode::FallbackCluster
    }

    fn estimate(
        &self,
        x: &FeatureMatrix,
        config: &RegimeModelConfig,
        rng: &SeededRng,
    ) -> RegimeResult<RegimeEstimate> {
        let mut stream = rng.stream(streams::CLUSTER);
        let fit = kmeans(
            x.rows(),
            config.state_count,
            config.kmeans_max_iterations,
            config.kmeans_tolerance,
            &mut stream,
        )?;
        let means = fit.group_means(x.rows());

        Ok(RegimeEstimate::from_labels(self.mode(), x, fit.labels, means, None))
    }
}

/// Uniformly random labels with zero state means. Carries no signal.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomAssignment;

impl EstimationStrategy for RandomAssignment {
    fn mode(&self) -> EstimationMode {
        EstimationMode::FallbackRandom
    }

    fn estimate(
        &self,
        x: &FeatureMatrix,
        config: &RegimeModelConfig,
        rng: &SeededRng,
    ) -> RegimeResult<RegimeEstimate> {
        let k = config.state_count;
        let mut stream = rng.stream(streams::RANDOM);
        let labels: Vec<usize> = (0..x.n_rows()).map(|_| stream.gen_range(0..k)).collect();
        let means = vec![vec![0.0; x.n_features()]; k];

        Ok(RegimeEstimate::from_labels(self.mode(), x, labels, means, None))
    }
}

/// A tier that failed during a fit, with its error.
#[derive(Debug, Clone, PartialEq)]
pub struct EstimationAttempt {
    /// Tier that failed
    pub mode: EstimationMode,
    /// Why it failed
    pub error: RegimeError,
}

/// Successful chain run: the estimate and the tiers skipped on the way.
#[derive(Debug, Clone)]
pub struct ChainOutcome {
    /// Parameters of the first tier that succeeded
    pub estimate: RegimeEstimate,
    /// Earlier tiers that failed, in order
    pub failures: Vec<EstimationAttempt>,
}

/// Ordered list of estimation strategies.
#[derive(Debug)]
pub struct EstimationChain {
    strategies: Vec<Box<dyn EstimationStrategy>>,
}

impl Default for EstimationChain {
    fn default() -> Self {
        Self::standard()
    }
}

impl EstimationChain {
    /// Primary HMM, then mixture, centroid and random fallbacks.
    pub fn standard() -> Self {
        Self::new(vec![
            Box::new(PrimaryHmm),
            Box::new(MixtureClustering),
            Box::new(CentroidClustering),
            Box::new(RandomAssignment),
        ])
    }

    /// Chain over the given strategies, tried in order.
    pub fn new(strategies: Vec<Box<dyn EstimationStrategy>>) -> Self {
        Self { strategies }
    }

    /// Modes of the strategies, in order.
    pub fn modes(&self) -> Vec<EstimationMode> {
        self.strategies.iter().map(|s| s.mode()).collect()
    }

    /// Run the strategies in order and return the first success.
    ///
    /// Tier failures are logged and collected. A contract violation from a tier is
    /// returned at once. When every tier fails the result is
    /// [`RegimeError::EstimationFailed`].
    pub fn run(&self, x: &FeatureMatrix, config: &RegimeModelConfig) -> RegimeResult<ChainOutcome> {
        let rng = SeededRng::new(config.seed);
        let mut failures = Vec::new();

        for strategy in &self.strategies {
            let mode = strategy.mode();
            let result = strategy
                .estimate(x, config, &rng)
                .and_then(|estimate| {
                    estimate.validate(config.state_count, x.n_features(), x.n_rows())?;
                    Ok(estimate)
                });

            match result {
                Ok(estimate) => {
                    log::debug!("regime parameters estimated by {}", mode);
                    return Ok(ChainOutcome { estimate, failures });
                }
                Err(error) if error.is_contract_violation() => return Err(error),
                Err(error) => {
                    log::info!("{} estimation failed, trying next tier: {}", mode, error);
                    failures.push(EstimationAttempt { mode, error });
                }
            }
        }

        log::warn!(
            "every estimation tier failed on a {}x{} feature matrix",
            x.n_rows(),
            x.n_features()
        );
        Err(RegimeError::EstimationFailed {
            attempts: failures
                .iter()
                .map(|a| format!("{}: {}", a.mode, a.error))
                .collect(),
        })
    }
}
