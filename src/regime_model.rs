//! The regime model: fit, decode and query.
//!
//! A [`RegimeModel`] is built with a state count (and optionally a seed), fitted
//! once per feature matrix, and then queried any number of times. Queries take
//! `&self` and never mutate, so a fitted model can be shared between readers.
//! Statistical queries on an unfit model return neutral defaults instead of
//! failing: a uniform next-state distribution and a zero expected return.

use crate::{
    config::RegimeModelConfig,
    errors::{validate_state, RegimeError, RegimeResult},
    estimation::{EstimationAttempt, EstimationChain, EstimationMode, RegimeEstimate, StateDecoder},
    feature_matrix::{nearest_centroid, FeatureMatrix},
    regime_results::RegimeSnapshot,
};

/// Parameters of the last successful fit.
#[derive(Debug, Clone)]
struct FittedRegime {
    estimate: RegimeEstimate,
    n_features: usize,
    failures: Vec<EstimationAttempt>,
}

/// Hidden Markov regime model over a multivariate feature series.
///
/// # Example
/// ```rust
/// use market_regime::{FeatureMatrix, RegimeModel};
///
/// let rows: Vec<Vec<f64>> = (0..60)
///     .map(|i| {
///         let r = if (i / 15) % 2 == 0 { 0.01 } else { -0.01 };
///         vec![r + (i as f64).sin() * 1e-3, if r > 0.0 { 0.5 } else { -0.5 }]
///     })
///     .collect();
/// let x = FeatureMatrix::from_rows(rows).unwrap();
///
/// let mut model = RegimeModel::with_seed(2, 0).unwrap();
/// model.fit(&x).unwrap();
/// let states = model.predict_states(&x).unwrap();
/// let current = *states.last().unwrap();
///
/// let probs = model.next_state_probabilities(current).unwrap();
/// assert!((probs.iter().sum::<f64>() - 1.0).abs() < 1e-6);
/// let expected = model.expected_next_return(current, 0).unwrap();
/// assert!(expected.is_finite());
/// ```
#[derive(Debug)]
pub struct RegimeModel {
    config: RegimeModelConfig,
    chain: EstimationChain,
    fitted: Option<FittedRegime>,
}

impl RegimeModel {
    /// Model with `state_count` states and an entropy-seeded fit.
    pub fn new(state_count: usize) -> RegimeResult<Self> {
        Self::with_config(RegimeModelConfig::new(state_count))
    }

    /// Model with `state_count` states and reproducible fits.
    pub fn with_seed(state_count: usize, seed: u64) -> RegimeResult<Self> {
        Self::with_config(RegimeModelConfig::new(state_count).with_seed(seed))
    }

    /// Model from a full configuration and the standard estimation chain.
    pub fn with_config(config: RegimeModelConfig) -> RegimeResult<Self> {
        Self::with_chain(config, EstimationChain::standard())
    }

    /// Model with a custom estimation chain.
    pub fn with_chain(config: RegimeModelConfig, chain: EstimationChain) -> RegimeResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            chain,
            fitted: None,
        })
    }

    /// Estimate the transition matrix and state means from `x`.
    ///
    /// Every previously fitted field is discarded first, so a failed fit leaves the
    /// model unfit rather than holding parameters from an older matrix.
    pub fn fit(&mut self, x: &FeatureMatrix) -> RegimeResult<&mut Self> {
        self.fitted = None;

        let outcome = self.chain.run(x, &self.config)?;
        log::info!(
            "fitted {} states to {} rows x {} features using {} ({} tier(s) skipped)",
            self.config.state_count,
            x.n_rows(),
            x.n_features(),
            outcome.estimate.mode,
            outcome.failures.len()
        );

        self.fitted = Some(FittedRegime {
            estimate: outcome.estimate,
            n_features: x.n_features(),
            failures: outcome.failures,
        });
        Ok(self)
    }

    /// Most likely state of every row of `x`.
    ///
    /// - unfit model: all zeros;
    /// - primary tier: Viterbi decoding under the fitted HMM;
    /// - fallback tier, `x` identical to the fit matrix: the labels from fitting;
    /// - fallback tier otherwise: nearest state mean by Euclidean distance.
    pub fn predict_states(&self, x: &FeatureMatrix) -> RegimeResult<Vec<usize>> {
        let fitted = match &self.fitted {
            Some(fitted) => fitted,
            None => return Ok(vec![0; x.n_rows()]),
        };
        if x.n_features() != fitted.n_features {
            return Err(RegimeError::DimensionMismatch {
                expected: fitted.n_features,
                actual: x.n_features(),
            });
        }

        match &fitted.estimate.decoder {
            StateDecoder::Viterbi(hmm) => hmm.decode(x),
            StateDecoder::Cached {
                fingerprint,
                labels,
            } if *fingerprint == x.fingerprint() => Ok(labels.clone()),
            StateDecoder::Cached { .. } => {
                let means = &fitted.estimate.state_means;
                Ok(x.rows().iter().map(|row| nearest_centroid(row, means)).collect())
            }
        }
    }

    /// Distribution of the next state given `current_state`.
    ///
    /// Uniform when the model is unfit.
    pub fn next_state_probabilities(&self, current_state: usize) -> RegimeResult<Vec<f64>> {
        let k = self.config.state_count;
        validate_state(current_state, k)?;
        Ok(match &self.fitted {
            Some(fitted) => fitted.estimate.transition_matrix[current_state].clone(),
            None => vec![1.0 / k as f64; k],
        })
    }

    /// Most probable next state; ties go to the lowest index.
    ///
    /// Returns `current_state` when the model is unfit.
    pub fn predict_next_state(&self, current_state: usize) -> RegimeResult<usize> {
        validate_state(current_state, self.config.state_count)?;
        let fitted = match &self.fitted {
            Some(fitted) => fitted,
            None => return Ok(current_state),
        };
        let row = &fitted.estimate.transition_matrix[current_state];
        let mut best = 0;
        for (j, &p) in row.iter().enumerate() {
            if p > row[best] {
                best = j;
            }
        }
        Ok(best)
    }

    /// Probability-weighted mean of feature `return_dimension` over next states.
    ///
    /// Zero when the model is unfit. An out-of-range `return_dimension` on a fitted
    /// model is a [`RegimeError::FeatureOutOfRange`].
    pub fn expected_next_return(
        &self,
        current_state: usize,
        return_dimension: usize,
    ) -> RegimeResult<f64> {
        let probs = self.next_state_probabilities(current_state)?;
        let fitted = match &self.fitted {
            Some(fitted) => fitted,
            None => return Ok(0.0),
        };
        if return_dimension >= fitted.n_features {
            return Err(RegimeError::FeatureOutOfRange {
                index: return_dimension,
                dimension: fitted.n_features,
            });
        }
        Ok(probs
            .iter()
            .zip(&fitted.estimate.state_means)
            .map(|(p, mean)| p * mean[return_dimension])
            .sum())
    }

    /// Mean emission vector of `state`, if fitted.
    pub fn state_emission_mean(&self, state: usize) -> Option<&[f64]> {
        self.fitted
            .as_ref()
            .and_then(|f| f.estimate.state_means.get(state))
            .map(Vec::as_slice)
    }

    /// Decode `x` and package the outputs a signal deriver consumes.
    pub fn snapshot(&self, x: &FeatureMatrix, return_dimension: usize) -> RegimeResult<RegimeSnapshot> {
        let states = self.predict_states(x)?;
        let current_state = states.last().copied().unwrap_or(0);

        Ok(RegimeSnapshot {
            next_state_probabilities: self.next_state_probabilities(current_state)?,
            expected_next_return: self.expected_next_return(current_state, return_dimension)?,
            state_means: self.state_means().map(<[_]>::to_vec).unwrap_or_default(),
            estimation_mode: self.estimation_mode(),
            current_state,
            return_dimension,
            states,
        })
    }

    /// Number of hidden states.
    pub fn state_count(&self) -> usize {
        self.config.state_count
    }

    /// Model configuration.
    pub fn config(&self) -> &RegimeModelConfig {
        &self.config
    }

    /// Whether a fit has succeeded.
    pub fn is_fitted(&self) -> bool {
        self.fitted.is_some()
    }

    /// Tier that produced the current parameters.
    pub fn estimation_mode(&self) -> Option<EstimationMode> {
        self.fitted.as_ref().map(|f| f.estimate.mode)
    }

    /// Fitted `k × k` transition matrix.
    pub fn transition_matrix(&self) -> Option<&[Vec<f64>]> {
        self.fitted
            .as_ref()
            .map(|f| f.estimate.transition_matrix.as_slice())
    }

    /// Fitted `k × d` state means.
    pub fn state_means(&self) -> Option<&[Vec<f64>]> {
        self.fitted.as_ref().map(|f| f.estimate.state_means.as_slice())
    }

    /// Labels cached by a fallback tier for its fit matrix.
    pub fn last_decoded_states(&self) -> Option<&[usize]> {
        self.fitted.as_ref().and_then(|f| f.estimate.decoded_states())
    }

    /// Log-likelihood of the fit matrix under the primary or mixture tier.
    pub fn log_likelihood(&self) -> Option<f64> {
        self.fitted.as_ref().and_then(|f| f.estimate.log_likelihood)
    }

    /// Tiers that failed during the last successful fit, in order.
    pub fn estimation_attempts(&self) -> &[EstimationAttempt] {
        self.fitted
            .as_ref()
            .map(|f| f.failures.as_slice())
            .unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::estimation::{CentroidClustering, MixtureClustering};
    use assert_approx_eq::assert_approx_eq;

    fn blocks(n: usize, block: usize) -> FeatureMatrix {
        let rows = (0..n)
            .map(|i| {
                let up = (i / block) % 2 == 0;
                let r = if up { 0.01 } else { -0.01 } + ((i as f64) * 0.9).sin() * 0.002;
                vec![r, if up { 0.5 } else { -0.5 }]
            })
            .collect();
        FeatureMatrix::from_rows(rows).unwrap()
    }

    fn cluster_only(k: usize) -> RegimeModel {
        RegimeModel::with_chain(
            RegimeModelConfig::new(k).with_seed(4),
            EstimationChain::new(vec![Box::new(CentroidClustering)]),
        )
        .unwrap()
    }

    #[test]
    fn test_rejects_zero_states() {
        assert!(matches!(
            RegimeModel::new(0),
            Err(RegimeError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn test_unfit_defaults() {
        let model = RegimeModel::new(4).unwrap();
        assert!(!model.is_fitted());
        assert_eq!(model.next_state_probabilities(2).unwrap(), vec![0.25; 4]);
        assert_eq!(model.expected_next_return(2, 0).unwrap(), 0.0);
        assert_eq!(model.expected_next_return(2, 99).unwrap(), 0.0);
        assert_eq!(model.predict_next_state(3).unwrap(), 3);
        assert!(model.state_emission_mean(0).is_none());
        assert!(model.estimation_mode().is_none());
        assert!(model.estimation_attempts().is_empty());

        let x = blocks(7, 3);
        assert_eq!(model.predict_states(&x).unwrap(), vec![0; 7]);
    }

    #[test]
    fn test_state_out_of_range() {
        let model = RegimeModel::new(2).unwrap();
        assert_eq!(
            model.next_state_probabilities(2),
            Err(RegimeError::StateOutOfRange {
                state: 2,
                state_count: 2
            })
        );
        assert!(model.expected_next_return(5, 0).is_err());
        assert!(model.predict_next_state(2).is_err());
    }

    #[test]
    fn test_primary_fit_and_queries() {
        let x = blocks(80, 20);
        let mut model = RegimeModel::with_seed(2, 0).unwrap();
        model.fit(&x).unwrap();

        assert_eq!(model.estimation_mode(), Some(EstimationMode::Primary));
        assert!(model.last_decoded_states().is_none());
        assert!(model.log_likelihood().unwrap().is_finite());

        let states = model.predict_states(&x).unwrap();
        assert_eq!(states.len(), 80);
        let bull = states[0];
        let bear = states[20];
        assert_ne!(bull, bear);

        let mean = model.state_emission_mean(bull).unwrap();
        assert!(mean[0] > 0.0 && mean[1] > 0.0);

        // Persistent regimes: the likeliest next state is the current one.
        assert_eq!(model.predict_next_state(bull).unwrap(), bull);
        assert!(model.expected_next_return(bull, 0).unwrap() > 0.0);
        assert!(model.expected_next_return(bear, 0).unwrap() < 0.0);
    }

    #[test]
    fn test_expected_return_is_dot_product() {
        let x = blocks(40, 10);
        let mut model = cluster_only(2);
        model.fit(&x).unwrap();

        let probs = model.next_state_probabilities(0).unwrap();
        let means = model.state_means().unwrap();
        let manual: f64 = probs.iter().zip(means).map(|(p, m)| p * m[1]).sum();
        assert_approx_eq!(model.expected_next_return(0, 1).unwrap(), manual, 1e-15);

        assert_eq!(
            model.expected_next_return(0, 2),
            Err(RegimeError::FeatureOutOfRange {
                index: 2,
                dimension: 2
            })
        );
    }

    #[test]
    fn test_fallback_cache_keyed_on_content() {
        let x = blocks(40, 10);
        let mut model = cluster_only(2);
        model.fit(&x).unwrap();
        assert_eq!(model.estimation_mode(), Some(EstimationMode::FallbackCluster));

        let cached = model.last_decoded_states().unwrap().to_vec();
        assert_eq!(model.predict_states(&x).unwrap(), cached);

        // Same length, different content: classified by nearest mean, not cache.
        let flipped = FeatureMatrix::from_rows(
            x.rows().iter().map(|r| vec![-r[0], -r[1]]).collect(),
        )
        .unwrap();
        let relabeled = model.predict_states(&flipped).unwrap();
        assert_eq!(relabeled.len(), 40);
        for (a, b) in relabeled.iter().zip(&cached) {
            assert_ne!(a, b);
        }
    }

    #[test]
    fn test_fallback_nearest_mean_for_new_data() {
        let x = blocks(40, 10);
        let mut model = cluster_only(2);
        model.fit(&x).unwrap();

        let states = model.predict_states(&x).unwrap();
        let up_state = states[0];
        let fresh = FeatureMatrix::from_rows(vec![vec![0.012, 0.5], vec![-0.009, -0.5], vec![0.01, 0.5]]).unwrap();
        let labels = model.predict_states(&fresh).unwrap();
        assert_eq!(labels[0], up_state);
        assert_ne!(labels[1], up_state);
        assert_eq!(labels[2], up_state);
    }

    #[test]
    fn test_predict_rejects_wrong_dimension() {
        let mut model = cluster_only(2);
        model.fit(&blocks(20, 5)).unwrap();
        let narrow = FeatureMatrix::from_rows(vec![vec![0.1]]).unwrap();
        assert_eq!(
            model.predict_states(&narrow),
            Err(RegimeError::DimensionMismatch {
                expected: 2,
                actual: 1
            })
        );
    }

    #[test]
    fn test_failed_fit_clears_previous_parameters() {
        let mut model = RegimeModel::with_chain(
            RegimeModelConfig::new(3).with_seed(1),
            EstimationChain::new(vec![Box::new(MixtureClustering), Box::new(CentroidClustering)]),
        )
        .unwrap();
        model.fit(&blocks(30, 10)).unwrap();
        assert!(model.is_fitted());

        let tiny = FeatureMatrix::from_rows(vec![vec![0.0, 0.0], vec![1.0, 1.0]]).unwrap();
        assert!(matches!(
            model.fit(&tiny),
            Err(RegimeError::EstimationFailed { .. })
        ));
        assert!(!model.is_fitted());
        assert_eq!(model.next_state_probabilities(0).unwrap(), vec![1.0 / 3.0; 3]);
    }

    #[test]
    fn test_snapshot() {
        let x = blocks(60, 15);
        let mut model = RegimeModel::with_seed(2, 0).unwrap();
        model.fit(&x).unwrap();
        let snapshot = model.snapshot(&x, 0).unwrap();

        assert_eq!(snapshot.states.len(), 60);
        assert_eq!(snapshot.current_state, *snapshot.states.last().unwrap());
        assert_eq!(snapshot.state_means.len(), 2);
        assert_eq!(snapshot.estimation_mode, Some(EstimationMode::Primary));
        assert_approx_eq!(snapshot.next_state_probabilities.iter().sum::<f64>(), 1.0, 1e-6);
        assert_eq!(snapshot.bullish_state(), Some(snapshot.states[0]));
    }

    #[test]
    fn test_model_is_shareable_between_threads() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<RegimeModel>();
    }
}
