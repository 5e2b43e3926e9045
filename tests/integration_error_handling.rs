//! Integration tests for invalid inputs and failure paths
//!
//! Malformed input is a caller error and surfaces immediately; numerical trouble
//! inside one estimator only moves the fit to the next tier.

use market_regime::{
    errors::RegimeError, CentroidClustering, EstimationChain, EstimationMode, EstimationStrategy,
    FeatureMatrix, MixtureClustering, RegimeEstimate, RegimeModel, RegimeModelConfig, RegimeResult,
    SeededRng,
};

fn small_matrix() -> FeatureMatrix {
    FeatureMatrix::from_rows(vec![
        vec![0.01, 0.5],
        vec![-0.02, -0.5],
        vec![0.015, 0.5],
        vec![-0.01, -0.5],
    ])
    .unwrap()
}

/// Test scenario: malformed feature matrices are rejected at construction
#[test]
fn test_malformed_matrices_rejected() {
    assert!(matches!(
        FeatureMatrix::from_rows(vec![]),
        Err(RegimeError::EmptyInput { .. })
    ));
    assert!(matches!(
        FeatureMatrix::from_rows(vec![vec![], vec![]]),
        Err(RegimeError::EmptyInput { .. })
    ));
    assert_eq!(
        FeatureMatrix::from_rows(vec![vec![0.1, 0.2], vec![0.3]]).unwrap_err(),
        RegimeError::DimensionMismatch {
            expected: 2,
            actual: 1
        }
    );
    assert!(matches!(
        FeatureMatrix::from_rows(vec![vec![0.1, 0.2], vec![0.3, f64::NAN]]),
        Err(RegimeError::NonFiniteValue { row: 1, column: 1, .. })
    ));
    assert!(matches!(
        FeatureMatrix::from_rows(vec![vec![f64::INFINITY]]),
        Err(RegimeError::NonFiniteValue { row: 0, column: 0, .. })
    ));
}

/// Test scenario: invalid model configuration
#[test]
fn test_invalid_configuration_rejected() {
    assert!(matches!(
        RegimeModel::new(0),
        Err(RegimeError::InvalidParameter { .. })
    ));

    let mut config = RegimeModelConfig::new(2);
    config.convergence_tolerance = -1.0;
    let err = RegimeModel::with_config(config).unwrap_err();
    assert!(err.is_contract_violation());
}

/// Test scenario: out-of-range indices on a fitted model
#[test]
fn test_out_of_range_queries() {
    let x = small_matrix();
    let mut model = RegimeModel::with_seed(2, 0).unwrap();
    model.fit(&x).unwrap();

    assert_eq!(
        model.next_state_probabilities(7).unwrap_err(),
        RegimeError::StateOutOfRange {
            state: 7,
            state_count: 2
        }
    );
    assert!(matches!(
        model.expected_next_return(0, 2),
        Err(RegimeError::FeatureOutOfRange { index: 2, dimension: 2 })
    ));
    assert!(matches!(
        model.predict_states(&FeatureMatrix::from_rows(vec![vec![0.0; 3]]).unwrap()),
        Err(RegimeError::DimensionMismatch { expected: 2, actual: 3 })
    ));
}

/// Test scenario: every configured tier fails
#[test]
fn test_exhausted_chain_reports_every_attempt() {
    let chain = EstimationChain::new(vec![
        Box::new(MixtureClustering),
        Box::new(CentroidClustering),
    ]);
    let mut model =
        RegimeModel::with_chain(RegimeModelConfig::new(6).with_seed(1), chain).unwrap();

    match model.fit(&small_matrix()) {
        Err(RegimeError::EstimationFailed { attempts }) => {
            assert_eq!(attempts.len(), 2);
            assert!(attempts[0].starts_with("gaussian_mixture"));
            assert!(attempts[1].starts_with("kmeans"));
        }
        other => panic!("Expected EstimationFailed, got {:?}", other),
    }
    assert!(!model.is_fitted());
}

/// Always produces a transition matrix of the wrong shape.
#[derive(Debug)]
struct Misshapen;

impl EstimationStrategy for Misshapen {
    fn mode(&self) -> EstimationMode {
        EstimationMode::FallbackCluster
    }

    fn estimate(
        &self,
        x: &FeatureMatrix,
        _config: &RegimeModelConfig,
        _rng: &SeededRng,
    ) -> RegimeResult<RegimeEstimate> {
        let means = vec![vec![0.0; x.n_features()]; 1];
        Ok(RegimeEstimate::from_labels(
            self.mode(),
            x,
            vec![0; x.n_rows()],
            means,
            None,
        ))
    }
}

/// Test scenario: an estimate that fails validation falls through to the next tier
#[test]
fn test_invalid_estimate_is_not_accepted() {
    let chain = EstimationChain::new(vec![Box::new(Misshapen), Box::new(CentroidClustering)]);
    let mut model =
        RegimeModel::with_chain(RegimeModelConfig::new(2).with_seed(2), chain).unwrap();
    model.fit(&small_matrix()).unwrap();

    assert_eq!(model.estimation_mode(), Some(EstimationMode::FallbackCluster));
    let attempts = model.estimation_attempts();
    assert_eq!(attempts.len(), 1);
    assert!(matches!(attempts[0].error, RegimeError::NumericalError { .. }));
    assert_eq!(model.transition_matrix().unwrap().len(), 2);
}

/// Test scenario: fallback tiers degrade without raising to the caller
#[test]
fn test_standard_chain_never_fails_on_valid_input() {
    let single_row = FeatureMatrix::from_rows(vec![vec![0.02, -0.1]]).unwrap();
    for k in 1..=3 {
        let mut model = RegimeModel::with_seed(k, 9).unwrap();
        model.fit(&single_row).unwrap();
        assert_eq!(model.predict_states(&single_row).unwrap().len(), 1);
        if k > 1 {
            assert_eq!(model.estimation_mode(), Some(EstimationMode::FallbackRandom));
        }
    }
}
