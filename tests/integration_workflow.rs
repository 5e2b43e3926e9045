//! End-to-end workflow tests: synthetic prices and sentiment through fit, decode,
//! query and signal derivation.

use assert_approx_eq::assert_approx_eq;
use market_regime::{
    EstimationMode, FeatureMatrix, RegimeModel, RegimeModelConfig, SignalDeriver, TradingSignal,
};
use rand::prelude::*;
use rand_distr::Normal;

/// Seeded random-walk prices, their returns, and a sentiment proxy that is +0.5
/// on up days and -0.5 otherwise.
fn random_walk_features(n: usize, seed: u64) -> FeatureMatrix {
    let mut rng = StdRng::seed_from_u64(seed);
    let noise = Normal::new(0.0, 1.0).unwrap();

    let mut prices = Vec::with_capacity(n + 1);
    let mut price = 100.0;
    prices.push(price);
    for _ in 0..n {
        price += noise.sample(&mut rng);
        prices.push(price);
    }

    let rows = prices
        .windows(2)
        .map(|w| {
            let ret = w[1] / w[0] - 1.0;
            vec![ret, if ret > 0.0 { 0.5 } else { -0.5 }]
        })
        .collect();
    FeatureMatrix::from_rows(rows).unwrap()
}

/// Alternating bull and bear blocks with distinct return levels.
fn regime_switching_features(seed: u64) -> FeatureMatrix {
    let mut rng = StdRng::seed_from_u64(seed);
    let noise = Normal::new(0.0, 0.003).unwrap();
    let rows = (0..200)
        .map(|i| {
            let drift = if (i / 50) % 2 == 0 { 0.01 } else { -0.01 };
            let ret = drift + noise.sample(&mut rng);
            vec![ret, if drift > 0.0 { 0.5 } else { -0.5 }]
        })
        .collect();
    FeatureMatrix::from_rows(rows).unwrap()
}

/// Test scenario: two-state model on a seeded random walk with correlated sentiment
#[test]
fn test_random_walk_two_state_pipeline() {
    let x = random_walk_features(100, 0);
    assert_eq!(x.n_rows(), 100);
    assert_eq!(x.n_features(), 2);

    let mut model = RegimeModel::with_seed(2, 0).unwrap();
    model.fit(&x).unwrap();

    let states = model.predict_states(&x).unwrap();
    assert_eq!(states.len(), 100);
    assert!(states.iter().all(|&s| s == 0 || s == 1));

    for label in 0..2 {
        let probs = model.next_state_probabilities(label).unwrap();
        assert_eq!(probs.len(), 2);
        assert_approx_eq!(probs.iter().sum::<f64>(), 1.0, 1e-6);
    }
}

/// Test scenario: distinct regimes are recovered and the signal follows the current one
#[test]
fn test_regime_switching_series_drives_signal() {
    let x = regime_switching_features(7);
    let mut model = RegimeModel::with_seed(2, 7).unwrap();
    model.fit(&x).unwrap();
    assert_eq!(model.estimation_mode(), Some(EstimationMode::Primary));

    let snapshot = model.snapshot(&x, 0).unwrap();
    assert_eq!(snapshot.regime_changes(), 3);

    // The series ends in a bear block (rows 150..200).
    let bull = snapshot.bullish_state().unwrap();
    assert_ne!(snapshot.current_state, bull);
    assert!(snapshot.expected_next_return < -0.001);

    let decision = SignalDeriver::default().derive(&snapshot);
    assert_eq!(decision.signal, TradingSignal::Sell);
    assert!(decision.bullish_probability < 0.4);
}

/// Test scenario: identical seeds give identical fits
#[test]
fn test_seeded_fits_are_reproducible() {
    let x = random_walk_features(120, 3);

    let mut a = RegimeModel::with_seed(3, 11).unwrap();
    let mut b = RegimeModel::with_seed(3, 11).unwrap();
    a.fit(&x).unwrap();
    b.fit(&x).unwrap();

    assert_eq!(a.estimation_mode(), b.estimation_mode());
    assert_eq!(a.transition_matrix(), b.transition_matrix());
    assert_eq!(a.state_means(), b.state_means());
    assert_eq!(a.predict_states(&x).unwrap(), b.predict_states(&x).unwrap());
}

/// Test scenario: refitting replaces every fitted field
#[test]
fn test_refit_replaces_state() {
    let first = random_walk_features(100, 1);
    let second = regime_switching_features(2);

    let mut model = RegimeModel::with_seed(2, 5).unwrap();
    model.fit(&first).unwrap();
    let first_means = model.state_means().unwrap().to_vec();

    model.fit(&second).unwrap();
    let mut fresh = RegimeModel::with_seed(2, 5).unwrap();
    fresh.fit(&second).unwrap();

    assert_ne!(model.state_means().unwrap(), first_means.as_slice());
    assert_eq!(model.state_means(), fresh.state_means());
    assert_eq!(model.transition_matrix(), fresh.transition_matrix());
    assert_eq!(model.predict_states(&second).unwrap().len(), second.n_rows());
    assert_eq!(model.predict_states(&first).unwrap().len(), first.n_rows());
}

/// Test scenario: a fallback-only configuration still yields a usable signal
#[test]
fn test_fallback_pipeline_with_volatility_feature() {
    // Three features: return, sentiment, rolling volatility of the return.
    let base = regime_switching_features(9);
    let returns = base.column(0).unwrap();
    let window = 7;
    let vol: Vec<f64> = (0..returns.len())
        .map(|i| {
            let lo = i.saturating_sub(window - 1);
            let w = &returns[lo..=i];
            let mean = w.iter().sum::<f64>() / w.len() as f64;
            if w.len() < 2 {
                0.0
            } else {
                (w.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (w.len() - 1) as f64).sqrt()
            }
        })
        .collect();
    let x = FeatureMatrix::from_columns(&[returns, base.column(1).unwrap(), vol]).unwrap();

    let chain = market_regime::EstimationChain::new(vec![
        Box::new(market_regime::MixtureClustering),
        Box::new(market_regime::RandomAssignment),
    ]);
    let mut model =
        RegimeModel::with_chain(RegimeModelConfig::new(2).with_seed(3), chain).unwrap();
    model.fit(&x).unwrap();
    assert_eq!(model.estimation_mode(), Some(EstimationMode::FallbackMixture));
    assert_eq!(model.state_means().unwrap()[0].len(), 3);

    let decision = SignalDeriver::default().derive_from_model(&model, &x, 0).unwrap();
    assert_eq!(decision.current_state, *model.last_decoded_states().unwrap().last().unwrap());
}
