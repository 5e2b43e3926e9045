//! # Market Regime Inference
//!
//! Hidden Markov model inference of latent market regimes (bullish, bearish, ...)
//! from a time series of asset returns and news sentiment.
//!
//! The crate fits a Gaussian-emission HMM with full covariance to a feature
//! matrix, decodes the most likely state sequence, and derives forward-looking
//! statistics: the next-state distribution and the expected next return. When the
//! HMM cannot be fitted, estimation degrades through an ordered chain of simpler
//! estimators instead of failing.
//!
//! ## Key Features
//!
//! - **Primary estimator**: Baum-Welch EM on a full-covariance Gaussian HMM, Viterbi decoding
//! - **Fallback chain**: Gaussian mixture, then k-means, then seeded random labels
//! - **Reproducibility**: one seed drives every randomized step of every tier
//! - **Defensive queries**: an unfit model answers with a uniform distribution and zero return
//!
//! ## Quick Start
//!
//! ```rust
//! use market_regime::{FeatureMatrix, RegimeModel, SignalDeriver};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Columns: daily return, daily sentiment
//!     let rows: Vec<Vec<f64>> = (0..120)
//!         .map(|i| {
//!             let up = (i / 30) % 2 == 0;
//!             let r = if up { 0.004 } else { -0.004 } + 0.002 * (i as f64 * 0.7).sin();
//!             vec![r, if r > 0.0 { 0.5 } else { -0.5 }]
//!         })
//!         .collect();
//!     let x = FeatureMatrix::from_rows(rows)?;
//!
//!     let mut model = RegimeModel::with_seed(2, 42)?;
//!     model.fit(&x)?;
//!
//!     let snapshot = model.snapshot(&x, 0)?;
//!     println!("mode: {:?}", snapshot.estimation_mode);
//!     println!("next-state probabilities: {:?}", snapshot.next_state_probabilities);
//!     println!("expected next return: {:.4}", snapshot.expected_next_return);
//!
//!     let decision = SignalDeriver::default().derive(&snapshot);
//!     println!("signal: {}", decision.signal);
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! [`RegimeModel`] owns the fit / predict / query lifecycle. Fitting delegates to an
//! [`EstimationChain`] of [`EstimationStrategy`] implementations, tried in order.
//! The winning tier is recorded as an [`EstimationMode`]. Downstream consumers read
//! a [`RegimeSnapshot`]; [`SignalDeriver`] is one such consumer.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs)]
#![warn(clippy::all)]

// Core modules
pub mod config;
pub mod errors;
pub mod feature_matrix;
pub mod seeded_rng;

// Estimators
pub mod clustering;
pub mod emission_models;
pub mod estimation;
pub mod hmm_core;

// Model and outputs
pub mod regime_model;
pub mod regime_results;
pub mod signal;

// Re-exports for convenience - main public API
pub use config::RegimeModelConfig;
pub use errors::{RegimeError, RegimeResult};
pub use feature_matrix::FeatureMatrix;
pub use regime_model::RegimeModel;
pub use regime_results::RegimeSnapshot;

// Estimation exports
pub use clustering::{kmeans, GaussianMixture, KMeansFit};
pub use emission_models::GaussianEmission;
pub use estimation::{
    empirical_transition_matrix, CentroidClustering, ChainOutcome, EstimationAttempt,
    EstimationChain, EstimationMode, EstimationStrategy, MixtureClustering, PrimaryHmm,
    RandomAssignment, RegimeEstimate, StateDecoder,
};
pub use hmm_core::{ForwardBackward, GaussianHmm, HmmFitReport};
pub use seeded_rng::SeededRng;

// Signal exports
pub use signal::{SignalDecision, SignalDeriver, SignalThresholds, TradingSignal};
