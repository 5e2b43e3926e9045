//! Trading signal derived from a regime snapshot.
//!
//! This sits downstream of the model. The model itself is signal-agnostic; the
//! deriver owns every threshold.

use crate::{errors::RegimeResult, feature_matrix::FeatureMatrix, regime_model::RegimeModel, regime_results::RegimeSnapshot};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::fmt;

/// State treated as bullish when the model has no means to rank.
const DEFAULT_BULLISH_STATE: usize = 1;

/// Discrete trading signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum TradingSignal {
    /// Price likely rising
    Buy,
    /// Price likely dropping
    Sell,
    /// No clear direction
    Hold,
}

impl fmt::Display for TradingSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TradingSignal::Buy => "BUY",
            TradingSignal::Sell => "SELL",
            TradingSignal::Hold => "HOLD",
        })
    }
}

/// Fixed decision thresholds.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SignalThresholds {
    /// Absolute expected next return that triggers a buy or sell
    pub expected_return: f64,
    /// Bullish next-state probability above which to buy
    pub bullish_buy: f64,
    /// Bullish next-state probability below which to sell
    pub bullish_sell: f64,
}

impl Default for SignalThresholds {
    fn default() -> Self {
        Self {
            expected_return: 0.001,
            bullish_buy: 0.6,
            bullish_sell: 0.4,
        }
    }
}

/// A signal and the numbers behind it.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SignalDecision {
    /// Chosen signal
    pub signal: TradingSignal,
    /// State with the highest mean return
    pub bullish_state: usize,
    /// Probability that the next state is the bullish one
    pub bullish_probability: f64,
    /// Expected next return used for the decision
    pub expected_next_return: f64,
    /// Current decoded state
    pub current_state: usize,
}

/// Maps regime outputs to buy/sell/hold.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SignalDeriver {
    thresholds: SignalThresholds,
}

impl SignalDeriver {
    /// Deriver with custom thresholds.
    pub fn new(thresholds: SignalThresholds) -> Self {
        Self { thresholds }
    }

    /// Thresholds in use.
    pub fn thresholds(&self) -> &SignalThresholds {
        &self.thresholds
    }

    /// Decide from a snapshot.
    ///
    /// Buy when the expected return or the bullish probability is high enough,
    /// otherwise sell when either is low enough, otherwise hold.
    pub fn derive(&self, snapshot: &RegimeSnapshot) -> SignalDecision {
        let t = &self.thresholds;
        let bullish_state = snapshot.bullish_state().unwrap_or(DEFAULT_BULLISH_STATE);
        let bullish_probability = snapshot.probability_of(bullish_state);
        let expected = snapshot.expected_next_return;

        let signal = if expected > t.expected_return || bullish_probability > t.bullish_buy {
            TradingSignal::Buy
        } else if expected < -t.expected_return || bullish_probability < t.bullish_sell {
            TradingSignal::Sell
        } else {
            TradingSignal::Hold
        };

        SignalDecision {
            signal,
            bullish_state,
            bullish_probability,
            expected_next_return: expected,
            current_state: snapshot.current_state,
        }
    }

    /// Decode `x` with `model` and decide from its last row.
    pub fn derive_from_model(
        &self,
        model: &RegimeModel,
        x: &FeatureMatrix,
        return_dimension: usize,
    ) -> RegimeResult<SignalDecision> {
        let snapshot = model.snapshot(x, return_dimension)?;
        Ok(self.derive(&snapshot))
    }
}
