//! Result structures handed to downstream consumers of a fitted model.

use crate::estimation::EstimationMode;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Everything a signal deriver needs from one decoded series.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RegimeSnapshot {
    /// Decoded state of every row, oldest first
    pub states: Vec<usize>,
    /// State of the last row
    pub current_state: usize,
    /// P(next state = j | current state), one entry per state
    pub next_state_probabilities: Vec<f64>,
    /// Probability-weighted mean of the return feature over next states
    pub expected_next_return: f64,
    /// Per-state mean emission vectors; empty when the model is unfit
    pub state_means: Vec<Vec<f64>>,
    /// Feature column treated as the return
    pub return_dimension: usize,
    /// Tier that produced the parameters; `None` when the model is unfit
    pub estimation_mode: Option<EstimationMode>,
}

impl RegimeSnapshot {
    /// State with the highest mean return; ties go to the lowest index.
    ///
    /// `None` when the model is unfit.
    pub fn bullish_state(&self) -> Option<usize> {
        let mut best: Option<(usize, f64)> = None;
        for (state, mean) in self.state_means.iter().enumerate() {
            let value = *mean.get(self.return_dimension)?;
            match best {
                Some((_, top)) if value <= top => {}
                _ => best = Some((state, value)),
            }
        }
        best.map(|(state, _)| state)
    }

    /// Probability that the next state is `state`; zero for unknown states.
    pub fn probability_of(&self, state: usize) -> f64 {
        self.next_state_probabilities.get(state).copied().unwrap_or(0.0)
    }

    /// Number of rows whose decoded state differs from the previous row.
    pub fn regime_changes(&self) -> usize {
        self.states.windows(2).filter(|w| w[0] != w[1]).count()
    }
}
