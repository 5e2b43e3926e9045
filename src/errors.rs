//! Error types and validation functions for regime inference.
//!
//! Two families of failure exist. Contract violations mean the caller handed the
//! model structurally invalid input and are returned immediately. Estimation
//! failures are raised inside a single estimation tier and are normally caught by
//! the estimation chain, which falls through to the next tier. Only when every
//! tier fails does [`RegimeError::EstimationFailed`] reach the caller.

use thiserror::Error;

/// Error types for regime inference operations.
#[derive(Error, Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum RegimeError {
    /// The feature matrix has no rows or no columns.
    #[error("Empty input: {what} must not be empty")]
    EmptyInput {
        /// Which input was empty
        what: String,
    },

    /// Row length or feature dimension does not match what was expected.
    #[error("Dimension mismatch: expected {expected} features, got {actual}")]
    DimensionMismatch {
        /// Expected number of features
        expected: usize,
        /// Number of features actually supplied
        actual: usize,
    },

    /// A feature value is NaN or infinite.
    #[error("Non-finite value at row {row}, column {column}: {value}")]
    NonFiniteValue {
        /// Row index of the offending value
        row: usize,
        /// Column index of the offending value
        column: usize,
        /// The offending value
        value: f64,
    },

    /// A state index outside `[0, state_count)`.
    #[error("State {state} out of range for a model with {state_count} states")]
    StateOutOfRange {
        /// Requested state
        state: usize,
        /// Number of states of the model
        state_count: usize,
    },

    /// A feature column index outside the fitted feature dimension.
    #[error("Feature index {index} out of range for dimension {dimension}")]
    FeatureOutOfRange {
        /// Requested feature column
        index: usize,
        /// Fitted feature dimension
        dimension: usize,
    },

    /// Invalid configuration value.
    #[error("Invalid parameter: {parameter} = {value}, expected {constraint}")]
    InvalidParameter {
        /// Parameter name
        parameter: String,
        /// Invalid value provided
        value: f64,
        /// Valid range or constraint description
        constraint: String,
    },

    /// Not enough rows for the estimator that was attempted.
    #[error("Insufficient data: need at least {required} rows, got {actual}")]
    InsufficientData {
        /// Minimum required rows
        required: usize,
        /// Rows provided
        actual: usize,
    },

    /// Numerical computation failed (singular covariance, non-finite likelihood).
    #[error("Numerical computation failed: {reason}")]
    NumericalError {
        /// Detailed reason for numerical failure
        reason: String,
        /// Operation that failed
        operation: Option<String>,
    },

    /// An iterative estimator stopped without producing usable parameters.
    #[error("{algorithm} did not converge after {iterations} iterations")]
    ConvergenceFailure {
        /// Estimator name
        algorithm: String,
        /// Iterations run
        iterations: usize,
    },

    /// Every estimation tier failed.
    #[error("Estimation failed: every tier failed ({})", .attempts.join("; "))]
    EstimationFailed {
        /// One message per failed tier, in the order the tiers ran
        attempts: Vec<String>,
    },
}

impl RegimeError {
    /// Whether this error signals a caller bug rather than an estimation problem.
    ///
    /// Contract violations are never recovered by the estimation chain.
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            RegimeError::EmptyInput { .. }
                | RegimeError::DimensionMismatch { .. }
                | RegimeError::NonFiniteValue { .. }
                | RegimeError::StateOutOfRange { .. }
                | RegimeError::FeatureOutOfRange { .. }
                | RegimeError::InvalidParameter { .. }
        )
    }

    pub(crate) fn numerical(reason: impl Into<String>, operation: &str) -> Self {
        RegimeError::NumericalError {
            reason: reason.into(),
            operation: Some(operation.to_string()),
        }
    }
}

/// Result type for regime inference operations.
pub type RegimeResult<T> = Result<T, RegimeError>;

/// Validates that a value is finite and not NaN.
///
/// # Example
/// ```rust
/// use market_regime::errors::validate_finite;
///
/// assert!(validate_finite(1.0, "tolerance").is_ok());
/// assert!(validate_finite(f64::NAN, "tolerance").is_err());
/// ```
pub fn validate_finite(value: f64, name: &str) -> RegimeResult<()> {
    if !value.is_finite() {
        Err(RegimeError::InvalidParameter {
            parameter: name.to_string(),
            value,
            constraint: "a finite number".to_string(),
        })
    } else {
        Ok(())
    }
}

/// Validates that a value is finite and strictly positive.
pub fn validate_positive(value: f64, name: &str) -> RegimeResult<()> {
    validate_finite(value, name)?;
    if value <= 0.0 {
        return Err(RegimeError::InvalidParameter {
            parameter: name.to_string(),
            value,
            constraint: "> 0".to_string(),
        });
    }
    Ok(())
}

/// Validates a state count. A model needs at least one hidden state.
pub fn validate_state_count(state_count: usize) -> RegimeResult<()> {
    if state_count == 0 {
        return Err(RegimeError::InvalidParameter {
            parameter: "state_count".to_string(),
            value: 0.0,
            constraint: ">= 1".to_string(),
        });
    }
    Ok(())
}

/// Validates that a state index addresses one of `state_count` states.
pub fn validate_state(state: usize, state_count: usize) -> RegimeResult<()> {
    if state >= state_count {
        return Err(RegimeError::StateOutOfRange { state, state_count });
    }
    Ok(())
}

/// Validates that an estimator has at least `required` rows to work with.
pub fn validate_row_count(actual: usize, required: usize) -> RegimeResult<()> {
    if actual < required {
        return Err(RegimeError::InsufficientData { required, actual });
    }
    Ok(())
}
