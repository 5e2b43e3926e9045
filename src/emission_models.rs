//! Gaussian emission densities for HMM states and mixture components.
//!
//! Each density caches the inverse covariance and the log-determinant from a
//! Cholesky factorization, so evaluating a log-density is a single quadratic form.

use crate::errors::{RegimeError, RegimeResult};
use nalgebra::{Cholesky, DMatrix};

/// ln(2π)
const LN_2PI: f64 = 1.837_877_066_409_345_5;

/// Regularization added to the diagonal, in order, when a covariance cannot be
/// Cholesky-factored as given.
const REGULARIZATION_LEVELS: [f64; 5] = [1e-8, 1e-7, 1e-6, 1e-5, 1e-4];

/// Multivariate normal emission with full covariance.
#[derive(Debug, Clone, PartialEq)]
pub struct GaussianEmission {
    /// Mean vector
    pub mean: Vec<f64>,
    /// Covariance matrix (after any regularization needed to factor it)
    pub covariance: DMatrix<f64>,
    /// Inverse covariance (cached)
    precision: DMatrix<f64>,
    /// Log determinant of covariance (cached)
    log_det_cov: f64,
}

impl GaussianEmission {
    /// Build a density, factoring the covariance.
    ///
    /// Fails when the mean and covariance disagree in dimension, when any entry is
    /// non-finite, or when the covariance is not positive definite even after
    /// progressive diagonal regularization.
    pub fn new(mean: Vec<f64>, covariance: DMatrix<f64>) -> RegimeResult<Self> {
        let d = mean.len();
        if covariance.nrows() != d || covariance.ncols() != d {
            return Err(RegimeError::DimensionMismatch {
                expected: d,
                actual: covariance.nrows(),
            });
        }
        if mean.iter().any(|v| !v.is_finite()) || covariance.iter().any(|v| !v.is_finite()) {
            return Err(RegimeError::numerical(
                "emission parameters contain non-finite values",
                "gaussian_emission",
            ));
        }

        let (covariance, cholesky) = factorize(covariance)?;
        let log_det_cov = 2.0 * cholesky.l().diagonal().iter().map(|x| x.ln()).sum::<f64>();
        let precision = cholesky.inverse();

        Ok(Self {
            mean,
            covariance,
            precision,
            log_det_cov,
        })
    }

    /// Build a density from a row-major covariance.
    pub fn from_rows(mean: Vec<f64>, covariance: &[Vec<f64>]) -> RegimeResult<Self> {
        let d = mean.len();
        if covariance.len() != d || covariance.iter().any(|row| row.len() != d) {
            return Err(RegimeError::DimensionMismatch {
                expected: d,
                actual: covariance.len(),
            });
        }
        let matrix = DMatrix::from_fn(d, d, |i, j| covariance[i][j]);
        Self::new(mean, matrix)
    }

    /// Feature dimension.
    pub fn dim(&self) -> usize {
        self.mean.len()
    }

    /// Log determinant of the covariance.
    pub fn log_det_cov(&self) -> f64 {
        self.log_det_cov
    }

    /// Log-density of one observation.
    pub fn log_pdf(&self, x: &[f64]) -> f64 {
        let d = self.dim();
        let diff: Vec<f64> = x.iter().zip(&self.mean).map(|(a, m)| a - m).collect();

        // (x - μ)ᵀ Σ⁻¹ (x - μ)
        let mut mahalanobis_sq = 0.0;
        for i in 0..d {
            let mut acc = 0.0;
            for j in 0..d {
                acc += self.precision[(i, j)] * diff[j];
            }
            mahalanobis_sq += diff[i] * acc;
        }

        -0.5 * (d as f64 * LN_2PI + self.log_det_cov + mahalanobis_sq)
    }
}

/// Cholesky-factor a covariance, adding diagonal regularization when needed.
fn factorize(covariance: DMatrix<f64>) -> RegimeResult<(DMatrix<f64>, Cholesky<f64, nalgebra::Dyn>)> {
    let d = covariance.nrows();
    // Symmetrize so round-off in the M-step cannot break the factorization.
    let covariance = (&covariance + covariance.transpose()) * 0.5;

    if let Some(chol) = Cholesky::new(covariance.clone()) {
        return Ok((covariance, chol));
    }

    for &level in &REGULARIZATION_LEVELS {
        let regularized = &covariance + DMatrix::<f64>::identity(d, d) * level;
        if let Some(chol) = Cholesky::new(regularized.clone()) {
            log::debug!("covariance factored after adding {:.0e} to the diagonal", level);
            return Ok((regularized, chol));
        }
    }

    Err(RegimeError::numerical(
        "covariance is not positive definite even with progressive regularization",
        "cholesky",
    ))
}

/// Weighted mean and covariance of `rows`, with `floor` added to the diagonal.
///
/// Returns `None` when the weights sum to (numerically) zero.
pub(crate) fn weighted_moments(
    rows: &[Vec<f64>],
    weights: impl Fn(usize) -> f64,
    floor: f64,
) -> Option<(Vec<f64>, DMatrix<f64>)> {
    let d = rows.first()?.len();
    let total: f64 = (0..rows.len()).map(&weights).sum();
    if total <= 1e-10 || !total.is_finite() {
        return None;
    }

    let mut mean = vec![0.0; d];
    for (i, row) in rows.iter().enumerate() {
        let w = weights(i);
        for (m, &v) in mean.iter_mut().zip(row) {
            *m += w * v;
        }
    }
    mean.iter_mut().for_each(|m| *m /= total);

    let mut cov = DMatrix::<f64>::zeros(d, d);
    for (i, row) in rows.iter().enumerate() {
        let w = weights(i);
        for p in 0..d {
            let dp = row[p] - mean[p];
            for q in p..d {
                cov[(p, q)] += w * dp * (row[q] - mean[q]);
            }
        }
    }
    for p in 0..d {
        for q in p..d {
            cov[(p, q)] /= total;
            cov[(q, p)] = cov[(p, q)];
        }
        cov[(p, p)] += floor;
    }

    Some((mean, cov))
}
