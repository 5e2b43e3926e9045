//! Validated feature matrix consumed by the regime model.
//!
//! Rows are time steps in chronological order (row 0 is the earliest) and columns
//! are features such as return and sentiment. The row order defines the time axis
//! of the Markov chain and is never changed.

use crate::errors::{RegimeError, RegimeResult};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Row-major matrix of finite feature values with at least one row and one column.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMatrix {
    rows: Vec<Vec<f64>>,
    n_features: usize,
}

impl FeatureMatrix {
    /// Build a matrix from rows, checking shape and finiteness.
    ///
    /// # Example
    /// ```rust
    /// use market_regime::FeatureMatrix;
    ///
    /// let x = FeatureMatrix::from_rows(vec![vec![0.01, 0.5], vec![-0.02, -0.5]]).unwrap();
    /// assert_eq!(x.n_rows(), 2);
    /// assert_eq!(x.n_features(), 2);
    /// assert!(FeatureMatrix::from_rows(vec![vec![0.01, 0.5], vec![0.3]]).is_err());
    /// ```
    pub fn from_rows(rows: Vec<Vec<f64>>) -> RegimeResult<Self> {
        let first = rows.first().ok_or_else(|| RegimeError::EmptyInput {
            what: "feature matrix".to_string(),
        })?;
        let n_features = first.len();
        if n_features == 0 {
            return Err(RegimeError::EmptyInput {
                what: "feature row".to_string(),
            });
        }

        for (i, row) in rows.iter().enumerate() {
            if row.len() != n_features {
                return Err(RegimeError::DimensionMismatch {
                    expected: n_features,
                    actual: row.len(),
                });
            }
            if let Some((j, &value)) = row.iter().enumerate().find(|(_, v)| !v.is_finite()) {
                return Err(RegimeError::NonFiniteValue {
                    row: i,
                    column: j,
                    value,
                });
            }
        }

        Ok(Self { rows, n_features })
    }

    /// Build a matrix from parallel feature columns of equal length.
    pub fn from_columns(columns: &[Vec<f64>]) -> RegimeResult<Self> {
        let n_rows = columns.first().map(Vec::len).unwrap_or(0);
        if let Some(bad) = columns.iter().find(|c| c.len() != n_rows) {
            return Err(RegimeError::DimensionMismatch {
                expected: n_rows,
                actual: bad.len(),
            });
        }
        let rows = (0..n_rows)
            .map(|i| columns.iter().map(|c| c[i]).collect())
            .collect();
        Self::from_rows(rows)
    }

    /// Number of time steps.
    pub fn n_rows(&self) -> usize {
        self.rows.len()
    }

    /// Number of features per time step.
    pub fn n_features(&self) -> usize {
        self.n_features
    }

    /// Feature vector of one time step.
    pub fn row(&self, index: usize) -> &[f64] {
        &self.rows[index]
    }

    /// All rows in chronological order.
    pub fn rows(&self) -> &[Vec<f64>] {
        &self.rows
    }

    /// One feature across all time steps.
    pub fn column(&self, index: usize) -> RegimeResult<Vec<f64>> {
        if index >= self.n_features {
            return Err(RegimeError::FeatureOutOfRange {
                index,
                dimension: self.n_features,
            });
        }
        Ok(self.rows.iter().map(|row| row[index]).collect())
    }

    /// Per-feature mean over all rows.
    pub fn column_means(&self) -> Vec<f64> {
        let n = self.n_rows() as f64;
        let mut means = vec![0.0; self.n_features];
        for row in &self.rows {
            for (m, &v) in means.iter_mut().zip(row) {
                *m += v;
            }
        }
        means.iter_mut().for_each(|m| *m /= n);
        means
    }

    /// Maximum-likelihood covariance of all rows (divides by `n`).
    pub fn covariance(&self) -> Vec<Vec<f64>> {
        let d = self.n_features;
        let n = self.n_rows() as f64;
        let means = self.column_means();
        let mut cov = vec![vec![0.0; d]; d];
        for row in &self.rows {
            for p in 0..d {
                let dp = row[p] - means[p];
                for q in p..d {
                    cov[p][q] += dp * (row[q] - means[q]);
                }
            }
        }
        for p in 0..d {
            for q in p..d {
                cov[p][q] /= n;
                cov[q][p] = cov[p][q];
            }
        }
        cov
    }

    /// Content hash over the shape and the exact bit pattern of every value.
    ///
    /// Two matrices with the same fingerprint are treated as the same input.
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.n_rows().hash(&mut hasher);
        self.n_features.hash(&mut hasher);
        for row in &self.rows {
            for value in row {
                value.to_bits().hash(&mut hasher);
            }
        }
        hasher.finish()
    }
}

impl TryFrom<Vec<Vec<f64>>> for FeatureMatrix {
    type Error = RegimeError;

    fn try_from(rows: Vec<Vec<f64>>) -> RegimeResult<Self> {
        Self::from_rows(rows)
    }
}

/// Squared Euclidean distance between two equal-length vectors.
pub(crate) fn squared_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// Index of the nearest centroid; ties go to the lowest index.
pub(crate) fn nearest_centroid(point: &[f64], centroids: &[Vec<f64>]) -> usize {
    let mut best = 0;
    let mut best_dist = f64::INFINITY;
    for (j, centroid) in centroids.iter().enumerate() {
        let dist = squared_distance(point, centroid);
        if dist < best_dist {
            best_dist = dist;
            best = j;
        }
    }
    best
}
