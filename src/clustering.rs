//! Clustering estimators that ignore temporal order.
//!
//! [`kmeans`] runs k-means++ seeding followed by Lloyd iterations. It seeds the
//! HMM state means and serves as the centroid fallback tier.
//! [`GaussianMixture`] fits a full-covariance mixture by EM, initialized from
//! k-means, and serves as the mixture fallback tier.

use crate::{
    emission_models::{weighted_moments, GaussianEmission},
    errors::{validate_row_count, RegimeError, RegimeResult},
    feature_matrix::{nearest_centroid, squared_distance},
};
use rand::Rng;

/// Lloyd iteration cap and centroid-shift tolerance of the k-means run that
/// initializes the mixture responsibilities.
const INIT_KMEANS_MAX_ITERATIONS: usize = 300;
const INIT_KMEANS_TOLERANCE: f64 = 1e-4;

/// Result of a k-means run.
#[derive(Debug, Clone, PartialEq)]
pub struct KMeansFit {
    /// Final centroids, one per cluster
    pub centroids: Vec<Vec<f64>>,
    /// Nearest-centroid label of every row under the final centroids
    pub labels: Vec<usize>,
    /// Lloyd iterations performed
    pub iterations: usize,
    /// Whether the centroid shift fell below tolerance before the cap
    pub converged: bool,
}

impl KMeansFit {
    /// Empirical mean of the rows assigned to each cluster.
    ///
    /// A cluster with no rows gets a zero vector.
    pub fn group_means(&self, rows: &[Vec<f64>]) -> Vec<Vec<f64>> {
        group_means(rows, &self.labels, self.centroids.len())
    }
}

/// Cluster `rows` into `k` groups.
pub fn kmeans<R: Rng>(
    rows: &[Vec<f64>],
    k: usize,
    max_iterations: usize,
    tolerance: f64,
    rng: &mut R,
) -> RegimeResult<KMeansFit> {
    validate_row_count(rows.len(), k.max(1))?;

    let mut centroids = initialize_centroids_plus_plus(rows, k, rng);
    let mut labels = vec![0; rows.len()];
    let mut iterations = 0;
    let mut converged = false;

    while iterations < max_iterations {
        iterations += 1;

        // Assignment step
        for (label, row) in labels.iter_mut().zip(rows) {
            *label = nearest_centroid(row, &centroids);
        }

        // Update step; empty clusters keep their previous centroid
        let d = rows[0].len();
        let mut sums = vec![vec![0.0; d]; k];
        let mut counts = vec![0usize; k];
        for (row, &label) in rows.iter().zip(&labels) {
            counts[label] += 1;
            for (s, &v) in sums[label].iter_mut().zip(row) {
                *s += v;
            }
        }

        let mut max_shift = 0.0f64;
        for j in 0..k {
            if counts[j] == 0 {
                continue;
            }
            let updated: Vec<f64> = sums[j].iter().map(|s| s / counts[j] as f64).collect();
            max_shift = max_shift.max(squared_distance(&updated, &centroids[j]).sqrt());
            centroids[j] = updated;
        }

        if max_shift < tolerance {
            converged = true;
            break;
        }
    }

    for (label, row) in labels.iter_mut().zip(rows) {
        *label = nearest_centroid(row, &centroids);
    }

    log::debug!(
        "k-means: {} clusters, {} iterations, converged = {}",
        k,
        iterations,
        converged
    );

    Ok(KMeansFit {
        centroids,
        labels,
        iterations,
        converged,
    })
}

/// k-means++ seeding: each new centroid is drawn with probability proportional to
/// its squared distance from the nearest centroid chosen so far.
fn initialize_centroids_plus_plus<R: Rng>(rows: &[Vec<f64>], k: usize, rng: &mut R) -> Vec<Vec<f64>> {
    let mut centroids = Vec::with_capacity(k);
    centroids.push(rows[rng.gen_range(0..rows.len())].clone());

    while centroids.len() < k {
        let distances: Vec<f64> = rows
            .iter()
            .map(|row| {
                centroids
                    .iter()
                    .map(|c| squared_distance(row, c))
                    .fold(f64::INFINITY, f64::min)
            })
            .collect();
        let total: f64 = distances.iter().sum();

        // Every row coincides with a centroid: any row is as good as another.
        if total <= 0.0 {
            centroids.push(rows[rng.gen_range(0..rows.len())].clone());
            continue;
        }

        let target = rng.gen::<f64>() * total;
        let mut cumulative = 0.0;
        let mut chosen = rows.len() - 1;
        for (i, &dist) in distances.iter().enumerate() {
            cumulative += dist;
            if cumulative >= target && dist > 0.0 {
                chosen = i;
                break;
            }
        }
        centroids.push(rows[chosen].clone());
    }

    centroids
}

/// Empirical per-label mean of `rows`; labels with no rows get a zero vector.
pub fn group_means(rows: &[Vec<f64>], labels: &[usize], k: usize) -> Vec<Vec<f64>> {
    let d = rows.first().map(Vec::len).unwrap_or(0);
    let mut sums = vec![vec![0.0; d]; k];
    let mut counts = vec![0usize; k];
    for (row, &label) in rows.iter().zip(labels) {
        counts[label] += 1;
        for (s, &v) in sums[label].iter_mut().zip(row) {
            *s += v;
        }
    }
    for (sum, &count) in sums.iter_mut().zip(&counts) {
        if count > 0 {
            sum.iter_mut().for_each(|s| *s /= count as f64);
        }
    }
    sums
}

/// Gaussian mixture with full covariance per component.
#[derive(Debug, Clone)]
pub struct GaussianMixture {
    /// Mixing weights, summing to one
    pub weights: Vec<f64>,
    /// Component densities
    pub components: Vec<GaussianEmission>,
    /// Average per-row log-likelihood at the last E-step
    pub mean_log_likelihood: f64,
    /// EM iterations performed
    pub iterations: usize,
    /// Whether the likelihood change fell below tolerance before the cap
    pub converged: bool,
}

impl GaussianMixture {
    /// Fit a `k`-component mixture to `rows` by expectation-maximization.
    pub fn fit<R: Rng>(
        rows: &[Vec<f64>],
        k: usize,
        max_iterations: usize,
        tolerance: f64,
        regularization: f64,
        rng: &mut R,
    ) -> RegimeResult<Self> {
        validate_row_count(rows.len(), k.max(1))?;
        let n = rows.len();

        // Responsibilities start as the one-hot k-means assignment.
        let init = kmeans(rows, k, INIT_KMEANS_MAX_ITERATIONS, INIT_KMEANS_TOLERANCE, rng)?;
        let mut resp = vec![vec![0.0; k]; n];
        for (r, &label) in resp.iter_mut().zip(&init.labels) {
            r[label] = 1.0;
        }

        let mut mixture = Self {
            weights: vec![1.0 / k as f64; k],
            components: Vec::with_capacity(k),
            mean_log_likelihood: f64::NEG_INFINITY,
            iterations: 0,
            converged: false,
        };
        mixture.maximize(rows, &resp, regularization)?;

        let mut previous = f64::NEG_INFINITY;
        for iteration in 1..=max_iterations {
            mixture.iterations = iteration;
            let (new_resp, total) = mixture.expectation(rows);
            let mean_ll = total / n as f64;
            if !mean_ll.is_finite() {
                return Err(RegimeError::numerical(
                    format!("mixture log-likelihood became {} at iteration {}", mean_ll, iteration),
                    "gaussian_mixture",
                ));
            }
            resp = new_resp;
            mixture.maximize(rows, &resp, regularization)?;
            mixture.mean_log_likelihood = mean_ll;

            if (mean_ll - previous).abs() < tolerance {
                mixture.converged = true;
                break;
            }
            previous = mean_ll;
        }

        let (_, total) = mixture.expectation(rows);
        mixture.mean_log_likelihood = total / n as f64;
        if !mixture.converged {
            log::debug!(
                "gaussian mixture stopped at the {} iteration cap without converging",
                max_iterations
            );
        }
        Ok(mixture)
    }

    /// Number of components.
    pub fn n_components(&self) -> usize {
        self.components.len()
    }

    /// Component means.
    pub fn means(&self) -> Vec<Vec<f64>> {
        self.components.iter().map(|c| c.mean.clone()).collect()
    }

    /// Most probable component of every row.
    pub fn predict(&self, rows: &[Vec<f64>]) -> Vec<usize> {
        let (resp, _) = self.expectation(rows);
        resp.iter().map(|r| argmax(r)).collect()
    }

    /// Posterior component probabilities of every row and the total log-likelihood.
    fn expectation(&self, rows: &[Vec<f64>]) -> (Vec<Vec<f64>>, f64) {
        let mut total = 0.0;
        let resp = rows
            .iter()
            .map(|row| {
                let log_probs: Vec<f64> = self
                    .weights
                    .iter()
                    .zip(&self.components)
                    .map(|(w, c)| w.ln() + c.log_pdf(row))
                    .collect();
                let lse = log_sum_exp(&log_probs);
                total += lse;
                log_probs.iter().map(|lp| (lp - lse).exp()).collect()
            })
            .collect();
        (resp, total)
    }

    /// Re-estimate weights, means and covariances from responsibilities.
    fn maximize(&mut self, rows: &[Vec<f64>], resp: &[Vec<f64>], regularization: f64) -> RegimeResult<()> {
        let n = rows.len() as f64;
        let k = self.weights.len();
        let mut components = Vec::with_capacity(k);
        let mut weights = Vec::with_capacity(k);

        for j in 0..k {
            let nk: f64 = resp.iter().map(|r| r[j]).sum();
            let (mean, cov) = match weighted_moments(rows, |i| resp[i][j], regularization) {
                Some(moments) => moments,
                // Collapsed component: restart it on the pooled data.
                None => weighted_moments(rows, |_| 1.0, regularization).ok_or_else(|| {
                    RegimeError::numerical("no rows to estimate a component", "gaussian_mixture")
                })?,
            };
            components.push(GaussianEmission::new(mean, cov)?);
            weights.push((nk / n).max(f64::EPSILON));
        }

        let total: f64 = weights.iter().sum();
        weights.iter_mut().for_each(|w| *w /= total);
        self.weights = weights;
        self.components = components;
        Ok(())
    }
}

/// Numerically stable `ln Σ exp(values)`.
pub(crate) fn log_sum_exp(values: &[f64]) -> f64 {
    let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return max;
    }
    max + values.iter().map(|v| (v - max).exp()).sum::<f64>().ln()
}

/// Index of the largest value; ties go to the lowest index.
pub(crate) fn argmax(values: &[f64]) -> usize {
    let mut best = 0;
    for (i, &v) in values.iter().enumerate() {
        if v > values[best] {
            best = i;
        }
    }
    best
}
