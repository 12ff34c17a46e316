//! Covariance-structured k-means.
//!
//! Partitions data into k clusters where each cluster is modeled as a
//! multivariate Gaussian with a configurable covariance structure. The
//! alternating optimization is Lloyd-shaped, but the assignment metric can be
//! the covariance-weighted (Mahalanobis) distance:
//!
//! ```text
//! d(x, μₖ) = sqrt((x - μₖ)ᵗ Σₖ⁻¹ (x - μₖ))
//! ```
//!
//! # The Loop
//!
//! 1. Seed centers via farthest-point traversal, assign by Euclidean distance
//! 2. Estimate per-cluster covariances under the configured family
//! 3. Invert them (robustly; see [`invert`](super::invert))
//! 4. **Assign**: each point → nearest center under the configured metric
//! 5. Repair empty clusters from the farthest points
//! 6. **Update**: each center → mean of assigned points
//! 7. Repeat until the squared center shift drops to the tolerance
//!
//! The whole fit is repeated `n_init` times from independent seeds and the
//! restart with the lowest inertia wins. Scoring a finished fit with AIC/BIC
//! lives in [`scoring`](super::scoring).
//!
//! # Failure Modes
//!
//! - **Local optima**: alternating optimization finds local minima only;
//!   raise `n_init` to explore more seeds
//! - **Degenerate covariance**: clusters with too few distinct points fall
//!   back to the identity matrix (Euclidean behavior) for that iteration
//! - **Wrong k**: must be given in advance; fit a range of k and compare
//!   AIC/BIC across fits

use super::covariance::{bincount, CovarFamily, CovarianceEstimator, MinMembers};
use super::traits::Clustering;
use crate::error::{Error, Result};
use ndarray::{Array2, ArrayView1};
use rand::prelude::*;
use std::str::FromStr;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Distance metric for the assignment step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    /// Plain Euclidean distance; covariances are still estimated but ignored
    /// during assignment.
    Euclidean,
    /// Covariance-weighted distance using each cluster's inverse covariance.
    Mahalanobis,
}

impl FromStr for Metric {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "euclidean" => Ok(Metric::Euclidean),
            "mahalanobis" => Ok(Metric::Mahalanobis),
            _ => Err(Error::InvalidParameter {
                name: "metric",
                message: "must be \"euclidean\" or \"mahalanobis\"",
            }),
        }
    }
}

/// Covariance-structured k-means clusterer.
#[derive(Debug, Clone)]
pub struct CovKmeans {
    /// Number of clusters.
    k: usize,
    /// Maximum iterations per restart.
    max_iter: usize,
    /// Convergence tolerance on the squared center shift.
    tol: f64,
    /// Number of independent restarts.
    n_init: usize,
    /// Assignment metric.
    metric: Metric,
    /// Covariance family.
    family: CovarFamily,
    /// Share one covariance matrix across clusters.
    tied: bool,
    /// Minimum member count before a cluster's covariance is estimated.
    min_members: MinMembers,
    /// Reuse centers across restarts instead of reseeding.
    warm_start: bool,
    /// Score with residual sum of squares instead of log-likelihood.
    use_rss: bool,
    /// Random seed.
    seed: Option<u64>,
}

/// Output of a completed fit: the winning restart plus per-restart history.
#[derive(Debug, Clone)]
pub struct FitResult {
    /// Cluster label per point, in `[0, k)`.
    pub labels: Vec<usize>,
    /// k×D center matrix.
    pub centers: Array2<f64>,
    /// Inertia of the winning restart.
    pub inertia: f64,
    /// Log-likelihood of the winning restart.
    pub log_likelihood: f64,
    /// Iterations the winning restart ran.
    pub n_iter: usize,
    /// Per-restart diagnostics, in restart order.
    pub restarts: Vec<RestartRecord>,
}

/// Inertia and log-likelihood of one restart.
#[derive(Debug, Clone)]
pub struct RestartRecord {
    /// Sum of distances of all points to their own cluster center.
    pub inertia: f64,
    /// Model log-likelihood under the final assignment.
    pub log_likelihood: f64,
}

/// One restart's raw output.
struct SingleFit {
    labels: Vec<usize>,
    centers: Array2<f64>,
    iterations: usize,
}

impl CovKmeans {
    /// Create a new clusterer with `k` clusters.
    pub fn new(k: usize) -> Self {
        Self {
            k,
            max_iter: 300,
            tol: 1e-4,
            n_init: 10,
            metric: Metric::Mahalanobis,
            family: CovarFamily::Full,
            tied: false,
            min_members: MinMembers::Auto,
            warm_start: false,
            use_rss: false,
            seed: None,
        }
    }

    /// Set maximum iterations per restart.
    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    /// Set convergence tolerance.
    pub fn with_tol(mut self, tol: f64) -> Self {
        self.tol = tol;
        self
    }

    /// Set the number of independent restarts.
    pub fn with_n_init(mut self, n_init: usize) -> Self {
        self.n_init = n_init;
        self
    }

    /// Set the assignment metric.
    pub fn with_metric(mut self, metric: Metric) -> Self {
        self.metric = metric;
        self
    }

    /// Set the covariance family and whether it is tied across clusters.
    pub fn with_covariance(mut self, family: CovarFamily, tied: bool) -> Self {
        self.family = family;
        self.tied = tied;
        self
    }

    /// Set the minimum-members threshold.
    pub fn with_min_members(mut self, min_members: MinMembers) -> Self {
        self.min_members = min_members;
        self
    }

    /// Carry centers from one restart into the next instead of reseeding.
    pub fn with_warm_start(mut self, warm_start: bool) -> Self {
        self.warm_start = warm_start;
        self
    }

    /// Score AIC/BIC from the residual sum of squares instead of the
    /// log-likelihood.
    pub fn with_rss_scoring(mut self, use_rss: bool) -> Self {
        self.use_rss = use_rss;
        self
    }

    /// Set random seed for reproducibility. Restart `i` derives its own seed
    /// as `seed + i`.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub(crate) fn metric(&self) -> Metric {
        self.metric
    }

    pub(crate) fn family(&self) -> CovarFamily {
        self.family
    }

    pub(crate) fn tied(&self) -> bool {
        self.tied
    }

    pub(crate) fn use_rss(&self) -> bool {
        self.use_rss
    }

    pub(crate) fn estimator_for(&self, dims: usize) -> CovarianceEstimator {
        CovarianceEstimator::new(self.family, self.tied, self.min_members.resolve(dims))
    }

    /// Fit the model: `n_init` restarts, lowest inertia wins.
    pub fn fit(&self, data: &Array2<f64>) -> Result<FitResult> {
        self.fit_impl(data, None)
    }

    /// Fit starting the first restart from caller-supplied centers (warm
    /// start across calls).
    pub fn fit_from(&self, data: &Array2<f64>, centers: &Array2<f64>) -> Result<FitResult> {
        if centers.dim() != (self.k, data.ncols()) {
            return Err(Error::ShapeMismatch {
                expected: format!("({}, {})", self.k, data.ncols()),
                actual: format!("({}, {})", centers.nrows(), centers.ncols()),
            });
        }
        self.fit_impl(data, Some(centers.clone()))
    }

    fn fit_impl(&self, data: &Array2<f64>, init_centers: Option<Array2<f64>>) -> Result<FitResult> {
        let n = data.nrows();
        let d = data.ncols();
        if n == 0 {
            return Err(Error::EmptyInput);
        }
        if self.k == 0 || self.k > n {
            return Err(Error::InvalidClusterCount {
                requested: self.k,
                n_items: n,
            });
        }
        if self.n_init == 0 {
            return Err(Error::InvalidParameter {
                name: "n_init",
                message: "must be > 0",
            });
        }

        // The global covariance ignores labels, so its cache is shared
        // across restarts.
        let mut estimator = self.estimator_for(d);

        let mut restarts: Vec<RestartRecord> = Vec::with_capacity(self.n_init);
        let mut carried = init_centers;
        let mut best: Option<(SingleFit, usize)> = None;

        for i in 0..self.n_init {
            let mut rng: Box<dyn RngCore> = match self.seed {
                Some(s) => Box::new(StdRng::seed_from_u64(s.wrapping_add(i as u64))),
                None => Box::new(rand::rng()),
            };

            let start = carried.take();
            let run = self.fit_once(data, start, &mut estimator, &mut rng);
            let inertia = self.inertia(data, &run.labels, &run.centers, &mut estimator);
            let log_likelihood = super::scoring::log_likelihood(
                data,
                &run.labels,
                &run.centers,
                &mut estimator,
                self.k,
            )?;
            restarts.push(RestartRecord {
                inertia,
                log_likelihood,
            });

            if self.warm_start {
                carried = Some(run.centers.clone());
            }

            let improved = match &best {
                Some((_, best_idx)) => inertia < restarts[*best_idx].inertia,
                None => true,
            };
            if improved {
                best = Some((run, i));
            }
        }

        let (winner, winner_idx) = best.expect("n_init > 0 implies at least one restart");
        Ok(FitResult {
            labels: winner.labels,
            centers: winner.centers,
            inertia: restarts[winner_idx].inertia,
            log_likelihood: restarts[winner_idx].log_likelihood,
            n_iter: winner.iterations,
            restarts,
        })
    }

    /// One restart: seed, assign, then alternate until the centers settle or
    /// `max_iter` is exhausted (the latter is accepted, not an error).
    fn fit_once(
        &self,
        data: &Array2<f64>,
        start: Option<Array2<f64>>,
        estimator: &mut CovarianceEstimator,
        rng: &mut impl Rng,
    ) -> SingleFit {
        let k = self.k;

        let mut centers = match start {
            Some(centers) => centers,
            None => farthest_point_centers(data, k, rng),
        };

        // Initial assignment is always Euclidean: no covariance estimate
        // exists yet.
        let (mut labels, own_dist) = assign(data, &centers, None);
        repair_empty_clusters(&mut labels, &own_dist, k);
        centers = compute_centers(data, &labels, k);

        let mut old_centers = centers.clone();
        let mut iterations = 0;

        for iter in 0..self.max_iter {
            iterations = iter + 1;

            let covariances = estimator.covariances(data, &labels, k);
            let inverses = estimator.inverses(&covariances, k);

            let weights = match self.metric {
                Metric::Euclidean => None,
                Metric::Mahalanobis => Some(inverses.as_slice()),
            };
            let (new_labels, own_dist) = assign(data, &centers, weights);
            labels = new_labels;
            repair_empty_clusters(&mut labels, &own_dist, k);
            centers = compute_centers(data, &labels, k);

            let shift: f64 = old_centers
                .iter()
                .zip(centers.iter())
                .map(|(a, b)| (a - b).powi(2))
                .sum();
            if shift <= self.tol {
                break;
            }
            old_centers = centers.clone();
        }

        SingleFit {
            labels,
            centers,
            iterations,
        }
    }

    /// Sum of distances of all points to their own cluster center, under the
    /// configured metric and this assignment's covariances.
    fn inertia(
        &self,
        data: &Array2<f64>,
        labels: &[usize],
        centers: &Array2<f64>,
        estimator: &mut CovarianceEstimator,
    ) -> f64 {
        let k = self.k;
        let inverses = match self.metric {
            Metric::Euclidean => None,
            Metric::Mahalanobis => {
                let covariances = estimator.covariances(data, labels, k);
                Some(estimator.inverses(&covariances, k))
            }
        };

        let mut total = 0.0;
        for (i, &label) in labels.iter().enumerate() {
            let point = data.row(i);
            let center = centers.row(label);
            let dist = match &inverses {
                None => euclidean(&point, &center),
                Some(inv) => mahalanobis(&point, &center, &inv[label]),
            };
            total += if dist.is_nan() { f64::INFINITY } else { dist };
        }
        total
    }
}

/// Assign each point to the nearest center.
///
/// `weights` carries one inverse covariance matrix per cluster for the
/// Mahalanobis metric; `None` means Euclidean. NaN distances (numerical
/// instability in the weighted form) are clamped to +∞ so the point is never
/// assigned to that cluster. Returns the labels and each point's distance to
/// its own center.
fn assign(
    data: &Array2<f64>,
    centers: &Array2<f64>,
    weights: Option<&[Array2<f64>]>,
) -> (Vec<usize>, Vec<f64>) {
    let n = data.nrows();
    let k = centers.nrows();
    let mut labels = vec![0usize; n];
    let mut own_dist = vec![f64::INFINITY; n];

    let assign_point = |i: usize, label: &mut usize, dist: &mut f64| {
        let point = data.row(i);
        let mut best_cluster = 0;
        let mut best_dist = f64::INFINITY;

        for c in 0..k {
            let center = centers.row(c);
            let raw = match weights {
                None => euclidean(&point, &center),
                Some(inverses) => mahalanobis(&point, &center, &inverses[c]),
            };
            let candidate = if raw.is_nan() { f64::INFINITY } else { raw };
            if candidate < best_dist {
                best_dist = candidate;
                best_cluster = c;
            }
        }

        *label = best_cluster;
        *dist = best_dist;
    };

    #[cfg(feature = "parallel")]
    labels
        .par_iter_mut()
        .zip(own_dist.par_iter_mut())
        .enumerate()
        .for_each(|(i, (label, dist))| assign_point(i, label, dist));

    #[cfg(not(feature = "parallel"))]
    labels
        .iter_mut()
        .zip(own_dist.iter_mut())
        .enumerate()
        .for_each(|(i, (label, dist))| assign_point(i, label, dist));

    (labels, own_dist)
}

/// Reassign the farthest points into empty clusters, one donor per empty
/// cluster. A donor is never taken from a cluster with a single member, so
/// repairing one empty cluster cannot create another.
fn repair_empty_clusters(labels: &mut [usize], own_dist: &[f64], k: usize) {
    let mut counts = bincount(labels, k);
    if !counts.contains(&0) {
        return;
    }

    // Ascending by distance to own center; donors pop from the far end.
    let mut order: Vec<usize> = (0..labels.len()).collect();
    order.sort_by(|&a, &b| {
        own_dist[a]
            .partial_cmp(&own_dist[b])
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    for empty in 0..k {
        if counts[empty] != 0 {
            continue;
        }
        while let Some(donor) = order.pop() {
            if counts[labels[donor]] == 1 {
                continue;
            }
            counts[labels[donor]] -= 1;
            labels[donor] = empty;
            counts[empty] += 1;
            break;
        }
    }
}

/// Row `j` is the arithmetic mean of all points labeled `j`. Assumes no
/// cluster is empty (the assignment step guarantees it).
fn compute_centers(data: &Array2<f64>, labels: &[usize], k: usize) -> Array2<f64> {
    let d = data.ncols();
    let mut centers = Array2::<f64>::zeros((k, d));
    let mut counts = vec![0usize; k];

    for (i, &label) in labels.iter().enumerate() {
        for j in 0..d {
            centers[[label, j]] += data[[i, j]];
        }
        counts[label] += 1;
    }

    for c in 0..k {
        if counts[c] > 0 {
            for j in 0..d {
                centers[[c, j]] /= counts[c] as f64;
            }
        }
    }

    centers
}

/// Farthest-point seeding: random first center, then repeatedly the point
/// maximizing the minimum distance to the centers chosen so far.
fn farthest_point_centers(data: &Array2<f64>, k: usize, rng: &mut impl Rng) -> Array2<f64> {
    let n = data.nrows();
    let d = data.ncols();
    let mut centers = Array2::<f64>::zeros((k, d));

    let first = rng.random_range(0..n);
    centers.row_mut(0).assign(&data.row(first));

    let mut min_dist = vec![f64::INFINITY; n];
    for c in 1..k {
        let previous = centers.row(c - 1);
        for (i, entry) in min_dist.iter_mut().enumerate() {
            let dist = euclidean(&data.row(i), &previous);
            if dist < *entry {
                *entry = dist;
            }
        }

        let mut next = 0;
        let mut best = f64::NEG_INFINITY;
        for (i, &dist) in min_dist.iter().enumerate() {
            if dist > best {
                best = dist;
                next = i;
            }
        }
        centers.row_mut(c).assign(&data.row(next));
    }

    centers
}

/// Euclidean distance between two vectors.
pub(crate) fn euclidean(a: &ArrayView1<'_, f64>, b: &ArrayView1<'_, f64>) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f64>()
        .sqrt()
}

/// Covariance-weighted distance `sqrt((a-b)ᵗ VI (a-b))`. NaN when the
/// quadratic form goes negative under a non-PD surrogate inverse.
pub(crate) fn mahalanobis(
    a: &ArrayView1<'_, f64>,
    b: &ArrayView1<'_, f64>,
    inverse: &Array2<f64>,
) -> f64 {
    mahalanobis_squared(a, b, inverse).sqrt()
}

/// The quadratic form `(a-b)ᵗ VI (a-b)` itself.
pub(crate) fn mahalanobis_squared(
    a: &ArrayView1<'_, f64>,
    b: &ArrayView1<'_, f64>,
    inverse: &Array2<f64>,
) -> f64 {
    let d = a.len();
    let diff: Vec<f64> = a.iter().zip(b.iter()).map(|(x, y)| x - y).collect();

    let mut quad = 0.0;
    for r in 0..d {
        let mut acc = 0.0;
        for c in 0..d {
            acc += inverse[[r, c]] * diff[c];
        }
        quad += diff[r] * acc;
    }
    quad
}

impl Clustering for CovKmeans {
    fn fit_predict(&self, data: &[Vec<f64>]) -> Result<Vec<usize>> {
        if data.is_empty() {
            return Err(Error::EmptyInput);
        }

        let n = data.len();
        let d = data[0].len();

        let mut flat: Vec<f64> = Vec::with_capacity(n * d);
        for point in data {
            if point.len() != d {
                return Err(Error::DimensionMismatch {
                    expected: d,
                    found: point.len(),
                });
            }
            flat.extend(point);
        }
        let data_arr =
            Array2::from_shape_vec((n, d), flat).map_err(|e| Error::Other(e.to_string()))?;

        self.fit(&data_arr).map(|fit| fit.labels)
    }

    fn n_clusters(&self) -> usize {
        self.k
    }
}
