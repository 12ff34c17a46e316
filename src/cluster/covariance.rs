//! Per-cluster covariance estimation under structural families.
//!
//! Each cluster is modeled as a multivariate Gaussian; the family constrains
//! the shape of its covariance matrix:
//!
//! | Family | Structure |
//! |--------|-----------|
//! | `Full` | unconstrained symmetric |
//! | `Diag` | off-diagonal entries zeroed |
//! | `Spher` | mean feature variance × identity |
//! | `Global` | one whole-dataset matrix, computed once, never re-estimated |
//!
//! Tied estimation accumulates the per-cluster matrices and divides by the
//! number of clusters, broadcasting one shared matrix into every slot.
//!
//! Clusters at or below the minimum-members threshold keep the identity
//! matrix, and any estimate whose determinant is not strictly positive is
//! replaced with the identity before inversion. Both fallbacks reduce the
//! cluster to Euclidean-equivalent behavior for that iteration.

use ndarray::{Array1, Array2, Axis};
use std::str::FromStr;

use super::invert;
use crate::error::Error;

/// Structural family of the per-cluster covariance matrices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CovarFamily {
    /// Unconstrained symmetric matrix per cluster.
    Full,
    /// Diagonal matrix per cluster.
    Diag,
    /// Scalar multiple of the identity per cluster.
    Spher,
    /// One whole-dataset matrix shared by all clusters.
    Global,
}

impl FromStr for CovarFamily {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "full" => Ok(CovarFamily::Full),
            "diag" => Ok(CovarFamily::Diag),
            "spher" => Ok(CovarFamily::Spher),
            "global" => Ok(CovarFamily::Global),
            _ => Err(Error::InvalidParameter {
                name: "covar_type",
                message: "must be \"full\", \"diag\", \"spher\", or \"global\"",
            }),
        }
    }
}

/// Minimum member count a cluster needs before its covariance is estimated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MinMembers {
    /// Use the data dimensionality.
    Auto,
    /// Use a fixed count.
    Fixed(usize),
}

impl MinMembers {
    pub(crate) fn resolve(self, dims: usize) -> usize {
        match self {
            MinMembers::Auto => dims,
            MinMembers::Fixed(count) => count,
        }
    }
}

/// Computes and inverts per-cluster covariance matrices for one fit.
///
/// Holds the `Global` cache; all other families are stateless and
/// re-estimated every iteration.
#[derive(Debug)]
pub(crate) struct CovarianceEstimator {
    family: CovarFamily,
    tied: bool,
    min_members: usize,
    global: Option<Array2<f64>>,
    global_inv: Option<Array2<f64>>,
}

impl CovarianceEstimator {
    pub(crate) fn new(family: CovarFamily, tied: bool, min_members: usize) -> Self {
        Self {
            family,
            tied,
            min_members,
            global: None,
            global_inv: None,
        }
    }

    /// One covariance matrix per cluster (tied families broadcast the shared
    /// matrix into every slot).
    pub(crate) fn covariances(
        &mut self,
        data: &Array2<f64>,
        labels: &[usize],
        k: usize,
    ) -> Vec<Array2<f64>> {
        let d = data.ncols();

        if self.family == CovarFamily::Global {
            if self.global.is_none() {
                let mut covar = sample_covariance(data);
                if invert::determinant(&covar) <= 0.0 {
                    covar = Array2::eye(d);
                }
                self.global = Some(covar);
            }
            let covar = self.global.as_ref().cloned().unwrap_or_else(|| Array2::eye(d));
            return vec![covar; k];
        }

        let counts = bincount(labels, k);
        let mut covariances = vec![Array2::<f64>::eye(d); k];

        match (self.family, self.tied) {
            (CovarFamily::Full, false) => {
                for c in 0..k {
                    if counts[c] > self.min_members {
                        covariances[c] = biased_covariance(&member_rows(data, labels, c));
                    }
                }
            }
            (CovarFamily::Full, true) => {
                let mut shared = Array2::<f64>::zeros((d, d));
                for c in 0..k {
                    if counts[c] > self.min_members {
                        shared += &biased_covariance(&member_rows(data, labels, c));
                    }
                }
                shared /= k as f64;
                covariances = vec![shared; k];
            }
            (CovarFamily::Diag, false) => {
                for c in 0..k {
                    if counts[c] > self.min_members {
                        let mut covar = biased_covariance(&member_rows(data, labels, c));
                        zero_off_diagonal(&mut covar);
                        covariances[c] = covar;
                    }
                }
            }
            (CovarFamily::Diag, true) => {
                let mut shared = Array2::<f64>::zeros((d, d));
                for c in 0..k {
                    if counts[c] > self.min_members {
                        shared += &biased_covariance(&member_rows(data, labels, c));
                    }
                }
                shared /= k as f64;
                zero_off_diagonal(&mut shared);
                covariances = vec![shared; k];
            }
            (CovarFamily::Spher, false) => {
                for c in 0..k {
                    if counts[c] > self.min_members {
                        let variances = feature_variances(&member_rows(data, labels, c));
                        let scale = variances.mean().unwrap_or(0.0);
                        covariances[c] = Array2::eye(d) * scale;
                    }
                }
            }
            (CovarFamily::Spher, true) => {
                let mut accumulated = Array1::<f64>::zeros(d);
                for c in 0..k {
                    if counts[c] > self.min_members {
                        accumulated += &feature_variances(&member_rows(data, labels, c));
                    }
                }
                accumulated /= k as f64;
                let scale = accumulated.mean().unwrap_or(0.0);
                covariances = vec![Array2::eye(d) * scale; k];
            }
            (CovarFamily::Global, _) => unreachable!("handled above"),
        }

        // A cluster with fewer than d independent points yields a singular
        // estimate. Substitute the identity to force Euclidean behavior.
        for covar in covariances.iter_mut() {
            if invert::determinant(covar) <= 0.0 {
                *covar = Array2::eye(d);
            }
        }

        covariances
    }

    /// One inverse per cluster, derived from `covariances`. `Global` inverts
    /// once and reuses the cached result; tied families invert the shared
    /// matrix once and broadcast.
    pub(crate) fn inverses(&mut self, covariances: &[Array2<f64>], k: usize) -> Vec<Array2<f64>> {
        if self.family == CovarFamily::Global {
            if self.global_inv.is_none() {
                self.global_inv = Some(invert::invert(&covariances[0]));
            }
            let inv = self
                .global_inv
                .as_ref()
                .cloned()
                .unwrap_or_else(|| Array2::eye(covariances[0].nrows()));
            return vec![inv; k];
        }

        if self.tied {
            vec![invert::invert(&covariances[0]); k]
        } else {
            covariances.iter().map(invert::invert).collect()
        }
    }
}

/// Member count per cluster.
pub(crate) fn bincount(labels: &[usize], k: usize) -> Vec<usize> {
    let mut counts = vec![0usize; k];
    for &label in labels {
        counts[label] += 1;
    }
    counts
}

/// Rows of `data` currently labeled `cluster`.
fn member_rows(data: &Array2<f64>, labels: &[usize], cluster: usize) -> Array2<f64> {
    let indices: Vec<usize> = labels
        .iter()
        .enumerate()
        .filter(|(_, &label)| label == cluster)
        .map(|(i, _)| i)
        .collect();
    data.select(Axis(0), &indices)
}

/// Biased (divide-by-n) covariance of `points` about their own mean.
fn biased_covariance(points: &Array2<f64>) -> Array2<f64> {
    let n = points.nrows() as f64;
    let mean = points.sum_axis(Axis(0)) / n;
    let centered = points - &mean;
    centered.t().dot(&centered) / n
}

/// Sample (divide-by-n-1) covariance of the whole dataset.
fn sample_covariance(data: &Array2<f64>) -> Array2<f64> {
    let n = data.nrows() as f64;
    let mean = data.sum_axis(Axis(0)) / n;
    let centered = data - &mean;
    centered.t().dot(&centered) / (n - 1.0)
}

/// Biased per-feature variance of `points`.
fn feature_variances(points: &Array2<f64>) -> Array1<f64> {
    let n = points.nrows() as f64;
    let mean = points.sum_axis(Axis(0)) / n;
    let centered = points - &mean;
    centered.mapv(|v| v * v).sum_axis(Axis(0)) / n
}

fn zero_off_diagonal(matrix: &mut Array2<f64>) {
    let d = matrix.nrows();
    for i in 0..d {
        for j in 0..d {
            if i != j {
                matrix[[i, j]] = 0.0;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn two_cluster_data() -> (Array2<f64>, Vec<usize>) {
        let data = array![
            [0.0, 0.0],
            [1.0, 0.5],
            [0.5, 1.0],
            [10.0, 10.0],
            [11.0, 10.5],
            [10.5, 11.0],
        ];
        let labels = vec![0, 0, 0, 1, 1, 1];
        (data, labels)
    }

    #[test]
    fn test_family_from_str() {
        assert_eq!("full".parse::<CovarFamily>().unwrap(), CovarFamily::Full);
        assert_eq!("spher".parse::<CovarFamily>().unwrap(), CovarFamily::Spher);
        assert!("banana".parse::<CovarFamily>().is_err());
    }

    #[test]
    fn test_full_untied_shapes() {
        let (data, labels) = two_cluster_data();
        let mut est = CovarianceEstimator::new(CovarFamily::Full, false, 2);
        let covs = est.covariances(&data, &labels, 2);
        assert_eq!(covs.len(), 2);
        for cov in &covs {
            assert_eq!(cov.dim(), (2, 2));
            // Symmetric by construction.
            assert!((cov[[0, 1]] - cov[[1, 0]]).abs() < 1e-12);
        }
    }

    #[test]
    fn test_small_cluster_keeps_identity() {
        // Both clusters have 3 members; threshold 3 means nk > 3 never holds.
        let (data, labels) = two_cluster_data();
        let mut est = CovarianceEstimator::new(CovarFamily::Full, false, 3);
        let covs = est.covariances(&data, &labels, 2);
        for cov in &covs {
            assert_eq!(cov, &Array2::eye(2));
        }
    }

    #[test]
    fn test_degenerate_cluster_falls_back_to_identity() {
        // Cluster 0 is three collinear points: singular covariance.
        let data = array![
            [0.0, 0.0],
            [1.0, 1.0],
            [2.0, 2.0],
            [10.0, 10.0],
            [11.0, 10.5],
            [10.5, 11.0],
        ];
        let labels = vec![0, 0, 0, 1, 1, 1];
        let mut est = CovarianceEstimator::new(CovarFamily::Full, false, 2);
        let covs = est.covariances(&data, &labels, 2);
        assert_eq!(covs[0], Array2::eye(2));
        assert_ne!(covs[1], Array2::eye(2));
    }

    #[test]
    fn test_tied_broadcasts_one_matrix() {
        let (data, labels) = two_cluster_data();
        let mut est = CovarianceEstimator::new(CovarFamily::Full, true, 2);
        let covs = est.covariances(&data, &labels, 2);
        assert_eq!(covs[0], covs[1]);
    }

    #[test]
    fn test_diag_zeroes_off_diagonal() {
        let (data, labels) = two_cluster_data();
        let mut est = CovarianceEstimator::new(CovarFamily::Diag, false, 2);
        let covs = est.covariances(&data, &labels, 2);
        for cov in &covs {
            assert_eq!(cov[[0, 1]], 0.0);
            assert_eq!(cov[[1, 0]], 0.0);
            assert!(cov[[0, 0]] > 0.0);
        }
    }

    #[test]
    fn test_spher_is_scalar_identity() {
        let (data, labels) = two_cluster_data();
        let mut est = CovarianceEstimator::new(CovarFamily::Spher, false, 2);
        let covs = est.covariances(&data, &labels, 2);
        for cov in &covs {
            assert!((cov[[0, 0]] - cov[[1, 1]]).abs() < 1e-12);
            assert_eq!(cov[[0, 1]], 0.0);
        }
    }

    #[test]
    fn test_global_is_cached_and_label_independent() {
        let (data, labels) = two_cluster_data();
        let mut est = CovarianceEstimator::new(CovarFamily::Global, false, 2);
        let first = est.covariances(&data, &labels, 2);
        let shuffled = vec![1, 0, 1, 0, 1, 0];
        let second = est.covariances(&data, &shuffled, 2);
        assert_eq!(first, second);
        assert_eq!(first[0], first[1]);
    }

    #[test]
    fn test_inverses_tied_shares_one_inverse() {
        let (data, labels) = two_cluster_data();
        let mut est = CovarianceEstimator::new(CovarFamily::Full, true, 2);
        let covs = est.covariances(&data, &labels, 2);
        let invs = est.inverses(&covs, 2);
        assert_eq!(invs[0], invs[1]);
    }

    #[test]
    fn test_bincount() {
        assert_eq!(bincount(&[0, 1, 1, 2], 4), vec![1, 2, 1, 0]);
    }
}
