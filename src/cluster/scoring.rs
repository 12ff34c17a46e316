//! Penalized-likelihood scoring for fitted models.
//!
//! A fitted partition is scored by its Gaussian log-likelihood minus a
//! complexity penalty, so fits with different k or covariance families can be
//! compared directly:
//!
//! ```text
//! AIC = LL − (0.5 + r)
//! BIC = LL − (0.5 + r·ln n)
//! ```
//!
//! where `r` counts the free parameters of the configuration. Note the BIC
//! penalty is `r·ln n`, not the conventional `r·ln(n)/2`; callers selecting
//! the best model across fits rely on this exact form.
//!
//! A NaN or infinite log-likelihood is a fatal condition
//! ([`Error::NonFiniteLikelihood`]): the fit cannot be scored and the caller
//! is expected to fail the owning task rather than retry here.

use std::collections::HashSet;

use ndarray::Array2;

use super::covariance::{bincount, CovarFamily, CovarianceEstimator};
use super::invert;
use super::kmeans::{euclidean, mahalanobis_squared, CovKmeans, FitResult, Metric};
use super::traits::Clustering;
use crate::error::{Error, Result};

impl CovKmeans {
    /// Akaike information criterion of a fitted state.
    pub fn aic(&self, data: &Array2<f64>, fit: &FitResult) -> Result<f64> {
        let penalty = 0.5 + self.free_parameters(data, fit);
        if self.use_rss() {
            let n = data.nrows() as f64;
            Ok(n * (self.rss(data, fit) / n).ln() - penalty)
        } else {
            Ok(self.log_likelihood(data, fit)? - penalty)
        }
    }

    /// Bayesian information criterion of a fitted state.
    pub fn bic(&self, data: &Array2<f64>, fit: &FitResult) -> Result<f64> {
        let n = data.nrows() as f64;
        let penalty = 0.5 + self.free_parameters(data, fit) * n.ln();
        if self.use_rss() {
            Ok(n * (self.rss(data, fit) / n).ln() - penalty)
        } else {
            Ok(self.log_likelihood(data, fit)? - penalty)
        }
    }

    /// Gaussian log-likelihood of the fitted partition.
    pub fn log_likelihood(&self, data: &Array2<f64>, fit: &FitResult) -> Result<f64> {
        let mut estimator = self.estimator_for(data.ncols());
        log_likelihood(
            data,
            &fit.labels,
            &fit.centers,
            &mut estimator,
            self.n_clusters(),
        )
    }

    /// Number of independent scalar parameters this configuration can vary.
    pub fn free_parameters(&self, data: &Array2<f64>, fit: &FitResult) -> f64 {
        free_parameters(
            &fit.labels,
            data.ncols(),
            self.metric(),
            self.family(),
            self.tied(),
        )
    }

    /// Residual sum of squares: squared configured-metric distance of every
    /// point to its own cluster center. Non-finite contributions are skipped.
    pub fn rss(&self, data: &Array2<f64>, fit: &FitResult) -> f64 {
        let k = self.n_clusters();
        let inverses = match self.metric() {
            Metric::Euclidean => None,
            Metric::Mahalanobis => {
                let mut estimator = self.estimator_for(data.ncols());
                let covariances = estimator.covariances(data, &fit.labels, k);
                Some(estimator.inverses(&covariances, k))
            }
        };

        let mut total = 0.0;
        for (i, &label) in fit.labels.iter().enumerate() {
            let point = data.row(i);
            let center = fit.centers.row(label);
            let squared = match &inverses {
                None => euclidean(&point, &center).powi(2),
                Some(inv) => mahalanobis_squared(&point, &center, &inv[label]),
            };
            if squared.is_finite() {
                total += squared;
            }
        }
        total
    }
}

/// Log-likelihood of a partition under per-cluster Gaussians:
///
/// ```text
/// Σₖ nk·(ln(nk/n) − d/2·ln 2π − ln|Σₖ|/2) − ½·Σ (squared weighted distances)
/// ```
///
/// NaN member distances are excluded from the inner sum. Errors when the
/// result is NaN or infinite (including the empty-cluster case, where
/// `ln(nk/n)` diverges).
pub(crate) fn log_likelihood(
    data: &Array2<f64>,
    labels: &[usize],
    centers: &Array2<f64>,
    estimator: &mut CovarianceEstimator,
    k: usize,
) -> Result<f64> {
    let n = data.nrows() as f64;
    let d = data.ncols() as f64;
    let counts = bincount(labels, k);
    let covariances = estimator.covariances(data, labels, k);
    let inverses = estimator.inverses(&covariances, k);

    let half_log_tau = 0.5 * (2.0 * std::f64::consts::PI).ln();

    let mut total = 0.0;
    for c in 0..k {
        if counts[c] == 0 {
            return Err(Error::NonFiniteLikelihood);
        }
        let nk = counts[c] as f64;
        let det = invert::determinant(&covariances[c]);
        let cluster_term = nk * ((nk / n).ln() - d * half_log_tau - 0.5 * det.abs().ln());

        let mut quad_total = 0.0;
        for (i, &label) in labels.iter().enumerate() {
            if label != c {
                continue;
            }
            let quad = mahalanobis_squared(&data.row(i), &centers.row(c), &inverses[c]);
            if !quad.is_nan() {
                quad_total += quad;
            }
        }

        total += cluster_term - 0.5 * quad_total;
    }

    if total.is_nan() || total.is_infinite() {
        return Err(Error::NonFiniteLikelihood);
    }
    Ok(total)
}

/// Free-parameter count `r` for a fitted configuration.
///
/// `K` is the number of distinct labels actually used (a converged fit uses
/// all k, but a degenerate one may not). The base `(K-1) + K·d` covers the
/// mixing proportions and centers; the metric/structure term covers the
/// covariance parameters.
pub(crate) fn free_parameters(
    labels: &[usize],
    dims: usize,
    metric: Metric,
    family: CovarFamily,
    tied: bool,
) -> f64 {
    let distinct: HashSet<usize> = labels.iter().cloned().collect();
    let k = distinct.len() as f64;
    let d = dims as f64;

    let mut r = (k - 1.0) + k * d;
    match metric {
        Metric::Euclidean => r += 1.0,
        Metric::Mahalanobis => {
            r += match (family, tied) {
                (CovarFamily::Full, true) => d * (d + 1.0) * 0.5,
                (CovarFamily::Full, false) => d * (d + 1.0) * 0.5 * k,
                (CovarFamily::Diag, true) => d,
                (CovarFamily::Diag, false) => d * k,
                (CovarFamily::Spher, true) => 1.0,
                (CovarFamily::Spher, false) => k,
                // The global matrix is fixed by the data, not fitted.
                (CovarFamily::Global, _) => 0.0,
            };
        }
    }
    r
}

#[cfg(test)]
mod tests {
    use super::super::covariance::MinMembers;
    use super::*;
    use ndarray::array;

    fn fitted_model() -> (Array2<f64>, CovKmeans, FitResult) {
        let data = array![
            [0.0, 0.0],
            [0.2, 0.1],
            [0.1, 0.3],
            [0.3, 0.2],
            [10.0, 10.0],
            [10.2, 10.1],
            [10.1, 10.3],
            [10.3, 10.2],
        ];
        let model = CovKmeans::new(2)
            .with_seed(42)
            .with_n_init(3)
            .with_min_members(MinMembers::Fixed(2));
        let fit = model.fit(&data).unwrap();
        (data, model, fit)
    }

    #[test]
    fn test_aic_formula_exact() {
        let (data, model, fit) = fitted_model();
        let ll = model.log_likelihood(&data, &fit).unwrap();
        let r = model.free_parameters(&data, &fit);
        assert_eq!(model.aic(&data, &fit).unwrap(), ll - (0.5 + r));
    }

    #[test]
    fn test_bic_formula_exact() {
        let (data, model, fit) = fitted_model();
        let ll = model.log_likelihood(&data, &fit).unwrap();
        let r = model.free_parameters(&data, &fit);
        let n = data.nrows() as f64;
        assert_eq!(model.bic(&data, &fit).unwrap(), ll - (0.5 + r * n.ln()));
    }

    #[test]
    fn test_fit_log_likelihood_matches_scorer() {
        let (data, model, fit) = fitted_model();
        let ll = model.log_likelihood(&data, &fit).unwrap();
        assert!((ll - fit.log_likelihood).abs() < 1e-9);
    }

    #[test]
    fn test_bic_penalizes_harder_than_aic() {
        // ln(8) > 1, so the BIC penalty dominates for any r >= 1.
        let (data, model, fit) = fitted_model();
        assert!(model.bic(&data, &fit).unwrap() < model.aic(&data, &fit).unwrap());
    }

    #[test]
    fn test_tied_never_exceeds_untied() {
        let labels = vec![0, 0, 1, 1, 2, 2];
        for family in [CovarFamily::Full, CovarFamily::Diag, CovarFamily::Spher] {
            let tied = free_parameters(&labels, 4, Metric::Mahalanobis, family, true);
            let untied = free_parameters(&labels, 4, Metric::Mahalanobis, family, false);
            assert!(tied <= untied, "{family:?}: tied {tied} > untied {untied}");
        }
    }

    #[test]
    fn test_free_parameters_single_cluster() {
        // With one cluster the (K-1) term vanishes: r = d + structure term.
        let labels = vec![0, 0, 0, 0];
        let d = 2;
        assert_eq!(
            free_parameters(&labels, d, Metric::Euclidean, CovarFamily::Full, false),
            2.0 + 1.0
        );
        assert_eq!(
            free_parameters(&labels, d, Metric::Mahalanobis, CovarFamily::Full, false),
            2.0 + 3.0
        );
        assert_eq!(
            free_parameters(&labels, d, Metric::Mahalanobis, CovarFamily::Spher, true),
            2.0 + 1.0
        );
    }

    #[test]
    fn test_free_parameters_counts_distinct_labels() {
        // k=3 configured but only 2 labels in use: K must be 2.
        let labels = vec![0, 0, 2, 2];
        let r = free_parameters(&labels, 2, Metric::Euclidean, CovarFamily::Full, false);
        assert_eq!(r, 1.0 + 4.0 + 1.0);
    }

    #[test]
    fn test_global_family_adds_no_covariance_parameters() {
        let labels = vec![0, 0, 1, 1];
        let global = free_parameters(&labels, 3, Metric::Mahalanobis, CovarFamily::Global, false);
        assert_eq!(global, 1.0 + 6.0);
    }

    #[test]
    fn test_empty_cluster_is_non_finite() {
        let (data, model, fit) = fitted_model();
        // Collapse every point into cluster 0; cluster 1 is empty and
        // ln(0/n) diverges.
        let broken = FitResult {
            labels: vec![0; data.nrows()],
            ..fit
        };
        assert_eq!(
            model.log_likelihood(&data, &broken),
            Err(Error::NonFiniteLikelihood)
        );
    }

    #[test]
    fn test_rss_euclidean_matches_manual_sum() {
        let data = array![[0.0, 0.0], [2.0, 0.0], [10.0, 0.0], [12.0, 0.0]];
        let model = CovKmeans::new(2)
            .with_seed(1)
            .with_n_init(1)
            .with_metric(Metric::Euclidean);
        let fit = model.fit(&data).unwrap();

        // Centers are the pair midpoints, so every point is 1 away.
        assert!((model.rss(&data, &fit) - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_rss_scoring_formula() {
        let (data, _, _) = fitted_model();
        let model = CovKmeans::new(2)
            .with_seed(42)
            .with_n_init(3)
            .with_min_members(MinMembers::Fixed(2))
            .with_rss_scoring(true);
        let fit = model.fit(&data).unwrap();

        let n = data.nrows() as f64;
        let r = model.free_parameters(&data, &fit);
        let expected = n * (model.rss(&data, &fit) / n).ln() - (0.5 + r);
        assert_eq!(model.aic(&data, &fit).unwrap(), expected);
    }
}
