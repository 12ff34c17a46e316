//! Clustering evaluation metrics.
//!
//! Measures for assessing a fitted partition against ground truth labels.
//! AIC/BIC compare models without ground truth; these metrics are for the
//! cases where the true grouping is known (benchmarks, synthetic data).
//!
//! | Metric | Range | Best | Properties |
//! |--------|-------|------|------------|
//! | [`nmi`] | [0, 1] | 1 | Normalized, comparable across datasets |
//! | [`ari`] | [-1, 1] | 1 | Adjusted for chance |
//! | [`purity`] | [0, 1] | 1 | Simple, biased toward many clusters |
//!
//! # References
//!
//! - Hubert & Arabie (1985). "Comparing partitions" (ARI)
//! - Strehl & Ghosh (2002). "Cluster ensembles" (NMI)

use std::collections::HashMap;

/// Normalized Mutual Information between two clusterings.
///
/// ```text
/// NMI(U, V) = 2 * I(U; V) / (H(U) + H(V))
/// ```
///
/// where I(U; V) is mutual information and H is entropy. Returns a score in
/// [0, 1]; 1 indicates perfect agreement (up to label permutation).
///
/// # Example
///
/// ```rust
/// use selectk::metrics::nmi;
///
/// let pred = [0, 0, 1, 1];
/// let truth = [1, 1, 0, 0];
/// assert!((nmi(&pred, &truth) - 1.0).abs() < 0.01);
/// ```
pub fn nmi(pred: &[usize], truth: &[usize]) -> f64 {
    if pred.len() != truth.len() || pred.is_empty() {
        return 0.0;
    }

    let n = pred.len() as f64;
    let (joint, _) = build_contingency_table(pred, truth);

    let mut count_pred = HashMap::new();
    let mut count_truth = HashMap::new();
    for &p in pred {
        *count_pred.entry(p).or_insert(0usize) += 1;
    }
    for &t in truth {
        *count_truth.entry(t).or_insert(0usize) += 1;
    }

    let entropy = |counts: &HashMap<usize, usize>| -> f64 {
        counts
            .values()
            .map(|&c| {
                let p = c as f64 / n;
                if p > 0.0 {
                    -p * p.ln()
                } else {
                    0.0
                }
            })
            .sum()
    };
    let h_pred = entropy(&count_pred);
    let h_truth = entropy(&count_truth);

    let mut mi = 0.0;
    for (&(p, t), &count) in &joint {
        let p_joint = count as f64 / n;
        let p_p = *count_pred.get(&p).unwrap_or(&0) as f64 / n;
        let p_t = *count_truth.get(&t).unwrap_or(&0) as f64 / n;
        if p_joint > 0.0 && p_p > 0.0 && p_t > 0.0 {
            mi += p_joint * (p_joint / (p_p * p_t)).ln();
        }
    }

    let denom = h_pred + h_truth;
    if denom > 0.0 {
        2.0 * mi / denom
    } else {
        1.0 // Both clusterings are constant.
    }
}

/// Adjusted Rand Index between two clusterings.
///
/// The corrected-for-chance version of the Rand Index: 0 for random
/// agreement, 1 for perfect agreement.
///
/// # Example
///
/// ```rust
/// use selectk::metrics::ari;
///
/// let pred = [0, 0, 1, 1];
/// let truth = [0, 0, 1, 1];
/// assert!((ari(&pred, &truth) - 1.0).abs() < 0.01);
/// ```
pub fn ari(pred: &[usize], truth: &[usize]) -> f64 {
    if pred.len() != truth.len() || pred.is_empty() {
        return 0.0;
    }

    let (joint, n) = build_contingency_table(pred, truth);

    let mut row_sums = HashMap::new();
    let mut col_sums = HashMap::new();
    for (&(p, t), &count) in &joint {
        *row_sums.entry(p).or_insert(0usize) += count;
        *col_sums.entry(t).or_insert(0usize) += count;
    }

    let sum_comb_ij: f64 = joint.values().map(|&c| comb2(c) as f64).sum();
    let sum_comb_a: f64 = row_sums.values().map(|&a| comb2(a) as f64).sum();
    let sum_comb_b: f64 = col_sums.values().map(|&b| comb2(b) as f64).sum();
    let comb_n = comb2(n) as f64;

    let expected = sum_comb_a * sum_comb_b / comb_n;
    let max_index = (sum_comb_a + sum_comb_b) / 2.0;

    let denom = max_index - expected;
    if denom.abs() < 1e-10 {
        return 1.0; // Both clusterings identical.
    }

    (sum_comb_ij - expected) / denom
}

/// Purity of a clustering with respect to ground truth.
///
/// For each predicted cluster, take its most common true label; purity is
/// the fraction of points covered by those majorities. Biased toward
/// over-clustering (1.0 when every point is its own cluster).
pub fn purity(pred: &[usize], truth: &[usize]) -> f64 {
    if pred.len() != truth.len() || pred.is_empty() {
        return 0.0;
    }

    let n = pred.len();
    let (joint, _) = build_contingency_table(pred, truth);

    let mut cluster_maxes: HashMap<usize, usize> = HashMap::new();
    for (&(p, _), &count) in &joint {
        let current = cluster_maxes.entry(p).or_insert(0);
        *current = (*current).max(count);
    }

    let correct: usize = cluster_maxes.values().sum();
    correct as f64 / n as f64
}

fn build_contingency_table(
    pred: &[usize],
    truth: &[usize],
) -> (HashMap<(usize, usize), usize>, usize) {
    let mut table = HashMap::new();
    for (&p, &t) in pred.iter().zip(truth.iter()) {
        *table.entry((p, t)).or_insert(0) += 1;
    }
    (table, pred.len())
}

fn comb2(n: usize) -> usize {
    if n < 2 {
        0
    } else {
        n * (n - 1) / 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nmi_perfect() {
        let pred = [0, 0, 1, 1, 2, 2];
        let truth = [0, 0, 1, 1, 2, 2];
        assert!((nmi(&pred, &truth) - 1.0).abs() < 0.01);
    }

    #[test]
    fn test_nmi_permuted_labels() {
        let pred = [1, 1, 0, 0, 2, 2];
        let truth = [0, 0, 1, 1, 2, 2];
        assert!((nmi(&pred, &truth) - 1.0).abs() < 0.01);
    }

    #[test]
    fn test_nmi_disagreement_is_low() {
        let pred = [0, 1, 0, 1];
        let truth = [0, 0, 1, 1];
        assert!(nmi(&pred, &truth) < 0.5);
    }

    #[test]
    fn test_ari_perfect() {
        let pred = [0, 0, 1, 1];
        let truth = [0, 0, 1, 1];
        assert!((ari(&pred, &truth) - 1.0).abs() < 0.01);
    }

    #[test]
    fn test_purity_perfect() {
        let pred = [0, 0, 1, 1];
        let truth = [0, 0, 1, 1];
        assert!((purity(&pred, &truth) - 1.0).abs() < 0.01);
    }

    #[test]
    fn test_purity_overclustering() {
        // Each point its own cluster: every cluster is trivially pure.
        let pred = [0, 1, 2, 3];
        let truth = [0, 0, 1, 1];
        assert!((purity(&pred, &truth) - 1.0).abs() < 0.01);
    }

    #[test]
    fn test_length_mismatch_returns_zero() {
        assert_eq!(nmi(&[0, 1], &[0]), 0.0);
        assert_eq!(ari(&[0, 1], &[0]), 0.0);
        assert_eq!(purity(&[0, 1], &[0]), 0.0);
    }
}
