//! Robust inversion of covariance matrices.
//!
//! A cluster with too few distinct points relative to the dimensionality
//! produces a rank-deficient covariance matrix. Rather than failing, this
//! module falls back to a bounded pseudo-inverse built from the
//! eigen-decomposition:
//!
//! ```text
//! Σ = V diag(e) Vᵗ    →    Σ⁺ = V diag(1 / max(eᵢ, s)) Vᵗ
//! ```
//!
//! where `s` is the smallest strictly positive eigenvalue. Eigenvalues are
//! taken in absolute value first (sign flips from numerical noise are
//! discarded), so the surrogate is always symmetric and bounded.
//!
//! # References
//!
//! - Hadi (1992). "Identifying Multiple Outliers in Multivariate Data"

use nalgebra::{DMatrix, SymmetricEigen};
use ndarray::Array2;
use std::cmp::Ordering;

/// Determinant of a square matrix.
pub(crate) fn determinant(matrix: &Array2<f64>) -> f64 {
    to_dmatrix(matrix).determinant()
}

/// Invert a D×D covariance matrix.
///
/// Full-rank matrices get the standard inverse; rank-deficient matrices get
/// the bounded pseudo-inverse. Never fails on singular input.
pub(crate) fn invert(matrix: &Array2<f64>) -> Array2<f64> {
    let d = matrix.nrows();
    let m = to_dmatrix(matrix);

    if rank(&m) == d {
        if let Some(inv) = m.clone().try_inverse() {
            return from_dmatrix(&inv);
        }
    }

    pseudo_inverse(m)
}

/// Numerical rank via singular values, with a numpy-style tolerance.
fn rank(m: &DMatrix<f64>) -> usize {
    let singular = m.clone().singular_values();
    let largest = singular.iter().cloned().fold(0.0f64, f64::max);
    let tol = largest * m.nrows() as f64 * f64::EPSILON;
    singular.iter().filter(|&&s| s > tol).count()
}

/// Eigen-based pseudo-inverse with eigenvalues floored at the smallest
/// strictly positive one.
fn pseudo_inverse(m: DMatrix<f64>) -> Array2<f64> {
    let d = m.nrows();
    let eig = SymmetricEigen::new(m);
    let magnitudes: Vec<f64> = eig.eigenvalues.iter().map(|e| e.abs()).collect();

    let mut order: Vec<usize> = (0..d).collect();
    order.sort_by(|&a, &b| {
        magnitudes[b]
            .partial_cmp(&magnitudes[a])
            .unwrap_or(Ordering::Equal)
    });

    let floor = magnitudes
        .iter()
        .filter(|&&e| e > 0.0)
        .cloned()
        .fold(f64::INFINITY, f64::min);
    if !floor.is_finite() {
        // All eigenvalues are zero: no direction carries information.
        return Array2::eye(d);
    }

    let mut vectors = DMatrix::zeros(d, d);
    let mut weights = DMatrix::zeros(d, d);
    for (col, &idx) in order.iter().enumerate() {
        vectors.set_column(col, &eig.eigenvectors.column(idx));
        weights[(col, col)] = 1.0 / magnitudes[idx].max(floor);
    }

    from_dmatrix(&(&vectors * weights * vectors.transpose()))
}

fn to_dmatrix(a: &Array2<f64>) -> DMatrix<f64> {
    DMatrix::from_fn(a.nrows(), a.ncols(), |i, j| a[[i, j]])
}

fn from_dmatrix(m: &DMatrix<f64>) -> Array2<f64> {
    Array2::from_shape_fn((m.nrows(), m.ncols()), |(i, j)| m[(i, j)])
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn max_abs_diff(a: &Array2<f64>, b: &Array2<f64>) -> f64 {
        a.iter()
            .zip(b.iter())
            .map(|(x, y)| (x - y).abs())
            .fold(0.0, f64::max)
    }

    #[test]
    fn test_invert_identity() {
        let eye = Array2::eye(3);
        let inv = invert(&eye);
        assert!(max_abs_diff(&inv, &Array2::eye(3)) < 1e-12);
    }

    #[test]
    fn test_invert_full_rank() {
        let m = array![[4.0, 1.0], [1.0, 3.0]];
        let inv = invert(&m);
        let product = m.dot(&inv);
        assert!(max_abs_diff(&product, &Array2::eye(2)) < 1e-10);
    }

    #[test]
    fn test_determinant() {
        let m = array![[2.0, 0.0], [0.0, 3.0]];
        assert!((determinant(&m) - 6.0).abs() < 1e-12);
    }

    #[test]
    fn test_singular_pseudo_inverse() {
        // Rank-1 matrix: eigenvalues 2 and 0, so both get floored at 2 and
        // the surrogate is exactly 0.5 * I.
        let m = array![[1.0, 1.0], [1.0, 1.0]];
        let inv = invert(&m);
        let expected = array![[0.5, 0.0], [0.0, 0.5]];
        assert!(max_abs_diff(&inv, &expected) < 1e-10);
    }

    #[test]
    fn test_singular_inverse_is_symmetric_and_finite() {
        let m = array![[1.0, 2.0, 3.0], [2.0, 4.0, 6.0], [3.0, 6.0, 9.0]];
        let inv = invert(&m);
        for i in 0..3 {
            for j in 0..3 {
                assert!(inv[[i, j]].is_finite());
                assert!((inv[[i, j]] - inv[[j, i]]).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn test_zero_matrix_falls_back_to_identity() {
        let m = Array2::zeros((2, 2));
        let inv = invert(&m);
        assert!(max_abs_diff(&inv, &Array2::eye(2)) < 1e-12);
    }
}
