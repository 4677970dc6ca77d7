use crate::matrix::DenseMatrix;
use serde::Serialize;

/// `|actual - expected| <= atol + rtol * |expected|`.
#[inline]
pub fn is_close(actual: f32, expected: f32, atol: f32, rtol: f32) -> bool {
    if actual == expected { return true; }
    (actual - expected).abs() <= atol + rtol * expected.abs()
}

/// Number of elements outside the tolerance.
///
/// # Panics
///
/// If the shapes differ. These helpers compare a result against its own
/// reference, so a mismatch is a bug in the caller.
pub fn count_not_close(actual: &DenseMatrix, expected: &DenseMatrix, atol: f32, rtol: f32) -> usize {
    assert_eq!(actual.shape(), expected.shape(), "compared matrices differ in shape");
    actual.data().iter().zip(expected.data()).filter(|&(&a, &e)| !is_close(a, e, atol, rtol)).count()
}

pub fn fraction_not_close(actual: &DenseMatrix, expected: &DenseMatrix, atol: f32, rtol: f32) -> f64 {
    if actual.is_empty() { return 0.0; }
    count_not_close(actual, expected, atol, rtol) as f64 / actual.len() as f64
}

pub fn all_close(actual: &DenseMatrix, expected: &DenseMatrix, atol: f32, rtol: f32) -> bool {
    count_not_close(actual, expected, atol, rtol) == 0
}

pub fn mean_abs_error(actual: &DenseMatrix, expected: &DenseMatrix) -> f64 {
    if actual.is_empty() { return 0.0; }
    let sum: f64 = actual.data().iter().zip(expected.data()).map(|(a, e)| (a - e).abs() as f64).sum();
    sum / actual.len() as f64
}

/// Error summary of one quantized result against its dense reference.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ErrorReport {
    pub mean_abs: f64,
    /// Fraction outside atol 0.01, rtol 0.1.
    pub loose: f64,
    /// Fraction outside atol 0.035, rtol 0.2.
    pub wide: f64,
}

impl ErrorReport {
    pub fn measure(actual: &DenseMatrix, expected: &DenseMatrix) -> Self {
        Self {
            mean_abs: mean_abs_error(actual, expected),
            loose: fraction_not_close(actual, expected, 0.01, 0.1),
            wide: fraction_not_close(actual, expected, 0.035, 0.2),
        }
    }
}
