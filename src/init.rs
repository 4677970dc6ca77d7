//! Random matrix initializers used by the bench binary, benches and tests.

use crate::matrix::DenseMatrix;
use rand::Rng;
use rand_distr::{Distribution, StandardNormal, Uniform};

/// Entries drawn from N(0, 1).
pub fn randn<R: Rng + ?Sized>(rows: usize, cols: usize, rng: &mut R) -> DenseMatrix {
    DenseMatrix::from_fn(rows, cols, |_, _| {
        let v: f32 = StandardNormal.sample(rng);
        v
    })
}

/// Xavier/Glorot uniform: U(-a, a) with `a = sqrt(6 / (fan_in + fan_out))`.
pub fn xavier_uniform<R: Rng + ?Sized>(rows: usize, cols: usize, rng: &mut R) -> DenseMatrix {
    let bound = (6.0 / (rows + cols).max(1) as f32).sqrt();
    let dist = Uniform::new_inclusive(-bound, bound);
    DenseMatrix::from_fn(rows, cols, |_, _| dist.sample(rng))
}

/// Overwrite whole columns with `value`, the way outlier activations are
/// injected when exercising decomposition.
pub fn fill_columns(m: &mut DenseMatrix, columns: &[usize], value: f32) {
    for i in 0..m.rows() {
        let row = m.row_mut(i);
        for &j in columns { row[j] = value; }
    }
}

/// `count` column indices drawn with replacement from `0..cols`.
pub fn random_columns<R: Rng + ?Sized>(cols: usize, count: usize, rng: &mut R) -> Vec<usize> {
    if cols == 0 { return Vec::new(); }
    (0..count).map(|_| rng.gen_range(0..cols)).collect()
}
