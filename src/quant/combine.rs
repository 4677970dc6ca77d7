use crate::error::{MatmulError, Result};
use crate::matrix::DenseMatrix;
use crate::quant::outlier::OutlierSet;
use rayon::prelude::*;

/// Copy the rows of `b` listed in `indices`, in order.
pub fn gather_rows(b: &DenseMatrix, indices: &[usize]) -> DenseMatrix {
    DenseMatrix::from_fn(indices.len(), b.cols(), |r, j| b.get(indices[r], j))
}

/// Add the full-precision outlier product `A_outliers · B` into `result`.
pub fn combine(result: &mut DenseMatrix, outliers: &OutlierSet, b: &DenseMatrix) -> Result<()> {
    if outliers.is_empty() { return Ok(()); }
    if outliers.shape().1 != b.rows() {
        return Err(MatmulError::shape("combine", outliers.shape(), b.shape()));
    }
    let rows = gather_rows(b, outliers.columns());
    combine_gathered(result, outliers, &rows)
}

/// Like [`combine`] but with only the needed rows of B, ordered as
/// `outliers.columns()`.
pub fn combine_gathered(result: &mut DenseMatrix, outliers: &OutlierSet, b_rows: &DenseMatrix) -> Result<()> {
    if outliers.is_empty() { return Ok(()); }
    let cols = outliers.columns();
    if b_rows.rows() != cols.len() || b_rows.cols() != result.cols() || outliers.shape().0 != result.rows() {
        return Err(MatmulError::shape("combine", outliers.shape(), b_rows.shape()));
    }
    let n = result.cols();
    if n == 0 { return Ok(()); }
    result.data_mut().par_chunks_mut(n).enumerate().for_each(|(i, out)| {
        for e in outliers.row_entries(i) {
            // columns are sorted, and every entry's column is listed
            let Ok(pos) = cols.binary_search(&e.col) else { continue };
            for (o, &bv) in out.iter_mut().zip(b_rows.row(pos)) { *o += e.value * bv; }
        }
    });
    log::trace!("combined {} outlier values into {}x{} result", outliers.len(), result.rows(), n);
    Ok(())
}

/// Add `A_retained · S_B` for weight-side outliers `S_B` (k x n).
pub fn add_weight_outliers(result: &mut DenseMatrix, a_retained: &DenseMatrix, outliers_b: &OutlierSet) -> Result<()> {
    if outliers_b.is_empty() { return Ok(()); }
    let (k, n) = outliers_b.shape();
    if a_retained.cols() != k || result.shape() != (a_retained.rows(), n) {
        return Err(MatmulError::shape("add_weight_outliers", a_retained.shape(), (k, n)));
    }
    if n == 0 { return Ok(()); }
    result.data_mut().par_chunks_mut(n).enumerate().for_each(|(i, out)| {
        let a = a_retained.row(i);
        for e in outliers_b.entries() { out[e.col] += a[e.row] * e.value; }
    });
    Ok(())
}
