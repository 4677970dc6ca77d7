//! Integer GEMM on row-quantized operands and its float rescale.

use crate::error::{MatmulError, Result};
use crate::matrix::DenseMatrix;
use crate::quant::quantize::{Int8View, QuantizedMatrix, QMAX};
use rayon::prelude::*;

/// Largest inner dimension for which an i32 accumulator cannot overflow:
/// every product is at most 127 * 127 in magnitude.
pub const MAX_INNER_DIM: usize = (i32::MAX / (127 * 127)) as usize;

#[inline]
pub fn dot_i8(a: &[i8], b: &[i8]) -> i32 {
    let mut acc: i32 = 0;
    for i in 0..a.len() { acc += (a[i] as i32) * (b[i] as i32); }
    acc
}

fn check_operands(a: &Int8View<'_>, bt: &Int8View<'_>) -> Result<()> {
    if a.cols != bt.cols {
        // report B in its logical k x n orientation
        return Err(MatmulError::shape("int8_matmul", (a.rows, a.cols), (bt.cols, bt.rows)));
    }
    if a.cols > MAX_INNER_DIM {
        return Err(MatmulError::InnerDimTooLarge { inner: a.cols, max: MAX_INNER_DIM });
    }
    Ok(())
}

/// Raw `m x n` integer product of `a` (m x k) with `btᵀ`, where `bt` holds B as n x k.
pub fn int8_product_nt(a: Int8View<'_>, bt: Int8View<'_>) -> Result<Vec<i32>> {
    check_operands(&a, &bt)?;
    let n = bt.rows;
    let mut out = vec![0i32; a.rows * n];
    if n == 0 { return Ok(out); }
    out.par_chunks_mut(n).enumerate().for_each(|(i, row)| {
        let ar = a.row(i);
        for (j, o) in row.iter_mut().enumerate() { *o = dot_i8(ar, bt.row(j)); }
    });
    Ok(out)
}

/// `out[i][j] = acc[i][j] * sa[i] * sb[j] / 127²`, with B given as n x k.
pub fn int8_matmul_nt(a: Int8View<'_>, bt: Int8View<'_>) -> Result<DenseMatrix> {
    check_operands(&a, &bt)?;
    let (m, n) = (a.rows, bt.rows);
    let mut out = DenseMatrix::zeros(m, n);
    if n == 0 { return Ok(out); }
    let denom = (QMAX as f64) * (QMAX as f64);
    out.data_mut().par_chunks_mut(n).enumerate().for_each(|(i, row)| {
        let ar = a.row(i);
        let sa = a.scale[i] as f64;
        for (j, o) in row.iter_mut().enumerate() {
            let acc = dot_i8(ar, bt.row(j));
            // f64 keeps large accumulators exact until the single final rounding
            *o = (acc as f64 * sa * bt.scale[j] as f64 / denom) as f32;
        }
    });
    Ok(out)
}

/// Multiply row-quantized `qa` by `qb`, using the transposed layout of `qb`.
pub fn int8_matmul(qa: &QuantizedMatrix, qb: &QuantizedMatrix) -> Result<DenseMatrix> {
    let bt = qb.transposed_view().ok_or(MatmulError::MissingTransposedLayout)?;
    int8_matmul_nt(qa.view(), bt)
}
