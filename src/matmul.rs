use crate::config::MatmulConfig;
use crate::error::{MatmulError, Result};
use crate::matrix::DenseMatrix;
use crate::quant::{self, OutlierSet, QuantizedMatrix};
use crate::state::{MatmulState, Weight};
use rayon::prelude::*;

/// Dense `a · b` in f32, the non-decomposed baseline.
pub fn plain_matmul(a: &DenseMatrix, b: &DenseMatrix) -> Result<DenseMatrix> {
    if a.cols() != b.rows() {
        return Err(MatmulError::shape("plain_matmul", a.shape(), b.shape()));
    }
    let (k, n) = b.shape();
    let mut out = DenseMatrix::zeros(a.rows(), n);
    if n > 0 {
        out.data_mut().par_chunks_mut(n).enumerate().for_each(|(i, row)| {
            let ar = a.row(i);
            for kk in 0..k {
                let av = ar[kk];
                if av == 0.0 { continue; }
                for (o, &bv) in row.iter_mut().zip(b.row(kk)) { *o += av * bv; }
            }
        });
    }
    Ok(out.with_dtype(a.dtype().promote(b.dtype())))
}

/// Activation side of one decomposed call.
pub(crate) struct Decomposed {
    pub qa: QuantizedMatrix,
    pub outliers: OutlierSet,
    /// `a` with its outliers zeroed, still in full precision.
    pub retained: DenseMatrix,
}

impl Decomposed {
    /// What the forward pass saw of `a`: dequantized codes plus exact outliers.
    pub fn reconstruct(&self) -> DenseMatrix {
        let mut m = self.qa.dequantize();
        for e in self.outliers.entries() { m.set(e.row, e.col, m.get(e.row, e.col) + e.value); }
        m.with_dtype(self.retained.dtype())
    }
}

pub(crate) fn decompose(a: &DenseMatrix, config: &MatmulConfig) -> Result<Decomposed> {
    a.check_finite()?;
    let mut retained = a.clone();
    let outliers = quant::extract_outliers_in_place(&mut retained, config.threshold, config.outlier_policy)?;
    let qa = quant::quantize(&retained, false)?;
    Ok(Decomposed { qa, outliers, retained })
}

/// quantize → int8 GEMM → combine, for a weight already resolved by the state.
pub(crate) fn run_decomposed(a: &DenseMatrix, w: &Weight<'_>, config: &MatmulConfig) -> Result<(DenseMatrix, Decomposed)> {
    let (k, n) = w.shape();
    if a.cols() != k {
        return Err(MatmulError::shape("quantized_matmul", a.shape(), (k, n)));
    }
    let d = decompose(a, config)?;
    let mut out = quant::int8_matmul_nt(d.qa.view(), w.gemm_operand())?;
    if !d.outliers.is_empty() {
        let rows = w.gather_rows(d.outliers.columns());
        quant::combine_gathered(&mut out, &d.outliers, &rows)?;
    }
    if let Some(wo) = w.weight_outliers() {
        quant::add_weight_outliers(&mut out, &d.retained, wo)?;
    }
    log::debug!(
        "int8 matmul {}x{} · {}x{}: {} outlier columns, cached weight: {}",
        a.rows(), k, k, n, d.outliers.columns().len(), !w.trainable()
    );
    let dtype = match w.dtype() {
        Some(wd) => a.dtype().promote(wd),
        None => a.dtype(),
    };
    Ok((out.with_dtype(dtype), d))
}

/// Decomposed int8 `a · b` driven by `state`.
///
/// `b` is always given in its logical `k x n` orientation. On a cache hit only
/// its shape is read.
pub fn quantized_matmul(a: &DenseMatrix, b: &DenseMatrix, state: &mut MatmulState) -> Result<DenseMatrix> {
    let config = *state.config();
    let w = state.prepare(b)?;
    run_decomposed(a, &w, &config).map(|(out, _)| out)
}

fn check_batches(a: &[DenseMatrix], b: &[DenseMatrix]) -> Result<()> {
    if a.is_empty() || b.is_empty() { return Err(MatmulError::EmptyBatch); }
    if a.len() != b.len() {
        return Err(MatmulError::shape("bmm batch", (a.len(), 0), (b.len(), 0)));
    }
    Ok(())
}

/// Batched dense matmul over independent pairs.
pub fn plain_bmm(a: &[DenseMatrix], b: &[DenseMatrix]) -> Result<Vec<DenseMatrix>> {
    check_batches(a, b)?;
    a.par_iter().zip(b.par_iter()).map(|(x, y)| plain_matmul(x, y)).collect()
}

/// Batched decomposed matmul. Every pair gets its own state built from
/// `config`, so no scale or outlier information crosses batch elements.
pub fn quantized_bmm(a: &[DenseMatrix], b: &[DenseMatrix], config: MatmulConfig) -> Result<Vec<DenseMatrix>> {
    config.validate()?;
    check_batches(a, b)?;
    a.par_iter()
        .zip(b.par_iter())
        .map(|(x, y)| {
            let mut state = MatmulState::new(config)?;
            quantized_matmul(x, y, &mut state)
        })
        .collect()
}

/// A batch of activations against one shared weight. Rows are stacked so the
/// weight is quantized (or looked up) once, then split back per batch.
pub fn quantized_matmul_batched(a: &[DenseMatrix], b: &DenseMatrix, state: &mut MatmulState) -> Result<Vec<DenseMatrix>> {
    let stacked = DenseMatrix::vstack(a)?;
    let heights: Vec<usize> = a.iter().map(|m| m.rows()).collect();
    quantized_matmul(&stacked, b, state)?.split_rows(&heights)
}
