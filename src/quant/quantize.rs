use crate::error::{MatmulError, Result};
use crate::matrix::DenseMatrix;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Largest magnitude an int8 code may take; -128 is never produced.
pub const QMAX: f32 = 127.0;

/// Quantize one value given the precomputed `127 / scale` multiplier.
/// Rounds half away from zero, then clamps.
#[inline]
pub fn quantize_value(v: f32, mul: f32) -> i8 {
    (v * mul).round().clamp(-QMAX, QMAX) as i8
}

#[inline]
pub fn dequantize_value(q: i8, scale: f32) -> f32 {
    q as f32 * scale / QMAX
}

/// Borrowed row-quantized int8 block: `rows x cols` codes with one scale per row.
#[derive(Debug, Clone, Copy)]
pub struct Int8View<'a> {
    pub rows: usize,
    pub cols: usize,
    pub data: &'a [i8],
    pub scale: &'a [f32],
}

impl<'a> Int8View<'a> {
    #[inline]
    pub fn row(&self, i: usize) -> &'a [i8] { &self.data[i * self.cols..(i + 1) * self.cols] }

    pub fn dequantize(&self) -> DenseMatrix {
        DenseMatrix::from_fn(self.rows, self.cols, |i, j| dequantize_value(self.data[i * self.cols + j], self.scale[i]))
    }

    /// Dequantize only the listed rows, in the given order.
    pub fn dequantize_rows(&self, rows: &[usize]) -> DenseMatrix {
        DenseMatrix::from_fn(rows.len(), self.cols, |r, j| {
            let i = rows[r];
            dequantize_value(self.data[i * self.cols + j], self.scale[i])
        })
    }
}

/// Second int8 layout of a matrix, quantized along its columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transposed {
    /// `cols x rows` codes of the transposed source.
    pub data: Vec<i8>,
    /// One scale per column of the source.
    pub col_scale: Vec<f32>,
}

/// Row-wise absmax int8 quantization of a dense matrix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantizedMatrix {
    pub rows: usize,
    pub cols: usize,
    pub data: Vec<i8>,
    pub row_scale: Vec<f32>,
    pub transposed: Option<Transposed>,
}

impl QuantizedMatrix {
    #[inline]
    pub fn shape(&self) -> (usize, usize) { (self.rows, self.cols) }

    pub fn view(&self) -> Int8View<'_> {
        Int8View { rows: self.rows, cols: self.cols, data: &self.data, scale: &self.row_scale }
    }

    /// The column-quantized layout as a `cols x rows` row view.
    pub fn transposed_view(&self) -> Option<Int8View<'_>> {
        self.transposed.as_ref().map(|t| Int8View { rows: self.cols, cols: self.rows, data: &t.data, scale: &t.col_scale })
    }

    pub fn dequantize(&self) -> DenseMatrix { self.view().dequantize() }
}

fn quantize_rows(rows: usize, cols: usize, src: &[f32]) -> (Vec<i8>, Vec<f32>) {
    let mut data = vec![0i8; rows * cols];
    let mut scale = vec![1f32; rows];
    if cols == 0 { return (data, scale); }
    data.par_chunks_mut(cols)
        .zip(scale.par_iter_mut())
        .zip(src.par_chunks(cols))
        .for_each(|((q, s), x)| {
            let absmax = x.iter().fold(0f32, |m, v| m.max(v.abs()));
            // all-zero rows keep scale 1 so dequantization never divides by zero
            *s = if absmax == 0.0 { 1.0 } else { absmax };
            let mul = QMAX / *s;
            for (qv, &v) in q.iter_mut().zip(x) { *qv = quantize_value(v, mul); }
        });
    (data, scale)
}

/// Quantize every row of `m` against its own absmax. With `transpose_also`
/// the transposed matrix is quantized the same way, giving per-column scales.
pub fn quantize(m: &DenseMatrix, transpose_also: bool) -> Result<QuantizedMatrix> {
    m.check_finite()?;
    let (data, row_scale) = quantize_rows(m.rows(), m.cols(), m.data());
    let transposed = if transpose_also {
        let t = m.transpose();
        let (data, col_scale) = quantize_rows(t.rows(), t.cols(), t.data());
        Some(Transposed { data, col_scale })
    } else {
        None
    };
    log::trace!("quantized {}x{} (transposed: {})", m.rows(), m.cols(), transpose_also);
    Ok(QuantizedMatrix { rows: m.rows(), cols: m.cols(), data, row_scale, transposed })
}

/// Quantize along columns only: the result is the row quantization of `mᵀ`.
pub fn quantize_columns(m: &DenseMatrix) -> Result<QuantizedMatrix> {
    quantize(&m.transpose(), false)
}

pub fn dequantize(q: &QuantizedMatrix) -> DenseMatrix { q.dequantize() }

/// Rebuild a quantized matrix from raw parts, checking its invariants.
pub fn from_parts(rows: usize, cols: usize, data: Vec<i8>, row_scale: Vec<f32>, transposed: Option<Transposed>) -> Result<QuantizedMatrix> {
    if data.len() != rows * cols || row_scale.len() != rows {
        return Err(MatmulError::InvalidBuffer { rows, cols, got: data.len() });
    }
    if let Some(t) = &transposed {
        if t.data.len() != rows * cols || t.col_scale.len() != cols {
            return Err(MatmulError::InvalidBuffer { rows: cols, cols: rows, got: t.data.len() });
        }
    }
    if data.iter().any(|&q| q == i8::MIN) || transposed.as_ref().map_or(false, |t| t.data.iter().any(|&q| q == i8::MIN)) {
        return Err(MatmulError::CodeOutOfRange);
    }
    let col_scale = transposed.as_ref().map_or(&[][..], |t| &t.col_scale[..]);
    if row_scale.iter().chain(col_scale).any(|&s| !s.is_finite() || s <= 0.0) {
        return Err(MatmulError::NonPositiveScale);
    }
    Ok(QuantizedMatrix { rows, cols, data, row_scale, transposed })
}
